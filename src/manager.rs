// ============================================================================
// Manager
// ============================================================================
//
// Session object tying the registry, the storage connection, the event
// dispatcher and the per-type caches together. Cheap to clone; every clone
// is the same session. Not `Send`: one session per unit of work.
//
// ============================================================================

use crate::cache::{AttributeCache, InstanceCache};
use crate::config::ManagerConfig;
use crate::connection::Connection;
use crate::core::{OrmError, Result, Value};
use crate::entity::{AttributeValue, Entity};
use crate::events::{EventDispatcher, Events};
use crate::map::{EntityMap, Registry};
use crate::mapper::Mapper;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{Level, event};

type AttributeCaches = BTreeMap<String, AttributeCache>;
type InstanceCaches = BTreeMap<String, InstanceCache>;

/// Attribute write made during a transaction, undone on rollback.
struct JournalEntry {
    entity: Entity,
    attribute: String,
    previous: Option<AttributeValue>,
}

struct TransactionState {
    attribute_caches: AttributeCaches,
    instance_caches: InstanceCaches,
    journal: Vec<JournalEntry>,
}

struct ManagerInner {
    registry: Registry,
    connection: Rc<dyn Connection>,
    events: Rc<dyn EventDispatcher>,
    config: ManagerConfig,
    attribute_caches: RefCell<AttributeCaches>,
    instance_caches: RefCell<InstanceCaches>,
    transaction: RefCell<Option<TransactionState>>,
}

#[derive(Clone)]
pub struct Manager(Rc<ManagerInner>);

/// Non-owning session handle held by lazy proxies.
#[derive(Clone)]
pub struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub fn upgrade(&self) -> Option<Manager> {
        self.0.upgrade().map(Manager)
    }
}

pub struct ManagerBuilder {
    registry: Registry,
    connection: Rc<dyn Connection>,
    events: Option<Rc<dyn EventDispatcher>>,
    config: ManagerConfig,
}

impl ManagerBuilder {
    pub fn events(mut self, events: Rc<dyn EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and boots the registry.
    pub fn build(self) -> Result<Manager> {
        let ManagerBuilder {
            mut registry,
            connection,
            events,
            config,
        } = self;
        config.validate()?;
        registry.boot(&config)?;
        event!(
            Level::DEBUG,
            types = registry.type_names().count(),
            "mapping session ready"
        );
        Ok(Manager(Rc::new(ManagerInner {
            registry,
            connection,
            events: events.unwrap_or_else(|| Rc::new(Events::new())),
            config,
            attribute_caches: RefCell::new(BTreeMap::new()),
            instance_caches: RefCell::new(BTreeMap::new()),
            transaction: RefCell::new(None),
        })))
    }
}

impl Manager {
    pub fn builder(registry: Registry, connection: Rc<dyn Connection>) -> ManagerBuilder {
        ManagerBuilder {
            registry,
            connection,
            events: None,
            config: ManagerConfig::default(),
        }
    }

    /// Session with the default dispatcher and configuration.
    pub fn new(registry: Registry, connection: Rc<dyn Connection>) -> Result<Self> {
        Self::builder(registry, connection).build()
    }

    pub fn downgrade(&self) -> WeakManager {
        WeakManager(Rc::downgrade(&self.0))
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn connection(&self) -> &dyn Connection {
        self.0.connection.as_ref()
    }

    pub fn events(&self) -> &dyn EventDispatcher {
        self.0.events.as_ref()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.0.config
    }

    pub fn entity_map(&self, type_name: &str) -> Result<Rc<EntityMap>> {
        self.0.registry.get(type_name)
    }

    pub fn mapper(&self, type_name: &str) -> Result<Mapper> {
        Ok(Mapper::new(self.clone(), self.entity_map(type_name)?))
    }

    /// Mapper for the runtime type of `entity`.
    pub fn mapper_for(&self, entity: &Entity) -> Result<Mapper> {
        self.mapper(entity.type_name())
    }

    pub fn new_entity(&self, type_name: &str) -> Result<Entity> {
        Ok(self.entity_map(type_name)?.new_instance())
    }

    pub fn store(&self, entity: &Entity) -> Result<bool> {
        self.mapper_for(entity)?.store(entity)
    }

    pub fn delete(&self, entity: &Entity) -> Result<bool> {
        self.mapper_for(entity)?.delete(entity)
    }

    pub fn find(&self, type_name: &str, key: impl Into<Value>) -> Result<Option<Entity>> {
        self.mapper(type_name)?.find(key)
    }

    // -- caches --------------------------------------------------------------

    fn ensure_caches(&self, type_name: &str) -> Result<()> {
        if self.0.attribute_caches.borrow().contains_key(type_name) {
            return Ok(());
        }
        let map = self.entity_map(type_name)?;
        self.0
            .attribute_caches
            .borrow_mut()
            .insert(type_name.to_string(), AttributeCache::new(type_name, map.key_name()));
        self.0
            .instance_caches
            .borrow_mut()
            .insert(type_name.to_string(), InstanceCache::new(type_name));
        Ok(())
    }

    /// Runs `f` against the attribute cache of `type_name`. The closure must
    /// not call back into the session's caches.
    pub fn attribute_cache<R>(&self, type_name: &str, f: impl FnOnce(&AttributeCache) -> R) -> Result<R> {
        self.ensure_caches(type_name)?;
        let caches = self.0.attribute_caches.borrow();
        match caches.get(type_name) {
            Some(cache) => Ok(f(cache)),
            None => Err(OrmError::cache(format!("no attribute cache for '{}'", type_name))),
        }
    }

    pub fn attribute_cache_mut<R>(
        &self,
        type_name: &str,
        f: impl FnOnce(&mut AttributeCache) -> R,
    ) -> Result<R> {
        self.ensure_caches(type_name)?;
        let mut caches = self.0.attribute_caches.borrow_mut();
        match caches.get_mut(type_name) {
            Some(cache) => Ok(f(cache)),
            None => Err(OrmError::cache(format!("no attribute cache for '{}'", type_name))),
        }
    }

    pub fn instance_cache<R>(&self, type_name: &str, f: impl FnOnce(&InstanceCache) -> R) -> Result<R> {
        self.ensure_caches(type_name)?;
        let caches = self.0.instance_caches.borrow();
        match caches.get(type_name) {
            Some(cache) => Ok(f(cache)),
            None => Err(OrmError::cache(format!("no instance cache for '{}'", type_name))),
        }
    }

    pub fn instance_cache_mut<R>(
        &self,
        type_name: &str,
        f: impl FnOnce(&mut InstanceCache) -> R,
    ) -> Result<R> {
        self.ensure_caches(type_name)?;
        let mut caches = self.0.instance_caches.borrow_mut();
        match caches.get_mut(type_name) {
            Some(cache) => Ok(f(cache)),
            None => Err(OrmError::cache(format!("no instance cache for '{}'", type_name))),
        }
    }

    /// Live instance for `key`, if one was loaded or stored in this session.
    pub fn cached_instance(&self, type_name: &str, key: &Value) -> Result<Option<Entity>> {
        if key.is_null() {
            return Ok(None);
        }
        self.instance_cache(type_name, |cache| cache.get(key))?
    }

    /// Forgets every cached snapshot and instance. Entities already handed
    /// out stay valid but are treated as new on their next store.
    pub fn clear_caches(&self) {
        self.0.attribute_caches.borrow_mut().clear();
        self.0.instance_caches.borrow_mut().clear();
        event!(Level::DEBUG, "session caches cleared");
    }

    // -- entity writes -------------------------------------------------------

    /// Sets an attribute on behalf of the engine. Inside a transaction the
    /// previous value is remembered and restored on rollback.
    pub fn set_attribute(&self, entity: &Entity, name: &str, value: impl Into<AttributeValue>) {
        if let Some(state) = self.0.transaction.borrow_mut().as_mut() {
            state.journal.push(JournalEntry {
                entity: entity.clone(),
                attribute: name.to_string(),
                previous: entity.get(name),
            });
        }
        entity.set(name, value);
    }

    // -- transactions --------------------------------------------------------

    pub fn in_transaction(&self) -> bool {
        self.0.connection.transaction_level() > 0
    }

    /// Runs `f` inside a storage transaction.
    ///
    /// Nested calls join the enclosing transaction. When the outermost call
    /// fails, storage is rolled back and the caches and every attribute the
    /// engine wrote on entities are restored to their state at `begin`.
    pub fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let outermost = self.0.connection.transaction_level() == 0;
        self.0.connection.begin_transaction()?;
        if outermost {
            *self.0.transaction.borrow_mut() = Some(TransactionState {
                attribute_caches: self.0.attribute_caches.borrow().clone(),
                instance_caches: self.0.instance_caches.borrow().clone(),
                journal: Vec::new(),
            });
            event!(Level::DEBUG, "transaction started");
        }

        match f() {
            Ok(value) => {
                if let Err(err) = self.0.connection.commit() {
                    if outermost {
                        self.restore_after_rollback();
                    }
                    return Err(err);
                }
                if outermost {
                    self.0.transaction.borrow_mut().take();
                    event!(Level::DEBUG, "transaction committed");
                }
                Ok(value)
            }
            Err(err) => {
                if outermost {
                    event!(Level::WARN, error = %err, "rolling back transaction");
                    let rollback = self.0.connection.rollback();
                    self.restore_after_rollback();
                    rollback?;
                }
                Err(err)
            }
        }
    }

    fn restore_after_rollback(&self) {
        let Some(state) = self.0.transaction.borrow_mut().take() else {
            return;
        };
        *self.0.attribute_caches.borrow_mut() = state.attribute_caches;
        *self.0.instance_caches.borrow_mut() = state.instance_caches;
        for entry in state.journal.into_iter().rev() {
            match entry.previous {
                Some(value) => entry.entity.set(&entry.attribute, value),
                None => entry.entity.unset(&entry.attribute),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnection;

    fn manager() -> Manager {
        let registry = Registry::new().register(EntityMap::new("User"));
        Manager::new(registry, Rc::new(MemoryConnection::new())).unwrap()
    }

    #[test]
    fn test_unknown_type_is_a_mapping_error() {
        assert!(manager().entity_map("Ghost").unwrap_err().is_mapping());
    }

    #[test]
    fn test_rollback_restores_journaled_attributes() {
        let manager = manager();
        let user = Entity::new("User").with("name", "alice");

        let result: Result<()> = manager.transaction(|| {
            manager.set_attribute(&user, "name", "changed");
            manager.set_attribute(&user, "id", 9);
            Err(OrmError::Storage("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(user.value("name"), Value::Text("alice".into()));
        assert!(!user.has("id"));
        assert!(!manager.in_transaction());
    }

    #[test]
    fn test_rollback_restores_caches() {
        let manager = manager();
        let user = Entity::new("User");
        let _ = manager.transaction(|| -> Result<()> {
            manager.instance_cache_mut("User", |cache| cache.add(&user, &Value::Integer(1)))??;
            Err(OrmError::Storage("boom".into()))
        });
        assert!(manager.cached_instance("User", &Value::Integer(1)).unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Manager::builder(Registry::new(), Rc::new(MemoryConnection::new()))
            .config(ManagerConfig::new().default_key_name(""))
            .build();
        assert!(matches!(result, Err(OrmError::Config(_))));
    }
}
