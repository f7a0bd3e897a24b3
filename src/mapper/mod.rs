// ============================================================================
// Mapper
// ============================================================================
//
// Per-type entry point: queries hydrate through the result builder, stores
// and deletes run their command inside a session transaction so a failure
// anywhere in the graph leaves storage, caches and entities as they were.
//
// ============================================================================

pub mod query;

pub use query::EntityQuery;

use crate::aggregate::Aggregate;
use crate::commands::{Command, Delete, Store};
use crate::core::{OrmError, Result, Value};
use crate::entity::Entity;
use crate::manager::Manager;
use crate::map::EntityMap;
use crate::wrapper::Wrapper;
use std::rc::Rc;
use tracing::{Level, event, info_span};

#[derive(Clone)]
pub struct Mapper {
    manager: Manager,
    map: Rc<EntityMap>,
}

impl Mapper {
    pub fn new(manager: Manager, map: Rc<EntityMap>) -> Self {
        Self { manager, map }
    }

    pub fn entity_map(&self) -> &Rc<EntityMap> {
        &self.map
    }

    pub fn new_instance(&self) -> Entity {
        self.map.new_instance()
    }

    fn check_type(&self, entity: &Entity) -> Result<()> {
        if self.manager.registry().is_a(entity.type_name(), self.map.type_name()) {
            return Ok(());
        }
        Err(OrmError::mapping(format!(
            "mapper for '{}' cannot handle a '{}'",
            self.map.type_name(),
            entity.type_name()
        )))
    }

    fn store_one(&self, entity: &Entity) -> Result<bool> {
        self.check_type(entity)?;
        let span = info_span!(
            "orm.store",
            entity_type = %entity.type_name(),
            entity_key = %entity.value(self.map.key_name().unwrap_or_default())
        );
        let _enter = span.enter();

        let aggregate = Aggregate::new(&self.manager, entity)?;
        let stored = Store::new(&aggregate).execute()?;
        event!(Level::DEBUG, stored, "store finished");
        Ok(stored)
    }

    fn delete_one(&self, entity: &Entity) -> Result<bool> {
        self.check_type(entity)?;
        let span = info_span!(
            "orm.delete",
            entity_type = %entity.type_name(),
            entity_key = %entity.value(self.map.key_name().unwrap_or_default())
        );
        let _enter = span.enter();

        let map = self.manager.entity_map(entity.type_name())?;
        Delete::new(&self.manager, Wrapper::new(entity.clone(), map)).execute()
    }

    /// Inserts or updates `entity` and everything reachable from it.
    /// `Ok(false)` when a listener vetoed the root.
    pub fn store(&self, entity: &Entity) -> Result<bool> {
        self.manager.transaction(|| self.store_one(entity))
    }

    /// Stores every entity in one transaction; returns how many were stored.
    pub fn store_many(&self, entities: &[Entity]) -> Result<usize> {
        self.manager.transaction(|| {
            let mut stored = 0;
            for entity in entities {
                if self.store_one(entity)? {
                    stored += 1;
                }
            }
            Ok(stored)
        })
    }

    pub fn delete(&self, entity: &Entity) -> Result<bool> {
        self.manager.transaction(|| self.delete_one(entity))
    }

    pub fn delete_many(&self, entities: &[Entity]) -> Result<usize> {
        self.manager.transaction(|| {
            let mut deleted = 0;
            for entity in entities {
                if self.delete_one(entity)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    pub fn query(&self) -> EntityQuery {
        EntityQuery::new(self.manager.clone(), self.map.clone())
    }

    pub fn with<I, S>(&self, relations: I) -> EntityQuery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query().with(relations)
    }

    pub fn all(&self) -> Result<Vec<Entity>> {
        self.query().get()
    }

    pub fn find(&self, key: impl Into<Value>) -> Result<Option<Entity>> {
        self.query().find(key)
    }

    pub fn find_or_fail(&self, key: impl Into<Value>) -> Result<Entity> {
        let key = key.into();
        self.find(key.clone())?.ok_or_else(|| OrmError::EntityNotFound {
            entity: self.map.type_name().to_string(),
            key: key.to_string(),
        })
    }
}
