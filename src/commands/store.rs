use super::{Command, timestamp};
use crate::aggregate::Aggregate;
use crate::builder::ProxyFactory;
use crate::connection::Query;
use crate::core::{OrmError, Result, Value};
use crate::events::LifecycleEvent;
use tracing::{Level, event};

/// Progress of a [`Store`] through one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Initial,
    PreProcessed,
    Inserted,
    UpdateChecked,
    PostProcessed,
    Cached,
}

/// Writes one aggregate node, recursing into the related nodes that need it.
///
/// Local dependencies are created before the row (the row needs their keys),
/// owned dependents and join rows after it (they need the row's key).
pub struct Store<'a> {
    aggregate: &'a Aggregate,
    state: StoreState,
}

impl<'a> Store<'a> {
    pub fn new(aggregate: &'a Aggregate) -> Self {
        Self {
            aggregate,
            state: StoreState::Initial,
        }
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    fn transition(&mut self, state: StoreState) {
        event!(
            Level::TRACE,
            entity = ?self.aggregate.entity(),
            from = ?self.state,
            to = ?state,
            "store state"
        );
        self.state = state;
    }

    fn fire(&self, lifecycle: LifecycleEvent, halt: bool) -> bool {
        self.aggregate
            .manager()
            .events()
            .fire(lifecycle, self.aggregate.entity(), halt)
    }

    fn pre_store(&self) -> Result<()> {
        let map = self.aggregate.map();
        for child in self.aggregate.get_non_existing_related(map.local_relations())? {
            Store::new(child).execute()?;
        }
        self.aggregate.detach_missing_relationships()
    }

    fn key_name(&self) -> Result<&str> {
        self.aggregate.map().key_name().ok_or_else(|| {
            OrmError::mapping(format!(
                "{} has no primary key and cannot be stored on its own",
                self.aggregate.type_name()
            ))
        })
    }

    fn insert(&self) -> Result<bool> {
        if !self.fire(LifecycleEvent::Creating, true) {
            return Ok(false);
        }
        let manager = self.aggregate.manager();
        let map = self.aggregate.map();
        let entity = self.aggregate.entity();
        let key_name = self.key_name()?;

        if map.uses_timestamps() {
            let now = Value::Text(timestamp());
            let config = manager.config();
            if entity.value(&config.created_at_column).is_null() {
                manager.set_attribute(entity, &config.created_at_column, now.clone());
            }
            manager.set_attribute(entity, &config.updated_at_column, now);
        }

        let mut raw = self.aggregate.get_raw_attributes()?;
        let connection = manager.connection();
        match raw.get(key_name).filter(|key| !key.is_null()) {
            Some(_) => connection.insert(map.table_name(), raw.clone())?,
            None => {
                raw.remove(key_name);
                let key = connection.insert_get_id(
                    map.table_name(),
                    raw.clone(),
                    key_name,
                    map.sequence_name(),
                )?;
                manager.set_attribute(entity, key_name, key.clone());
                raw.insert(key_name.to_string(), key);
            }
        }

        let key = self.aggregate.key_value();
        manager.attribute_cache_mut(entity.type_name(), |cache| cache.add([&raw]))?;
        manager.instance_cache_mut(entity.type_name(), |cache| cache.add(entity, &key))??;
        event!(
            Level::DEBUG,
            entity_type = %entity.type_name(),
            entity_key = %key,
            "row inserted"
        );

        self.fire(LifecycleEvent::Created, false);
        Ok(true)
    }

    fn update(&self) -> Result<bool> {
        if !self.fire(LifecycleEvent::Updating, true) {
            return Ok(false);
        }
        let manager = self.aggregate.manager();
        let map = self.aggregate.map();
        let entity = self.aggregate.entity();
        let key_name = self.key_name()?;

        if map.uses_timestamps() {
            let column = &manager.config().updated_at_column;
            manager.set_attribute(entity, column, Value::Text(timestamp()));
        }

        let dirty = self.aggregate.get_dirty_raw_attributes()?;
        let key = self.aggregate.key_value();
        let query = Query::from(map.table_name()).where_eq(key_name, key.clone());
        manager.connection().update(&query, &dirty)?;
        event!(
            Level::DEBUG,
            entity_type = %entity.type_name(),
            entity_key = %key,
            columns = dirty.len(),
            "row updated"
        );

        self.fire(LifecycleEvent::Updated, false);
        Ok(true)
    }

    fn post_store(&self) -> Result<()> {
        let aggregate = self.aggregate;
        let map = aggregate.map();
        for child in aggregate.get_non_existing_related(map.foreign_relations())? {
            Store::new(child).execute()?;
        }

        aggregate.update_pivot_records()?;

        for child in aggregate.children() {
            if child.exists()? && child.needs_store()? {
                Store::new(child).execute()?;
            }
        }

        let manager = aggregate.manager();
        if manager.config().lazy_loading {
            let entity = aggregate.entity();
            for definition in map.relations() {
                if !entity.has(&definition.name) {
                    let proxy = ProxyFactory::make(manager, entity, definition);
                    manager.set_attribute(entity, &definition.name, proxy);
                }
            }
        }
        Ok(())
    }
}

impl Command for Store<'_> {
    fn name(&self) -> &'static str {
        "STORE"
    }

    fn execute(&mut self) -> Result<bool> {
        self.key_name()?;
        if !self.fire(LifecycleEvent::Storing, true) {
            return Ok(false);
        }

        self.pre_store()?;
        self.transition(StoreState::PreProcessed);

        if !self.aggregate.exists()? {
            if !self.insert()? {
                return Ok(false);
            }
            self.transition(StoreState::Inserted);
        }

        if self.aggregate.is_dirty()? && !self.update()? {
            return Ok(false);
        }
        self.transition(StoreState::UpdateChecked);

        self.post_store()?;
        self.transition(StoreState::PostProcessed);

        let manager = self.aggregate.manager();
        manager.attribute_cache_mut(self.aggregate.type_name(), |cache| cache.refresh(self.aggregate))??;
        self.transition(StoreState::Cached);

        self.fire(LifecycleEvent::Stored, false);
        Ok(true)
    }
}
