use super::{Command, timestamp};
use crate::connection::Query;
use crate::core::{OrmError, Result, Row, Value};
use crate::events::LifecycleEvent;
use crate::manager::Manager;
use crate::wrapper::Wrapper;
use tracing::{Level, event};

/// Removes one entity's row, or marks it trashed when the type soft deletes.
pub struct Delete {
    manager: Manager,
    wrapper: Wrapper,
}

impl Delete {
    pub fn new(manager: &Manager, wrapper: Wrapper) -> Self {
        Self {
            manager: manager.clone(),
            wrapper,
        }
    }

    fn soft_delete(&self, key_name: &str, key: &Value) -> Result<()> {
        let map = self.wrapper.map();
        let entity = self.wrapper.entity();
        let column = self.manager.config().deleted_at_column.clone();
        let now = Value::Text(timestamp());

        let mut values = Row::new();
        values.insert(column.clone(), now.clone());
        let query = Query::from(map.table_name()).where_eq(key_name, key.clone());
        self.manager.connection().update(&query, &values)?;

        self.manager.set_attribute(entity, &column, now.clone());
        self.manager
            .attribute_cache_mut(entity.type_name(), |cache| cache.set_value(key, &column, now))?;
        Ok(())
    }

    fn hard_delete(&self, key_name: &str, key: &Value) -> Result<()> {
        let map = self.wrapper.map();
        let query = Query::from(map.table_name()).where_eq(key_name, key.clone());
        self.manager.connection().delete(&query)?;
        Ok(())
    }
}

impl Command for Delete {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn execute(&mut self) -> Result<bool> {
        let entity = self.wrapper.entity().clone();
        if !self.manager.events().fire(LifecycleEvent::Deleting, &entity, true) {
            event!(Level::DEBUG, entity = ?entity, "delete vetoed");
            return Ok(false);
        }

        let key = self.wrapper.key_value();
        let key_name = match self.wrapper.key_name() {
            Some(key_name) if !key.is_null() => key_name.to_string(),
            _ => {
                return Err(OrmError::mapping(format!(
                    "cannot delete {}: null primary key",
                    entity.type_name()
                )));
            }
        };

        let soft = self.wrapper.map().uses_soft_deletes();
        if soft {
            self.soft_delete(&key_name, &key)?;
        } else {
            self.hard_delete(&key_name, &key)?;
        }
        event!(
            Level::DEBUG,
            entity_type = %entity.type_name(),
            entity_key = %key,
            soft,
            "row deleted"
        );

        self.manager.events().fire(LifecycleEvent::Deleted, &entity, false);

        if !soft {
            self.manager.set_attribute(&entity, &key_name, Value::Null);
            self.manager
                .instance_cache_mut(entity.type_name(), |cache| cache.remove(&key))?;
            self.manager
                .attribute_cache_mut(entity.type_name(), |cache| cache.forget(&key))?;
        }
        Ok(true)
    }
}
