use super::ProxyFactory;
use crate::core::{Result, Value};
use crate::entity::{AttributeValue, Entity};
use crate::manager::Manager;
use crate::map::EntityMap;
use crate::relationships::{ResultRow, row_value};
use std::rc::Rc;

/// Hydrates single result rows of one concrete type.
pub struct EntityBuilder<'a> {
    manager: &'a Manager,
    map: Rc<EntityMap>,
    eager: &'a [String],
}

impl<'a> EntityBuilder<'a> {
    pub fn new(manager: &'a Manager, map: Rc<EntityMap>, eager: &'a [String]) -> Self {
        Self { manager, map, eager }
    }

    pub fn build(&self, mut row: ResultRow) -> Result<Entity> {
        let key = self
            .map
            .key_name()
            .map(|key| row_value(&row, key))
            .unwrap_or(Value::Null);

        if let Some(existing) = self.manager.cached_instance(self.map.type_name(), &key)? {
            self.fill_eager(&existing, &mut row);
            return Ok(existing);
        }

        let entity = self.map.new_instance();
        self.hydrate_embeds(&entity, &mut row);
        for (name, value) in row {
            entity.set(&name, value);
        }

        if self.manager.config().lazy_loading {
            for definition in self.map.relations() {
                if !entity.has(&definition.name) {
                    entity.set(
                        &definition.name,
                        ProxyFactory::make(self.manager, &entity, definition),
                    );
                }
            }
        }

        if !key.is_null() {
            self.manager
                .instance_cache_mut(self.map.type_name(), |cache| cache.add(&entity, &key))??;
        }
        Ok(entity)
    }

    /// Hands eager results to a live instance where it holds nothing loaded.
    fn fill_eager(&self, existing: &Entity, row: &mut ResultRow) {
        for name in self.eager {
            let Some(value) = row.remove(name) else {
                continue;
            };
            let replace = match existing.get(name) {
                None => true,
                Some(AttributeValue::Lazy(lazy)) => !lazy.is_loaded() && !lazy.has_added_items(),
                Some(_) => false,
            };
            if replace {
                existing.set(name, value);
            }
        }
    }

    /// Folds prefixed columns back into value objects. All-null columns
    /// hydrate as a null attribute.
    fn hydrate_embeds(&self, entity: &Entity, row: &mut ResultRow) {
        for embed in self.map.embeds() {
            let fields: Vec<(String, Value)> = embed
                .columns
                .iter()
                .map(|column| {
                    let value = match row.remove(&embed.column(column)) {
                        Some(AttributeValue::Scalar(value)) => value,
                        _ => Value::Null,
                    };
                    (column.clone(), value)
                })
                .collect();

            if fields.iter().all(|(_, value)| value.is_null()) {
                entity.set(&embed.attribute, Value::Null);
                continue;
            }
            let object = Entity::new(&embed.type_name);
            for (column, value) in fields {
                object.set(&column, value);
            }
            entity.set(&embed.attribute, object);
        }
    }
}
