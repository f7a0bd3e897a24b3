use super::{RelationContext, ResultRow, dictionary, distinct, row_value};
use crate::core::{Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::map::EntityMap;
use crate::mapper::EntityQuery;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Polymorphic belongs-to: the owner row carries the related key and the
/// morph class of the related type.
pub struct MorphTo {
    pub(super) context: RelationContext,
}

impl MorphTo {
    pub(super) fn new(context: RelationContext) -> Self {
        Self { context }
    }

    fn foreign_key(&self) -> &str {
        self.context.definition.foreign_key_name()
    }

    fn morph_type(&self) -> &str {
        self.context.definition.morph_type_name().unwrap_or_default()
    }

    /// Entity map behind a morph class value.
    fn target(&self, class: &Value) -> Result<Option<Rc<EntityMap>>> {
        if class.is_null() {
            return Ok(None);
        }
        let manager = &self.context.manager;
        let type_name = manager.registry().type_for_morph_class(&class.to_string())?;
        manager.entity_map(type_name).map(Some)
    }

    fn target_key(map: &EntityMap) -> &str {
        map.key_name().unwrap_or_default()
    }

    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        let key = parent.value(self.foreign_key());
        let Some(target) = self.target(&parent.value(self.morph_type()))? else {
            return Ok(None);
        };
        if key.is_null() {
            return Ok(None);
        }
        let query = self.context.related_query(&target, &[])?;
        Ok(Some(query.where_eq(target.qualify(Self::target_key(&target)), key)))
    }

    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        let parent_key = self.context.parent_key(parent);
        let key = parent.value(self.foreign_key());
        let target = self.target(&parent.value(self.morph_type()))?;

        let related = match target {
            Some(target) if !key.is_null() => {
                match self.context.manager.cached_instance(target.type_name(), &key)? {
                    Some(entity) => Some(entity),
                    None => match self.add_constraints(parent)? {
                        Some(query) => query.first()?,
                        None => None,
                    },
                }
            }
            _ => None,
        };

        let related: Vec<Entity> = related.into_iter().collect();
        self.context.cache_relation(&parent_key, &related)?;
        Ok(self.context.value_for(related))
    }

    /// One query per morph class found among the parents.
    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        let mut classes: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for row in parents.iter() {
            let class = row_value(row, self.morph_type());
            let key = row_value(row, self.foreign_key());
            if !class.is_null() && !key.is_null() {
                classes.entry(class.to_string()).or_default().push(key);
            }
        }

        let mut matches: BTreeMap<String, BTreeMap<String, Vec<Entity>>> = BTreeMap::new();
        for (class, keys) in classes {
            let Some(target) = self.target(&Value::Text(class.clone()))? else {
                continue;
            };
            let key_name = Self::target_key(&target).to_string();
            let query = self
                .context
                .related_query(&target, nested)?
                .where_in(target.qualify(&key_name), distinct(keys));
            matches.insert(class, dictionary(query.get_with_rows()?, &key_name));
        }

        for row in parents.iter_mut() {
            let class = row_value(row, self.morph_type());
            let key = row_value(row, self.foreign_key());
            let matched = if class.is_null() || key.is_null() {
                Vec::new()
            } else {
                matches
                    .get(&class.to_string())
                    .and_then(|dictionary| dictionary.get(&key.to_string()))
                    .cloned()
                    .unwrap_or_default()
            };
            self.context
                .cache_relation(&self.context.parent_row_key(row), &matched)?;
            row.insert(self.context.name().to_string(), self.context.value_for(matched));
        }
        Ok(())
    }

    pub fn foreign_key_pairs(&self, related: Option<&Entity>) -> Result<Row> {
        let mut row = Row::new();
        match related {
            Some(entity) => {
                let map = self.context.manager.entity_map(entity.type_name())?;
                row.insert(
                    self.foreign_key().to_string(),
                    entity.value(Self::target_key(&map)),
                );
                row.insert(
                    self.morph_type().to_string(),
                    Value::Text(map.morph_class_name().to_string()),
                );
            }
            None => {
                row.insert(self.foreign_key().to_string(), Value::Null);
                row.insert(self.morph_type().to_string(), Value::Null);
            }
        }
        Ok(row)
    }

    /// Points `parent` at `related`, whatever its type.
    pub fn associate(&self, parent: &Entity, related: &Entity) -> Result<()> {
        let manager = &self.context.manager;
        for (column, value) in self.foreign_key_pairs(Some(related))? {
            manager.set_attribute(parent, &column, value);
        }
        manager.set_attribute(parent, self.context.name(), related);
        Ok(())
    }
}
