use super::{RelationContext, ResultRow, dictionary, distinct, keys_from_hashes, row_value};
use crate::core::{Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::connection::Query;
use crate::map::EntityMap;
use crate::mapper::EntityQuery;
use std::rc::Rc;
use tracing::{Level, event};

/// Has-one, has-many and their polymorphic forms: the related rows carry
/// the owner's key (and, when polymorphic, its morph class).
pub struct HasOneOrMany {
    pub(super) context: RelationContext,
    related: Rc<EntityMap>,
}

impl HasOneOrMany {
    pub(super) fn new(context: RelationContext) -> Result<Self> {
        let related = context.related_map()?;
        Ok(Self { context, related })
    }

    fn foreign_key(&self) -> &str {
        self.context.definition.foreign_key_name()
    }

    fn local_key(&self) -> &str {
        self.context.definition.owner_key_name()
    }

    /// Morph type column and the value this owner writes into it.
    fn morph(&self) -> Option<(&str, &str)> {
        self.context
            .definition
            .morph_type_name()
            .map(|column| (column, self.context.parent.morph_class_name()))
    }

    fn constrained(&self, nested: &[String]) -> Result<EntityQuery> {
        let mut query = self.context.related_query(&self.related, nested)?;
        if let Some((column, class)) = self.morph() {
            query = query.where_eq(self.related.qualify(column), class);
        }
        Ok(query)
    }

    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        let key = parent.value(self.local_key());
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(
            self.constrained(&[])?
                .where_eq(self.related.qualify(self.foreign_key()), key),
        ))
    }

    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        let related = match self.add_constraints(parent)? {
            Some(query) if self.context.definition.is_many() => query.get()?,
            Some(query) => query.first()?.into_iter().collect(),
            None => Vec::new(),
        };
        self.context
            .cache_relation(&self.context.parent_key(parent), &related)?;
        Ok(self.context.value_for(related))
    }

    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        let keys = distinct(parents.iter().map(|row| row_value(row, self.local_key())));
        let matches = if keys.is_empty() {
            Default::default()
        } else {
            let query = self
                .constrained(nested)?
                .where_in(self.related.qualify(self.foreign_key()), keys);
            dictionary(query.get_with_rows()?, self.foreign_key())
        };
        self.context.assign(parents, &matches, self.local_key())
    }

    pub fn parent_foreign_key_pairs(&self, parent: &Entity) -> Row {
        let mut row = Row::new();
        row.insert(self.foreign_key().to_string(), parent.value(self.local_key()));
        if let Some((column, class)) = self.morph() {
            row.insert(column.to_string(), Value::Text(class.to_string()));
        }
        row
    }

    /// Points `related` at `parent`; written on the related entity's next store.
    pub fn attach_one(&self, parent: &Entity, related: &Entity) -> Result<()> {
        let manager = &self.context.manager;
        for (column, value) in self.parent_foreign_key_pairs(parent) {
            manager.set_attribute(related, &column, value);
        }
        Ok(())
    }

    /// Nulls the foreign key of the related rows behind `hashes` that still
    /// point at `parent`, in storage, in their cached snapshots and on their
    /// live instances.
    pub fn detach_many(&self, parent: &Entity, hashes: &[String]) -> Result<()> {
        let parent_key = parent.value(self.local_key());
        let keys = keys_from_hashes(hashes);
        if parent_key.is_null() || keys.is_empty() {
            return Ok(());
        }
        let related_key = self.related.key_name().unwrap_or_default().to_string();

        let mut query = Query::from(self.related.table_name())
            .where_in(related_key.clone(), keys.clone())
            .where_eq(self.foreign_key(), parent_key.clone());
        let mut values = Row::new();
        values.insert(self.foreign_key().to_string(), Value::Null);
        if let Some((column, class)) = self.morph() {
            query = query.where_eq(column, class);
            values.insert(column.to_string(), Value::Null);
        }
        let detached = self.context.manager.connection().update(&query, &values)?;
        event!(
            Level::DEBUG,
            relation = %self.context.name(),
            rows = detached,
            "detached related rows"
        );

        let manager = &self.context.manager;
        for hash in hashes {
            let Some((type_name, key)) = crate::wrapper::split_hash(hash) else {
                continue;
            };
            manager.attribute_cache_mut(type_name, |cache| {
                for (column, value) in &values {
                    cache.set_value(&key, column, value.clone());
                }
            })?;
            if let Some(entity) = manager.cached_instance(type_name, &key)?
                && entity.value(self.foreign_key()).loosely_equals(&parent_key)
            {
                for (column, value) in &values {
                    manager.set_attribute(&entity, column, value.clone());
                }
            }
        }
        Ok(())
    }
}
