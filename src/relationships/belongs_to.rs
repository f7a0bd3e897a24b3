use super::{RelationContext, ResultRow, dictionary, distinct, row_value};
use crate::core::{Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::map::EntityMap;
use crate::mapper::EntityQuery;
use std::rc::Rc;

/// The owner row carries the related key.
pub struct BelongsTo {
    pub(super) context: RelationContext,
    related: Rc<EntityMap>,
}

impl BelongsTo {
    pub(super) fn new(context: RelationContext) -> Result<Self> {
        let related = context.related_map()?;
        Ok(Self { context, related })
    }

    fn foreign_key(&self) -> &str {
        self.context.definition.foreign_key_name()
    }

    fn owner_key(&self) -> &str {
        self.context.definition.owner_key_name()
    }

    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        let value = parent.value(self.foreign_key());
        if value.is_null() {
            return Ok(None);
        }
        let query = self.context.related_query(&self.related, &[])?;
        Ok(Some(query.where_eq(self.related.qualify(self.owner_key()), value)))
    }

    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        let parent_key = self.context.parent_key(parent);
        let value = parent.value(self.foreign_key());
        if value.is_null() {
            self.context.cache_relation(&parent_key, &[])?;
            return Ok(AttributeValue::null());
        }

        // The identity map is keyed by primary key, so it only answers for
        // relations that point at it.
        let cached = if self.related.key_name() == Some(self.owner_key()) {
            self.context
                .manager
                .cached_instance(self.related.type_name(), &value)?
        } else {
            None
        };
        let related = match cached {
            Some(entity) => Some(entity),
            None => match self.add_constraints(parent)? {
                Some(query) => query.first()?,
                None => None,
            },
        };

        let related: Vec<Entity> = related.into_iter().collect();
        self.context.cache_relation(&parent_key, &related)?;
        Ok(self.context.value_for(related))
    }

    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        let keys = distinct(parents.iter().map(|row| row_value(row, self.foreign_key())));
        let matches = if keys.is_empty() {
            Default::default()
        } else {
            let query = self
                .context
                .related_query(&self.related, nested)?
                .where_in(self.related.qualify(self.owner_key()), keys);
            dictionary(query.get_with_rows()?, self.owner_key())
        };
        self.context.assign(parents, &matches, self.foreign_key())
    }

    pub fn foreign_key_pairs(&self, related: Option<&Entity>) -> Row {
        let value = related
            .map(|entity| entity.value(self.owner_key()))
            .unwrap_or(Value::Null);
        let mut row = Row::new();
        row.insert(self.foreign_key().to_string(), value);
        row
    }

    /// Points `parent` at `related`.
    pub fn associate(&self, parent: &Entity, related: &Entity) -> Result<()> {
        let manager = &self.context.manager;
        manager.set_attribute(parent, self.foreign_key(), related.value(self.owner_key()));
        manager.set_attribute(parent, self.context.name(), related);
        Ok(())
    }

    pub fn dissociate(&self, parent: &Entity) {
        let manager = &self.context.manager;
        manager.set_attribute(parent, self.foreign_key(), Value::Null);
        manager.set_attribute(parent, self.context.name(), Value::Null);
    }
}
