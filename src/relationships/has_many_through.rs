use super::{RelationContext, ResultRow, dictionary, distinct, row_value};
use crate::core::{Result, Row};
use crate::entity::{AttributeValue, Entity};
use crate::map::EntityMap;
use crate::mapper::EntityQuery;
use std::rc::Rc;

/// Column carrying the owner key of each result row.
const THROUGH_KEY: &str = "through_key";

/// Read-only relation reaching related rows through an intermediate type:
/// `intermediate.foreign_key = owner key` and
/// `related.second_key = intermediate key`.
pub struct HasManyThrough {
    pub(super) context: RelationContext,
    related: Rc<EntityMap>,
    through: Rc<EntityMap>,
}

impl HasManyThrough {
    pub(super) fn new(context: RelationContext) -> Result<Self> {
        let related = context.related_map()?;
        let through = context
            .manager
            .entity_map(context.definition.through_type())?;
        Ok(Self {
            context,
            related,
            through,
        })
    }

    fn first_key(&self) -> String {
        self.through.qualify(self.context.definition.foreign_key_name())
    }

    fn local_key(&self) -> &str {
        self.context.definition.owner_key_name()
    }

    fn constrained(&self, nested: &[String]) -> Result<EntityQuery> {
        let definition = &self.context.definition;
        let mut query = self.context.related_query(&self.related, nested)?;
        let inner = query.query_mut();
        inner.add_join(
            self.through.table_name(),
            self.through.qualify(definition.related_key_name()),
            self.related.qualify(definition.second_key_name()),
        );
        inner.add_select([
            format!("{}.*", self.related.table_name()),
            format!("{} as {}", self.first_key(), THROUGH_KEY),
        ]);
        Ok(query)
    }

    fn fetch(&self, query: &EntityQuery) -> Result<Vec<(Row, Entity)>> {
        let (models, owners): (Vec<Row>, Vec<Row>) = query
            .fetch_rows()?
            .into_iter()
            .map(|mut row| {
                let mut owner = Row::new();
                if let Some(value) = row.remove(THROUGH_KEY) {
                    owner.insert(THROUGH_KEY.to_string(), value);
                }
                (row, owner)
            })
            .unzip();
        let entities = query.hydrate(models)?;
        Ok(owners.into_iter().zip(entities).collect())
    }

    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        let key = parent.value(self.local_key());
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(self.constrained(&[])?.where_eq(self.first_key(), key)))
    }

    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        let related: Vec<Entity> = match self.add_constraints(parent)? {
            Some(query) => self.fetch(&query)?.into_iter().map(|(_, entity)| entity).collect(),
            None => Vec::new(),
        };
        self.context
            .cache_relation(&self.context.parent_key(parent), &related)?;
        Ok(AttributeValue::Collection(related))
    }

    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        let keys = distinct(parents.iter().map(|row| row_value(row, self.local_key())));
        let matches = if keys.is_empty() {
            Default::default()
        } else {
            let query = self.constrained(nested)?.where_in(self.first_key(), keys);
            dictionary(self.fetch(&query)?, THROUGH_KEY)
        };
        self.context.assign(parents, &matches, self.local_key())
    }
}
