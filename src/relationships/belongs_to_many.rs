use super::{RelationContext, ResultRow, distinct, keys_from_hashes, row_value};
use crate::connection::Query;
use crate::core::{OrmError, Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::map::{EntityMap, RelationDefinition, RelationKind};
use crate::manager::Manager;
use crate::mapper::EntityQuery;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{Level, event};

/// Attribute under which a related entity exposes its join row.
pub const PIVOT_ATTRIBUTE: &str = "pivot";

/// Type name given to join-row sub-entities.
const PIVOT_TYPE: &str = "Pivot";

/// Join-row columns that tie an association to `parent`: its owner key under
/// the foreign key column and, for polymorphic join tables, its morph class.
pub fn pivot_owner(manager: &Manager, parent: &Entity, definition: &RelationDefinition) -> Result<Row> {
    let mut owner = Row::new();
    owner.insert(
        definition.foreign_key_name().to_string(),
        parent.value(definition.owner_key_name()),
    );
    if definition.kind == RelationKind::MorphToMany
        && let Some(column) = definition.morph_type_name()
    {
        let side = if definition.inverse {
            definition.related_type()
        } else {
            parent.type_name()
        };
        let class = manager.entity_map(side)?.morph_class_name().to_string();
        owner.insert(column.to_string(), Value::Text(class));
    }
    Ok(owner)
}

/// Descriptive join-row columns of `entity` as seen from the parent
/// identified by `owner` (see [`pivot_owner`]): everything on its pivot
/// sub-entity except the columns that identify the association.
///
/// The sub-entity lives on the shared instance, so it may describe the join
/// row of another parent; that case yields `None`. A pivot that does not
/// name a parent yet was built by the caller and belongs to whoever stores it.
pub fn pivot_attributes(entity: &Entity, definition: &RelationDefinition, owner: &Row) -> Option<Row> {
    match owned_pivot(entity, owner) {
        Ownership::Owned(pivot) => Some(descriptive_columns(&scalar_row(&pivot), definition)),
        Ownership::Missing => Some(Row::new()),
        Ownership::Foreign => None,
    }
}

enum Ownership {
    Owned(Entity),
    Missing,
    Foreign,
}

fn owned_pivot(entity: &Entity, owner: &Row) -> Ownership {
    let Some(AttributeValue::Entity(pivot)) = entity.get(PIVOT_ATTRIBUTE) else {
        return Ownership::Missing;
    };
    let foreign = owner.iter().any(|(column, expected)| {
        let actual = pivot.value(column);
        !actual.is_null() && !actual.loosely_equals(expected)
    });
    if foreign {
        Ownership::Foreign
    } else {
        Ownership::Owned(pivot)
    }
}

fn scalar_row(entity: &Entity) -> Row {
    entity
        .keys()
        .into_iter()
        .filter_map(|column| match entity.get(&column) {
            Some(AttributeValue::Scalar(value)) => Some((column, value)),
            _ => None,
        })
        .collect()
}

/// `row` without the columns that identify the association.
fn descriptive_columns(row: &Row, definition: &RelationDefinition) -> Row {
    let identifying = definition.pivot_key_columns();
    row.iter()
        .filter(|(column, _)| !identifying.contains(&column.as_str()))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

/// Many-to-many through a join table, polymorphic or not.
pub struct BelongsToMany {
    pub(super) context: RelationContext,
    related: Rc<EntityMap>,
}

impl BelongsToMany {
    pub(super) fn new(context: RelationContext) -> Result<Self> {
        let related = context.related_map()?;
        Ok(Self { context, related })
    }

    fn definition(&self) -> &RelationDefinition {
        &self.context.definition
    }

    fn table(&self) -> &str {
        self.definition().pivot_table_name()
    }

    fn pivot_column(&self, column: &str) -> String {
        format!("{}.{}", self.table(), column)
    }

    fn foreign_key(&self) -> &str {
        self.definition().foreign_key_name()
    }

    fn related_pivot_key(&self) -> &str {
        self.definition().related_pivot_key_name()
    }

    fn parent_key_name(&self) -> &str {
        self.definition().owner_key_name()
    }

    /// Morph type column and the class stored in it. The class names the
    /// side of the association that is polymorphic.
    fn morph(&self) -> Option<(&str, &str)> {
        if self.definition().kind != RelationKind::MorphToMany {
            return None;
        }
        let class = if self.definition().inverse {
            self.related.morph_class_name()
        } else {
            self.context.parent.morph_class_name()
        };
        self.definition().morph_type_name().map(|column| (column, class))
    }

    /// Related query joined to the join table, selecting the join columns
    /// under the configured prefix.
    fn constrained(&self, nested: &[String]) -> Result<EntityQuery> {
        let prefix = self.context.manager.config().pivot_prefix.clone();
        let mut query = self.context.related_query(&self.related, nested)?;

        let mut columns = vec![self.foreign_key().to_string(), self.related_pivot_key().to_string()];
        if let Some((morph_type, _)) = self.morph() {
            columns.push(morph_type.to_string());
        }
        columns.extend(self.definition().pivot_columns.iter().cloned());

        let inner = query.query_mut();
        inner.add_join(
            self.table(),
            self.pivot_column(self.related_pivot_key()),
            self.related.qualify(self.definition().related_key_name()),
        );
        inner.add_select(
            std::iter::once(format!("{}.*", self.related.table_name())).chain(
                columns
                    .iter()
                    .map(|column| format!("{} as {}{}", self.pivot_column(column), prefix, column)),
            ),
        );

        if let Some((morph_type, class)) = self.morph() {
            query = query.where_eq(self.pivot_column(morph_type), class);
        }
        Ok(query)
    }

    /// Runs `query`, hydrates the related entities and hangs a pivot
    /// sub-entity carrying the join columns on each of them.
    fn fetch(&self, query: &EntityQuery) -> Result<Vec<(Row, Entity)>> {
        let prefix = self.context.manager.config().pivot_prefix.clone();
        let (models, pivots): (Vec<Row>, Vec<Row>) = query
            .fetch_rows()?
            .into_iter()
            .map(|row| {
                let mut model = Row::new();
                let mut pivot = Row::new();
                for (column, value) in row {
                    match column.strip_prefix(&prefix) {
                        Some(stripped) => {
                            pivot.insert(stripped.to_string(), value);
                        }
                        None => {
                            model.insert(column, value);
                        }
                    }
                }
                (model, pivot)
            })
            .unzip();

        let entities = query.hydrate(models)?;
        let mut pairs = Vec::with_capacity(entities.len());
        for (pivot, entity) in pivots.into_iter().zip(entities) {
            let sub = Entity::new(PIVOT_TYPE);
            for (column, value) in &pivot {
                sub.set(column, value.clone());
            }
            self.context.manager.set_attribute(&entity, PIVOT_ATTRIBUTE, sub);
            pairs.push((pivot, entity));
        }
        Ok(pairs)
    }

    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        let key = parent.value(self.parent_key_name());
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(
            self.constrained(&[])?
                .where_eq(self.pivot_column(self.foreign_key()), key),
        ))
    }

    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        let pairs = match self.add_constraints(parent)? {
            Some(query) => self.fetch(&query)?,
            None => Vec::new(),
        };
        self.cache_with_pivots(&self.context.parent_key(parent), &pairs)?;
        Ok(AttributeValue::Collection(
            pairs.into_iter().map(|(_, entity)| entity).collect(),
        ))
    }

    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        let keys = distinct(parents.iter().map(|row| row_value(row, self.parent_key_name())));
        let mut matches: BTreeMap<String, Vec<(Row, Entity)>> = BTreeMap::new();
        if !keys.is_empty() {
            let query = self
                .constrained(nested)?
                .where_in(self.pivot_column(self.foreign_key()), keys);
            for (pivot, entity) in self.fetch(&query)? {
                if let Some(owner) = pivot.get(self.foreign_key()).filter(|v| !v.is_null()) {
                    matches.entry(owner.to_string()).or_default().push((pivot, entity));
                }
            }
        }

        for parent in parents.iter_mut() {
            let owner = row_value(parent, self.parent_key_name());
            let matched = if owner.is_null() {
                Vec::new()
            } else {
                matches.get(&owner.to_string()).cloned().unwrap_or_default()
            };
            self.cache_with_pivots(&self.context.parent_row_key(parent), &matched)?;
            let related = matched.into_iter().map(|(_, entity)| entity).collect();
            parent.insert(self.context.name().to_string(), self.context.value_for(related));
        }
        Ok(())
    }

    /// Caches the relation for one parent, taking each pivot snapshot from
    /// the join row the entity was matched through.
    fn cache_with_pivots(&self, parent_key: &Value, pairs: &[(Row, Entity)]) -> Result<()> {
        let related: Vec<(Entity, Row)> = pairs
            .iter()
            .map(|(pivot, entity)| (entity.clone(), descriptive_columns(pivot, self.definition())))
            .collect();
        self.context.cache_relation_with_pivots(parent_key, &related)
    }

    /// Identifying join columns on the parent side of this relation.
    fn owner_columns(&self, parent_key: &Value) -> Row {
        let mut owner = Row::new();
        owner.insert(self.foreign_key().to_string(), parent_key.clone());
        if let Some((morph_type, class)) = self.morph() {
            owner.insert(morph_type.to_string(), Value::Text(class.to_string()));
        }
        owner
    }

    /// Join-table query scoped to `parent`'s rows.
    fn pivot_query(&self, parent_key: &Value) -> Query {
        let query = Query::from(self.table()).where_eq(self.foreign_key(), parent_key.clone());
        match self.morph() {
            Some((morph_type, class)) => query.where_eq(morph_type, class),
            None => query,
        }
    }

    fn stored_parent_key(&self, parent: &Entity) -> Result<Value> {
        let key = parent.value(self.parent_key_name());
        if key.is_null() {
            return Err(OrmError::mapping(format!(
                "cannot write join rows of {}.{} for an unsaved {}",
                self.context.parent.type_name(),
                self.context.name(),
                parent.type_name()
            )));
        }
        Ok(key)
    }

    /// Inserts a join row for every entity in `related` that is not yet
    /// associated with `parent`. Descriptive columns come from each entity's
    /// pivot sub-entity.
    pub fn create_pivots(&self, parent: &Entity, related: &[Entity]) -> Result<()> {
        let parent_key = self.stored_parent_key(parent)?;
        let owner = self.owner_columns(&parent_key);
        let connection = self.context.manager.connection();
        let related_key_name = self.definition().related_key_name();

        let mut existing: Vec<Value> = connection
            .select(&self.pivot_query(&parent_key))?
            .into_iter()
            .filter_map(|row| row.get(self.related_pivot_key()).cloned())
            .collect();

        let mut created = 0usize;
        for entity in related {
            let related_key = entity.value(related_key_name);
            if related_key.is_null() {
                return Err(OrmError::mapping(format!(
                    "cannot attach an unsaved {} to {}.{}",
                    entity.type_name(),
                    self.context.parent.type_name(),
                    self.context.name()
                )));
            }
            if existing.iter().any(|key| key.loosely_equals(&related_key)) {
                continue;
            }

            let mut keys = owner.clone();
            keys.insert(self.related_pivot_key().to_string(), related_key.clone());
            // A pivot describing another parent's join row stays with that
            // parent; this row starts from a fresh one.
            let pivot = match owned_pivot(entity, &owner) {
                Ownership::Owned(pivot) => pivot,
                Ownership::Missing | Ownership::Foreign => {
                    let pivot = Entity::new(PIVOT_TYPE);
                    self.context.manager.set_attribute(entity, PIVOT_ATTRIBUTE, &pivot);
                    pivot
                }
            };
            let mut record = descriptive_columns(&scalar_row(&pivot), self.definition());
            record.extend(keys.clone());
            connection.insert(self.table(), record)?;
            existing.push(related_key);
            created += 1;

            for (column, value) in keys {
                self.context.manager.set_attribute(&pivot, &column, value);
            }
        }

        if created > 0 {
            event!(
                Level::DEBUG,
                relation = %self.context.name(),
                table = %self.table(),
                rows = created,
                "join rows created"
            );
        }
        Ok(())
    }

    /// Rewrites the descriptive columns of one existing join row.
    pub fn update_existing_pivot(&self, parent: &Entity, related_key: &Value, attributes: &Row) -> Result<usize> {
        if attributes.is_empty() {
            return Ok(0);
        }
        let parent_key = self.stored_parent_key(parent)?;
        let query = self
            .pivot_query(&parent_key)
            .where_eq(self.related_pivot_key(), related_key.clone());
        self.context.manager.connection().update(&query, attributes)
    }

    /// Deletes the join rows linking `parent` to the entities behind `hashes`.
    pub fn detach_many(&self, parent: &Entity, hashes: &[String]) -> Result<()> {
        let keys = keys_from_hashes(hashes);
        let parent_key = parent.value(self.parent_key_name());
        if parent_key.is_null() || keys.is_empty() {
            return Ok(());
        }
        let query = self
            .pivot_query(&parent_key)
            .where_in(self.related_pivot_key(), keys);
        let removed = self.context.manager.connection().delete(&query)?;
        event!(
            Level::DEBUG,
            relation = %self.context.name(),
            table = %self.table(),
            rows = removed,
            "join rows deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::row;

    fn permissions() -> RelationDefinition {
        RelationDefinition::belongs_to_many("permissions", "Permission")
            .foreign_key("role_id")
            .related_pivot_key("permission_id")
    }

    fn with_pivot(type_name: &str, pivot: Entity) -> Entity {
        Entity::new(type_name).with("id", 1).with(PIVOT_ATTRIBUTE, pivot)
    }

    #[test]
    fn test_pivot_attributes_follow_the_owning_parent() {
        let definition = permissions();
        let permission = with_pivot(
            "Permission",
            Entity::new(PIVOT_TYPE)
                .with("role_id", 2)
                .with("permission_id", 1)
                .with("granted_by", "bob"),
        );

        assert_eq!(
            pivot_attributes(&permission, &definition, &row([("role_id", 2)])),
            Some(row([("granted_by", "bob")]))
        );
        assert_eq!(pivot_attributes(&permission, &definition, &row([("role_id", 1)])), None);
    }

    #[test]
    fn test_unbound_pivot_belongs_to_whoever_stores_it() {
        let definition = permissions();
        let permission = with_pivot("Permission", Entity::new(PIVOT_TYPE).with("granted_by", "alice"));
        assert_eq!(
            pivot_attributes(&permission, &definition, &row([("role_id", 1)])),
            Some(row([("granted_by", "alice")]))
        );

        let bare = Entity::new("Permission").with("id", 1);
        assert_eq!(
            pivot_attributes(&bare, &definition, &row([("role_id", 1)])),
            Some(Row::new())
        );
    }

    #[test]
    fn test_morph_class_decides_ownership() {
        let definition = RelationDefinition::morph_to_many("labels", "Label", "labelable")
            .foreign_key("labelable_id")
            .related_pivot_key("label_id")
            .morph_type("labelable_type");
        let label = with_pivot(
            "Label",
            Entity::new(PIVOT_TYPE)
                .with("labelable_id", 1)
                .with("label_id", 1)
                .with("labelable_type", "Post"),
        );

        let owner = |class: &str| row([("labelable_id", Value::from(1)), ("labelable_type", Value::from(class))]);
        assert_eq!(pivot_attributes(&label, &definition, &owner("Post")), Some(Row::new()));
        assert_eq!(pivot_attributes(&label, &definition, &owner("Video")), None);
    }
}
