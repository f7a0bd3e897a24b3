// ============================================================================
// Relationships
// ============================================================================
//
// One tagged variant per relation family. A `Relationship` is built from a
// relation declaration for a single query or store call and knows how to
// constrain related queries, match eager results back onto parent rows, and
// write the foreign keys or join rows that (dis)associate entities.
//
// ============================================================================

pub mod belongs_to;
pub mod belongs_to_many;
pub mod has_many_through;
pub mod has_one_or_many;
pub mod morph_to;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, PIVOT_ATTRIBUTE, pivot_attributes, pivot_owner};
pub use has_many_through::HasManyThrough;
pub use has_one_or_many::HasOneOrMany;
pub use morph_to::MorphTo;

use crate::cache::{CachedAttribute, CachedRelationship};
use crate::core::{OrmError, Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::manager::Manager;
use crate::map::{EntityMap, RelationDefinition, RelationKind};
use crate::mapper::EntityQuery;
use crate::wrapper::Wrapper;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// A query row on its way to becoming an entity: scalar columns plus the
/// relation values matched in by eager loading.
pub type ResultRow = BTreeMap<String, AttributeValue>;

/// What every variant carries: the session, the owning type and the declaration.
#[derive(Clone)]
pub struct RelationContext {
    manager: Manager,
    parent: Rc<EntityMap>,
    definition: Rc<RelationDefinition>,
}

impl RelationContext {
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn parent(&self) -> &Rc<EntityMap> {
        &self.parent
    }

    pub fn definition(&self) -> &Rc<RelationDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    fn related_map(&self) -> Result<Rc<EntityMap>> {
        self.manager.entity_map(self.definition.related_type())
    }

    fn related_query(&self, map: &Rc<EntityMap>, nested: &[String]) -> Result<EntityQuery> {
        Ok(self.manager.mapper(map.type_name())?.query().with(nested.iter().cloned()))
    }

    /// Primary key of a parent entity, which keys its attribute cache record.
    fn parent_key(&self, parent: &Entity) -> Value {
        self.parent
            .key_name()
            .map(|key| parent.value(key))
            .unwrap_or(Value::Null)
    }

    fn parent_row_key(&self, row: &ResultRow) -> Value {
        self.parent
            .key_name()
            .map(|key| row_value(row, key))
            .unwrap_or(Value::Null)
    }

    /// Remembers which entities the relation returned for `parent_key`.
    fn cache_relation(&self, parent_key: &Value, related: &[Entity]) -> Result<()> {
        let related: Vec<(Entity, Row)> = related.iter().map(|entity| (entity.clone(), Row::new())).collect();
        self.cache_relation_with_pivots(parent_key, &related)
    }

    /// Like [`RelationContext::cache_relation`], with the join-row snapshot
    /// recorded for each related entity.
    fn cache_relation_with_pivots(&self, parent_key: &Value, related: &[(Entity, Row)]) -> Result<()> {
        let mut relationships = Vec::with_capacity(related.len());
        for (entity, pivot) in related {
            if let Some(hash) = wrap(&self.manager, entity)?.entity_hash() {
                relationships.push(CachedRelationship::with_pivot(hash, pivot.clone()));
            }
        }
        let entry = if self.definition.is_many() {
            Some(CachedAttribute::many(relationships))
        } else {
            relationships.into_iter().next().map(CachedAttribute::Single)
        };
        let relation = self.name().to_string();
        self.manager.attribute_cache_mut(self.parent.type_name(), |cache| {
            cache.cache_loaded_relation(parent_key, &relation, entry)
        })
    }

    /// Relation value for a parent row from the entities matched to it.
    fn value_for(&self, matched: Vec<Entity>) -> AttributeValue {
        if self.definition.is_many() {
            AttributeValue::Collection(matched)
        } else {
            matched
                .into_iter()
                .next()
                .map(AttributeValue::Entity)
                .unwrap_or_else(AttributeValue::null)
        }
    }

    /// Assigns matched entities to every parent row and caches the result.
    fn assign(
        &self,
        parents: &mut [ResultRow],
        dictionary: &BTreeMap<String, Vec<Entity>>,
        parent_column: &str,
    ) -> Result<()> {
        for parent in parents.iter_mut() {
            let join_value = row_value(parent, parent_column);
            let matched = if join_value.is_null() {
                Vec::new()
            } else {
                dictionary
                    .get(&join_value.to_string())
                    .cloned()
                    .unwrap_or_default()
            };
            self.cache_relation(&self.parent_row_key(parent), &matched)?;
            parent.insert(self.name().to_string(), self.value_for(matched));
        }
        Ok(())
    }

    fn not_applicable(&self, operation: &str) -> OrmError {
        OrmError::mapping(format!(
            "{} is not applicable to relation {}.{} ({:?})",
            operation,
            self.parent.type_name(),
            self.name(),
            self.definition.kind
        ))
    }
}

pub enum Relationship {
    BelongsTo(BelongsTo),
    MorphTo(MorphTo),
    HasOneOrMany(HasOneOrMany),
    BelongsToMany(BelongsToMany),
    HasManyThrough(HasManyThrough),
}

impl Relationship {
    pub fn new(
        manager: &Manager,
        parent: Rc<EntityMap>,
        definition: Rc<RelationDefinition>,
    ) -> Result<Self> {
        let kind = definition.kind;
        let context = RelationContext {
            manager: manager.clone(),
            parent,
            definition,
        };
        Ok(match kind {
            RelationKind::BelongsTo => Self::BelongsTo(BelongsTo::new(context)?),
            RelationKind::MorphTo => Self::MorphTo(MorphTo::new(context)),
            RelationKind::HasOne
            | RelationKind::HasMany
            | RelationKind::MorphOne
            | RelationKind::MorphMany => Self::HasOneOrMany(HasOneOrMany::new(context)?),
            RelationKind::BelongsToMany | RelationKind::MorphToMany => {
                Self::BelongsToMany(BelongsToMany::new(context)?)
            }
            RelationKind::HasManyThrough => Self::HasManyThrough(HasManyThrough::new(context)?),
        })
    }

    /// Relationship for relation `name` declared on `parent`'s type.
    pub fn for_entity(manager: &Manager, parent: &Entity, name: &str) -> Result<Self> {
        let map = manager.entity_map(parent.type_name())?;
        let definition = map.relation_definition(name).cloned().ok_or_else(|| {
            OrmError::mapping(format!(
                "'{}' has no relation named '{}'",
                parent.type_name(),
                name
            ))
        })?;
        Self::new(manager, map, definition)
    }

    pub fn context(&self) -> &RelationContext {
        match self {
            Self::BelongsTo(r) => &r.context,
            Self::MorphTo(r) => &r.context,
            Self::HasOneOrMany(r) => &r.context,
            Self::BelongsToMany(r) => &r.context,
            Self::HasManyThrough(r) => &r.context,
        }
    }

    pub fn name(&self) -> &str {
        self.context().name()
    }

    pub fn definition(&self) -> &Rc<RelationDefinition> {
        self.context().definition()
    }

    pub fn is_many(&self) -> bool {
        self.definition().is_many()
    }

    /// Query for the entities related to `parent`, `None` when the parent
    /// cannot have any (unset foreign or local key).
    pub fn add_constraints(&self, parent: &Entity) -> Result<Option<EntityQuery>> {
        match self {
            Self::BelongsTo(r) => r.add_constraints(parent),
            Self::MorphTo(r) => r.add_constraints(parent),
            Self::HasOneOrMany(r) => r.add_constraints(parent),
            Self::BelongsToMany(r) => r.add_constraints(parent),
            Self::HasManyThrough(r) => r.add_constraints(parent),
        }
    }

    /// Loads the relation for one parent and records it in the parent's
    /// attribute cache. Single relations yield an entity or null, many
    /// relations a (possibly empty) collection.
    pub fn get_results(&self, parent: &Entity) -> Result<AttributeValue> {
        match self {
            Self::BelongsTo(r) => r.get_results(parent),
            Self::MorphTo(r) => r.get_results(parent),
            Self::HasOneOrMany(r) => r.get_results(parent),
            Self::BelongsToMany(r) => r.get_results(parent),
            Self::HasManyThrough(r) => r.get_results(parent),
        }
    }

    /// Loads the relation for a batch of parent rows with one query per
    /// related type and matches the results back by key.
    pub fn eager_load(&self, parents: &mut [ResultRow], nested: &[String]) -> Result<()> {
        match self {
            Self::BelongsTo(r) => r.eager_load(parents, nested),
            Self::MorphTo(r) => r.eager_load(parents, nested),
            Self::HasOneOrMany(r) => r.eager_load(parents, nested),
            Self::BelongsToMany(r) => r.eager_load(parents, nested),
            Self::HasManyThrough(r) => r.eager_load(parents, nested),
        }
    }

    /// Columns a local relation contributes to its owner's row.
    pub fn foreign_key_pairs(&self, related: Option<&Entity>) -> Result<Row> {
        match self {
            Self::BelongsTo(r) => Ok(r.foreign_key_pairs(related)),
            Self::MorphTo(r) => r.foreign_key_pairs(related),
            _ => Ok(Row::new()),
        }
    }

    /// Columns an owning relation contributes to each related row.
    pub fn parent_foreign_key_pairs(&self, parent: &Entity) -> Row {
        match self {
            Self::HasOneOrMany(r) => r.parent_foreign_key_pairs(parent),
            _ => Row::new(),
        }
    }

    pub fn attach_to(&self, parent: &Entity, related: &Entity) -> Result<()> {
        match self {
            Self::BelongsTo(r) => r.associate(parent, related),
            Self::HasOneOrMany(r) => r.attach_one(parent, related),
            Self::BelongsToMany(r) => r.create_pivots(parent, std::slice::from_ref(related)),
            Self::MorphTo(r) => Err(r.context.not_applicable("attach")),
            Self::HasManyThrough(r) => Err(r.context.not_applicable("attach")),
        }
    }

    pub fn detach_from(&self, parent: &Entity, related: &Entity) -> Result<()> {
        match self {
            Self::BelongsTo(r) => {
                r.dissociate(parent);
                Ok(())
            }
            Self::HasOneOrMany(_) | Self::BelongsToMany(_) => {
                let manager = self.context().manager();
                match wrap(manager, related)?.entity_hash() {
                    Some(hash) => self.detach_many(parent, &[hash]),
                    None => Ok(()),
                }
            }
            Self::MorphTo(r) => Err(r.context.not_applicable("detach")),
            Self::HasManyThrough(r) => Err(r.context.not_applicable("detach")),
        }
    }

    /// Breaks the association between `parent` and the entities behind
    /// `hashes`: nulls their foreign keys or removes their join rows.
    pub fn detach_many(&self, parent: &Entity, hashes: &[String]) -> Result<()> {
        match self {
            Self::HasOneOrMany(r) => r.detach_many(parent, hashes),
            Self::BelongsToMany(r) => r.detach_many(parent, hashes),
            other => Err(other.context().not_applicable("detach")),
        }
    }

    /// Inserts join rows for `related`, skipping pairs that already exist.
    pub fn create_pivots(&self, parent: &Entity, related: &[Entity]) -> Result<()> {
        match self {
            Self::BelongsToMany(r) => r.create_pivots(parent, related),
            other => Err(other.context().not_applicable("pivot creation")),
        }
    }

    pub fn update_existing_pivot(&self, parent: &Entity, related_key: &Value, attributes: &Row) -> Result<usize> {
        match self {
            Self::BelongsToMany(r) => r.update_existing_pivot(parent, related_key, attributes),
            other => Err(other.context().not_applicable("pivot update")),
        }
    }
}

// -- shared helpers ----------------------------------------------------------

pub(crate) fn wrap(manager: &Manager, entity: &Entity) -> Result<Wrapper> {
    Ok(Wrapper::new(entity.clone(), manager.entity_map(entity.type_name())?))
}

pub(crate) fn row_value(row: &ResultRow, column: &str) -> Value {
    match row.get(column) {
        Some(AttributeValue::Scalar(value)) => value.clone(),
        _ => Value::Null,
    }
}

/// Non-null values with duplicates (under their string form) removed.
pub(crate) fn distinct(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_null() && seen.insert(value.to_string()))
        .collect()
}

/// Keys carried by entity hashes.
pub(crate) fn keys_from_hashes(hashes: &[String]) -> Vec<Value> {
    distinct(
        hashes
            .iter()
            .filter_map(|hash| crate::wrapper::split_hash(hash).map(|(_, key)| key)),
    )
}

/// Groups entities under the string form of `column` in their source row.
pub(crate) fn dictionary(pairs: Vec<(Row, Entity)>, column: &str) -> BTreeMap<String, Vec<Entity>> {
    let mut dictionary: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
    for (row, entity) in pairs {
        if let Some(value) = row.get(column).filter(|v| !v.is_null()) {
            dictionary.entry(value.to_string()).or_default().push(entity);
        }
    }
    dictionary
}
