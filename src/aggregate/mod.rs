// ============================================================================
// Aggregate
// ============================================================================
//
// Request-scoped tree over an entity graph, built for one store call. Each
// node flattens its entity into raw row attributes, compares them with the
// attribute cache, and knows which related entities still have to be
// created, attached or detached.
//
// Traversal is depth first with the identities of the current ancestor chain
// threaded through; a related entity already on that chain is recorded as a
// back reference instead of becoming another node.
//
// ============================================================================

use crate::cache::{CachedAttribute, CachedRecord, CachedRelationship};
use crate::core::{OrmError, Result, Row, Value};
use crate::entity::{AttributeValue, Entity};
use crate::manager::Manager;
use crate::map::{EntityMap, RelationDefinition};
use crate::relationships::{PIVOT_ATTRIBUTE, Relationship, pivot_attributes, pivot_owner, wrap};
use crate::wrapper::Wrapper;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::{Level, event};

/// How much of a relation the entity currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationState {
    /// The attribute holds the full relation value (possibly empty).
    Synced,
    /// Unloaded collection proxy with items appended to it.
    Pending,
    /// Absent, or an untouched proxy.
    Unloaded,
}

/// Cache-ready view of one relation of an aggregate.
#[derive(Debug, Clone)]
pub struct RelationSnapshot {
    pub name: String,
    pub many: bool,
    pub state: RelationState,
    pub related: Vec<CachedRelationship>,
}

/// Join-row work found by comparing live pivot data with the cache.
#[derive(Debug, Clone)]
pub enum PivotChange {
    Create { relation: String, related: Entity },
    Update { relation: String, related: Entity, attributes: Row },
}

struct ParentLink {
    wrapper: Wrapper,
    relation: Rc<RelationDefinition>,
}

pub struct Aggregate {
    manager: Manager,
    wrapper: Wrapper,
    parent: Option<ParentLink>,
    relationships: BTreeMap<String, Vec<Aggregate>>,
    back_references: BTreeMap<String, Vec<Entity>>,
    states: BTreeMap<String, RelationState>,
    nulled_locals: Vec<String>,
}

impl Aggregate {
    /// Builds the tree rooted at `entity`.
    pub fn new(manager: &Manager, entity: &Entity) -> Result<Self> {
        let mut ancestry = Vec::new();
        Self::build(manager, entity, None, &mut ancestry)
    }

    fn build(
        manager: &Manager,
        entity: &Entity,
        parent: Option<ParentLink>,
        ancestry: &mut Vec<String>,
    ) -> Result<Self> {
        let map = manager.entity_map(entity.type_name())?;
        let mut aggregate = Self {
            manager: manager.clone(),
            wrapper: Wrapper::new(entity.clone(), map),
            parent,
            relationships: BTreeMap::new(),
            back_references: BTreeMap::new(),
            states: BTreeMap::new(),
            nulled_locals: Vec::new(),
        };

        ancestry.push(aggregate.wrapper.identity());
        let parsed = aggregate.parse_relationships(ancestry);
        ancestry.pop();
        parsed?;

        aggregate.nulled_locals = aggregate.find_nulled_locals()?;
        Ok(aggregate)
    }

    fn parse_relationships(&mut self, ancestry: &mut Vec<String>) -> Result<()> {
        let map = self.wrapper.map().clone();
        for definition in map.relations() {
            let name = definition.name.clone();
            let (state, items) = match self.wrapper.get_entity_attribute(&name) {
                None => (RelationState::Unloaded, Vec::new()),
                Some(AttributeValue::Lazy(lazy)) => match lazy.loaded_value() {
                    Some(value) => (RelationState::Synced, self.related_items(definition, value)?),
                    None if lazy.has_added_items() => (RelationState::Pending, lazy.added_items()),
                    None => (RelationState::Unloaded, Vec::new()),
                },
                Some(value) => (RelationState::Synced, self.related_items(definition, value)?),
            };
            self.states.insert(name.clone(), state);

            let mut seen = BTreeSet::new();
            for item in items {
                self.check_related_type(definition, &item)?;
                let identity = wrap(&self.manager, &item)?.identity();
                if !seen.insert(identity.clone()) {
                    continue;
                }
                if ancestry.contains(&identity) {
                    event!(
                        Level::TRACE,
                        relation = %name,
                        related = %identity,
                        "back reference skipped"
                    );
                    self.back_references.entry(name.clone()).or_default().push(item);
                    continue;
                }
                let link = ParentLink {
                    wrapper: self.wrapper.clone(),
                    relation: definition.clone(),
                };
                let child = Self::build(&self.manager, &item, Some(link), ancestry)?;
                self.relationships.entry(name.clone()).or_default().push(child);
            }
        }
        Ok(())
    }

    /// Entities held by a relation value, checked against the declared arity.
    fn related_items(&self, definition: &RelationDefinition, value: AttributeValue) -> Result<Vec<Entity>> {
        let many = definition.is_many();
        match value {
            AttributeValue::Scalar(Value::Null) => Ok(Vec::new()),
            AttributeValue::Entity(entity) if !many => Ok(vec![entity]),
            AttributeValue::Collection(items) if many => Ok(items),
            AttributeValue::Collection(_) => Err(OrmError::mapping(format!(
                "{}.{}: expected an object, found a collection",
                self.type_name(),
                definition.name
            ))),
            AttributeValue::Entity(_) => Err(OrmError::mapping(format!(
                "{}.{}: expected a collection, found an object",
                self.type_name(),
                definition.name
            ))),
            other => Err(OrmError::mapping(format!(
                "{}.{}: unrecognized relation value {:?}",
                self.type_name(),
                definition.name,
                other
            ))),
        }
    }

    fn check_related_type(&self, definition: &RelationDefinition, item: &Entity) -> Result<()> {
        let expected = definition.related_type();
        if expected.is_empty() || self.manager.registry().is_a(item.type_name(), expected) {
            return Ok(());
        }
        Err(OrmError::mapping(format!(
            "{}.{} expects {}, found {}",
            self.type_name(),
            definition.name,
            expected,
            item.type_name()
        )))
    }

    /// Local relations explicitly set to null while the cache still links them.
    fn find_nulled_locals(&self) -> Result<Vec<String>> {
        if self.key_value().is_null() {
            return Ok(Vec::new());
        }
        let cached = self.cached_record()?;
        let map = self.wrapper.map().clone();
        let mut nulled = Vec::new();
        for name in map.local_relations() {
            if self.states.get(name) != Some(&RelationState::Synced) || self.has_related(name) {
                continue;
            }
            let Some(definition) = map.relation_definition(name) else {
                continue;
            };
            let linked = matches!(cached.get(name), Some(CachedAttribute::Single(_)))
                || cached
                    .get(definition.foreign_key_name())
                    .and_then(CachedAttribute::as_value)
                    .is_some_and(|value| !value.is_null());
            if linked {
                nulled.push(name.clone());
            }
        }
        Ok(nulled)
    }

    // -- accessors -----------------------------------------------------------

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn wrapper(&self) -> &Wrapper {
        &self.wrapper
    }

    pub fn entity(&self) -> &Entity {
        self.wrapper.entity()
    }

    pub fn map(&self) -> &Rc<EntityMap> {
        self.wrapper.map()
    }

    pub fn type_name(&self) -> &str {
        self.wrapper.type_name()
    }

    pub fn key_value(&self) -> Value {
        self.wrapper.key_value()
    }

    /// Name of the parent relation this node hangs under.
    pub fn parent_relation(&self) -> Option<&str> {
        self.parent.as_ref().map(|link| link.relation.name.as_str())
    }

    pub fn relation_state(&self, name: &str) -> RelationState {
        self.states.get(name).copied().unwrap_or(RelationState::Unloaded)
    }

    /// Child nodes under relation `name`.
    pub fn children_of(&self, name: &str) -> &[Aggregate] {
        self.relationships.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn children(&self) -> impl Iterator<Item = &Aggregate> {
        self.relationships.values().flatten()
    }

    pub fn back_references(&self, name: &str) -> &[Entity] {
        self.back_references.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn has_related(&self, name: &str) -> bool {
        !self.children_of(name).is_empty() || !self.back_references(name).is_empty()
    }

    /// Every entity the relation currently holds, children first.
    pub fn related_entities(&self, name: &str) -> Vec<Entity> {
        self.children_of(name)
            .iter()
            .map(|child| child.entity().clone())
            .chain(self.back_references(name).iter().cloned())
            .collect()
    }

    fn relationship(&self, name: &str) -> Result<Relationship> {
        let definition = self.map().relation_definition(name).cloned().ok_or_else(|| {
            OrmError::mapping(format!("'{}' has no relation named '{}'", self.type_name(), name))
        })?;
        Relationship::new(&self.manager, self.map().clone(), definition)
    }

    fn cached_record(&self) -> Result<CachedRecord> {
        let key = self.key_value();
        self.manager.attribute_cache(self.type_name(), |cache| cache.get(&key))
    }

    // -- state ---------------------------------------------------------------

    /// Whether the attribute cache holds a row for this entity's key.
    pub fn exists(&self) -> Result<bool> {
        let key = self.key_value();
        if key.is_null() {
            return Ok(false);
        }
        self.manager.attribute_cache(self.type_name(), |cache| cache.has(&key))
    }

    /// Column values this entity would write to its own row.
    ///
    /// Reads only the entity graph, never the session caches, so it can run
    /// while a cache is being refreshed.
    pub fn get_raw_attributes(&self) -> Result<Row> {
        let map = self.map().clone();
        let mut raw = Row::new();

        for (name, value) in self.wrapper.get_entity_attributes() {
            if map.is_relation(&name) || name == PIVOT_ATTRIBUTE || map.is_embedded_attribute(&name) {
                continue;
            }
            if let AttributeValue::Scalar(value) = value {
                raw.insert(name, value);
            }
        }

        for embed in map.embeds() {
            let object = match self.wrapper.get_entity_attribute(&embed.attribute) {
                None => continue,
                Some(AttributeValue::Entity(object)) => Some(object),
                Some(AttributeValue::Scalar(Value::Null)) => None,
                Some(other) => {
                    return Err(OrmError::mapping(format!(
                        "{}.{}: embedded value must be an object, found {:?}",
                        self.type_name(),
                        embed.attribute,
                        other
                    )));
                }
            };
            for column in &embed.columns {
                let value = object.as_ref().map(|o| o.value(column)).unwrap_or(Value::Null);
                raw.insert(embed.column(column), value);
            }
        }

        if let (Some(column), Some(value)) = (map.discriminator_column(), map.discriminator_value()) {
            raw.insert(column.to_string(), Value::Text(value.to_string()));
        }

        for name in map.local_relations() {
            if self.relation_state(name) != RelationState::Synced {
                continue;
            }
            if let Some(related) = self.related_entities(name).first() {
                raw.extend(self.relationship(name)?.foreign_key_pairs(Some(related))?);
            }
        }
        for name in &self.nulled_locals {
            raw.extend(self.relationship(name)?.foreign_key_pairs(None)?);
        }

        if let Some(link) = &self.parent
            && link.relation.kind.is_owning()
        {
            let relationship =
                Relationship::new(&self.manager, link.wrapper.map().clone(), link.relation.clone())?;
            raw.extend(relationship.parent_foreign_key_pairs(link.wrapper.entity()));
        }

        Ok(raw)
    }

    /// Raw attributes that differ from the cached row.
    pub fn get_dirty_raw_attributes(&self) -> Result<Row> {
        let cached = self.cached_record()?;
        Ok(self
            .get_raw_attributes()?
            .into_iter()
            .filter(|(column, value)| {
                match cached.get(column).and_then(CachedAttribute::as_value) {
                    Some(previous) => !value.loosely_equals(previous),
                    None => true,
                }
            })
            .collect())
    }

    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.get_dirty_raw_attributes()?.is_empty())
    }

    /// Children under the named relations that have no stored row yet.
    pub fn get_non_existing_related(&self, names: &[String]) -> Result<Vec<&Aggregate>> {
        let mut missing = Vec::new();
        for name in names {
            for child in self.children_of(name) {
                if !child.exists()? {
                    missing.push(child);
                }
            }
        }
        Ok(missing)
    }

    /// Relations in the form the attribute cache records them. A related
    /// entity whose pivot currently describes another parent's join row
    /// keeps the pivot snapshot found in `previous`.
    pub fn relation_snapshots(&self, previous: &CachedRecord) -> Result<Vec<RelationSnapshot>> {
        let mut snapshots = Vec::new();
        for definition in self.map().relations() {
            let known = match previous.get(&definition.name) {
                Some(CachedAttribute::Many(known)) => known.clone(),
                _ => BTreeMap::new(),
            };
            let owner = if definition.kind.is_pivot() {
                pivot_owner(&self.manager, self.entity(), definition)?
            } else {
                Row::new()
            };
            let mut related = Vec::new();
            for entity in self.related_entities(&definition.name) {
                let Some(hash) = wrap(&self.manager, &entity)?.entity_hash() else {
                    continue;
                };
                let pivot = if definition.kind.is_pivot() {
                    pivot_attributes(&entity, definition, &owner).unwrap_or_else(|| {
                        known
                            .get(&hash)
                            .map(|cached| cached.pivot_attributes().clone())
                            .unwrap_or_default()
                    })
                } else {
                    Row::new()
                };
                related.push(CachedRelationship::with_pivot(hash, pivot));
            }
            snapshots.push(RelationSnapshot {
                name: definition.name.clone(),
                many: definition.is_many(),
                state: self.relation_state(&definition.name),
                related,
            });
        }
        Ok(snapshots)
    }

    // -- relation synchronization --------------------------------------------

    /// Join rows to create or rewrite so storage matches the pivot relations.
    pub fn pivot_changes(&self) -> Result<Vec<PivotChange>> {
        let map = self.map().clone();
        let cached = self.cached_record()?;
        let mut changes = Vec::new();

        for name in map.pivot_relations() {
            if self.relation_state(name) == RelationState::Unloaded {
                continue;
            }
            let Some(definition) = map.relation_definition(name) else {
                continue;
            };
            let known: BTreeMap<String, CachedRelationship> = match cached.get(name) {
                Some(CachedAttribute::Many(known)) => known.clone(),
                _ => BTreeMap::new(),
            };

            for entity in self.related_entities(name) {
                let hash = wrap(&self.manager, &entity)?.entity_hash();
                match hash.as_ref().and_then(|hash| known.get(hash)) {
                    None => changes.push(PivotChange::Create {
                        relation: name.clone(),
                        related: entity,
                    }),
                    Some(previous) => {
                        let owner = pivot_owner(&self.manager, self.entity(), definition)?;
                        let Some(live) = pivot_attributes(&entity, definition, &owner) else {
                            continue;
                        };
                        let attributes: Row = live
                            .into_iter()
                            .filter(|(column, value)| {
                                previous
                                    .pivot_attributes()
                                    .get(column)
                                    .is_none_or(|old| !value.loosely_equals(old))
                            })
                            .collect();
                        if !attributes.is_empty() {
                            changes.push(PivotChange::Update {
                                relation: name.clone(),
                                related: entity,
                                attributes,
                            });
                        }
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Writes the join rows found by [`Aggregate::pivot_changes`].
    pub fn update_pivot_records(&self) -> Result<()> {
        let mut created: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
        for change in self.pivot_changes()? {
            match change {
                PivotChange::Create { relation, related } => {
                    created.entry(relation).or_default().push(related);
                }
                PivotChange::Update {
                    relation,
                    related,
                    attributes,
                } => {
                    let relationship = self.relationship(&relation)?;
                    let related_key = related.value(relationship.definition().related_key_name());
                    relationship.update_existing_pivot(self.entity(), &related_key, &attributes)?;
                    event!(
                        Level::DEBUG,
                        relation = %relation,
                        related = ?related,
                        columns = attributes.len(),
                        "join row updated"
                    );
                }
            }
        }
        for (relation, related) in created {
            self.relationship(&relation)?.create_pivots(self.entity(), &related)?;
        }
        Ok(())
    }

    /// Cached related hashes no longer present, per foreign relation.
    pub fn missing_relationships(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let map = self.map().clone();
        let cached = self.cached_record()?;
        let mut missing = BTreeMap::new();

        for name in map.foreign_relations() {
            if self.relation_state(name) != RelationState::Synced {
                continue;
            }
            let Some(entry) = cached.get(name) else {
                continue;
            };
            let current: BTreeSet<String> = self
                .related_entities(name)
                .iter()
                .filter_map(|entity| wrap(&self.manager, entity).ok()?.entity_hash())
                .collect();
            let gone: Vec<String> = entry
                .hashes()
                .into_iter()
                .filter(|hash| !current.contains(hash))
                .collect();
            if !gone.is_empty() {
                missing.insert(name.clone(), gone);
            }
        }
        Ok(missing)
    }

    /// Breaks the association with every related entity removed since the
    /// relation was last synchronized.
    pub fn detach_missing_relationships(&self) -> Result<()> {
        for (name, hashes) in self.missing_relationships()? {
            event!(
                Level::DEBUG,
                entity_type = %self.type_name(),
                relation = %name,
                count = hashes.len(),
                "detaching removed relations"
            );
            self.relationship(&name)?.detach_many(self.entity(), &hashes)?;
        }
        Ok(())
    }

    /// Whether storing this node would write anything, here or below.
    pub fn needs_store(&self) -> Result<bool> {
        if !self.exists()?
            || self.is_dirty()?
            || !self.pivot_changes()?.is_empty()
            || !self.missing_relationships()?.is_empty()
        {
            return Ok(true);
        }
        for child in self.children() {
            if child.needs_store()? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
