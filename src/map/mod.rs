// ============================================================================
// Entity Maps
// ============================================================================
//
// Per-type schema descriptors. A map is declared with the builder methods
// below, handed to a `Registry`, and frozen when the registry boots: unset
// names are filled from conventions and relations are classified once.
//
// ============================================================================

pub mod naming;
pub mod registry;
pub mod relation;

pub use registry::Registry;
pub use relation::{RelationDefinition, RelationKind};

use crate::entity::{Entity, ObjectAttributes, ObjectFactory};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Value object stored inline in its owner's row under prefixed columns.
#[derive(Debug, Clone)]
pub struct Embed {
    pub attribute: String,
    pub type_name: String,
    pub prefix: String,
    pub columns: Vec<String>,
}

impl Embed {
    /// Flattened column name for one of the value object's fields.
    pub fn column(&self, field: &str) -> String {
        format!("{}{}", self.prefix, field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeySetting {
    Default,
    Named(String),
    Keyless,
}

#[derive(Clone, Default)]
enum Representation {
    #[default]
    Attributes,
    Object(ObjectFactory),
}

#[derive(Clone)]
pub struct EntityMap {
    type_name: String,
    table: Option<String>,
    key: KeySetting,
    sequence: Option<String>,
    representation: Representation,
    relations: Vec<Rc<RelationDefinition>>,
    pending_relations: Vec<RelationDefinition>,
    embeds: Vec<Embed>,
    discriminator_column: Option<String>,
    discriminator_map: BTreeMap<String, String>,
    discriminator_value: Option<String>,
    extends: Option<String>,
    timestamps: bool,
    soft_deletes: bool,
    morph_class: Option<String>,
    classes: RelationClasses,
}

#[derive(Debug, Clone, Default)]
struct RelationClasses {
    single: Vec<String>,
    many: Vec<String>,
    local: Vec<String>,
    foreign: Vec<String>,
    pivot: Vec<String>,
}

impl EntityMap {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            table: None,
            key: KeySetting::Default,
            sequence: None,
            representation: Representation::Attributes,
            relations: Vec::new(),
            pending_relations: Vec::new(),
            embeds: Vec::new(),
            discriminator_column: None,
            discriminator_map: BTreeMap::new(),
            discriminator_value: None,
            extends: None,
            timestamps: false,
            soft_deletes: false,
            morph_class: None,
            classes: RelationClasses::default(),
        }
    }

    // -- declaration ---------------------------------------------------------

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn key(mut self, column: &str) -> Self {
        self.key = KeySetting::Named(column.to_string());
        self
    }

    /// Value objects have no identity of their own.
    pub fn keyless(mut self) -> Self {
        self.key = KeySetting::Keyless;
        self
    }

    /// Sequence name forwarded to key-generating inserts.
    pub fn sequence(mut self, name: &str) -> Self {
        self.sequence = Some(name.to_string());
        self
    }

    /// Back entities of this type by a user struct.
    pub fn object<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ObjectAttributes> + 'static,
    {
        self.representation = Representation::Object(Rc::new(factory));
        self
    }

    pub fn relation(mut self, relation: RelationDefinition) -> Self {
        self.pending_relations.push(relation);
        self
    }

    pub fn belongs_to(self, name: &str, related: &str) -> Self {
        self.relation(RelationDefinition::belongs_to(name, related))
    }

    pub fn morph_to(self, name: &str) -> Self {
        self.relation(RelationDefinition::morph_to(name))
    }

    pub fn has_one(self, name: &str, related: &str) -> Self {
        self.relation(RelationDefinition::has_one(name, related))
    }

    pub fn has_many(self, name: &str, related: &str) -> Self {
        self.relation(RelationDefinition::has_many(name, related))
    }

    pub fn belongs_to_many(self, name: &str, related: &str) -> Self {
        self.relation(RelationDefinition::belongs_to_many(name, related))
    }

    /// Embeds a value object of `type_name` under `attribute`, flattened into
    /// `<type_name>_<column>` columns.
    pub fn embed<I, S>(self, attribute: &str, type_name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = naming::embed_prefix(type_name);
        self.embed_with_prefix(attribute, type_name, &prefix, columns)
    }

    pub fn embed_with_prefix<I, S>(mut self, attribute: &str, type_name: &str, prefix: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.embeds.push(Embed {
            attribute: attribute.to_string(),
            type_name: type_name.to_string(),
            prefix: prefix.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Single-table inheritance root: `column` holds one of the `values`,
    /// each naming the concrete type of the row.
    pub fn discriminator<I, V, T>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (V, T)>,
        V: Into<String>,
        T: Into<String>,
    {
        self.discriminator_column = Some(column.to_string());
        self.discriminator_map = values
            .into_iter()
            .map(|(value, ty)| (value.into(), ty.into()))
            .collect();
        self
    }

    /// Single-table inheritance subtype of `parent`. Table, key,
    /// discriminator and relations are inherited.
    pub fn extends(mut self, parent: &str) -> Self {
        self.extends = Some(parent.to_string());
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    /// Value written to polymorphic type columns, the type name by default.
    pub fn morph_class(mut self, class: &str) -> Self {
        self.morph_class = Some(class.to_string());
        self
    }

    // -- inspection ----------------------------------------------------------

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }

    pub fn key_name(&self) -> Option<&str> {
        match &self.key {
            KeySetting::Named(name) => Some(name),
            _ => None,
        }
    }

    /// `table.key`, for queries that join other tables.
    pub fn qualified_key_name(&self) -> Option<String> {
        self.key_name().map(|key| self.qualify(key))
    }

    pub fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.table_name(), column)
    }

    pub fn sequence_name(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    pub fn is_object(&self) -> bool {
        matches!(self.representation, Representation::Object(_))
    }

    /// Fresh, empty instance in this type's representation.
    pub fn new_instance(&self) -> Entity {
        match &self.representation {
            Representation::Attributes => Entity::new(&self.type_name),
            Representation::Object(factory) => Entity::from_object(&self.type_name, factory()),
        }
    }

    pub fn relations(&self) -> &[Rc<RelationDefinition>] {
        &self.relations
    }

    pub fn relation_definition(&self, name: &str) -> Option<&Rc<RelationDefinition>> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.relation_definition(name).is_some()
    }

    pub fn relation_names(&self) -> Vec<&str> {
        self.relations.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn single_relations(&self) -> &[String] {
        &self.classes.single
    }

    pub fn many_relations(&self) -> &[String] {
        &self.classes.many
    }

    pub fn local_relations(&self) -> &[String] {
        &self.classes.local
    }

    pub fn foreign_relations(&self) -> &[String] {
        &self.classes.foreign
    }

    pub fn pivot_relations(&self) -> &[String] {
        &self.classes.pivot
    }

    pub fn embeds(&self) -> &[Embed] {
        &self.embeds
    }

    pub fn is_embedded_attribute(&self, name: &str) -> bool {
        self.embeds.iter().any(|e| e.attribute == name)
    }

    pub fn discriminator_column(&self) -> Option<&str> {
        self.discriminator_column.as_deref()
    }

    /// Discriminator written for rows of this exact type.
    pub fn discriminator_value(&self) -> Option<&str> {
        self.discriminator_value.as_deref()
    }

    /// Concrete type registered for a discriminator value.
    pub fn subtype_for(&self, value: &str) -> Option<&str> {
        self.discriminator_map.get(value).map(String::as_str)
    }

    pub fn has_inheritance(&self) -> bool {
        self.discriminator_column.is_some() && !self.discriminator_map.is_empty()
    }

    pub fn parent_type(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn uses_soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    pub fn morph_class_name(&self) -> &str {
        self.morph_class.as_deref().unwrap_or(&self.type_name)
    }
}

impl fmt::Debug for EntityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMap")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("key", &self.key)
            .field("relations", &self.relations)
            .field("embeds", &self.embeds)
            .field("discriminator_column", &self.discriminator_column)
            .field("object", &self.is_object())
            .finish()
    }
}
