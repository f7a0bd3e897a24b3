use crate::core::Value;
use crate::entity::{AttributeValue, Entity};
use crate::map::EntityMap;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Uniform attribute access over an entity and its [`EntityMap`].
///
/// Whether the entity keeps its attributes in a map or in a user struct was
/// decided when the map was registered; callers never branch on it.
#[derive(Clone, Debug)]
pub struct Wrapper {
    entity: Entity,
    map: Rc<EntityMap>,
}

impl Wrapper {
    pub fn new(entity: Entity, map: Rc<EntityMap>) -> Self {
        Self { entity, map }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn map(&self) -> &Rc<EntityMap> {
        &self.map
    }

    pub fn type_name(&self) -> &str {
        self.entity.type_name()
    }

    pub fn get_entity_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.entity.get(name)
    }

    pub fn get_entity_attributes(&self) -> BTreeMap<String, AttributeValue> {
        self.entity
            .keys()
            .into_iter()
            .filter_map(|key| self.entity.get(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn set_entity_attribute(&self, name: &str, value: impl Into<AttributeValue>) {
        self.entity.set(name, value);
    }

    pub fn set_entity_attributes(&self, attributes: BTreeMap<String, AttributeValue>) {
        for (name, value) in attributes {
            self.entity.set(&name, value);
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.entity.has(name)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.map.key_name()
    }

    /// Primary key value, `Null` for unsaved entities and value objects.
    pub fn key_value(&self) -> Value {
        match self.map.key_name() {
            Some(key) => self.entity.value(key),
            None => Value::Null,
        }
    }

    pub fn set_key_value(&self, value: Value) {
        if let Some(key) = self.map.key_name() {
            self.entity.set(key, value);
        }
    }

    /// `Type.key`, or `None` while the key is unset.
    pub fn entity_hash(&self) -> Option<String> {
        let key = self.key_value();
        if key.is_null() {
            None
        } else {
            Some(entity_hash(self.type_name(), &key))
        }
    }

    /// Stable identity within one operation: the entity hash once keyed,
    /// otherwise a per-instance marker.
    pub fn identity(&self) -> String {
        self.entity_hash()
            .unwrap_or_else(|| format!("{}#{}", self.type_name(), self.entity.serial()))
    }
}

pub fn entity_hash(type_name: &str, key: &Value) -> String {
    format!("{}.{}", type_name, key)
}

/// Splits an entity hash back into its type name and key.
pub fn split_hash(hash: &str) -> Option<(&str, Value)> {
    hash.split_once('.')
        .map(|(type_name, key)| (type_name, Value::from_key_string(key)))
}
