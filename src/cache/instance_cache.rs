use crate::core::{OrmError, Result, Value};
use crate::entity::Entity;
use std::collections::BTreeMap;

/// Identity map for one entity type: at most one live instance per key.
#[derive(Debug, Clone)]
pub struct InstanceCache {
    type_name: String,
    instances: BTreeMap<String, Entity>,
}

impl InstanceCache {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            instances: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Registers `entity` under `key`. Registering the same instance twice is
    /// a no-op; a different instance for a known key is an error.
    pub fn add(&mut self, entity: &Entity, key: &Value) -> Result<()> {
        if entity.type_name() != self.type_name {
            return Err(OrmError::cache(format!(
                "cannot cache a '{}' in the '{}' instance cache",
                entity.type_name(),
                self.type_name
            )));
        }
        if key.is_null() {
            return Err(OrmError::cache(format!(
                "cannot cache a '{}' without a primary key",
                self.type_name
            )));
        }
        let slot = key.to_string();
        if let Some(existing) = self.instances.get(&slot) {
            if existing.ptr_eq(entity) {
                return Ok(());
            }
            return Err(OrmError::cache(format!(
                "another '{}' instance is already cached for key {}",
                self.type_name, key
            )));
        }
        self.instances.insert(slot, entity.clone());
        Ok(())
    }

    pub fn has(&self, key: &Value) -> bool {
        !key.is_null() && self.instances.contains_key(&key.to_string())
    }

    pub fn get(&self, key: &Value) -> Result<Option<Entity>> {
        if key.is_null() {
            return Err(OrmError::cache(format!(
                "cannot look up a '{}' by a null key",
                self.type_name
            )));
        }
        Ok(self.instances.get(&key.to_string()).cloned())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Entity> {
        self.instances.remove(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_instance_per_key() {
        let mut cache = InstanceCache::new("User");
        let user = Entity::new("User");
        cache.add(&user, &Value::Integer(1)).unwrap();
        cache.add(&user, &Value::Integer(1)).unwrap();

        let other = Entity::new("User");
        assert!(cache.add(&other, &Value::Integer(1)).unwrap_err().is_cache());
        assert!(cache.get(&Value::Integer(1)).unwrap().unwrap().ptr_eq(&user));
    }

    #[test]
    fn test_numeric_text_key_finds_integer_entry() {
        let mut cache = InstanceCache::new("User");
        let user = Entity::new("User");
        cache.add(&user, &Value::Integer(5)).unwrap();
        assert!(cache.has(&Value::Text("5".into())));
    }

    #[test]
    fn test_type_mismatch_and_null_key() {
        let mut cache = InstanceCache::new("User");
        assert!(cache.add(&Entity::new("Post"), &Value::Integer(1)).unwrap_err().is_cache());
        assert!(cache.add(&Entity::new("User"), &Value::Null).unwrap_err().is_cache());
        assert!(cache.get(&Value::Null).unwrap_err().is_cache());
        assert!(cache.get(&Value::Integer(3)).unwrap().is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = InstanceCache::new("User");
        cache.add(&Entity::new("User"), &Value::Integer(1)).unwrap();
        cache.add(&Entity::new("User"), &Value::Integer(2)).unwrap();
        assert!(cache.remove(&Value::Integer(1)).is_some());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
