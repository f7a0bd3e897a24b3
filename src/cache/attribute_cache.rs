use super::{CachedAttribute, CachedRecord, CachedRelationship};
use crate::aggregate::{Aggregate, RelationState};
use crate::core::{OrmError, Result, Row, Value};
use std::collections::BTreeMap;

/// Last-synchronized raw attributes of every loaded or stored row of one
/// entity type, keyed by primary key.
#[derive(Debug, Clone)]
pub struct AttributeCache {
    type_name: String,
    key_name: Option<String>,
    entries: BTreeMap<String, CachedRecord>,
}

impl AttributeCache {
    pub fn new(type_name: &str, key_name: Option<&str>) -> Self {
        Self {
            type_name: type_name.to_string(),
            key_name: key_name.map(str::to_string),
            entries: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Snapshot for `key`, empty when nothing is cached.
    pub fn get(&self, key: &Value) -> CachedRecord {
        if key.is_null() {
            return CachedRecord::new();
        }
        self.entries.get(&key.to_string()).cloned().unwrap_or_default()
    }

    pub fn has(&self, key: &Value) -> bool {
        !key.is_null() && self.entries.contains_key(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges raw rows into the cache. Columns missing from a row keep their
    /// previously cached value.
    pub fn add<'a>(&mut self, rows: impl IntoIterator<Item = &'a Row>) {
        let Some(key_name) = self.key_name.clone() else {
            return;
        };
        for row in rows {
            let Some(key) = row.get(&key_name).filter(|key| !key.is_null()) else {
                continue;
            };
            let record = self.entries.entry(key.to_string()).or_default();
            for (column, value) in row {
                record.insert(column.clone(), CachedAttribute::Value(value.clone()));
            }
        }
    }

    /// Rewrites one cached column of an existing record.
    pub fn set_value(&mut self, key: &Value, column: &str, value: Value) {
        if key.is_null() {
            return;
        }
        if let Some(record) = self.entries.get_mut(&key.to_string()) {
            record.insert(column.to_string(), CachedAttribute::Value(value));
        }
    }

    /// Drops the snapshot for `key` once its row is gone from storage.
    pub fn forget(&mut self, key: &Value) -> Option<CachedRecord> {
        if key.is_null() {
            return None;
        }
        self.entries.remove(&key.to_string())
    }

    /// Records the related hashes a relation query returned for `key`;
    /// `None` records that a single relation is empty.
    pub fn cache_loaded_relation(&mut self, key: &Value, relation: &str, related: Option<CachedAttribute>) {
        if key.is_null() {
            return;
        }
        if let Some(record) = self.entries.get_mut(&key.to_string()) {
            match related {
                Some(related) => {
                    record.insert(relation.to_string(), related);
                }
                None => {
                    record.remove(relation);
                }
            }
        }
    }

    /// Replaces the snapshot of `aggregate`'s row with its current state.
    ///
    /// Relations whose value was never loaded keep their previous entry;
    /// items appended to an unloaded collection are merged into it.
    pub fn refresh(&mut self, aggregate: &Aggregate) -> Result<()> {
        let key = aggregate.key_value();
        if key.is_null() {
            return Ok(());
        }
        let slot = key.to_string();
        let previous = self.entries.get(&slot).cloned().unwrap_or_default();

        let mut record: CachedRecord = aggregate
            .get_raw_attributes()?
            .into_iter()
            .map(|(column, value)| (column, CachedAttribute::Value(value)))
            .collect();

        for snapshot in aggregate.relation_snapshots(&previous)? {
            let name = snapshot.name.clone();
            match snapshot.state {
                RelationState::Synced if snapshot.many => {
                    record.insert(name, CachedAttribute::many(snapshot.related));
                }
                RelationState::Synced => {
                    let mut related = snapshot.related.into_iter();
                    match (related.next(), related.next()) {
                        (None, _) => {}
                        (Some(single), None) => {
                            record.insert(name, CachedAttribute::Single(single));
                        }
                        (Some(_), Some(_)) => {
                            return Err(OrmError::mapping(format!(
                                "{}.{} is single-valued but holds several entities",
                                self.type_name, snapshot.name
                            )));
                        }
                    }
                }
                RelationState::Pending => {
                    let mut merged: BTreeMap<String, CachedRelationship> = match previous.get(&name) {
                        Some(CachedAttribute::Many(existing)) => existing.clone(),
                        _ => BTreeMap::new(),
                    };
                    for relationship in snapshot.related {
                        merged.insert(relationship.hash().to_string(), relationship);
                    }
                    record.insert(name, CachedAttribute::Many(merged));
                }
                RelationState::Unloaded => {
                    if let Some(entry) = previous.get(&name) {
                        record.insert(name, entry.clone());
                    }
                }
            }
        }

        self.entries.insert(slot, record);
        Ok(())
    }

    /// Drops every snapshot. Aggregates built before the call will treat
    /// their entities as new.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::row;

    #[test]
    fn test_get_missing_is_empty() {
        let cache = AttributeCache::new("User", Some("id"));
        assert!(cache.get(&Value::Integer(1)).is_empty());
        assert!(!cache.has(&Value::Integer(1)));
        assert!(cache.get(&Value::Null).is_empty());
    }

    #[test]
    fn test_add_merges_partial_rows() {
        let mut cache = AttributeCache::new("User", Some("id"));
        cache.add(&[row([("id", Value::Integer(1)), ("name", "alice".into()), ("age", 30.into())])]);
        cache.add(&[row([("id", Value::Integer(1)), ("name", "alicia".into())])]);

        let record = cache.get(&Value::Integer(1));
        assert_eq!(record.get("name"), Some(&CachedAttribute::Value("alicia".into())));
        assert_eq!(record.get("age"), Some(&CachedAttribute::Value(30.into())));
    }

    #[test]
    fn test_rows_without_key_are_skipped() {
        let mut cache = AttributeCache::new("User", Some("id"));
        cache.add(&[row([("name", "ghost")]), row([("id", Value::Null), ("name", "null".into())])]);
        assert!(cache.is_empty());

        let mut keyless = AttributeCache::new("Address", None);
        keyless.add(&[row([("id", 1)])]);
        assert!(keyless.is_empty());
    }

    #[test]
    fn test_forget_drops_one_record() {
        let mut cache = AttributeCache::new("Tag", Some("id"));
        cache.add(&[row([("id", 7)]), row([("id", 8)])]);

        assert!(cache.forget(&Value::Integer(7)).is_some());
        assert!(!cache.has(&Value::Integer(7)));
        assert!(cache.has(&Value::Integer(8)));
        assert!(cache.forget(&Value::Integer(7)).is_none());
        assert!(cache.forget(&Value::Null).is_none());
    }

    #[test]
    fn test_loaded_relations_only_touch_existing_records() {
        let mut cache = AttributeCache::new("Post", Some("id"));
        cache.add(&[row([("id", 1)])]);
        cache.cache_loaded_relation(
            &Value::Integer(1),
            "author",
            Some(CachedAttribute::Single(CachedRelationship::new("User.3"))),
        );
        cache.cache_loaded_relation(
            &Value::Integer(2),
            "author",
            Some(CachedAttribute::Single(CachedRelationship::new("User.3"))),
        );

        assert_eq!(
            cache.get(&Value::Integer(1)).get("author").map(CachedAttribute::hashes),
            Some(vec!["User.3".to_string()])
        );
        assert!(!cache.has(&Value::Integer(2)));
    }
}
