use crate::core::{Row, Value};
use std::collections::BTreeMap;

/// Reference to a related entity as remembered by the attribute cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRelationship {
    hash: String,
    pivot_attributes: Row,
}

impl CachedRelationship {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            pivot_attributes: Row::new(),
        }
    }

    pub fn with_pivot(hash: impl Into<String>, pivot_attributes: Row) -> Self {
        Self {
            hash: hash.into(),
            pivot_attributes,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn pivot_attributes(&self) -> &Row {
        &self.pivot_attributes
    }
}

/// One entry of a cached record.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedAttribute {
    Value(Value),
    Single(CachedRelationship),
    Many(BTreeMap<String, CachedRelationship>),
}

impl CachedAttribute {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CachedAttribute::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Hashes of every related entity referenced by this entry.
    pub fn hashes(&self) -> Vec<String> {
        match self {
            CachedAttribute::Value(_) => Vec::new(),
            CachedAttribute::Single(relationship) => vec![relationship.hash.clone()],
            CachedAttribute::Many(relationships) => relationships.keys().cloned().collect(),
        }
    }

    pub fn many(relationships: impl IntoIterator<Item = CachedRelationship>) -> Self {
        CachedAttribute::Many(
            relationships
                .into_iter()
                .map(|r| (r.hash.clone(), r))
                .collect(),
        )
    }
}

/// Last-synchronized state of one row.
pub type CachedRecord = BTreeMap<String, CachedAttribute>;
