use super::Value;
use std::collections::BTreeMap;

/// A storage row, or a flattened set of raw entity attributes: column name to scalar.
pub type Row = BTreeMap<String, Value>;

/// Builds a [`Row`] from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
