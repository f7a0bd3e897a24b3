use crate::core::{OrmError, Result};
use serde::{Deserialize, Serialize};

/// Session-wide mapping defaults
///
/// Per-type settings on an [`EntityMap`](crate::map::EntityMap) take
/// precedence; these values fill whatever a map leaves unset at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Primary key column for maps that do not name one
    pub default_key_name: String,

    /// Install lazy proxies on relations that were not eager loaded
    pub lazy_loading: bool,

    /// Alias prefix for join-table columns in many-to-many selects
    pub pivot_prefix: String,

    pub created_at_column: String,

    pub updated_at_column: String,

    pub deleted_at_column: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_key_name: "id".to_string(),
            lazy_loading: true,
            pivot_prefix: "pivot_".to_string(),
            created_at_column: "created_at".to_string(),
            updated_at_column: "updated_at".to_string(),
            deleted_at_column: "deleted_at".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default primary key name
    pub fn default_key_name(mut self, name: &str) -> Self {
        self.default_key_name = name.to_string();
        self
    }

    /// Enable or disable lazy proxies
    pub fn lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    /// Set the pivot column alias prefix
    pub fn pivot_prefix(mut self, prefix: &str) -> Self {
        self.pivot_prefix = prefix.to_string();
        self
    }

    pub fn created_at_column(mut self, column: &str) -> Self {
        self.created_at_column = column.to_string();
        self
    }

    pub fn updated_at_column(mut self, column: &str) -> Self {
        self.updated_at_column = column.to_string();
        self
    }

    pub fn deleted_at_column(mut self, column: &str) -> Self {
        self.deleted_at_column = column.to_string();
        self
    }

    /// Parse from JSON, missing fields keep their defaults
    ///
    /// ```ignore
    /// let config = ManagerConfig::from_json(r#"{ "default_key_name": "uuid" }"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_key_name.is_empty() {
            return Err(OrmError::Config("default_key_name cannot be empty".into()));
        }

        if self.pivot_prefix.is_empty() {
            return Err(OrmError::Config("pivot_prefix cannot be empty".into()));
        }

        for column in [
            &self.created_at_column,
            &self.updated_at_column,
            &self.deleted_at_column,
        ] {
            if column.is_empty() {
                return Err(OrmError::Config("timestamp columns cannot be empty".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.default_key_name, "id");
        assert!(config.lazy_loading);
        assert_eq!(config.pivot_prefix, "pivot_");
        assert_eq!(config.deleted_at_column, "deleted_at");
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new()
            .default_key_name("uuid")
            .lazy_loading(false)
            .pivot_prefix("jt_");

        assert_eq!(config.default_key_name, "uuid");
        assert!(!config.lazy_loading);
        assert_eq!(config.pivot_prefix, "jt_");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_keeps_defaults_for_missing_fields() {
        let config = ManagerConfig::from_json(r#"{ "lazy_loading": false }"#).unwrap();
        assert!(!config.lazy_loading);
        assert_eq!(config.default_key_name, "id");
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            ManagerConfig::from_json(r#"{ "default_key_name": "" }"#),
            Err(OrmError::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_json("not json"),
            Err(OrmError::Config(_))
        ));
    }
}
