use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    /// Schema or usage contract violation (relation type mismatch, unkeyed delete, ...).
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Identity map invariant breach.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("No '{entity}' found for key {key}")]
    EntityNotFound { entity: String, key: String },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrmError {
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping(_))
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
