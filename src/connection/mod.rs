// ============================================================================
// Storage Connection
// ============================================================================
//
// The contract the mapping layer consumes from the storage collaborator.
// Everything is blocking; transactions nest by level and only the outermost
// commit/rollback takes effect.
//
// ============================================================================

pub mod change;
pub mod memory;
pub mod query;

pub use change::Change;
pub use memory::MemoryConnection;
pub use query::{Condition, Direction, Join, Query, Selection};

use crate::core::{Result, Row, Value};

pub trait Connection {
    /// Run a select and return rows as ordered column maps.
    fn select(&self, query: &Query) -> Result<Vec<Row>>;

    /// Insert a row that already carries its primary key (or needs none).
    fn insert(&self, table: &str, row: Row) -> Result<()>;

    /// Insert a row and let storage generate the value of `key_name`.
    fn insert_get_id(
        &self,
        table: &str,
        row: Row,
        key_name: &str,
        sequence: Option<&str>,
    ) -> Result<Value>;

    /// Apply `values` to every row matched by the query's conditions.
    fn update(&self, query: &Query, values: &Row) -> Result<usize>;

    /// Remove every row matched by the query's conditions.
    fn delete(&self, query: &Query) -> Result<usize>;

    fn begin_transaction(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Current nesting depth, `0` outside of a transaction.
    fn transaction_level(&self) -> usize;
}
