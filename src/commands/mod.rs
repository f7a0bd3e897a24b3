pub mod delete;
pub mod store;

pub use delete::Delete;
pub use store::{Store, StoreState};

use crate::core::Result;

/// A write operation against one entity. `Ok(false)` means a lifecycle
/// listener vetoed it.
pub trait Command {
    /// Command name for logging.
    fn name(&self) -> &'static str;

    fn execute(&mut self) -> Result<bool>;
}

/// Current time as written to timestamp columns.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
