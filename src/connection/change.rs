// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Undo log for the in-memory connection. Every row mutation made inside a
// transaction is recorded as a Change; rollback replays the log backwards.
//
// ============================================================================

use crate::core::Row;

/// A single reversible row mutation.
#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted under `row_id`
    InsertRow { table: String, row_id: usize },

    /// A row was overwritten; `old_row` is its previous content
    UpdateRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },

    /// A row was removed; `old_row` is what it held
    DeleteRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> usize {
        match self {
            Change::InsertRow { row_id, .. }
            | Change::UpdateRow { row_id, .. }
            | Change::DeleteRow { row_id, .. } => *row_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_table_name() {
        let change = Change::InsertRow {
            table: "users".to_string(),
            row_id: 3,
        };
        assert_eq!(change.table_name(), "users");
        assert_eq!(change.row_id(), 3);
    }
}
