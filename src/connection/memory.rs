use super::{Change, Condition, Connection, Direction, Query, Selection};
use crate::core::{OrmError, Result, Row, Value};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{Level, event};

/// Schemaless in-memory table. Rows keep their insertion order through a
/// monotonically increasing row id.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    key_column: Option<String>,
    sequence: i64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
            next_row_id: 0,
            key_column: None,
            sequence: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    fn insert(&mut self, row: Row) -> usize {
        self.observe_key(&row);
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        id
    }

    fn update(&mut self, id: usize, values: &Row) -> Option<Row> {
        let row = self.rows.get_mut(&id)?;
        let old = row.clone();
        for (column, value) in values {
            row.insert(column.clone(), value.clone());
        }
        let snapshot = row.clone();
        self.observe_key(&snapshot);
        Some(old)
    }

    fn delete(&mut self, id: usize) -> Option<Row> {
        self.rows.remove(&id)
    }

    fn restore(&mut self, id: usize, row: Row) {
        self.rows.insert(id, row);
    }

    /// Next generated value for `key_column`. The first call adopts the
    /// column and starts after the largest integer already stored there.
    fn next_key(&mut self, key_column: &str) -> i64 {
        if self.key_column.as_deref() != Some(key_column) {
            self.key_column = Some(key_column.to_string());
            self.sequence = self
                .rows
                .values()
                .filter_map(|row| row.get(key_column).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
        }
        self.sequence += 1;
        self.sequence
    }

    fn observe_key(&mut self, row: &Row) {
        if let Some(column) = &self.key_column
            && let Some(value) = row.get(column).and_then(Value::as_i64)
            && value > self.sequence
        {
            self.sequence = value;
        }
    }
}

/// Reference [`Connection`] keeping every table in memory, with an undo log
/// for transactions. Single-threaded, like the sessions that use it.
pub struct MemoryConnection {
    tables: RefCell<BTreeMap<String, Table>>,
    changes: RefCell<Vec<Change>>,
    level: Cell<usize>,
}

type Tuple<'a> = Vec<(&'a str, &'a Row)>;

impl MemoryConnection {
    pub fn new() -> Self {
        Self {
            tables: RefCell::new(BTreeMap::new()),
            changes: RefCell::new(Vec::new()),
            level: Cell::new(0),
        }
    }

    /// All rows of `table` in insertion order; empty when the table was never written.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .borrow()
            .get(table)
            .map(|t| t.rows().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .borrow()
            .get(table)
            .map(Table::row_count)
            .unwrap_or(0)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.borrow().contains_key(table)
    }

    fn record(&self, change: Change) {
        if self.level.get() > 0 {
            self.changes.borrow_mut().push(change);
        }
    }

    fn matching_ids(table: &Table, query: &Query) -> Result<Vec<usize>> {
        if !query.joins().is_empty() {
            return Err(OrmError::Storage(format!(
                "joins are not supported when writing to '{}'",
                table.name()
            )));
        }
        Ok(table
            .rows()
            .filter(|(_, row)| {
                let tuple: Tuple<'_> = vec![(table.name(), *row)];
                query
                    .conditions()
                    .iter()
                    .all(|condition| condition_holds(&tuple, condition))
            })
            .map(|(id, _)| id)
            .collect())
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MemoryConnection {
    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let tables = self.tables.borrow();
        let Some(base) = tables.get(query.table()) else {
            event!(Level::DEBUG, statement = %query, rows = 0, "memory select");
            return Ok(Vec::new());
        };

        let mut tuples: Vec<Tuple<'_>> = base
            .rows()
            .map(|(_, row)| vec![(base.name(), row)])
            .collect();

        for join in query.joins() {
            let Some(joined) = tables.get(&join.table) else {
                tuples.clear();
                break;
            };
            let mut next = Vec::new();
            for tuple in &tuples {
                for (_, row) in joined.rows() {
                    let mut candidate = tuple.clone();
                    candidate.push((joined.name(), row));
                    let left = resolve(&candidate, &join.left);
                    let right = resolve(&candidate, &join.right);
                    if values_match(&left, &right) {
                        next.push(candidate);
                    }
                }
            }
            tuples = next;
        }

        tuples.retain(|tuple| {
            query
                .conditions()
                .iter()
                .all(|condition| condition_holds(tuple, condition))
        });

        if !query.orders().is_empty() {
            tuples.sort_by(|a, b| {
                for (column, direction) in query.orders() {
                    let ordering = resolve(a, column)
                        .partial_cmp(&resolve(b, column))
                        .unwrap_or(Ordering::Equal);
                    let ordering = match direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = query.limit_value() {
            tuples.truncate(limit);
        }

        let rows: Vec<Row> = tuples
            .iter()
            .map(|tuple| project(tuple, query.selections()))
            .collect();

        event!(Level::DEBUG, statement = %query, rows = rows.len(), "memory select");
        Ok(rows)
    }

    fn insert(&self, table: &str, row: Row) -> Result<()> {
        let id = {
            let mut tables = self.tables.borrow_mut();
            let target = tables
                .entry(table.to_string())
                .or_insert_with(|| Table::new(table));
            target.insert(row)
        };
        self.record(Change::InsertRow {
            table: table.to_string(),
            row_id: id,
        });
        event!(Level::DEBUG, table = %table, row_id = id, "memory insert");
        Ok(())
    }

    fn insert_get_id(
        &self,
        table: &str,
        mut row: Row,
        key_name: &str,
        _sequence: Option<&str>,
    ) -> Result<Value> {
        let (id, key) = {
            let mut tables = self.tables.borrow_mut();
            let target = tables
                .entry(table.to_string())
                .or_insert_with(|| Table::new(table));
            let key = target.next_key(key_name);
            row.insert(key_name.to_string(), Value::Integer(key));
            (target.insert(row), key)
        };
        self.record(Change::InsertRow {
            table: table.to_string(),
            row_id: id,
        });
        event!(Level::DEBUG, table = %table, key = key, "memory insert with generated key");
        Ok(Value::Integer(key))
    }

    fn update(&self, query: &Query, values: &Row) -> Result<usize> {
        let mut tables = self.tables.borrow_mut();
        let Some(table) = tables.get_mut(query.table()) else {
            return Ok(0);
        };
        let ids = Self::matching_ids(table, query)?;
        let mut changes = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(old_row) = table.update(*id, values) {
                changes.push(Change::UpdateRow {
                    table: query.table().to_string(),
                    row_id: *id,
                    old_row,
                });
            }
        }
        drop(tables);
        for change in changes {
            self.record(change);
        }
        event!(Level::DEBUG, statement = %query, rows = ids.len(), "memory update");
        Ok(ids.len())
    }

    fn delete(&self, query: &Query) -> Result<usize> {
        let mut tables = self.tables.borrow_mut();
        let Some(table) = tables.get_mut(query.table()) else {
            return Ok(0);
        };
        let ids = Self::matching_ids(table, query)?;
        let mut changes = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(old_row) = table.delete(*id) {
                changes.push(Change::DeleteRow {
                    table: query.table().to_string(),
                    row_id: *id,
                    old_row,
                });
            }
        }
        drop(tables);
        for change in changes {
            self.record(change);
        }
        event!(Level::DEBUG, statement = %query, rows = ids.len(), "memory delete");
        Ok(ids.len())
    }

    fn begin_transaction(&self) -> Result<()> {
        let level = self.level.get();
        if level == 0 {
            self.changes.borrow_mut().clear();
        }
        self.level.set(level + 1);
        event!(Level::TRACE, level = level + 1, "memory begin");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let level = self.level.get();
        if level == 0 {
            return Err(OrmError::Transaction("commit without an active transaction".into()));
        }
        self.level.set(level - 1);
        if level == 1 {
            self.changes.borrow_mut().clear();
        }
        event!(Level::TRACE, level = level - 1, "memory commit");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if self.level.get() == 0 {
            return Err(OrmError::Transaction("rollback without an active transaction".into()));
        }
        let changes: Vec<Change> = self.changes.borrow_mut().drain(..).collect();
        let undone = changes.len();
        let mut tables = self.tables.borrow_mut();
        for change in changes.into_iter().rev() {
            let Some(table) = tables.get_mut(change.table_name()) else {
                continue;
            };
            match change {
                Change::InsertRow { row_id, .. } => {
                    table.delete(row_id);
                }
                Change::UpdateRow { row_id, old_row, .. }
                | Change::DeleteRow { row_id, old_row, .. } => {
                    table.restore(row_id, old_row);
                }
            }
        }
        self.level.set(0);
        event!(Level::DEBUG, undone, "memory rollback");
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.level.get()
    }
}

fn resolve(tuple: &[(&str, &Row)], column: &str) -> Value {
    if let Some((table, name)) = column.split_once('.') {
        return tuple
            .iter()
            .find(|(t, _)| *t == table)
            .and_then(|(_, row)| row.get(name).cloned())
            .unwrap_or(Value::Null);
    }
    tuple
        .iter()
        .find_map(|(_, row)| row.get(column).cloned())
        .unwrap_or(Value::Null)
}

fn values_match(left: &Value, right: &Value) -> bool {
    !left.is_null() && !right.is_null() && (left == right || left.loosely_equals(right))
}

fn condition_holds(tuple: &[(&str, &Row)], condition: &Condition) -> bool {
    match condition {
        Condition::Eq(column, value) => values_match(&resolve(tuple, column), value),
        Condition::In(column, values) => {
            let actual = resolve(tuple, column);
            values.iter().any(|v| values_match(&actual, v))
        }
        Condition::Null(column) => resolve(tuple, column).is_null(),
        Condition::NotNull(column) => !resolve(tuple, column).is_null(),
    }
}

fn project(tuple: &[(&str, &Row)], selections: &[Selection]) -> Row {
    if selections.is_empty() {
        return tuple.first().map(|(_, row)| (*row).clone()).unwrap_or_default();
    }
    let mut out = Row::new();
    for selection in selections {
        match selection {
            Selection::All(None) => {
                for (_, row) in tuple.iter().rev() {
                    out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Selection::All(Some(table)) => {
                if let Some((_, row)) = tuple.iter().find(|(t, _)| t == table) {
                    out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Selection::Column { column, .. } => {
                if let Some(name) = selection.output_name() {
                    out.insert(name.to_string(), resolve(tuple, column));
                }
            }
        }
    }
    out
}
