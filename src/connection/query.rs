use crate::core::Value;
use std::fmt;

/// A where-clause understood by every [`Connection`](super::Connection).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    Null(String),
    NotNull(String),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(column, _)
            | Condition::In(column, _)
            | Condition::Null(column)
            | Condition::NotNull(column) => column,
        }
    }
}

/// One entry of a select list: `table.*`, `*`, `column` or `column as alias`.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All(Option<String>),
    Column { column: String, alias: Option<String> },
}

impl Selection {
    /// Parses `"users.*"`, `"*"`, `"name"` and `"roles_users.role_id as pivot_role_id"`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text == "*" {
            return Selection::All(None);
        }
        if let Some(table) = text.strip_suffix(".*") {
            return Selection::All(Some(table.to_string()));
        }
        let lowered = text.to_ascii_lowercase();
        if let Some(pos) = lowered.find(" as ") {
            return Selection::Column {
                column: text[..pos].trim().to_string(),
                alias: Some(text[pos + 4..].trim().to_string()),
            };
        }
        Selection::Column {
            column: text.to_string(),
            alias: None,
        }
    }

    /// Key under which the selected column appears in result rows.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Selection::All(_) => None,
            Selection::Column { column, alias } => Some(
                alias
                    .as_deref()
                    .unwrap_or_else(|| column.rsplit('.').next().unwrap_or(column)),
            ),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All(None) => write!(f, "*"),
            Selection::All(Some(table)) => write!(f, "{}.*", table),
            Selection::Column { column, alias: None } => write!(f, "{}", column),
            Selection::Column {
                column,
                alias: Some(alias),
            } => write!(f, "{} as {}", column, alias),
        }
    }
}

/// Inner equality join: `join table on left = right`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Builder for the statements the mapping layer issues. Owned and cheap to
/// clone; connections interpret it, the mapping layer never renders SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    selections: Vec<Selection>,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    orders: Vec<(String, Direction)>,
    limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            selections: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            orders: Vec::new(),
            limit: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn orders(&self) -> &[(String, Direction)] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_select(columns);
        self
    }

    pub fn add_select<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.selections
            .extend(columns.into_iter().map(|c| Selection::parse(c.as_ref())));
    }

    pub fn join(mut self, table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.add_join(table, left, right);
        self
    }

    pub fn add_join(&mut self, table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) {
        self.joins.push(Join {
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_condition(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.add_condition(Condition::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.add_condition(Condition::Null(column.into()));
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.add_condition(Condition::NotNull(column.into()));
        self
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn has_condition_on(&self, column: &str) -> bool {
        self.conditions.iter().any(|c| c.column() == column)
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.add_order(column, direction);
        self
    }

    pub fn add_order(&mut self, column: impl Into<String>, direction: Direction) {
        self.orders.push((column.into(), direction));
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selections.is_empty() {
            write!(f, "select * from {}", self.table)?;
        } else {
            let columns: Vec<String> = self.selections.iter().map(|s| s.to_string()).collect();
            write!(f, "select {} from {}", columns.join(", "), self.table)?;
        }
        for join in &self.joins {
            write!(f, " inner join {} on {} = {}", join.table, join.left, join.right)?;
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            write!(f, "{}", if i == 0 { " where " } else { " and " })?;
            match condition {
                Condition::Eq(column, value) => write!(f, "{} = {}", column, value)?,
                Condition::In(column, values) => {
                    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    write!(f, "{} in ({})", column, values.join(", "))?
                }
                Condition::Null(column) => write!(f, "{} is null", column)?,
                Condition::NotNull(column) => write!(f, "{} is not null", column)?,
            }
        }
        for (i, (column, direction)) in self.orders.iter().enumerate() {
            write!(f, "{}", if i == 0 { " order by " } else { ", " })?;
            match direction {
                Direction::Asc => write!(f, "{} asc", column)?,
                Direction::Desc => write!(f, "{} desc", column)?,
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_parsing() {
        assert_eq!(Selection::parse("users.*"), Selection::All(Some("users".into())));
        assert_eq!(Selection::parse("*"), Selection::All(None));
        assert_eq!(
            Selection::parse("role_user.role_id as pivot_role_id"),
            Selection::Column {
                column: "role_user.role_id".into(),
                alias: Some("pivot_role_id".into())
            }
        );
        assert_eq!(Selection::parse("users.name").output_name(), Some("name"));
    }

    #[test]
    fn test_query_renders_for_logging() {
        let query = Query::from("posts")
            .join("users", "users.id", "posts.user_id")
            .where_in("users.country_id", [1, 2])
            .where_null("posts.deleted_at")
            .order_by("posts.id", Direction::Desc)
            .limit(5);

        assert_eq!(
            query.to_string(),
            "select * from posts inner join users on users.id = posts.user_id \
             where users.country_id in (1, 2) and posts.deleted_at is null \
             order by posts.id desc limit 5"
        );
    }
}
