use crate::builder::ResultBuilder;
use crate::connection::{Direction, Query};
use crate::core::{OrmError, Result, Row, Value};
use crate::entity::Entity;
use crate::manager::Manager;
use crate::map::EntityMap;
use std::rc::Rc;
use tracing::{Level, event, info_span};

/// Query over one entity type that returns hydrated entities.
#[derive(Clone)]
pub struct EntityQuery {
    manager: Manager,
    map: Rc<EntityMap>,
    query: Query,
    eager: Vec<String>,
    with_trashed: bool,
}

impl EntityQuery {
    pub fn new(manager: Manager, map: Rc<EntityMap>) -> Self {
        let query = Query::from(map.table_name());
        Self {
            manager,
            map,
            query,
            eager: Vec::new(),
            with_trashed: false,
        }
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query = self.query.where_eq(column, value);
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.where_in(column, values);
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.query = self.query.where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.query = self.query.where_not_null(column);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.query = self.query.order_by(column, direction);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    /// Relations to eager load, dotted paths for nested ones.
    pub fn with<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eager.extend(relations.into_iter().map(Into::into));
        self
    }

    /// Includes soft-deleted rows.
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    pub fn entity_map(&self) -> &Rc<EntityMap> {
        &self.map
    }

    /// Statement actually sent to storage, with the type's implicit scopes.
    fn statement(&self) -> Query {
        let mut query = self.query.clone();
        if self.map.uses_soft_deletes() && !self.with_trashed {
            let column = self.map.qualify(&self.manager.config().deleted_at_column);
            if !query.has_condition_on(&column) {
                query = query.where_null(column);
            }
        }
        if self.map.parent_type().is_some()
            && let (Some(column), Some(value)) = (self.map.discriminator_column(), self.map.discriminator_value())
        {
            query = query.where_eq(self.map.qualify(column), value);
        }
        if !query.joins().is_empty() && query.selections().is_empty() {
            query = query.select([format!("{}.*", self.map.table_name())]);
        }
        query
    }

    /// Raw rows, before hydration.
    pub fn fetch_rows(&self) -> Result<Vec<Row>> {
        let statement = self.statement();
        let span = info_span!(
            "orm.query",
            entity_type = %self.map.type_name(),
            table = %statement.table()
        );
        let _enter = span.enter();

        let rows = self.manager.connection().select(&statement)?;
        event!(Level::DEBUG, statement = %statement, rows = rows.len(), "query executed");
        Ok(rows)
    }

    /// Entities for rows fetched by this query (or shaped like its rows).
    pub fn hydrate(&self, rows: Vec<Row>) -> Result<Vec<Entity>> {
        ResultBuilder::new(&self.manager, self.map.clone(), self.eager.clone()).build(rows)
    }

    pub fn get(&self) -> Result<Vec<Entity>> {
        self.hydrate(self.fetch_rows()?)
    }

    pub fn all(&self) -> Result<Vec<Entity>> {
        self.get()
    }

    /// Entities paired with the raw row each was built from.
    pub fn get_with_rows(&self) -> Result<Vec<(Row, Entity)>> {
        let rows = self.fetch_rows()?;
        let entities = self.hydrate(rows.clone())?;
        Ok(rows.into_iter().zip(entities).collect())
    }

    pub fn first(&self) -> Result<Option<Entity>> {
        let mut limited = self.clone();
        limited.query.set_limit(1);
        Ok(limited.get()?.into_iter().next())
    }

    pub fn find(self, key: impl Into<Value>) -> Result<Option<Entity>> {
        let column = self.map.qualified_key_name().ok_or_else(|| {
            OrmError::mapping(format!("'{}' has no primary key to find by", self.map.type_name()))
        })?;
        self.where_eq(column, key).first()
    }
}
