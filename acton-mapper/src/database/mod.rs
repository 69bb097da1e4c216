//! Database driver seam
//!
//! The repository talks to the database only through [`Connector`] and
//! [`Connection`]. [`PgConnector`] implements them over a sqlx `PgPool`;
//! tests substitute an in-memory driver.
//!
//! A connection is scoped to one attempt of one repository call. Dropping it
//! releases it, so every exit path (success, error, cancellation) returns
//! the connection to its pool.

mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::mapping::SqlValue;
use crate::sql::Statement;

pub use postgres::PgConnector;

/// One result row: column labels with their values, in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether the first column is NULL or missing
    pub fn leading_is_null(&self) -> bool {
        self.get(0).map_or(true, SqlValue::is_null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_columns(self) -> Vec<(String, SqlValue)> {
        self.columns
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Rows delivered in database order; owns the connection that produces them
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Source of connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open (or acquire from a pool) one connection
    async fn open(&self) -> Result<Box<dyn Connection>>;
}

/// One open connection
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement and return the first column of its first row
    async fn execute_scalar(&mut self, statement: &Statement) -> Result<Option<SqlValue>>;

    /// Execute a statement and return the number of affected rows
    async fn execute_non_query(&mut self, statement: &Statement) -> Result<u64>;

    /// Execute a statement and stream its rows
    ///
    /// The stream takes over the connection, which is released when the
    /// stream ends or is dropped.
    fn execute_reader(self: Box<Self>, statement: Statement) -> RowStream;
}
