//! Mapped fixtures and an in-memory driver for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::database::{Connection, Connector, Row, RowStream};
use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation, Result};
use crate::mapping::{
    ColumnDescriptor, DbType, Entity, EntityBase, Filter, FilterColumnDescriptor, FilterOperator,
    JoinKind, Record, SqlValue, TableDescriptor, ValueError,
};
use crate::sql::Statement;

/// Flat entity declaring its own key
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Widget {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Record for Widget {
    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("Id", DbType::Integer).primary_key(),
            ColumnDescriptor::new("Name", DbType::Text),
            ColumnDescriptor::new("CreatedAt", DbType::Timestamp),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            "CreatedAt" => Some(self.created_at.into()),
            _ => None,
        }
    }

    fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
        match property {
            "Id" => self.id = value.try_into()?,
            "Name" => self.name = value.try_into()?,
            "CreatedAt" => self.created_at = value.try_into()?,
            _ => {}
        }
        Ok(())
    }
}

impl Entity for Widget {
    fn table() -> TableDescriptor {
        TableDescriptor::new("widget")
    }
}

/// Entity embedding [`EntityBase`] with a unique name
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Customer {
    pub base: EntityBase,
    pub name: String,
    pub region: Option<String>,
}

impl Customer {
    pub fn new(name: &str, region: &str) -> Self {
        Self {
            name: name.to_string(),
            region: Some(region.to_string()),
            ..Default::default()
        }
    }
}

impl Record for Customer {
    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("Name", DbType::Text).unique(),
            ColumnDescriptor::new("Region", DbType::Text),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "Name" => Some(self.name.clone().into()),
            "Region" => Some(self.region.clone().into()),
            _ => self.base.value_of(property),
        }
    }

    fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
        match property {
            "Name" => self.name = value.try_into()?,
            "Region" => self.region = Some(value.try_into()?),
            _ => self.base.assign(property, value)?,
        }
        Ok(())
    }
}

impl Entity for Customer {
    fn table() -> TableDescriptor {
        TableDescriptor::new("customer")
    }

    fn embedded_columns() -> Vec<ColumnDescriptor> {
        EntityBase::columns()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum OrderStatus {
    #[default]
    Open = 0,
    Shipped = 1,
    Cancelled = 2,
}

impl TryFrom<i64> for OrderStatus {
    type Error = ValueError;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Shipped),
            2 => Ok(Self::Cancelled),
            _ => Err(ValueError::new("OrderStatus", "unknown discriminant")),
        }
    }
}

/// Entity with two foreign keys and a unique reference
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SalesOrder {
    pub base: EntityBase,
    pub customer_id: i64,
    pub widget_id: Option<i64>,
    pub quantity: i64,
    pub status: OrderStatus,
    pub reference: String,
}

impl Record for SalesOrder {
    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("CustomerId", DbType::Integer)
                .references::<Customer>(JoinKind::Inner),
            ColumnDescriptor::new("WidgetId", DbType::Integer).references::<Widget>(JoinKind::Left),
            ColumnDescriptor::new("Quantity", DbType::Integer),
            ColumnDescriptor::new("Status", DbType::Integer),
            ColumnDescriptor::new("Reference", DbType::Text).unique(),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "CustomerId" => Some(self.customer_id.into()),
            "WidgetId" => Some(self.widget_id.into()),
            "Quantity" => Some(self.quantity.into()),
            "Status" => Some(SqlValue::Enum(self.status as i64)),
            "Reference" => Some(self.reference.clone().into()),
            _ => self.base.value_of(property),
        }
    }

    fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
        match property {
            "CustomerId" => self.customer_id = value.try_into()?,
            "WidgetId" => self.widget_id = Some(value.try_into()?),
            "Quantity" => self.quantity = value.try_into()?,
            "Status" => self.status = OrderStatus::try_from(i64::try_from(value)?)?,
            "Reference" => self.reference = value.try_into()?,
            _ => self.base.assign(property, value)?,
        }
        Ok(())
    }
}

impl Entity for SalesOrder {
    fn table() -> TableDescriptor {
        TableDescriptor::new("sales_order")
    }

    fn embedded_columns() -> Vec<ColumnDescriptor> {
        EntityBase::columns()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WidgetFilter {
    pub name: Option<String>,
    pub name_contains: Option<String>,
}

impl Filter for WidgetFilter {
    type Entity = Widget;

    fn filter_columns() -> Vec<FilterColumnDescriptor> {
        vec![
            FilterColumnDescriptor::new("Name", FilterOperator::Equal),
            FilterColumnDescriptor::new("NameContains", FilterOperator::ILike).bound_to("Name"),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "Name" => self.name.clone().map(SqlValue::from),
            "NameContains" => self.name_contains.clone().map(SqlValue::from),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CustomerFilter {
    pub region: Option<String>,
}

impl Filter for CustomerFilter {
    type Entity = Customer;

    fn filter_columns() -> Vec<FilterColumnDescriptor> {
        vec![FilterColumnDescriptor::new("Region", FilterOperator::Equal)]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "Region" => self.region.clone().map(SqlValue::from),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SalesOrderFilter {
    pub customer_region: Option<String>,
    pub status: Option<OrderStatus>,
    pub min_quantity: Option<i64>,
    pub reference_like: Option<String>,
}

impl Filter for SalesOrderFilter {
    type Entity = SalesOrder;

    fn filter_columns() -> Vec<FilterColumnDescriptor> {
        vec![
            FilterColumnDescriptor::new("CustomerRegion", FilterOperator::Equal)
                .bound_to("Region")
                .on_table("customer"),
            FilterColumnDescriptor::new("Status", FilterOperator::Equal),
            FilterColumnDescriptor::new("MinQuantity", FilterOperator::GreaterThanOrEqual)
                .bound_to("Quantity"),
            FilterColumnDescriptor::new("ReferenceLike", FilterOperator::Like).bound_to("Reference"),
        ]
    }

    fn value_of(&self, property: &str) -> Option<SqlValue> {
        match property {
            "CustomerRegion" => self.customer_region.clone().map(SqlValue::from),
            "Status" => self.status.map(|s| SqlValue::Enum(s as i64)),
            "MinQuantity" => self.min_quantity.map(SqlValue::from),
            "ReferenceLike" => self.reference_like.clone().map(SqlValue::from),
            _ => None,
        }
    }
}

/// Build a row from `(label, value)` pairs
pub(crate) fn row<const N: usize>(columns: [(&str, SqlValue); N]) -> Row {
    columns
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Scripted outcome of the next statement
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Scalar(Option<SqlValue>),
    Affected(u64),
    Rows(Vec<Row>),
    /// Deliver the rows, then never finish
    RowsThenHang(Vec<Row>),
    Fail(DatabaseErrorKind),
}

#[derive(Debug, Default)]
struct State {
    replies: VecDeque<Reply>,
    open_failures: VecDeque<DatabaseErrorKind>,
    statements: Vec<Statement>,
    opened: usize,
    released: usize,
}

/// In-memory database that replays scripted replies
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn fail_open(&self, kind: DatabaseErrorKind) -> &Self {
        self.state.lock().unwrap().open_failures.push_back(kind);
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn last_statement(&self) -> Statement {
        self.statements().pop().expect("no statement was executed")
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    fn next_reply(&self, statement: &Statement) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.statements.push(statement.clone());
        state
            .replies
            .pop_front()
            .unwrap_or_else(|| panic!("no reply scripted for:\n{}", statement.sql))
    }
}

fn failure(operation: DatabaseOperation, kind: DatabaseErrorKind) -> crate::error::Error {
    DatabaseError::new(operation, kind, "scripted failure").into()
}

#[async_trait]
impl Connector for MemoryDatabase {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.open_failures.pop_front() {
            return Err(failure(DatabaseOperation::Connect, kind));
        }
        state.opened += 1;
        Ok(Box::new(MemoryConnection {
            database: self.clone(),
        }))
    }
}

struct MemoryConnection {
    database: MemoryDatabase,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.database.state.lock() {
            state.released += 1;
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute_scalar(&mut self, statement: &Statement) -> Result<Option<SqlValue>> {
        match self.database.next_reply(statement) {
            Reply::Scalar(value) => Ok(value),
            Reply::Fail(kind) => Err(failure(DatabaseOperation::Scalar, kind)),
            other => panic!("scalar statement got {:?}", other),
        }
    }

    async fn execute_non_query(&mut self, statement: &Statement) -> Result<u64> {
        match self.database.next_reply(statement) {
            Reply::Affected(count) => Ok(count),
            Reply::Fail(kind) => Err(failure(DatabaseOperation::NonQuery, kind)),
            other => panic!("non-query statement got {:?}", other),
        }
    }

    fn execute_reader(self: Box<Self>, statement: Statement) -> RowStream {
        let reply = self.database.next_reply(&statement);
        let rows: RowStream = match reply {
            Reply::Rows(rows) => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Reply::RowsThenHang(rows) => stream::iter(rows.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Reply::Fail(kind) => stream::iter([Err(failure(DatabaseOperation::Reader, kind))]).boxed(),
            other => panic!("reader statement got {:?}", other),
        };
        // The stream owns the connection until it is dropped.
        let connection = self;
        rows.map(move |item| {
            let _keep = &connection;
            item
        })
        .boxed()
    }
}
