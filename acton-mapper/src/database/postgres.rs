//! PostgreSQL driver over a sqlx connection pool

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{Connection, Connector, Row, RowStream};
use crate::config::DatabaseSettings;
use crate::error::{sanitize_url, DatabaseError, DatabaseOperation, Error, Result};
use crate::mapping::{DbType, SqlValue};
use crate::sql::{Parameter, Statement};

/// Connector that acquires connections from a `PgPool`
#[derive(Debug, Clone)]
pub struct PgConnector {
    pool: PgPool,
    url_safe: String,
}

impl PgConnector {
    /// Create the pool without connecting; connections open on first acquire
    pub fn connect_lazy(settings: &DatabaseSettings) -> Result<Self> {
        let pool = pool_options(settings)
            .connect_lazy(&settings.connection_string)
            .map_err(|e| {
                Error::from(
                    DatabaseError::from(e)
                        .add_context(format!("pool for {}", sanitize_url(&settings.connection_string))),
                )
            })?;
        Ok(Self::from_pool_with_url(pool, &settings.connection_string))
    }

    /// Create the pool and open its first connection
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url_safe = sanitize_url(&settings.connection_string);
        let pool = pool_options(settings)
            .connect(&settings.connection_string)
            .await
            .map_err(|e| {
                Error::from(
                    DatabaseError::from(e)
                        .during(DatabaseOperation::Connect)
                        .add_context(format!("connect to {}", url_safe)),
                )
            })?;
        tracing::info!(
            url = %url_safe,
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Database connection pool created"
        );
        Ok(Self { pool, url_safe })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            url_safe: "<pool>".to_string(),
        }
    }

    fn from_pool_with_url(pool: PgPool, url: &str) -> Self {
        Self {
            pool,
            url_safe: sanitize_url(url),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pool_options(settings: &DatabaseSettings) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_millis(settings.acquire_timeout_ms))
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        let connection = self.pool.acquire().await.map_err(|e| {
            Error::from(
                DatabaseError::from(e)
                    .during(DatabaseOperation::Connect)
                    .add_context(format!("acquire from {}", self.url_safe)),
            )
        })?;
        Ok(Box::new(PgConnection { connection }))
    }
}

struct PgConnection {
    connection: PoolConnection<Postgres>,
}

fn failed(operation: DatabaseOperation) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::from(DatabaseError::from(e).during(operation))
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute_scalar(&mut self, statement: &Statement) -> Result<Option<SqlValue>> {
        let (sql, parameters) = statement.to_positional()?;
        let row = bind_all(sqlx::query(&sql), &parameters)
            .fetch_optional(&mut *self.connection)
            .await
            .map_err(failed(DatabaseOperation::Scalar))?;
        match row {
            Some(row) if !row.is_empty() => decode_column(&row, 0).map(Some),
            _ => Ok(None),
        }
    }

    async fn execute_non_query(&mut self, statement: &Statement) -> Result<u64> {
        let (sql, parameters) = statement.to_positional()?;
        let done = bind_all(sqlx::query(&sql), &parameters)
            .execute(&mut *self.connection)
            .await
            .map_err(failed(DatabaseOperation::NonQuery))?;
        Ok(done.rows_affected())
    }

    fn execute_reader(self: Box<Self>, statement: Statement) -> RowStream {
        let (tx, rx) = mpsc::channel::<Result<Row>>(1);
        let mut connection = self.connection;

        tokio::spawn(async move {
            let (sql, parameters) = match statement.to_positional() {
                Ok(compiled) => compiled,
                Err(e) => {
                    deliver_failure(&tx, e).await;
                    return;
                }
            };
            let mut rows = bind_all(sqlx::query(&sql), &parameters).fetch(&mut *connection);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = rows.next() => match next {
                        Some(Ok(row)) => {
                            if tx.send(decode_row(&row)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            deliver_failure(&tx, failed(DatabaseOperation::Reader)(e)).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

/// Send a reader failure, logging it when the stream was already dropped
async fn deliver_failure(tx: &mpsc::Sender<Result<Row>>, error: Error) {
    if let Err(mpsc::error::SendError(unsent)) = tx.send(Err(error)).await {
        tracing::debug!(
            error = ?unsent.err(),
            "Row stream dropped before a reader failure was delivered"
        );
    }
}

fn bind_all<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameters: &[&Parameter],
) -> Query<'q, Postgres, PgArguments> {
    parameters.iter().fold(query, |query, parameter| bind(query, parameter))
}

fn bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameter: &Parameter,
) -> Query<'q, Postgres, PgArguments> {
    match &parameter.value {
        SqlValue::Null => match parameter.db_type {
            DbType::Text => query.bind(None::<String>),
            DbType::Integer => query.bind(None::<i64>),
            DbType::Double => query.bind(None::<f64>),
            DbType::Boolean => query.bind(None::<bool>),
            DbType::Timestamp => query.bind(None::<DateTime<Utc>>),
            DbType::TextArray => query.bind(None::<Vec<String>>),
            DbType::IntegerArray => query.bind(None::<Vec<i64>>),
            DbType::DoubleArray => query.bind(None::<Vec<f64>>),
            DbType::TimestampArray => query.bind(None::<Vec<DateTime<Utc>>>),
        },
        SqlValue::Boolean(v) => query.bind(*v),
        SqlValue::Integer(v) | SqlValue::Enum(v) => query.bind(*v),
        SqlValue::Double(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::TextArray(v) => query.bind(v.clone()),
        SqlValue::IntegerArray(v) => query.bind(v.clone()),
        SqlValue::DoubleArray(v) => query.bind(v.clone()),
        SqlValue::TimestampArray(v) => query.bind(v.clone()),
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_string(), decode_column(row, column.ordinal())?)))
        .collect()
}

fn decode_column(row: &PgRow, index: usize) -> Result<SqlValue> {
    let column = row.column(index);
    let decode = failed(DatabaseOperation::Decode);
    let value = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map_err(decode)?.map(SqlValue::Boolean),
        "INT2" => row.try_get::<Option<i16>, _>(index).map_err(decode)?.map(SqlValue::from),
        "INT4" => row.try_get::<Option<i32>, _>(index).map_err(decode)?.map(SqlValue::from),
        "INT8" => row.try_get::<Option<i64>, _>(index).map_err(decode)?.map(SqlValue::Integer),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map_err(decode)?
            .map(|v| SqlValue::Double(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map_err(decode)?.map(SqlValue::Double),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index).map_err(decode)?.map(SqlValue::Text)
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map_err(decode)?
            .map(|v| SqlValue::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map_err(decode)?
            .map(|v| SqlValue::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map_err(decode)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map_err(decode)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(index)
            .map_err(decode)?
            .map(SqlValue::TextArray),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(index)
            .map_err(decode)?
            .map(|v| SqlValue::IntegerArray(v.into_iter().map(i64::from).collect())),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)
            .map_err(decode)?
            .map(SqlValue::IntegerArray),
        "FLOAT8[]" => row
            .try_get::<Option<Vec<f64>>, _>(index)
            .map_err(decode)?
            .map(SqlValue::DoubleArray),
        "TIMESTAMPTZ[]" => row
            .try_get::<Option<Vec<DateTime<Utc>>>, _>(index)
            .map_err(decode)?
            .map(SqlValue::TimestampArray),
        other => {
            return Err(DatabaseError::type_conversion(format!(
                "column '{}' has unsupported type {}",
                column.name(),
                other
            ))
            .into())
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
