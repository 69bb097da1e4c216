//! # acton-mapper
//!
//! Metadata-driven SQL synthesis and repository engine for PostgreSQL.
//!
//! Types describe their table, columns, keys and foreign keys once; the
//! engine derives the SQL for every operation from that description, caches
//! it per type, and runs it through a retrying, cancellable pipeline.
//!
//! ## Features
//!
//! - **Mapping**: [`Record`](mapping::Record), [`Entity`](mapping::Entity) and
//!   [`Filter`](mapping::Filter) describe tables, joins and query predicates
//! - **Synthesis**: deterministic SQL templates per type and operation, computed once
//! - **Batches**: bulk insert and filter-scoped upsert with conflict removal
//! - **Streaming**: lazy row streams that release their connection on drop
//! - **Resilience**: retry with constant, linear or exponential backoff and jitter
//! - **Configuration**: TOML files, XDG directories and environment variables
//!
//! ## Example
//!
//! ```rust,no_run
//! use acton_mapper::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Widget {
//!     base: EntityBase,
//!     name: String,
//! }
//!
//! impl Record for Widget {
//!     fn columns() -> Vec<ColumnDescriptor> {
//!         vec![ColumnDescriptor::new("Name", DbType::Text)]
//!     }
//!
//!     fn value_of(&self, property: &str) -> Option<SqlValue> {
//!         match property {
//!             "Name" => Some(self.name.clone().into()),
//!             _ => self.base.value_of(property),
//!         }
//!     }
//!
//!     fn assign(&mut self, property: &str, value: SqlValue) -> std::result::Result<(), ValueError> {
//!         match property {
//!             "Name" => self.name = value.try_into()?,
//!             _ => self.base.assign(property, value)?,
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl Entity for Widget {
//!     fn table() -> TableDescriptor {
//!         TableDescriptor::new("widget")
//!     }
//!
//!     fn embedded_columns() -> Vec<ColumnDescriptor> {
//!         EntityBase::columns()
//!     }
//! }
//!
//! struct NameContains(String);
//!
//! impl Filter for NameContains {
//!     type Entity = Widget;
//!
//!     fn filter_columns() -> Vec<FilterColumnDescriptor> {
//!         vec![FilterColumnDescriptor::new("NameContains", FilterOperator::ILike).bound_to("Name")]
//!     }
//!
//!     fn value_of(&self, property: &str) -> Option<SqlValue> {
//!         (property == "NameContains").then(|| self.0.clone().into())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::load()?;
//!     init_tracing(&settings)?;
//!
//!     let repository = SqlRepository::connect(&settings).await?;
//!     let filter = NameContains("bolt".into());
//!     println!("{} matching widgets", repository.count(&filter).await?);
//!
//!     let mut widgets = repository.query(&filter, Pagination::first_page(10));
//!     while let Some(widget) = widgets.next().await {
//!         println!("{}", widget?.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod observability;
pub mod repository;
pub mod resilience;
pub mod sql;

#[cfg(test)]
mod testing;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{DatabaseSettings, RetrySettings, Settings};
    pub use crate::database::{Connection, Connector, PgConnector, Row};
    pub use crate::error::{
        CancelReason, DatabaseError, DatabaseErrorKind, DatabaseOperation, Error, Result,
    };
    pub use crate::mapping::{
        ColumnDescriptor, DbType, Entity, EntityBase, Filter, FilterColumnDescriptor,
        FilterOperator, JoinKind, Record, SqlValue, TableDescriptor, ValueError,
    };
    pub use crate::observability::init_tracing;
    pub use crate::repository::{
        EntityStream, Pagination, Repository, RepositoryOperation, SortOrder, SqlRepository,
    };
    pub use crate::resilience::{BackoffKind, RetryObserver, RetryPipeline, RetryPolicy};

    pub use futures::StreamExt;
    pub use tokio_util::sync::CancellationToken;
}
