//! Repository over mapped entities
//!
//! # Features
//!
//! - **CRUD**: [`Repository`] keyed lookups, counts, inserts, updates and deletes
//! - **Batches**: bulk insert and filter-scoped upsert in one statement each
//! - **Streaming**: [`EntityStream`] reads rows lazily over one connection
//! - **Pagination**: [`Pagination`] sorts by the first column, limits and offsets
//!
//! [`SqlRepository`] implements the trait over any
//! [`Connector`](crate::database::Connector), with SQL synthesized from the
//! mapped type's metadata and every call routed through the retry pipeline.

mod operation;
mod pagination;
mod rows;
mod sql_repository;
mod stream;
mod traits;

pub use operation::RepositoryOperation;
pub use pagination::{Pagination, SortOrder};
pub use sql_repository::SqlRepository;
pub use traits::{EntityStream, Repository};
