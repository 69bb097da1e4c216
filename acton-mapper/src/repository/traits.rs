//! Repository contract
//!
//! The trait uses RPITIT (Return Position Impl Trait In Traits), so async
//! methods need no `async_trait` boxing. Entity keys are `i64` primary keys.
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_mapper::prelude::*;
//!
//! async fn restock(repo: &impl Repository, filter: &WidgetFilter) -> Result<()> {
//!     let mut widgets = repo.query(filter, Pagination::first_page(100));
//!     while let Some(widget) = widgets.next().await {
//!         let mut widget = widget?;
//!         widget.stock += 10;
//!         repo.update(&widget).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::future::Future;

use futures::stream::BoxStream;

use super::pagination::Pagination;
use crate::error::Result;
use crate::mapping::{Entity, Filter};

/// Lazy, single-pass sequence of mapped rows
///
/// Rows arrive in database order. Dropping the stream releases its
/// connection; a cancelled stream yields one [`Error::Cancelled`] and ends.
///
/// [`Error::Cancelled`]: crate::error::Error::Cancelled
pub type EntityStream<E> = BoxStream<'static, Result<E>>;

/// CRUD and streaming operations over mapped entities
pub trait Repository: Send + Sync {
    /// Whether a row with primary key `id` exists
    fn exists<E: Entity>(&self, id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Whether any row matches `filter`
    fn exists_matching<F: Filter>(&self, filter: &F) -> impl Future<Output = Result<bool>> + Send;

    /// Number of rows matching `filter`
    fn count<F: Filter>(&self, filter: &F) -> impl Future<Output = Result<i64>> + Send;

    /// The row with primary key `id`, if any
    fn get_by_key<E: Entity>(&self, id: i64) -> impl Future<Output = Result<Option<E>>> + Send;

    /// The first row matching `filter`, unsorted
    fn get_first<F: Filter>(
        &self,
        filter: &F,
    ) -> impl Future<Output = Result<Option<F::Entity>>> + Send;

    /// Stream the rows matching `filter`
    fn query<F: Filter>(&self, filter: &F, pagination: Pagination) -> EntityStream<F::Entity>;

    /// Stream the distinct own-column values of rows matching `filter`
    fn query_distinct<F: Filter>(
        &self,
        filter: &F,
        pagination: Pagination,
    ) -> EntityStream<F::Entity>;

    /// Delete every row; returns the number deleted
    fn delete_all<E: Entity>(&self) -> impl Future<Output = Result<u64>> + Send;

    fn delete_by_key<E: Entity>(&self, id: i64) -> impl Future<Output = Result<u64>> + Send;

    /// Delete the rows matching `filter`; an empty filter deletes every row
    fn delete<F: Filter>(&self, filter: &F) -> impl Future<Output = Result<u64>> + Send;

    /// Insert one entity and return its generated key
    fn insert<E: Entity>(&self, entity: &E) -> impl Future<Output = Result<i64>> + Send;

    /// Insert a batch; keys are returned in input order
    fn insert_batch<E: Entity>(
        &self,
        entities: &[E],
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Replace the rows matching `filter` with `entities` in one statement
    ///
    /// Keys are returned in input order.
    fn upsert<F: Filter>(
        &self,
        entities: &[F::Entity],
        filter: &F,
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Overwrite every non-key column of the row with the entity's key
    fn update<E: Entity>(&self, entity: &E) -> impl Future<Output = Result<u64>> + Send;
}
