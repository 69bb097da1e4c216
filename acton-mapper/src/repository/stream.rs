//! Lazy entity streams over one reader connection

use std::marker::PhantomData;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::rows::map_row;
use super::sql_repository::SqlRepository;
use super::traits::EntityStream;
use crate::database::{Row, RowStream};
use crate::error::{CancelReason, Error, Result};
use crate::mapping::{Entity, EntityDescriptor};
use crate::resilience::CallSite;
use crate::sql::Statement;

/// A prepared query waiting for its first poll
pub(crate) struct QueryPlan {
    pub repository: SqlRepository,
    pub site: CallSite,
    pub statement: Statement,
    pub descriptor: Arc<EntityDescriptor>,
}

/// An open reader, positioned after the rows already delivered
struct Cursor<E> {
    rows: RowStream,
    /// First row, fetched while opening
    pending: Option<Row>,
    token: CancellationToken,
    site: CallSite,
    descriptor: Arc<EntityDescriptor>,
    delivered: u64,
    _entity: PhantomData<fn() -> E>,
}

enum State<E> {
    Pending(Box<QueryPlan>),
    Open(Box<Cursor<E>>),
    Finished,
}

/// Stream the entities produced by `plan`
///
/// Nothing runs until the first poll. Opening the reader and fetching the
/// first row go through the retry pipeline; rows after that are read without
/// retries. The connection is released when the stream ends, fails, is
/// cancelled or is dropped.
pub(crate) fn entity_stream<E: Entity>(plan: Result<QueryPlan>) -> EntityStream<E> {
    let initial = match plan {
        Ok(plan) => State::Pending(Box::new(plan)),
        Err(e) => return stream::once(async move { Err(e) }).boxed(),
    };

    stream::unfold(initial, |state| async move {
        let mut cursor = match state {
            State::Finished => return None,
            State::Open(cursor) => cursor,
            State::Pending(plan) => match open::<E>(*plan).await {
                Ok(cursor) => Box::new(cursor),
                Err(e) => return Some((Err(e), State::Finished)),
            },
        };

        match cursor.next_entity().await {
            Some(Ok(entity)) => Some((Ok(entity), State::Open(cursor))),
            Some(Err(e)) => Some((Err(e), State::Finished)),
            None => {
                tracing::debug!(
                    operation = %cursor.site.operation,
                    entity = cursor.site.entity,
                    rows = cursor.delivered,
                    "Query stream completed"
                );
                None
            }
        }
    })
    .boxed()
}

async fn open<E: Entity>(plan: QueryPlan) -> Result<Cursor<E>> {
    let QueryPlan {
        repository,
        site,
        statement,
        descriptor,
    } = plan;

    let statement = &statement;
    let (pending, rows) = repository
        .run(&site, statement, move |connection| async move {
            let mut rows = connection.execute_reader(statement.clone());
            let first = rows.next().await.transpose()?;
            Ok((first, rows))
        })
        .await?;

    Ok(Cursor {
        rows,
        pending,
        token: repository.cancellation_token(),
        site,
        descriptor,
        delivered: 0,
        _entity: PhantomData,
    })
}

impl<E: Entity> Cursor<E> {
    async fn next_entity(&mut self) -> Option<Result<E>> {
        loop {
            if self.token.is_cancelled() {
                return Some(Err(Error::Cancelled(CancelReason::Caller)));
            }

            let row = match self.pending.take() {
                Some(row) => row,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => {
                            return Some(Err(Error::Cancelled(CancelReason::Caller)))
                        }
                        next = self.rows.next() => next,
                    };
                    match next? {
                        Ok(row) => row,
                        Err(e) => return Some(Err(e)),
                    }
                }
            };

            match map_row::<E>(&self.descriptor, row) {
                Ok(Some(entity)) => {
                    self.delivered += 1;
                    return Some(Ok(entity));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
