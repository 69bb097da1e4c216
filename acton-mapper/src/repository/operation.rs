//! Names of repository operations, used for retry tags and error context

use std::fmt;

/// Public repository operation being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Checking whether a key exists
    Exists,
    /// Checking whether any row matches a filter
    ExistsMatching,
    /// Counting rows matching a filter
    Count,
    /// Loading one entity by key
    GetByKey,
    /// Loading the first entity matching a filter
    GetFirst,
    /// Streaming entities matching a filter
    Query,
    /// Streaming distinct entities matching a filter
    QueryDistinct,
    /// Deleting every row
    DeleteAll,
    /// Deleting one row by key
    DeleteByKey,
    /// Deleting rows matching a filter
    Delete,
    /// Inserting one entity
    Insert,
    /// Inserting a batch of entities
    InsertBatch,
    /// Replacing rows matching a filter with a batch
    Upsert,
    /// Updating every column of one entity by key
    Update,
}

impl RepositoryOperation {
    /// Whether the operation writes; writes use the mutation timeout
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::DeleteAll
                | Self::DeleteByKey
                | Self::Delete
                | Self::Insert
                | Self::InsertBatch
                | Self::Upsert
                | Self::Update
        )
    }
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => write!(f, "exists"),
            Self::ExistsMatching => write!(f, "exists_matching"),
            Self::Count => write!(f, "count"),
            Self::GetByKey => write!(f, "get_by_key"),
            Self::GetFirst => write!(f, "get_first"),
            Self::Query => write!(f, "query"),
            Self::QueryDistinct => write!(f, "query_distinct"),
            Self::DeleteAll => write!(f, "delete_all"),
            Self::DeleteByKey => write!(f, "delete_by_key"),
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
            Self::InsertBatch => write!(f, "insert_batch"),
            Self::Upsert => write!(f, "upsert"),
            Self::Update => write!(f, "update"),
        }
    }
}
