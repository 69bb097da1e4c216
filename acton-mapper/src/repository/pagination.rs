//! Sorting and paging of streamed query results
//!
//! # Example
//!
//! ```rust
//! use acton_mapper::repository::{Pagination, SortOrder};
//!
//! // Third page of 20, newest first
//! let pagination = Pagination::page(3, 20).with_sort(SortOrder::Descending);
//! assert_eq!(pagination.offset, Some(40));
//! assert_eq!(pagination.limit, Some(20));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

const MAX_OFFSET: u64 = i64::MAX as u64;

/// Direction of the `ORDER BY 1` clause
///
/// # Example
///
/// ```rust
/// use acton_mapper::repository::SortOrder;
///
/// assert_eq!(SortOrder::Ascending.to_string(), "ASC");
/// assert_eq!(SortOrder::Descending.to_string(), "DESC");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

/// Optional sort, limit and offset for a query
///
/// Sorting is by the first selected column. Absent fields leave the query
/// unsorted, unlimited or unskipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub sort_order: Option<SortOrder>,
    /// Maximum number of rows to return
    pub limit: Option<u64>,
    /// Number of rows to skip
    pub offset: Option<u64>,
}

impl Pagination {
    /// No sorting, no limit, no offset
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            sort_order: None,
            limit: None,
            offset: None,
        }
    }

    /// First `limit` rows
    ///
    /// ```rust
    /// use acton_mapper::repository::Pagination;
    ///
    /// let first = Pagination::first_page(25);
    /// assert_eq!(first.limit, Some(25));
    /// assert_eq!(first.offset, None);
    /// ```
    #[must_use]
    pub const fn first_page(limit: u64) -> Self {
        Self {
            sort_order: None,
            limit: Some(limit),
            offset: None,
        }
    }

    /// Page `page_number` (1-indexed) of `page_size` rows
    ///
    /// The offset saturates at the largest `bigint` PostgreSQL accepts.
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        Self {
            sort_order: None,
            limit: Some(page_size),
            offset: Some(if offset > MAX_OFFSET { MAX_OFFSET } else { offset }),
        }
    }

    #[must_use]
    pub const fn with_sort(self, sort_order: SortOrder) -> Self {
        Self {
            sort_order: Some(sort_order),
            ..self
        }
    }

    #[must_use]
    pub const fn with_limit(self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self
        }
    }

    #[must_use]
    pub const fn with_offset(self, offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..self
        }
    }

    /// Whether the query can return no rows at all
    pub(crate) fn is_empty_page(&self) -> bool {
        self.limit == Some(0)
    }

    pub(crate) fn order_by_clause(&self) -> Option<String> {
        self.sort_order.map(|order| format!("ORDER BY 1 {}", order))
    }

    pub(crate) fn limit_clause(&self) -> Option<String> {
        self.limit.map(|limit| format!("LIMIT {}", limit))
    }

    pub(crate) fn offset_clause(&self) -> Option<String> {
        self.offset.map(|offset| format!("OFFSET {}", offset))
    }
}
