mod memory;
mod postgres;

pub use memory::InMemoryAuditStore;
pub use postgres::PgAuditStore;

use chrono::{DateTime, Utc};

use crate::error::{AuditError, Result};
use crate::models::{AuditEntry, NewAuditEntry};

/// Upper bound applied to `limit` when the caller does not configure one
pub const DEFAULT_MAX_PAGE_LIMIT: i64 = 100;

/// Durable audit history.
///
/// Implementations must enforce uniqueness of `dedupe_key` themselves
/// (e.g. a unique index) and report a violation as [`AuditError::DuplicateKey`].
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert one entry atomically, returning the assigned id
    async fn insert(&self, entry: NewAuditEntry) -> Result<i64>;

    /// Page of entries ordered by id descending
    async fn page(&self, page: i64, limit: i64) -> Result<Vec<AuditEntry>>;

    /// Entries with `ref_no` and `date >= since`, read-committed
    async fn count_by_ref_since(&self, ref_no: &str, since: DateTime<Utc>) -> Result<i64>;
}

/// Validated LIMIT/OFFSET pair for a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

impl PageWindow {
    /// Rejects negative inputs, clamps `limit` to `max_limit`
    pub fn new(page: i64, limit: i64, max_limit: i64) -> Result<Self> {
        if page < 0 {
            return Err(AuditError::Validation(format!(
                "page must be non-negative, got {}",
                page
            )));
        }
        if limit < 0 {
            return Err(AuditError::Validation(format!(
                "limit must be non-negative, got {}",
                limit
            )));
        }

        let limit = limit.min(max_limit.max(0));
        Ok(Self {
            limit,
            offset: page.saturating_mul(limit),
        })
    }
}
