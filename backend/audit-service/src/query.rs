use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::{AuditError, Result};
use crate::models::{parse_timestamp, AuditProjection};
use crate::store::AuditStore;

pub const DEFAULT_PAGE: i64 = 0;
pub const DEFAULT_LIMIT: i64 = 5;

/// Read-side facade over the audit store
///
/// Defaults apply only to omitted parameters; an explicit `0` is kept.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn AuditStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Newest first
    pub async fn audit_logs(
        &self,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<AuditProjection>> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let limit = limit.unwrap_or(DEFAULT_LIMIT);

        let entries = self.store.page(page, limit).await?;
        Ok(entries.into_iter().map(AuditProjection::from).collect())
    }

    pub async fn ref_no_count(&self, ref_no: &str, since: DateTime<Utc>) -> Result<i64> {
        if ref_no.trim().is_empty() {
            return Err(AuditError::Validation("refNo must not be empty".to_string()));
        }
        self.store.count_by_ref_since(ref_no, since).await
    }

    /// `ref_no_count` with `till` given as an ISO-8601 string
    pub async fn ref_no_count_till(&self, ref_no: &str, till: &str) -> Result<i64> {
        let since = parse_timestamp(till).ok_or_else(|| {
            AuditError::Validation(format!("till is not an ISO-8601 timestamp: {}", till))
        })?;
        self.ref_no_count(ref_no, since).await
    }
}
