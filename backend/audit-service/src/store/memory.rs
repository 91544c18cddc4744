use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{AuditStore, PageWindow, DEFAULT_MAX_PAGE_LIMIT};
use crate::error::{AuditError, Result};
use crate::models::{AuditEntry, NewAuditEntry};

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    dedupe_keys: HashSet<String>,
    next_id: i64,
}

/// Process-local audit store with the same contract as [`super::PgAuditStore`]
///
/// Used by local runs and tests; `set_available(false)` simulates an outage.
pub struct InMemoryAuditStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
    max_page_limit: i64,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::with_max_page_limit(DEFAULT_MAX_PAGE_LIMIT)
    }

    pub fn with_max_page_limit(max_page_limit: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
            available: AtomicBool::new(true),
            max_page_limit,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All entries in insertion order
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.inner.read().await.entries.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuditError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, entry: NewAuditEntry) -> Result<i64> {
        self.check_available()?;

        let mut inner = self.inner.write().await;
        let key = entry.dedupe_key.into_inner();
        if !inner.dedupe_keys.insert(key.clone()) {
            return Err(AuditError::DuplicateKey(key));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(AuditEntry {
            id,
            ref_no: entry.ref_no,
            date: entry.date,
            payload: entry.payload,
            dedupe_key: key,
        });
        Ok(id)
    }

    async fn page(&self, page: i64, limit: i64) -> Result<Vec<AuditEntry>> {
        self.check_available()?;
        let window = PageWindow::new(page, limit, self.max_page_limit)?;

        let inner = self.inner.read().await;
        let skip = usize::try_from(window.offset).unwrap_or(usize::MAX);
        let take = usize::try_from(window.limit).unwrap_or(0);

        // ids are assigned in push order, so reverse iteration is id DESC
        Ok(inner
            .entries
            .iter()
            .rev()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    async fn count_by_ref_since(&self, ref_no: &str, since: DateTime<Utc>) -> Result<i64> {
        self.check_available()?;

        let inner = self.inner.read().await;
        let count = inner
            .entries
            .iter()
            .filter(|entry| entry.ref_no == ref_no && entry.date >= since)
            .count();
        Ok(count as i64)
    }
}
