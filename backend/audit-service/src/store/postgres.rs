use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error};

use super::{AuditStore, PageWindow, DEFAULT_MAX_PAGE_LIMIT};
use crate::error::{AuditError, Result};
use crate::models::{AuditEntry, NewAuditEntry};

/// PostgreSQL-backed audit store
///
/// Schema (see `migrations/`):
/// ```sql
/// CREATE TABLE audit_entries (
///     id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
///     ref_no VARCHAR(255) NOT NULL,
///     event_date TIMESTAMPTZ NOT NULL,
///     payload JSONB NOT NULL,
///     dedupe_key VARCHAR(64) NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     CONSTRAINT uq_audit_entries_dedupe_key UNIQUE (dedupe_key)
/// );
/// ```
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
    max_page_limit: i64,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_max_page_limit(pool, DEFAULT_MAX_PAGE_LIMIT)
    }

    pub fn with_max_page_limit(pool: PgPool, max_page_limit: i64) -> Self {
        Self {
            pool,
            max_page_limit,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, entry: NewAuditEntry) -> Result<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit_entries (ref_no, event_date, payload, dedupe_key)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&entry.ref_no)
        .bind(entry.date)
        .bind(&entry.payload)
        .bind(entry.dedupe_key.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(e) if idempotent_consumer::is_unique_violation(&e) => {
                debug!(dedupe_key = %entry.dedupe_key, "Dedupe key already present");
                Err(AuditError::DuplicateKey(entry.dedupe_key.into_inner()))
            }
            Err(e) => {
                error!(ref_no = %entry.ref_no, error = %e, "Failed to insert audit entry");
                Err(e.into())
            }
        }
    }

    async fn page(&self, page: i64, limit: i64) -> Result<Vec<AuditEntry>> {
        let window = PageWindow::new(page, limit, self.max_page_limit)?;
        if window.limit == 0 {
            return Ok(Vec::new());
        }

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, ref_no, event_date, payload, dedupe_key
            FROM audit_entries
            ORDER BY id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn count_by_ref_since(&self, ref_no: &str, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM audit_entries
            WHERE ref_no = $1 AND event_date >= $2
            "#,
        )
        .bind(ref_no)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
