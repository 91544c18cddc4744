//! Error types for idempotent consumer library

use thiserror::Error;

/// PostgreSQL SQLSTATE for `unique_violation`
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while deriving or enforcing idempotency
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Caller-supplied idempotency token is unusable (empty, too long, not UTF-8)
    #[error("Invalid idempotency token: {0}")]
    InvalidToken(String),
}

impl IdempotencyError {
    /// Check if error is a duplicate key violation (message already persisted)
    ///
    /// This is NOT an error condition for the consumer - a unique violation on
    /// the dedupe key is the signal that a redelivered message was already
    /// written.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            IdempotencyError::Database(sqlx_err) => is_unique_violation(sqlx_err),
            _ => false,
        }
    }

    /// Check if error is transient (leave offset uncommitted, let the broker redeliver)
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Database(sqlx_err) => is_transient(sqlx_err),
            _ => false,
        }
    }
}

/// Whether the database rejected a write because a unique index already holds the key
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == PG_UNIQUE_VIOLATION)
        .unwrap_or(false)
}

/// Whether a database error reflects store availability rather than the query itself
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::PoolClosed));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));

        let err = IdempotencyError::InvalidToken("empty".to_string());
        assert!(!err.is_duplicate_key());
        assert!(!err.is_transient());

        let err = IdempotencyError::Database(sqlx::Error::PoolTimedOut);
        assert!(!err.is_duplicate_key());
        assert!(err.is_transient());
    }
}
