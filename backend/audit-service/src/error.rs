use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Malformed message body; skipped, left uncommitted
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Unique index on the dedupe key already holds this message
    #[error("Duplicate dedupe key: {0}")]
    DuplicateKey(String),

    /// Commit attempted for a partition this worker no longer owns
    #[error("Stale ownership: {topic}/{partition} is not owned by this worker")]
    StaleOwnership { topic: String, partition: i32 },

    #[error("Out-of-order commit for {topic}/{partition}: offset {offset} <= committed {committed}")]
    OutOfOrderCommit {
        topic: String,
        partition: i32,
        offset: i64,
        committed: i64,
    },

    /// Transient persistence failure; the broker redelivers later
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuditError {
    /// Errors the ingestion path recovers from by leaving the offset uncommitted
    pub fn is_transient(&self) -> bool {
        matches!(self, AuditError::StoreUnavailable(_))
    }

    /// Errors that must be dropped rather than retried
    pub fn is_fencing(&self) -> bool {
        matches!(self, AuditError::StaleOwnership { .. })
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AuditError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            AuditError::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AuditError::Validation(_) => StatusCode::BAD_REQUEST,
            AuditError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        if idempotent_consumer::is_unique_violation(&err) {
            let constraint = err
                .as_database_error()
                .and_then(|db_err| db_err.constraint().map(str::to_string))
                .unwrap_or_else(|| "unique index".to_string());
            AuditError::DuplicateKey(constraint)
        } else if idempotent_consumer::is_transient(&err) {
            AuditError::StoreUnavailable(err.to_string())
        } else {
            AuditError::Database(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Deserialization(err.to_string())
    }
}

impl From<envy::Error> for AuditError {
    fn from(err: envy::Error) -> Self {
        AuditError::Config(err.to_string())
    }
}

/// Broker-side rejections of a commit because the group generation moved on
pub(crate) fn is_rebalance_rejection(err: &KafkaError) -> bool {
    matches!(
        err,
        KafkaError::ConsumerCommit(
            RDKafkaErrorCode::IllegalGeneration
                | RDKafkaErrorCode::UnknownMemberId
                | RDKafkaErrorCode::RebalanceInProgress
                | RDKafkaErrorCode::State
        )
    )
}
