//! # Idempotent Kafka Consumer Library
//!
//! Building blocks for exactly-once-effective persistence on top of Kafka's
//! at-least-once delivery, with PostgreSQL's unique index as the arbiter.
//!
//! ## Problem
//!
//! A message can be handed to a consumer more than once:
//! - **Crash before commit**: the write landed but the offset did not
//! - **Rebalances**: a partition moves to a new owner mid-batch
//! - **Broker redelivery**: the group coordinator replays from the last commit
//!
//! ## Solution
//!
//! Derive a [`DedupeKey`] deterministically from the message's
//! [`DeliveryCoordinate`] (topic, partition, offset) or from a producer-supplied
//! idempotency token, store it alongside the business row under a UNIQUE
//! index, and treat a unique violation as [`WriteResult::AlreadyPresent`].
//!
//! ```text
//! Kafka → Consumer → DedupeKey → INSERT ... (dedupe_key UNIQUE) → commit offset
//!                                     ↓
//!                          23505 → AlreadyPresent → commit offset
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{is_unique_violation, DedupeKey, DeliveryCoordinate, WriteResult};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<WriteResult, sqlx::Error> {
//! let key = DedupeKey::from_coordinate(&DeliveryCoordinate::new("audit-topic", 0, 42));
//!
//! let result = sqlx::query("INSERT INTO audit_entries (dedupe_key, ...) VALUES ($1, ...)")
//!     .bind(key.as_str())
//!     .execute(&pool)
//!     .await;
//!
//! match result {
//!     Ok(_) => Ok(WriteResult::Inserted),
//!     Err(e) if is_unique_violation(&e) => Ok(WriteResult::AlreadyPresent),
//!     Err(e) => Err(e),
//! }
//! # }
//! ```
//!
//! ## Key Strategies
//!
//! ### 1. Kafka Message Headers
//!
//! When the producer sets [`IDEMPOTENCY_HEADER`], the token wins: the same
//! logical event published twice (at different offsets) is still written once.
//!
//! ### 2. Kafka Offset (Partition-Specific)
//!
//! Without a token the coordinate is used. Unique across the cluster because
//! the topic and partition are part of the hash.
//!
//! ## Concurrency Safety
//!
//! Two workers racing on the same coordinate during a rebalance hit the same
//! unique index: exactly one INSERT succeeds, the other observes 23505.
//! No application-level locking is involved.

mod error;
mod key;

pub use error::{
    is_transient, is_unique_violation, IdempotencyError, IdempotencyResult, PG_UNIQUE_VIOLATION,
};
pub use key::{DedupeKey, DeliveryCoordinate, MAX_TOKEN_LEN};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kafka header carrying a producer-supplied idempotency token
pub const IDEMPOTENCY_HEADER: &str = "idempotency_key";

/// Outcome of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteResult {
    /// First delivery: the row was created
    Inserted,

    /// Redelivery: a row with the same dedupe key already exists
    AlreadyPresent,
}

impl WriteResult {
    pub fn is_inserted(&self) -> bool {
        matches!(self, WriteResult::Inserted)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, WriteResult::AlreadyPresent)
    }
}

/// Pick the dedupe key for a delivery
///
/// A valid token takes precedence. An unusable token is logged and the
/// coordinate is used instead, so a malformed header never blocks ingestion.
pub fn resolve_dedupe_key(coordinate: &DeliveryCoordinate, token: Option<&str>) -> DedupeKey {
    match token {
        Some(token) => match DedupeKey::from_token(token) {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    topic = %coordinate.topic,
                    partition = coordinate.partition,
                    offset = coordinate.offset,
                    error = %e,
                    "Ignoring idempotency token, falling back to delivery coordinate"
                );
                DedupeKey::from_coordinate(coordinate)
            }
        },
        None => DedupeKey::from_coordinate(coordinate),
    }
}
