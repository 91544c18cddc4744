//! Deterministic dedupe keys for at-least-once Kafka delivery

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{IdempotencyError, IdempotencyResult};

/// Maximum accepted length of a caller-supplied idempotency token (bytes)
pub const MAX_TOKEN_LEN: usize = 255;

/// Immutable position of a message in the broker log
///
/// A redelivered message carries the same coordinate as its first delivery,
/// which is what makes it usable as an idempotency source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryCoordinate {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl DeliveryCoordinate {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for DeliveryCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Hex-encoded SHA-256 key stored under a unique index
///
/// Coordinate-derived and token-derived keys are hashed under distinct
/// prefixes so a token can never collide with a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// Key for a message identified only by where it sits in the log
    pub fn from_coordinate(coordinate: &DeliveryCoordinate) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"coord\0");
        hasher.update(coordinate.topic.as_bytes());
        hasher.update(b"\0");
        hasher.update(coordinate.partition.to_be_bytes());
        hasher.update(coordinate.offset.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Key for a message whose producer attached an idempotency token
    pub fn from_token(token: &str) -> IdempotencyResult<Self> {
        validate_token(token)?;

        let mut hasher = Sha256::new();
        hasher.update(b"token\0");
        hasher.update(token.as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_token(token: &str) -> IdempotencyResult<()> {
    if token.trim().is_empty() {
        return Err(IdempotencyError::InvalidToken(
            "Idempotency token cannot be empty".to_string(),
        ));
    }

    if token.len() > MAX_TOKEN_LEN {
        return Err(IdempotencyError::InvalidToken(format!(
            "Idempotency token too long: {} bytes (max {})",
            token.len(),
            MAX_TOKEN_LEN
        )));
    }

    Ok(())
}
