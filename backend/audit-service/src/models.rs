use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use idempotent_consumer::{DedupeKey, DeliveryCoordinate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{AuditError, Result};

/// Durable unit of audit history
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AuditEntry {
    /// Store-assigned, strictly increasing in insertion order
    pub id: i64,
    pub ref_no: String,
    #[sqlx(rename = "event_date")]
    pub date: DateTime<Utc>,
    pub payload: Value,
    pub dedupe_key: String,
}

/// AuditEntry as produced by ingestion, before the store assigns an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub ref_no: String,
    pub date: DateTime<Utc>,
    pub payload: Value,
    pub dedupe_key: DedupeKey,
}

/// Read-side view of an AuditEntry; the dedupe key stays internal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditProjection {
    pub id: i64,
    pub ref_no: String,
    pub date: DateTime<Utc>,
    pub payload: Value,
}

impl From<AuditEntry> for AuditProjection {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id,
            ref_no: entry.ref_no,
            date: entry.date,
            payload: entry.payload,
        }
    }
}

/// Audit event body as published on `audit-topic`
///
/// Expected format:
/// ```json
/// {
///   "refNo": "TXN-000123",
///   "date": "2024-03-01T10:15:30",
///   "endpoint": "/v1/payments",
///   "status": 200
/// }
/// ```
/// Every field of the body, including `refNo` and `date`, is kept as payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub ref_no: String,
    pub date: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Deserialize)]
struct AuditEnvelope {
    #[serde(rename = "refNo")]
    ref_no: String,
    date: String,
}

impl AuditEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let payload: Value = serde_json::from_slice(body)?;
        if !payload.is_object() {
            return Err(AuditError::Deserialization(
                "Audit event must be a JSON object".to_string(),
            ));
        }
        // Postgres text and jsonb cannot store U+0000
        if contains_nul(&payload) {
            return Err(AuditError::Deserialization(
                "Audit event contains a NUL character".to_string(),
            ));
        }

        let envelope = AuditEnvelope::deserialize(&payload)?;
        if envelope.ref_no.trim().is_empty() {
            return Err(AuditError::Deserialization("refNo is empty".to_string()));
        }

        let date = parse_timestamp(&envelope.date).ok_or_else(|| {
            AuditError::Deserialization(format!("Unsupported date format: {}", envelope.date))
        })?;

        Ok(Self {
            ref_no: envelope.ref_no,
            date,
            payload,
        })
    }

    pub fn into_entry(self, dedupe_key: DedupeKey) -> NewAuditEntry {
        NewAuditEntry {
            ref_no: self.ref_no,
            date: self.date,
            payload: self.payload,
            dedupe_key,
        }
    }
}

fn contains_nul(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains('\0'),
        Value::Array(items) => items.iter().any(contains_nul),
        Value::Object(map) => map
            .iter()
            .any(|(key, v)| key.contains('\0') || contains_nul(v)),
        _ => false,
    }
}

/// ISO-8601 timestamp with or without an offset; offset-less values are UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// One delivery attempt of a broker message, detached from the client buffer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<Vec<u8>>,
    /// Producer-supplied `idempotency_key` header, if any
    pub idempotency_token: Option<String>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: Some(value.into()),
            idempotency_token: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    pub fn coordinate(&self) -> DeliveryCoordinate {
        DeliveryCoordinate::new(self.topic.clone(), self.partition, self.offset)
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Body as text, for display in log lines
    pub fn value_lossy(&self) -> String {
        self.value
            .as_deref()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    }
}

/// Which worker currently owns a partition, and how far it has committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub owner_worker_id: usize,
    pub committed_offset: Option<i64>,
}
