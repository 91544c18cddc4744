//! Idempotent writer: one `audit-topic` delivery → at most one AuditEntry

use idempotent_consumer::{resolve_dedupe_key, DedupeKey, WriteResult};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AuditError, Result};
use crate::metrics::IngestMetrics;
use crate::models::{AuditEvent, InboundMessage};
use crate::store::AuditStore;

/// Turns audit messages into audit entries, absorbing redeliveries
///
/// Safe to retry from any point: the store's unique index on the dedupe key
/// decides which delivery wins, and every later one reports `AlreadyPresent`.
pub struct IdempotentWriter {
    store: Arc<dyn AuditStore>,
    metrics: Arc<IngestMetrics>,
}

impl IdempotentWriter {
    pub fn new(store: Arc<dyn AuditStore>, metrics: Arc<IngestMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Token header if usable, delivery coordinate otherwise
    pub fn dedupe_key(msg: &InboundMessage) -> DedupeKey {
        resolve_dedupe_key(&msg.coordinate(), msg.idempotency_token.as_deref())
    }

    pub async fn write(&self, msg: &InboundMessage) -> Result<WriteResult> {
        let body = msg.value.as_deref().ok_or_else(|| {
            AuditError::Deserialization("Audit message has no payload".to_string())
        })?;
        let event = AuditEvent::parse(body)?;
        let dedupe_key = Self::dedupe_key(msg);

        match self.store.insert(event.into_entry(dedupe_key.clone())).await {
            Ok(id) => {
                self.metrics.entries_inserted.inc();
                info!(
                    id,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "Audit entry persisted"
                );
                Ok(WriteResult::Inserted)
            }
            Err(AuditError::DuplicateKey(_)) => {
                self.metrics.duplicates_skipped.inc();
                debug!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    dedupe_key = %dedupe_key,
                    "Audit entry already present, skipping redelivery"
                );
                Ok(WriteResult::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }
}
