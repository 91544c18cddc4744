use std::time::Duration;

use crate::error::Result;
use crate::models::{InboundMessage, TopicPartition};

/// Group-coordination notifications, in the order the broker issued them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assigned(Vec<TopicPartition>),
    /// Already relinquished by the source; no further commits for these
    Revoked(Vec<TopicPartition>),
}

/// Result of one poll: rebalances observed, then messages fetched
#[derive(Debug, Default)]
pub struct PollBatch {
    pub rebalances: Vec<RebalanceEvent>,
    pub messages: Vec<InboundMessage>,
}

impl PollBatch {
    pub fn is_empty(&self) -> bool {
        self.rebalances.is_empty() && self.messages.is_empty()
    }
}

/// One consumer-group member's view of the broker
///
/// The broker's coordination protocol decides assignments; implementations
/// only surface them. Each worker owns exactly one source.
#[async_trait::async_trait]
pub trait PartitionSource: Send {
    /// Next batch for owned partitions; empty on timeout, never blocks past `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<PollBatch>;

    /// Durably mark every message up to and including `offset` as handled
    async fn commit(&mut self, tp: &TopicPartition, offset: i64) -> Result<()>;

    /// Leave the group
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
