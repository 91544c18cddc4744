use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::source::{PartitionSource, PollBatch, RebalanceEvent};
use crate::config::KafkaConfig;
use crate::error::{is_rebalance_rejection, AuditError, Result};
use crate::models::{InboundMessage, TopicPartition};
use idempotent_consumer::IDEMPOTENCY_HEADER;

/// How long to keep draining after the first message of a batch
const BATCH_LINGER: Duration = Duration::from_millis(10);

/// Records group-coordination callbacks for the owning worker
///
/// librdkafka invokes these on the polling thread; the worker drains the
/// queue after each poll and applies the events in order. Offsets whose
/// commit failed transiently are flushed here before a revocation
/// completes, while the partitions are still assigned.
#[derive(Default)]
pub struct RebalanceListener {
    events: Mutex<Vec<RebalanceEvent>>,
    pending: Mutex<BTreeMap<TopicPartition, i64>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RebalanceListener {
    fn push(&self, event: RebalanceEvent) {
        locked(&self.events).push(event);
    }

    fn drain(&self) -> Vec<RebalanceEvent> {
        std::mem::take(&mut *locked(&self.events))
    }

    fn record_pending(&self, tp: &TopicPartition, offset: i64) {
        let mut pending = locked(&self.pending);
        let slot = pending.entry(tp.clone()).or_insert(offset);
        *slot = (*slot).max(offset);
    }

    fn clear_pending(&self, tp: &TopicPartition, offset: i64) {
        let mut pending = locked(&self.pending);
        if pending.get(tp).is_some_and(|p| *p <= offset) {
            pending.remove(tp);
        }
    }

    fn take_pending(&self, partitions: &[TopicPartition]) -> Vec<(TopicPartition, i64)> {
        let mut pending = locked(&self.pending);
        partitions
            .iter()
            .filter_map(|tp| pending.remove(tp).map(|offset| (tp.clone(), offset)))
            .collect()
    }

    fn flush_pending(&self, consumer: &BaseConsumer<Self>, partitions: &[TopicPartition]) {
        let pending = self.take_pending(partitions);
        if pending.is_empty() {
            return;
        }

        let mut tpl = TopicPartitionList::new();
        for (tp, offset) in &pending {
            if let Err(e) =
                tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset + 1))
            {
                warn!(topic = %tp.topic, partition = tp.partition, error = %e, "Invalid pending offset");
            }
        }

        match consumer.commit(&tpl, CommitMode::Sync) {
            Ok(()) => info!(count = pending.len(), "Flushed pending offsets before revocation"),
            Err(e) => warn!(
                error = %e,
                offsets = ?pending,
                "Failed to flush pending offsets before revocation"
            ),
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

impl ClientContext for RebalanceListener {}

impl ConsumerContext for RebalanceListener {
    fn pre_rebalance(&self, consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let partitions = partitions_of(tpl);
            info!(count = partitions.len(), "Kafka revoking partitions");
            // Last point at which these partitions may be committed
            self.flush_pending(consumer, &partitions);
            self.push(RebalanceEvent::Revoked(partitions));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = partitions_of(tpl);
                info!(count = partitions.len(), "Kafka assigned partitions");
                self.push(RebalanceEvent::Assigned(partitions));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => error!(error = %e, "Kafka rebalance error"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, offsets = ?offsets, "Kafka offset commit failed");
        }
    }
}

type ListenerConsumer = StreamConsumer<RebalanceListener>;

/// A Kafka consumer-group member subscribed to both ingestion topics
pub struct KafkaPartitionSource {
    consumer: Arc<ListenerConsumer>,
    max_batch: usize,
}

impl KafkaPartitionSource {
    pub fn connect(config: &KafkaConfig, worker_id: usize) -> Result<Self> {
        let client_id = format!("{}-{}", config.group_id, worker_id);
        let consumer: ListenerConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("client.id", &client_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false") // Commit only after the handler's effect
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create_with_context(RebalanceListener::default())
            .map_err(|e| {
                error!(error = %e, "Failed to create Kafka consumer");
                AuditError::Kafka(e)
            })?;

        let subscribed = config.topics();
        let topics = subscribed.names();
        consumer.subscribe(&topics).map_err(|e| {
            error!(error = %e, "Failed to subscribe to topics");
            AuditError::Kafka(e)
        })?;

        info!(
            client_id = %client_id,
            group_id = %config.group_id,
            topics = ?topics,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            max_batch: config.max_batch.max(1),
        })
    }

    fn rebalances(&self) -> Vec<RebalanceEvent> {
        self.consumer.context().drain()
    }
}

fn to_inbound(msg: &BorrowedMessage<'_>) -> InboundMessage {
    let idempotency_token = msg.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == IDEMPOTENCY_HEADER)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    });

    InboundMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        value: msg.payload().map(<[u8]>::to_vec),
        idempotency_token,
    }
}

#[async_trait]
impl PartitionSource for KafkaPartitionSource {
    async fn poll(&mut self, timeout: Duration) -> Result<PollBatch> {
        let mut messages = Vec::new();

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => {}
            Ok(Err(e)) => return Err(AuditError::Kafka(e)),
            Ok(Ok(msg)) => messages.push(to_inbound(&msg)),
        }

        while !messages.is_empty() && messages.len() < self.max_batch {
            match tokio::time::timeout(BATCH_LINGER, self.consumer.recv()).await {
                Ok(Ok(msg)) => messages.push(to_inbound(&msg)),
                Ok(Err(e)) => {
                    warn!(error = %e, "Kafka error while filling batch");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(PollBatch {
            rebalances: self.rebalances(),
            messages,
        })
    }

    async fn commit(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        // Kafka stores the next offset to read
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset + 1))?;

        let consumer = Arc::clone(&self.consumer);
        let result = tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| {
                error!(error = %e, "Offset commit task failed");
                AuditError::Kafka(KafkaError::Canceled)
            })?;

        let listener = self.consumer.context();
        match result {
            Ok(()) => {
                listener.clear_pending(tp, offset);
                debug!(topic = %tp.topic, partition = tp.partition, offset, "Offset committed");
                Ok(())
            }
            Err(e) if is_rebalance_rejection(&e) => {
                listener.take_pending(std::slice::from_ref(tp));
                Err(AuditError::StaleOwnership {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                })
            }
            Err(e) => {
                listener.record_pending(tp, offset);
                Err(AuditError::Kafka(e))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        info!("Kafka consumer unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_drains_in_order() {
        let listener = RebalanceListener::default();
        let tp = TopicPartition::new("audit-topic", 0);

        listener.push(RebalanceEvent::Assigned(vec![tp.clone()]));
        listener.push(RebalanceEvent::Revoked(vec![tp.clone()]));

        assert_eq!(
            listener.drain(),
            vec![
                RebalanceEvent::Assigned(vec![tp.clone()]),
                RebalanceEvent::Revoked(vec![tp]),
            ]
        );
        assert!(listener.drain().is_empty());
    }

    #[test]
    fn test_pending_offsets_keep_highest_until_taken() {
        let listener = RebalanceListener::default();
        let p0 = TopicPartition::new("audit-topic", 0);
        let p1 = TopicPartition::new("audit-topic", 1);

        listener.record_pending(&p0, 7);
        listener.record_pending(&p0, 4);
        listener.record_pending(&p1, 3);

        // A later successful commit covers the pending offset
        listener.clear_pending(&p1, 5);

        assert_eq!(listener.take_pending(&[p0.clone(), p1.clone()]), vec![(p0.clone(), 7)]);
        assert!(listener.take_pending(&[p0]).is_empty());
    }

    #[test]
    fn test_clear_pending_ignores_lower_offsets() {
        let listener = RebalanceListener::default();
        let p0 = TopicPartition::new("audit-topic", 0);

        listener.record_pending(&p0, 9);
        listener.clear_pending(&p0, 8);

        assert_eq!(listener.take_pending(&[p0.clone()]), vec![(p0, 9)]);
    }

    #[test]
    fn test_partitions_of_list() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("log-topic", 0);
        tpl.add_partition("audit-topic", 2);

        assert_eq!(
            partitions_of(&tpl),
            vec![
                TopicPartition::new("log-topic", 0),
                TopicPartition::new("audit-topic", 2),
            ]
        );
    }
}
