#![allow(dead_code)]

use async_trait::async_trait;
use audit_service::consumer::{PartitionSource, PollBatch, RebalanceEvent};
use audit_service::error::{AuditError, Result};
use audit_service::metrics::IngestMetrics;
use audit_service::models::{InboundMessage, TopicPartition};
use audit_service::store::InMemoryAuditStore;
use audit_service::writer::IdempotentWriter;
use prometheus::Registry;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const AUDIT: &str = "audit-topic";
pub const LOG: &str = "log-topic";

/// Commits the broker accepted, shared so tests can inspect spawned workers
#[derive(Clone, Default)]
pub struct CommitLog(Arc<Mutex<Vec<(TopicPartition, i64)>>>);

impl CommitLog {
    pub fn all(&self) -> Vec<(TopicPartition, i64)> {
        self.0.lock().unwrap().clone()
    }

    pub fn offsets(&self, tp: &TopicPartition) -> Vec<i64> {
        self.all()
            .into_iter()
            .filter(|(t, _)| t == tp)
            .map(|(_, offset)| offset)
            .collect()
    }

    fn push(&self, tp: TopicPartition, offset: i64) {
        self.0.lock().unwrap().push((tp, offset));
    }
}

/// Partition source fed from a script of batches
#[derive(Default)]
pub struct ScriptedSource {
    batches: VecDeque<PollBatch>,
    pub commits: CommitLog,
    /// Commits for these partitions are rejected as if the generation moved on
    rejected: HashSet<TopicPartition>,
    /// While set, commits fail with a transient broker error
    pub fail_commits: Arc<AtomicBool>,
    pub polls_failing: usize,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, partitions: &[TopicPartition]) -> Self {
        self.push_rebalance(RebalanceEvent::Assigned(partitions.to_vec()));
        self
    }

    pub fn deliver(mut self, messages: Vec<InboundMessage>) -> Self {
        self.push_messages(messages);
        self
    }

    pub fn push_rebalance(&mut self, event: RebalanceEvent) {
        self.batches.push_back(PollBatch {
            rebalances: vec![event],
            messages: Vec::new(),
        });
    }

    pub fn push_messages(&mut self, messages: Vec<InboundMessage>) {
        self.batches.push_back(PollBatch {
            rebalances: Vec::new(),
            messages,
        });
    }

    pub fn push_batch(&mut self, batch: PollBatch) {
        self.batches.push_back(batch);
    }

    pub fn reject_commits_for(&mut self, tp: TopicPartition) {
        self.rejected.insert(tp);
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl PartitionSource for ScriptedSource {
    async fn poll(&mut self, timeout: Duration) -> Result<PollBatch> {
        if self.polls_failing > 0 {
            self.polls_failing -= 1;
            return Err(AuditError::Kafka(
                rdkafka::error::KafkaError::NoMessageReceived,
            ));
        }
        match self.batches.pop_front() {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
                Ok(PollBatch::default())
            }
        }
    }

    async fn commit(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        if self.rejected.contains(tp) {
            return Err(AuditError::StaleOwnership {
                topic: tp.topic.clone(),
                partition: tp.partition,
            });
        }
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AuditError::Kafka(
                rdkafka::error::KafkaError::ConsumerCommit(
                    rdkafka::error::RDKafkaErrorCode::BrokerTransportFailure,
                ),
            ));
        }
        self.commits.push(tp.clone(), offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryAuditStore>,
    pub writer: Arc<IdempotentWriter>,
    pub metrics: Arc<IngestMetrics>,
    pub registry: Registry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(InMemoryAuditStore::new())
    }

    pub fn with_store(store: InMemoryAuditStore) -> Self {
        let registry = Registry::new();
        let store = Arc::new(store);
        let metrics = Arc::new(IngestMetrics::new(&registry).unwrap());
        let writer = Arc::new(IdempotentWriter::new(store.clone(), metrics.clone()));
        Self {
            store,
            writer,
            metrics,
            registry,
        }
    }
}

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

pub fn audit_msg(partition: i32, offset: i64, ref_no: &str, date: &str) -> InboundMessage {
    let body = serde_json::json!({
        "refNo": ref_no,
        "date": date,
        "endpoint": "/v1/payments",
        "seq": offset,
    });
    InboundMessage::new(AUDIT, partition, offset, body.to_string())
}

pub fn log_msg(partition: i32, offset: i64, text: &str) -> InboundMessage {
    InboundMessage::new(LOG, partition, offset, text).with_key("gateway")
}
