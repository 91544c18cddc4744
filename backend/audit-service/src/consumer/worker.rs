use futures::future::join_all;
use idempotent_consumer::WriteResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::ledger::OwnershipLedger;
use super::log_sink::LogSink;
use super::source::{PartitionSource, RebalanceEvent};
use crate::error::{AuditError, Result};
use crate::metrics::IngestMetrics;
use crate::models::{InboundMessage, TopicPartition};
use crate::writer::IdempotentWriter;

/// Backoff after a broker-level poll error, to avoid a tight error loop
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub audit: String,
    pub log: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            audit: "audit-topic".to_string(),
            log: "log-topic".to_string(),
        }
    }
}

impl Topics {
    pub fn names(&self) -> [&str; 2] {
        [self.log.as_str(), self.audit.as_str()]
    }
}

/// What one poll-and-process cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub logged: usize,
    /// Handler errors; these offsets were not committed
    pub failed: usize,
    /// Messages dropped because their partition is not owned
    pub fenced: usize,
    /// Handled messages covered by a successful commit
    pub committed: usize,
}

impl BatchReport {
    pub fn handled(&self) -> usize {
        self.inserted + self.duplicates + self.logged
    }
}

enum Handled {
    Written(WriteResult),
    Logged,
}

struct PartitionOutcome {
    tp: TopicPartition,
    handled: Vec<i64>,
    report: BatchReport,
}

/// Routes a message to the writer or the log sink by topic
///
/// Holds only shared, thread-safe handles so partitions can be handled
/// concurrently while the worker keeps exclusive use of its source.
struct Dispatcher {
    writer: Arc<IdempotentWriter>,
    log_sink: LogSink,
    topics: Topics,
    metrics: Arc<IngestMetrics>,
}

impl Dispatcher {
    async fn handle(&self, msg: &InboundMessage) -> Result<Handled> {
        if msg.topic == self.topics.audit {
            self.writer.write(msg).await.map(Handled::Written)
        } else if msg.topic == self.topics.log {
            self.log_sink.handle(msg).await.map(|_| Handled::Logged)
        } else {
            Err(AuditError::Validation(format!(
                "No handler registered for topic {}",
                msg.topic
            )))
        }
    }

    /// Messages of one partition, strictly in offset order
    async fn handle_partition(
        &self,
        worker_id: usize,
        tp: TopicPartition,
        messages: Vec<InboundMessage>,
    ) -> PartitionOutcome {
        let mut outcome = PartitionOutcome {
            tp,
            handled: Vec::with_capacity(messages.len()),
            report: BatchReport::default(),
        };

        for msg in &messages {
            debug!(
                worker_id,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                key = msg.key.as_deref().unwrap_or(""),
                "Received message"
            );
            self.metrics
                .messages_received
                .with_label_values(&[&msg.topic])
                .inc();

            match self.handle(msg).await {
                Ok(handled) => {
                    match handled {
                        Handled::Written(WriteResult::Inserted) => outcome.report.inserted += 1,
                        Handled::Written(WriteResult::AlreadyPresent) => {
                            outcome.report.duplicates += 1
                        }
                        Handled::Logged => outcome.report.logged += 1,
                    }
                    outcome.handled.push(msg.offset);
                }
                Err(e) => {
                    // Not committed; the broker redelivers after restart or rebalance
                    outcome.report.failed += 1;
                    self.metrics
                        .handler_failures
                        .with_label_values(&[&msg.topic, failure_kind(&e)])
                        .inc();
                    error!(
                        worker_id,
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        error = %e,
                        value = %msg.value_lossy(),
                        "Failed to process message, offset left uncommitted"
                    );
                }
            }
        }

        outcome
    }
}

fn failure_kind(err: &AuditError) -> &'static str {
    match err {
        AuditError::Deserialization(_) => "deserialization",
        AuditError::StoreUnavailable(_) => "store_unavailable",
        _ => "other",
    }
}

/// One member of the consumer group
///
/// Owns its source and its ledger; nothing here is shared with other
/// workers. Within a batch, partitions are handled concurrently and each
/// partition's messages sequentially, then one commit per partition for the
/// highest handled offset.
pub struct PartitionWorker<S> {
    id: usize,
    source: S,
    ledger: OwnershipLedger,
    /// Highest handled offset whose commit failed transiently
    pending: BTreeMap<TopicPartition, i64>,
    dispatcher: Dispatcher,
}

impl<S: PartitionSource> PartitionWorker<S> {
    pub fn new(
        id: usize,
        source: S,
        writer: Arc<IdempotentWriter>,
        topics: Topics,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            id,
            source,
            ledger: OwnershipLedger::new(id),
            pending: BTreeMap::new(),
            dispatcher: Dispatcher {
                writer,
                log_sink: LogSink,
                topics,
                metrics,
            },
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Poll once, apply rebalances, handle and commit the batch
    pub async fn poll_once(&mut self, timeout: Duration) -> Result<BatchReport> {
        let batch = self.source.poll(timeout).await?;

        for event in batch.rebalances {
            self.apply_rebalance(event).await;
        }
        self.retry_pending().await;

        Ok(self.process(batch.messages).await)
    }

    /// Commit `offset` for `tp`, fenced by current ownership
    ///
    /// `StaleOwnership` means the partition is gone: discard, never retry.
    pub async fn commit(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.ledger.check_commit(tp, offset)?;

        match self.source.commit(tp, offset).await {
            Ok(()) => {
                if self.pending.get(tp).is_some_and(|pending| *pending <= offset) {
                    self.pending.remove(tp);
                }
                self.ledger.record_commit(tp, offset)
            }
            Err(e) if e.is_fencing() => Err(e),
            Err(e) => {
                self.pending.insert(tp.clone(), offset);
                Err(e)
            }
        }
    }

    /// Run until `shutdown` flips to true, then release every partition
    pub async fn run(mut self, shutdown: watch::Receiver<bool>, poll_timeout: Duration) {
        info!(worker_id = self.id, "Consumer worker started");

        while !*shutdown.borrow() {
            match self.poll_once(poll_timeout).await {
                Ok(report) if report != BatchReport::default() => {
                    debug!(worker_id = self.id, ?report, "Batch processed");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "Kafka consumer error");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }

        self.release().await;
        info!(worker_id = self.id, "Consumer worker stopped");
    }

    /// Flush pending commits, drop all ownership, leave the group
    pub async fn release(&mut self) {
        // Still assigned until the source closes
        self.retry_pending().await;

        let owned: Vec<TopicPartition> = self
            .ledger
            .assignments()
            .into_iter()
            .map(|a| TopicPartition::new(a.topic, a.partition))
            .collect();
        self.apply_rebalance(RebalanceEvent::Revoked(owned)).await;

        if let Err(e) = self.source.close().await {
            warn!(worker_id = self.id, error = %e, "Failed to close partition source");
        }
    }

    async fn apply_rebalance(&mut self, event: RebalanceEvent) {
        match event {
            RebalanceEvent::Assigned(partitions) => {
                let added = self.ledger.assign(&partitions);
                self.dispatcher
                    .metrics
                    .owned_partitions
                    .add(added.len() as i64);
                info!(
                    worker_id = self.id,
                    partitions = ?added,
                    "Partitions assigned"
                );
            }
            RebalanceEvent::Revoked(partitions) => {
                // No commit may follow a revocation; whatever is still pending is abandoned
                for tp in &partitions {
                    if let Some(offset) = self.pending.remove(tp) {
                        warn!(
                            worker_id = self.id,
                            topic = %tp.topic,
                            partition = tp.partition,
                            offset,
                            "Abandoning uncommitted offset on revocation"
                        );
                    }
                }

                let removed = self.ledger.revoke(&partitions);
                self.dispatcher
                    .metrics
                    .owned_partitions
                    .sub(removed.len() as i64);
                info!(
                    worker_id = self.id,
                    partitions = ?removed,
                    "Partitions revoked"
                );
            }
        }
    }

    async fn retry_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (tp, offset) in pending {
            if let Err(e) = self.commit(&tp, offset).await {
                self.log_commit_failure(&tp, offset, &e);
            }
        }
    }

    async fn process(&mut self, messages: Vec<InboundMessage>) -> BatchReport {
        let mut report = BatchReport::default();

        let mut by_partition: BTreeMap<TopicPartition, Vec<InboundMessage>> = BTreeMap::new();
        for msg in messages {
            let tp = msg.topic_partition();
            if !self.ledger.owns(&tp) {
                report.fenced += 1;
                debug!(
                    worker_id = self.id,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "Dropping message for partition not owned by this worker"
                );
                continue;
            }
            by_partition.entry(tp).or_default().push(msg);
        }

        let worker_id = self.id;
        let dispatcher = &self.dispatcher;
        let outcomes = join_all(by_partition.into_iter().map(|(tp, mut msgs)| {
            msgs.sort_by_key(|m| m.offset);
            dispatcher.handle_partition(worker_id, tp, msgs)
        }))
        .await;

        for outcome in outcomes {
            report.inserted += outcome.report.inserted;
            report.duplicates += outcome.report.duplicates;
            report.logged += outcome.report.logged;
            report.failed += outcome.report.failed;

            // One commit covers every handled offset up to the highest
            if let Some(&offset) = outcome.handled.iter().max() {
                match self.commit(&outcome.tp, offset).await {
                    Ok(()) => report.committed += outcome.handled.len(),
                    Err(e) => self.log_commit_failure(&outcome.tp, offset, &e),
                }
            }
        }

        report
    }

    fn log_commit_failure(&self, tp: &TopicPartition, offset: i64, err: &AuditError) {
        match err {
            AuditError::StaleOwnership { .. } => {
                self.dispatcher.metrics.stale_commits.inc();
                debug!(
                    worker_id = self.id,
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset,
                    "Discarding commit for revoked partition"
                );
            }
            AuditError::OutOfOrderCommit { .. } => {
                debug!(
                    worker_id = self.id,
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset,
                    "Offset already covered by an earlier commit"
                );
            }
            _ => {
                warn!(
                    worker_id = self.id,
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset,
                    error = %err,
                    "Failed to commit offset, will retry on next poll"
                );
            }
        }
    }
}
