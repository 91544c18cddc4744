use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::source::PartitionSource;
use super::worker::{PartitionWorker, Topics};
use crate::config::KafkaConfig;
use crate::error::{AuditError, Result};
use crate::metrics::IngestMetrics;
use crate::writer::IdempotentWriter;

#[derive(Debug, Clone)]
pub struct ConsumerGroupConfig {
    /// Group members started by this process
    pub concurrency: usize,
    pub poll_timeout: Duration,
    pub topics: Topics,
}

impl Default for ConsumerGroupConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_timeout: Duration::from_secs(1),
            topics: Topics::default(),
        }
    }
}

impl From<&KafkaConfig> for ConsumerGroupConfig {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            poll_timeout: config.poll_timeout(),
            topics: config.topics(),
        }
    }
}

/// The process's share of the consumer group: N independent workers
///
/// Workers share only the writer (and through it the store); partition
/// ownership and commit state stay private to each worker.
pub struct ConsumerGroup {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerGroup {
    /// Start `config.concurrency` workers, each with a source from `connect`
    pub fn spawn<S, F>(
        config: &ConsumerGroupConfig,
        writer: Arc<IdempotentWriter>,
        metrics: Arc<IngestMetrics>,
        mut connect: F,
    ) -> Result<Self>
    where
        S: PartitionSource + 'static,
        F: FnMut(usize) -> Result<S>,
    {
        if config.concurrency == 0 {
            return Err(AuditError::Config(
                "Consumer group needs at least one worker".to_string(),
            ));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::with_capacity(config.concurrency);

        for id in 0..config.concurrency {
            let source = match connect(id) {
                Ok(source) => source,
                Err(e) => {
                    error!(worker_id = id, error = %e, "Failed to connect consumer worker");
                    let _ = shutdown.send(true);
                    return Err(e);
                }
            };

            let worker = PartitionWorker::new(
                id,
                source,
                Arc::clone(&writer),
                config.topics.clone(),
                Arc::clone(&metrics),
            );
            workers.push(tokio::spawn(
                worker.run(shutdown_rx.clone(), config.poll_timeout),
            ));
        }

        info!(
            workers = config.concurrency,
            audit_topic = %config.topics.audit,
            log_topic = %config.topics.log,
            "Consumer group started"
        );

        Ok(Self { shutdown, workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker and wait for them to release their partitions
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Consumer worker task failed");
            }
        }
        info!("Consumer group stopped");
    }
}
