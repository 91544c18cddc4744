//! Kafka consumer group for `log-topic` and `audit-topic`
//!
//! Each worker is one group member: it polls its own source, applies
//! rebalance events to its ownership ledger, dispatches messages by topic and
//! commits offsets only after the handler's effect is durable.

mod group;
mod kafka;
mod ledger;
mod log_sink;
mod source;
mod worker;

pub use group::{ConsumerGroup, ConsumerGroupConfig};
pub use kafka::{KafkaPartitionSource, RebalanceListener};
pub use ledger::OwnershipLedger;
pub use log_sink::LogSink;
pub use source::{PartitionSource, PollBatch, RebalanceEvent};
pub use worker::{BatchReport, PartitionWorker, Topics};
