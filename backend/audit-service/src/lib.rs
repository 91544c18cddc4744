//! Audit ingestion service
//!
//! Consumes `log-topic` and `audit-topic` as a partitioned consumer group,
//! persists audit events exactly once per dedupe key and serves the stored
//! history over HTTP.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod query;
pub mod store;
pub mod writer;

pub use error::{AuditError, Result};
