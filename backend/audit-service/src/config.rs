//! Configuration management

use serde::Deserialize;
use std::time::Duration;

use crate::consumer::Topics;
use crate::error::{AuditError, Result};
use crate::store::DEFAULT_MAX_PAGE_LIMIT;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub kafka: KafkaConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// `KAFKA_*` variables
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_log_topic")]
    pub log_topic: String,
    #[serde(default = "default_audit_topic")]
    pub audit_topic: String,
    /// Number of group members this process runs
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: i64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "audit-consumer-group".to_string()
}

fn default_log_topic() -> String {
    "log-topic".to_string()
}

fn default_audit_topic() -> String {
    "audit-topic".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_max_batch() -> usize {
    100
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_max_page_limit() -> i64 {
    DEFAULT_MAX_PAGE_LIMIT
}

impl KafkaConfig {
    pub fn topics(&self) -> Topics {
        Topics {
            audit: self.audit_topic.clone(),
            log: self.log_topic.clone(),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            app: envy::prefixed("APP_").from_env()?,
            kafka: envy::prefixed("KAFKA_").from_env()?,
            audit: envy::prefixed("AUDIT_").from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.concurrency == 0 {
            return Err(AuditError::Config(
                "KAFKA_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.kafka.max_batch == 0 {
            return Err(AuditError::Config(
                "KAFKA_MAX_BATCH must be at least 1".to_string(),
            ));
        }
        if self.kafka.brokers.trim().is_empty() {
            return Err(AuditError::Config("KAFKA_BROKERS must be set".to_string()));
        }
        if self.kafka.log_topic == self.kafka.audit_topic {
            return Err(AuditError::Config(
                "KAFKA_LOG_TOPIC and KAFKA_AUDIT_TOPIC must differ".to_string(),
            ));
        }
        if !matches!(
            self.kafka.auto_offset_reset.as_str(),
            "earliest" | "latest" | "error"
        ) {
            return Err(AuditError::Config(format!(
                "Invalid KAFKA_AUTO_OFFSET_RESET: {}",
                self.kafka.auto_offset_reset
            )));
        }
        if self.audit.max_page_limit < 1 {
            return Err(AuditError::Config(
                "AUDIT_MAX_PAGE_LIMIT must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
