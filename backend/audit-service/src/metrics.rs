use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Ingestion counters shared by every worker of the consumer group
///
/// Consumer lag itself is reported by the broker; these complement it with
/// what the workers did with each delivery.
#[derive(Clone)]
pub struct IngestMetrics {
    pub messages_received: IntCounterVec,
    pub handler_failures: IntCounterVec,
    pub entries_inserted: IntCounter,
    pub duplicates_skipped: IntCounter,
    pub stale_commits: IntCounter,
    pub owned_partitions: IntGauge,
}

impl IngestMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_received = IntCounterVec::new(
            Opts::new(
                "audit_consumer_messages_received_total",
                "Messages delivered to consumer workers",
            ),
            &["topic"],
        )?;
        let handler_failures = IntCounterVec::new(
            Opts::new(
                "audit_consumer_handler_failures_total",
                "Messages left uncommitted after a handler error",
            ),
            &["topic", "kind"],
        )?;
        let entries_inserted = IntCounter::new(
            "audit_entries_inserted_total",
            "Audit entries created by the idempotent writer",
        )?;
        let duplicates_skipped = IntCounter::new(
            "audit_entries_duplicates_total",
            "Redeliveries recognised by their dedupe key",
        )?;
        let stale_commits = IntCounter::new(
            "audit_consumer_stale_commits_total",
            "Commits discarded because the partition was revoked",
        )?;
        let owned_partitions = IntGauge::new(
            "audit_consumer_owned_partitions",
            "Partitions currently owned across all workers",
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(entries_inserted.clone()))?;
        registry.register(Box::new(duplicates_skipped.clone()))?;
        registry.register(Box::new(stale_commits.clone()))?;
        registry.register(Box::new(owned_partitions.clone()))?;

        Ok(Self {
            messages_received,
            handler_failures,
            entries_inserted,
            duplicates_skipped,
            stale_commits,
            owned_partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_all_collectors() {
        let registry = Registry::new();
        let metrics = IngestMetrics::new(&registry).unwrap();

        metrics
            .messages_received
            .with_label_values(&["audit-topic"])
            .inc();
        metrics.entries_inserted.inc();

        let names: Vec<String> = registry
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"audit_consumer_messages_received_total".to_string()));
        assert!(names.contains(&"audit_entries_inserted_total".to_string()));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        assert!(IngestMetrics::new(&registry).is_ok());
        assert!(IngestMetrics::new(&registry).is_err());
    }
}
