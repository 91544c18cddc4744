//! Prometheus metrics for database connection pool

use prometheus::{IntGaugeVec, Opts, Registry};
use sqlx::PgPool;

/// Pool size by state (idle/active/max), labeled by service
#[derive(Clone)]
pub struct PoolMetrics {
    connections: IntGaugeVec,
    service: String,
}

impl PoolMetrics {
    pub fn new(registry: &Registry, service: &str) -> Result<Self, prometheus::Error> {
        let connections = IntGaugeVec::new(
            Opts::new("db_pool_connections", "Database pool connection count by state"),
            &["service", "state"],
        )?;
        registry.register(Box::new(connections.clone()))?;

        Ok(Self {
            connections,
            service: service.to_string(),
        })
    }

    /// Snapshot the pool's current counters
    pub fn observe(&self, pool: &PgPool) {
        let size = pool.size() as i64;
        let idle = pool.num_idle() as i64;

        self.connections
            .with_label_values(&[&self.service, "idle"])
            .set(idle);
        self.connections
            .with_label_values(&[&self.service, "active"])
            .set(size - idle);
        self.connections
            .with_label_values(&[&self.service, "max"])
            .set(pool.options().get_max_connections() as i64);
    }
}
