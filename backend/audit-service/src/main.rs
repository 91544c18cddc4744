use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_service::config::Config;
use audit_service::consumer::{ConsumerGroup, ConsumerGroupConfig, KafkaPartitionSource};
use audit_service::handlers;
use audit_service::metrics::IngestMetrics;
use audit_service::query::QueryService;
use audit_service::store::{AuditStore, PgAuditStore};
use audit_service::writer::IdempotentWriter;
use db_pool::{create_pool, spawn_pool_metrics, DbConfig, PoolMetrics};

const SERVICE_NAME: &str = "audit-service";

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,audit_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {}", SERVICE_NAME);

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        port = config.app.port,
        brokers = %config.kafka.brokers,
        group_id = %config.kafka.group_id,
        concurrency = config.kafka.concurrency,
        "Configuration loaded"
    );

    let db_config = DbConfig::from_env(SERVICE_NAME).map_err(anyhow::Error::msg)?;
    db_config.log_config();
    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations applied");

    let registry = Registry::new();
    let ingest_metrics = Arc::new(IngestMetrics::new(&registry)?);
    let pool_metrics = PoolMetrics::new(&registry, SERVICE_NAME)?;
    spawn_pool_metrics(pool.clone(), pool_metrics, Duration::from_secs(15));

    let store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::with_max_page_limit(
        pool.clone(),
        config.audit.max_page_limit,
    ));
    let writer = Arc::new(IdempotentWriter::new(
        Arc::clone(&store),
        Arc::clone(&ingest_metrics),
    ));
    let query = QueryService::new(Arc::clone(&store));

    let kafka_config = config.kafka.clone();
    let group = ConsumerGroup::spawn(
        &ConsumerGroupConfig::from(&config.kafka),
        writer,
        ingest_metrics,
        |worker_id| KafkaPartitionSource::connect(&kafka_config, worker_id),
    )
    .context("Failed to start consumer group")?;

    let query_data = web::Data::new(query);
    let registry_data = web::Data::new(registry);

    let bind_address = (config.app.host.clone(), config.app.port);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(query_data.clone())
            .app_data(registry_data.clone())
            .configure(handlers::configure)
    })
    .bind(bind_address)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();

    info!(
        host = %config.app.host,
        port = config.app.port,
        "HTTP server listening"
    );

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    shutdown_signal().await;
    info!("Shutdown signal received");

    server_handle.stop(true).await;
    group.shutdown().await;

    server_task
        .await
        .context("HTTP server task panicked")?
        .context("HTTP server error")?;

    pool.close().await;
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
