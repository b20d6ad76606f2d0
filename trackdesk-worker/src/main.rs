//! # Trackdesk Worker
//!
//! Delivers queued webhooks and postbacks with retries. Run as many
//! instances as needed; they share the queue without double-sending.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/trackdesk cargo run -p trackdesk-worker
//! ```

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackdesk_shared::db::pool::{create_pool, DatabaseConfig};
use trackdesk_worker::{
    config::WorkerConfig,
    deliverers::HttpDeliverer,
    orchestrator::WorkerOrchestrator,
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trackdesk_worker=debug,trackdesk_shared=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Trackdesk Worker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(DatabaseConfig::new(
        config.database_url.clone(),
        config.database_max_connections,
    ))
    .await?;

    let deliverer = Arc::new(HttpDeliverer::new(config.request_timeout)?);
    let orchestrator = WorkerOrchestrator::new(pool.clone(), deliverer, config.orchestrator());

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    orchestrator.run().await?;

    pool.close().await;
    tracing::info!("Worker stopped");

    Ok(())
}
