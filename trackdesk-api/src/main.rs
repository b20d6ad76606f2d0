//! # Trackdesk API Server
//!
//! Serves the tenant dashboard API under `/v1`, the public tracking
//! endpoints under `/t`, and the Stripe and Shopify receivers.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/trackdesk JWT_SECRET=... cargo run -p trackdesk-api
//! ```
//!
//! Set `LOG_FORMAT=json` for structured logs.

use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackdesk_api::{
    app::{build_router, AppState},
    config::Config,
};
use trackdesk_shared::{
    db::{
        migrations::run_migrations,
        pool::{create_pool, DatabaseConfig},
    },
    redis::{RedisClient, RedisConfig},
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trackdesk_api=debug,trackdesk_shared=info,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Trackdesk API v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig::new(
        config.database.url.clone(),
        config.database.max_connections,
    ))
    .await?;
    run_migrations(&pool).await?;

    let mut state = AppState::new(pool.clone(), config.clone());

    // Redis is optional; without it rate limits and unique clicks stay per instance
    if let Some(redis) = &config.redis {
        match RedisClient::new(RedisConfig::new(redis.url.clone())).await {
            Ok(client) => state = state.with_redis(client),
            Err(e) => tracing::warn!(error = %e, "Redis unavailable, using in-process fallbacks"),
        }
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %config.bind_address(), "Server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Server stopped");

    Ok(())
}
