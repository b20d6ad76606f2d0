/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `WORKER_POLL_INTERVAL_SECS`: idle wait between polls (default: 1)
/// - `WORKER_MAX_CONCURRENT`: deliveries in flight per worker (default: 10)
/// - `WORKER_BATCH_SIZE`: rows claimed per poll (default: 20)
/// - `WORKER_REQUEST_TIMEOUT_SECS`: per-request HTTP timeout (default: 10)
/// - `WORKER_MAX_ATTEMPTS`: upper bound on attempts per delivery (default: 6)
/// - `RUST_LOG`: Log level (default: trackdesk_worker=debug)

use config::{Environment, Source};
use serde::Deserialize;
use std::time::Duration;

use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub max_attempts: i32,
}

#[derive(Debug, Deserialize)]
struct RawEnv {
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    worker_poll_interval_secs: Option<u64>,
    worker_max_concurrent: Option<usize>,
    worker_batch_size: Option<usize>,
    worker_request_timeout_secs: Option<u64>,
    worker_max_attempts: Option<i32>,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, after `.env`
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(Environment::default().try_parsing(true))
    }

    pub fn from_source<S>(source: S) -> anyhow::Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let raw: RawEnv = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        let database_url = raw
            .database_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_concurrent = raw.worker_max_concurrent.unwrap_or(10);
        let batch_size = raw.worker_batch_size.unwrap_or(20);
        let max_attempts = raw.worker_max_attempts.unwrap_or(6);

        if max_concurrent == 0 || batch_size == 0 {
            anyhow::bail!("WORKER_MAX_CONCURRENT and WORKER_BATCH_SIZE must be positive");
        }
        if max_attempts < 1 {
            anyhow::bail!("WORKER_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url,
            database_max_connections: raw.database_max_connections.unwrap_or(10),
            poll_interval: Duration::from_secs(raw.worker_poll_interval_secs.unwrap_or(1)),
            max_concurrent,
            batch_size,
            request_timeout: Duration::from_secs(raw.worker_request_timeout_secs.unwrap_or(10)),
            max_attempts,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: self.poll_interval,
            max_concurrent: self.max_concurrent,
            batch_size: self.batch_size,
            max_attempts: self.max_attempts,
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().try_parsing(true).source(Some(vars))
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_source(source(&[("DATABASE_URL", "postgresql://localhost/trackdesk")])).unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 6);
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_source(source(&[
            ("DATABASE_URL", "postgresql://localhost/trackdesk"),
            ("WORKER_MAX_CONCURRENT", "4"),
            ("WORKER_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();

        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.max_concurrent, 4);
        assert_eq!(orchestrator.max_attempts, 3);
    }

    #[test]
    fn test_missing_database_url() {
        assert!(WorkerConfig::from_source(source(&[])).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = WorkerConfig::from_source(source(&[
            ("DATABASE_URL", "postgresql://localhost/trackdesk"),
            ("WORKER_MAX_CONCURRENT", "0"),
        ]));
        assert!(result.is_err());
    }
}
