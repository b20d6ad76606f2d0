/// Configuration management for the API server
///
/// Settings come from environment variables (a `.env` file is loaded first
/// when present) through the `config` crate's `Environment` source.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `JWT_SECRET`: Secret key for JWT signing (required, 32+ characters)
/// - `CORS_ORIGINS`: Comma separated origins (default: `*`)
/// - `PRODUCTION`: Enables HSTS (default: false)
/// - `REDIS_URL`: Optional Redis for rate limits and unique clicks
/// - `TRACKING_BASE_URL`: Base for rendered tracking links (default: http://localhost:8080)
/// - `RUST_LOG`: Log level (default: trackdesk_api=debug,tower_http=debug)
///
/// # Example
///
/// ```no_run
/// use trackdesk_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use config::{Environment, Source};
use serde::{Deserialize, Serialize};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub redis: Option<RedisSettings>,
    pub tracking: TrackingConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production mode turns on HSTS
    pub production: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for JWT signing
    ///
    /// IMPORTANT: This must be kept secret and should be at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public origin that serves `/t/{code}`
    pub base_url: String,
}

/// Flat view of the environment as read by `config`
#[derive(Debug, Deserialize)]
struct RawEnv {
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    api_host: Option<String>,
    api_port: Option<u16>,
    jwt_secret: Option<String>,
    cors_origins: Option<String>,
    production: Option<bool>,
    redis_url: Option<String>,
    tracking_base_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` or `JWT_SECRET` is missing
    /// - `JWT_SECRET` is shorter than 32 characters
    /// - a numeric or boolean variable does not parse
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_source(Environment::default().try_parsing(true))
    }

    /// Builds the configuration from any `config` source
    ///
    /// Keys are the lower-cased environment variable names.
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

        let jwt_secret = raw
            .jwt_secret
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let cors_origins = raw
            .cors_origins
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        Ok(Self {
            api: ApiConfig {
                host: raw.api_host.unwrap_or_else(|| "0.0.0.0".to_string()),
                port: raw.api_port.unwrap_or(8080),
                cors_origins,
                production: raw.production.unwrap_or(false),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: raw.database_max_connections.unwrap_or(10),
            },
            jwt: JwtConfig { secret: jwt_secret },
            redis: raw
                .redis_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| RedisSettings { url }),
            tracking: TrackingConfig {
                base_url: raw
                    .tracking_base_url
                    .unwrap_or_else(|| "http://localhost:8080".to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
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
        let config = Config::from_source(source(&[
            ("DATABASE_URL", "postgresql://localhost/trackdesk"),
            ("JWT_SECRET", "test-secret-key-at-least-32-bytes-long"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.api.cors_origins, vec!["*"]);
        assert!(!config.api.production);
        assert!(config.redis.is_none());
        assert_eq!(config.tracking.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_source(source(&[
            ("DATABASE_URL", "postgresql://localhost/trackdesk"),
            ("JWT_SECRET", "test-secret-key-at-least-32-bytes-long"),
            ("API_PORT", "9090"),
            ("CORS_ORIGINS", "https://app.example.com, https://admin.example.com"),
            ("PRODUCTION", "true"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("TRACKING_BASE_URL", "https://trk.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.api.port, 9090);
        assert_eq!(config.api.cors_origins.len(), 2);
        assert!(config.api.production);
        assert_eq!(config.redis.unwrap().url, "redis://localhost:6379");
        assert_eq!(config.tracking.base_url, "https://trk.example.com");
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = Config::from_source(source(&[
            ("DATABASE_URL", "postgresql://localhost/trackdesk"),
            ("JWT_SECRET", "short"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_database_url() {
        let result = Config::from_source(source(&[("JWT_SECRET", "test-secret-key-at-least-32-bytes-long")]));
        assert!(result.is_err());
    }
}
