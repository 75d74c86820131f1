use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use atelier_comfyui::registry::{parse_endpoints, DEFAULT_ENDPOINT};

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,

    /// Render backend base URLs, in registry order.
    pub backend_endpoints: Vec<String>,
    /// Per-request timeout towards render backends.
    pub backend_timeout: Duration,

    pub poll_interval: Duration,
    pub max_transport_failures: u32,
    pub pending_timeout: Duration,

    /// Local artifact directory.
    pub output_dir: PathBuf,
    /// Directory used as the durable store when no bucket is set.
    pub durable_dir: PathBuf,
    /// Object storage bucket; `None` selects the filesystem store.
    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
    pub replication_workers: usize,
    pub replication_max_attempts: u32,

    /// Submissions allowed per client per minute.
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:3000".into()],
            request_timeout_secs: 60,
            backend_endpoints: vec![DEFAULT_ENDPOINT.into()],
            backend_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
            max_transport_failures: 5,
            pending_timeout: Duration::from_secs(1800),
            output_dir: PathBuf::from("storage/output"),
            durable_dir: PathBuf::from("storage/durable"),
            s3_bucket: None,
            s3_prefix: "renders".into(),
            replication_workers: 4,
            replication_max_attempts: 3,
            rate_limit_per_minute: 5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                  |
    /// |----------------------------|--------------------------|
    /// | `HOST`                     | `0.0.0.0`                |
    /// | `PORT`                     | `3000`                   |
    /// | `CORS_ORIGINS`             | `http://localhost:3000`  |
    /// | `REQUEST_TIMEOUT_SECS`     | `60`                     |
    /// | `COMFY_API_URL`            | `http://127.0.0.1:8188`  |
    /// | `BACKEND_TIMEOUT_SECS`     | `30`                     |
    /// | `POLL_INTERVAL_MS`         | `1000`                   |
    /// | `MAX_TRANSPORT_FAILURES`   | `5`                      |
    /// | `PENDING_TIMEOUT_SECS`     | `1800`                   |
    /// | `OUTPUT_DIR`               | `storage/output`         |
    /// | `DURABLE_DIR`              | `storage/durable`        |
    /// | `S3_BUCKET`                | unset                    |
    /// | `S3_PREFIX`                | `renders`                |
    /// | `REPLICATION_WORKERS`      | `4`                      |
    /// | `REPLICATION_MAX_ATTEMPTS` | `3`                      |
    /// | `RATE_LIMIT_PER_MINUTE`    | `5`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cors_origins = match var("CORS_ORIGINS") {
            Some(raw) => split_list(&raw),
            None => defaults.cors_origins,
        };
        let backend_endpoints = match var("COMFY_API_URL") {
            Some(raw) => parse_endpoints(&raw),
            None => defaults.backend_endpoints,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", var("PORT"), defaults.port)?,
            cors_origins,
            request_timeout_secs: parse_or(
                "REQUEST_TIMEOUT_SECS",
                var("REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout_secs,
            )?,
            backend_endpoints,
            backend_timeout: Duration::from_secs(parse_or(
                "BACKEND_TIMEOUT_SECS",
                var("BACKEND_TIMEOUT_SECS"),
                defaults.backend_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(parse_or(
                "POLL_INTERVAL_MS",
                var("POLL_INTERVAL_MS"),
                defaults.poll_interval.as_millis() as u64,
            )?),
            max_transport_failures: parse_or(
                "MAX_TRANSPORT_FAILURES",
                var("MAX_TRANSPORT_FAILURES"),
                defaults.max_transport_failures,
            )?,
            pending_timeout: Duration::from_secs(parse_or(
                "PENDING_TIMEOUT_SECS",
                var("PENDING_TIMEOUT_SECS"),
                defaults.pending_timeout.as_secs(),
            )?),
            output_dir: var("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            durable_dir: var("DURABLE_DIR").map(PathBuf::from).unwrap_or(defaults.durable_dir),
            s3_bucket: var("S3_BUCKET"),
            s3_prefix: var("S3_PREFIX").unwrap_or(defaults.s3_prefix),
            replication_workers: parse_or(
                "REPLICATION_WORKERS",
                var("REPLICATION_WORKERS"),
                defaults.replication_workers,
            )?,
            replication_max_attempts: parse_or(
                "REPLICATION_MAX_ATTEMPTS",
                var("REPLICATION_MAX_ATTEMPTS"),
                defaults.replication_max_attempts,
            )?,
            rate_limit_per_minute: parse_or(
                "RATE_LIMIT_PER_MINUTE",
                var("RATE_LIMIT_PER_MINUTE"),
                defaults.rate_limit_per_minute,
            )?,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
