//! Configuration types.
//!
//! Everything is read from the environment once at startup and never changes
//! afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineEndpoint;
use crate::error::ConfigError;

/// Worker node configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address advertised to engines in the service descriptor.
    pub service_url: String,
    /// Local bind address for the HTTP surface.
    pub bind_addr: SocketAddr,
    /// Engines to announce to, deduplicated.
    pub engine_urls: Vec<EngineEndpoint>,
    /// Announce attempts per engine.
    pub announce_retries: u32,
    /// Fixed delay between announce attempts.
    pub announce_retry_delay: Duration,
    /// Capacity of the task intake queue.
    pub max_tasks: usize,
    /// Upper bound on deregistration and intake drain at shutdown.
    pub shutdown_timeout: Duration,
    /// Timeout applied to every HTTP call towards an engine.
    pub request_timeout: Duration,
    /// Directory for the local blob store (in-memory when unset).
    pub storage_dir: Option<PathBuf>,
    /// Blob limit of the in-memory store, oldest evicted first.
    pub memory_max_blobs: usize,
    /// Directory holding self-test fixtures.
    pub test_data_dir: PathBuf,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:9090".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            engine_urls: vec![EngineEndpoint::localhost()],
            announce_retries: 5,
            announce_retry_delay: Duration::from_secs(3),
            max_tasks: 50,
            shutdown_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            storage_dir: None,
            memory_max_blobs: 1024,
            test_data_dir: PathBuf::from("test_data"),
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&var, "PORT", 9090)?;
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid("HOST", e.to_string()))?;

        let engine_urls = match var("ENGINE_URLS") {
            Some(raw) => parse_engine_urls(&raw)?,
            None => defaults.engine_urls,
        };

        let retry_delay_secs: u64 = parse_or(&var, "ENGINE_ANNOUNCE_RETRY_DELAY", 3)?;
        let shutdown_secs: u64 = parse_or(&var, "SHUTDOWN_TIMEOUT_SECS", 10)?;
        let request_secs: u64 = parse_or(&var, "REQUEST_TIMEOUT_SECS", 10)?;

        let max_tasks: usize = parse_or(&var, "MAX_TASKS", defaults.max_tasks)?;
        if max_tasks == 0 {
            return Err(invalid("MAX_TASKS", "must be at least 1"));
        }

        let memory_max_blobs: usize =
            parse_or(&var, "MEMORY_STORAGE_MAX_BLOBS", defaults.memory_max_blobs)?;
        if memory_max_blobs == 0 {
            return Err(invalid("MEMORY_STORAGE_MAX_BLOBS", "must be at least 1"));
        }

        Ok(Self {
            service_url: var("SERVICE_URL").unwrap_or(defaults.service_url),
            bind_addr,
            engine_urls,
            announce_retries: parse_or(&var, "ENGINE_ANNOUNCE_RETRIES", defaults.announce_retries)?,
            announce_retry_delay: Duration::from_secs(retry_delay_secs),
            max_tasks,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            request_timeout: Duration::from_secs(request_secs),
            storage_dir: var("STORAGE_DIR").map(PathBuf::from),
            memory_max_blobs,
            test_data_dir: var("TEST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.test_data_dir),
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

/// Accepts either a JSON array (`["http://a","http://b"]`) or a comma list.
fn parse_engine_urls(raw: &str) -> Result<Vec<EngineEndpoint>, ConfigError> {
    let items: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|e| invalid("ENGINE_URLS", e.to_string()))?
    } else {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    let mut endpoints: Vec<EngineEndpoint> = Vec::with_capacity(items.len());
    for item in items {
        let endpoint =
            EngineEndpoint::parse(&item).map_err(|reason| invalid("ENGINE_URLS", reason))?;
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }

    if endpoints.is_empty() {
        return Err(ConfigError::NoEngines);
    }
    Ok(endpoints)
}
