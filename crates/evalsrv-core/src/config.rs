//! Startup configuration: JSON file + environment-variable overrides.
//!
//! Parses a file into a typed struct, validates it, and hands back a
//! `Result`. The wire format here is JSON, not TOML, since the external
//! config format is part of this system's fixed interface (spec §6).

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EvalServerError, EvalServerResult};

/// Log output format, selected by `EVAL_SERVER_LOG_FORMAT` or `logFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

impl std::str::FromStr for LogFormat {
    type Err = EvalServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(EvalServerError::ConfigInvalid(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// On-disk shape of the config file (spec §6): `{port, auth,
/// maxFetchConcurrency, host?, logFormat?, queueCapacity?}`.
#[derive(Debug, Deserialize)]
struct RawConfig {
    port: u16,
    auth: String,
    #[serde(rename = "maxFetchConcurrency")]
    max_fetch_concurrency: Option<u32>,
    host: Option<String>,
    #[serde(rename = "logFormat")]
    log_format: Option<LogFormat>,
    #[serde(rename = "queueCapacity")]
    queue_capacity: Option<usize>,
}

/// Fully resolved, validated server configuration. Immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub auth_secret: String,
    pub max_fetch_concurrency: u32,
    pub log_format: LogFormat,
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            auth_secret: String::new(),
            max_fetch_concurrency: 5,
            log_format: LogFormat::Pretty,
            queue_capacity: 20,
        }
    }
}

impl Config {
    /// Load from a JSON file, then apply `EVAL_SERVER_*` environment
    /// overrides, then validate.
    pub fn load(path: &Path) -> EvalServerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&content)?;

        let mut config = Config {
            port: raw.port,
            host: raw.host.unwrap_or_else(|| Config::default().host),
            auth_secret: raw.auth,
            max_fetch_concurrency: raw
                .max_fetch_concurrency
                .unwrap_or(Config::default().max_fetch_concurrency),
            log_format: raw.log_format.unwrap_or_default(),
            queue_capacity: raw
                .queue_capacity
                .unwrap_or(Config::default().queue_capacity),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `EVAL_SERVER_*` environment variables on top of the loaded
    /// file. Env wins over file, matching spec §6.
    fn apply_env_overrides(&mut self) -> EvalServerResult<()> {
        if let Ok(v) = env::var("EVAL_SERVER_PORT") {
            self.port = v
                .parse()
                .map_err(|_| EvalServerError::ConfigInvalid(format!("invalid port: {v}")))?;
        }
        if let Ok(v) = env::var("EVAL_SERVER_HOST") {
            self.host = v;
        }
        if let Ok(v) = env::var("EVAL_SERVER_AUTH") {
            self.auth_secret = v;
        }
        if let Ok(v) = env::var("EVAL_SERVER_MAX_FETCH_CONCURRENCY") {
            self.max_fetch_concurrency = v.parse().map_err(|_| {
                EvalServerError::ConfigInvalid(format!("invalid max fetch concurrency: {v}"))
            })?;
        }
        if let Ok(v) = env::var("EVAL_SERVER_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Ok(v) = env::var("EVAL_SERVER_QUEUE_CAPACITY") {
            self.queue_capacity = v.parse().map_err(|_| {
                EvalServerError::ConfigInvalid(format!("invalid queue capacity: {v}"))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> EvalServerResult<()> {
        if self.auth_secret.is_empty() {
            return Err(EvalServerError::ConfigInvalid(
                "auth secret must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(EvalServerError::ConfigInvalid(
                "port must be nonzero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EvalServerError::ConfigInvalid(
                "queue capacity must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}
