//! Typed configuration.
//!
//! Defaults, optionally overlaid by a TOML file, then by environment
//! variables. Loaded once at startup; fails fast on malformed values.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers, i.e. max jobs running at once.
    pub workers: usize,
    /// Capacity of the job queue. Submitters wait once it is full.
    pub job_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_buffer: 128,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("queue.workers must be at least 1".to_string()));
        }
        if self.job_buffer == 0 {
            return Err(Error::Config("queue.job_buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            otel_endpoint: None,
            log_level: "info".to_string(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.queue.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment variables on top.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;
        config.apply_env()?;
        config.queue.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(workers) = optional_var("PAGEFAN_QUEUE_WORKERS")? {
            self.queue.workers = workers;
        }
        if let Some(job_buffer) = optional_var("PAGEFAN_QUEUE_JOB_BUFFER")? {
            self.queue.job_buffer = job_buffer;
        }
        if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("environment variable {name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
