//! Controller configuration.
//!
//! Loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. TOML file (`--config`)
//! 3. Environment variables: `KRON_*`
//!
//! # Example Config
//!
//! ```toml
//! workers = 8
//! base_backoff_ms = 10
//! max_backoff_ms = 60000
//! job_image = "alpine:3.20"
//! ```

use std::path::Path;
use std::time::Duration;

use kron_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Concurrent reconciles.
    pub workers: usize,
    /// First retry delay after a failed reconcile.
    pub base_backoff_ms: u64,
    /// Retry delay cap.
    pub max_backoff_ms: u64,
    /// Grace period for in-flight reconciles on shutdown.
    pub drain_timeout_secs: u64,
    /// Capacity of the channel between watch adapters and the queue.
    pub trigger_buffer: usize,
    /// Image for job containers when the CronJob does not name one.
    pub job_image: String,
    /// Namespace for manifests that do not name one.
    pub namespace: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_backoff_ms: 5,
            // 16 minutes
            max_backoff_ms: 960_000,
            drain_timeout_secs: 30,
            trigger_buffer: 1024,
            job_image: "busybox".to_string(),
            namespace: "default".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Config with short delays for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            workers: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 50,
            drain_timeout_secs: 1,
            ..Self::default()
        }
    }

    /// Set the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Base retry delay.
    pub const fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Retry delay cap.
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Shutdown grace period.
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Apply `KRON_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("KRON_WORKERS") {
            self.workers = parse_var("KRON_WORKERS", &v)?;
        }
        if let Some(v) = lookup("KRON_BASE_BACKOFF_MS") {
            self.base_backoff_ms = parse_var("KRON_BASE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("KRON_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_var("KRON_MAX_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("KRON_DRAIN_TIMEOUT_SECS") {
            self.drain_timeout_secs = parse_var("KRON_DRAIN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("KRON_JOB_IMAGE") {
            self.job_image = v;
        }
        if let Some(v) = lookup("KRON_NAMESPACE") {
            self.namespace = v;
        }
        Ok(self)
    }

    /// Check invariants between fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.base_backoff_ms == 0 {
            return Err(Error::config("base_backoff_ms must be at least 1"));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(Error::config(format!(
                "max_backoff_ms ({}) is below base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        if self.trigger_buffer == 0 {
            return Err(Error::config("trigger_buffer must be at least 1"));
        }
        if self.job_image.trim().is_empty() {
            return Err(Error::config("job_image must not be empty"));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .min(4)
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{name}={value:?}: {e}")))
}
