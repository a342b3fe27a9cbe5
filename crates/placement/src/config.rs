//! Reconciler configuration, mounted as a YAML file.
//!
//! ```yaml
//! tenants: [acme, globex]
//! intervalSeconds: 60
//! webhookBaseUrl: https://ci.acme.io
//! retry:
//!   maxAttempts: 5
//!   initialDelayMs: 10
//!   maxDelayMs: 1000
//!   backoffMultiplier: 2.0
//! ```

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConfig {
    /// Tenants reconciled by `watch` when none are given on the command line
    #[serde(default)]
    pub tenants: Vec<String>,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Public base URL SCM webhooks deliver to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_base_url: Option<String>,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            interval_seconds: default_interval_seconds(),
            webhook_base_url: None,
            retry: RetrySettings::default(),
        }
    }
}

/// Serialized form of [`RetryConfig`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: u64::try_from(defaults.initial_delay.as_millis()).unwrap_or(10),
            max_delay_ms: u64::try_from(defaults.max_delay.as_millis()).unwrap_or(1000),
            backoff_multiplier: defaults.backoff_multiplier,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl PlacementConfig {
    /// Load configuration from a mounted file. A missing file yields defaults.
    pub fn from_mounted_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "intervalSeconds must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.backoffMultiplier must be a finite number of at least 1.0".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initialDelayMs must not exceed retry.maxDelayMs".to_string(),
            ));
        }
        if self.tenants.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("tenant names must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }
}
