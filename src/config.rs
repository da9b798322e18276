//! Configuration types for onesignal-cleaner

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Default registry origin
pub const ONESIGNAL_ORIGIN: &str = "https://onesignal.com";

/// Upper bound for `cleanup.concurrency`
pub const MAX_CONCURRENCY: usize = 1024;

/// Remote registry connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// API origin (default: "https://onesignal.com")
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Target app id, sent as the `app_id` query parameter
    #[serde(default)]
    pub app_id: String,

    /// REST API key, sent as `Authorization: Basic {key}`
    #[serde(default)]
    pub api_key: String,

    /// Connect timeout of the production transport (default: 60 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            app_id: String::new(),
            api_key: String::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Export acquisition and download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// How long to keep polling for the export before giving up (default: 600 seconds)
    #[serde(default = "default_readiness_timeout", with = "duration_serde")]
    pub readiness_timeout: Duration,

    /// Fixed delay between polling attempts (default: 5 seconds)
    #[serde(default = "default_pause", with = "duration_serde")]
    pub pause: Duration,

    /// Where the downloaded artifact is written (default: OS temp dir)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Treat a byte-count mismatch after download as an error (default: true)
    ///
    /// When false the mismatch is logged as a warning and the download still succeeds.
    #[serde(default = "default_true")]
    pub strict_integrity: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: default_readiness_timeout(),
            pause: default_pause(),
            temp_dir: default_temp_dir(),
            strict_integrity: true,
        }
    }
}

/// Classification and deletion settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Maximum time since last activity before a subscriber is deleted (default: 180 days)
    #[serde(default = "default_inactivity_ttl", with = "duration_serde")]
    pub inactivity_ttl: Duration,

    /// Number of concurrent deletion workers (default: 1)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fail the run if any deletion failed (default: false)
    #[serde(default)]
    pub fail_on_deletion_errors: bool,

    /// Retry policy around each deletion (default: no retries)
    #[serde(default = "default_delete_retry")]
    pub delete_retry: RetryConfig,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            inactivity_ttl: default_inactivity_ttl(),
            concurrency: default_concurrency(),
            fail_on_deletion_errors: false,
            delete_retry: default_delete_retry(),
        }
    }
}

/// Main configuration for [`Cleaner`](crate::Cleaner)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry origin and credentials
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Export polling and download
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Classification and deletion
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Pre-supplied artifact; skips acquisition entirely
    #[serde(default)]
    pub local_artifact: Option<PathBuf>,

    /// Stop after downloading the artifact
    #[serde(default)]
    pub download_only: bool,

    /// Leave a downloaded artifact on disk after a full run
    #[serde(default)]
    pub keep_artifact: bool,
}

impl Config {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Reject configurations the run cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.registry.app_id.trim().is_empty() {
            return Err(config_error("app id must not be empty", "registry.app_id"));
        }
        if self.registry.api_key.trim().is_empty() {
            return Err(config_error("api key must not be empty", "registry.api_key"));
        }
        if let Err(e) = url::Url::parse(&self.registry.origin) {
            return Err(config_error(
                format!("invalid origin {:?}: {}", self.registry.origin, e),
                "registry.origin",
            ));
        }
        if self.cleanup.concurrency == 0 || self.cleanup.concurrency > MAX_CONCURRENCY {
            return Err(config_error(
                format!("concurrency must be between 1 and {MAX_CONCURRENCY}"),
                "cleanup.concurrency",
            ));
        }
        let multiplier = self.cleanup.delete_retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                format!("backoff multiplier must be a finite number of at least 1, got {multiplier}"),
                "cleanup.delete_retry.backoff_multiplier",
            ));
        }
        if self.acquisition.pause.is_zero() {
            return Err(config_error(
                "pause between attempts must be non-zero",
                "acquisition.pause",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_origin() -> String {
    ONESIGNAL_ORIGIN.to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_pause() -> Duration {
    Duration::from_secs(5)
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_inactivity_ttl() -> Duration {
    Duration::from_secs(86400 * 30 * 6)
}

fn default_concurrency() -> usize {
    1
}

fn default_delete_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 0,
        ..RetryConfig::default()
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Durations are whole seconds on the wire
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
