//! Configuration file support for floatipd
//!
//! Loads and validates floatipd configuration from TOML. Every key is
//! optional:
//!
//! ```toml
//! store_path = "/var/run/docker/emc_fip_db.json"
//! poll_interval_secs = 5
//! default_prefix_len = 24
//! reject_primary_binding = false
//! iface = "eth0"
//!
//! [retry]
//! attempts = 3
//! delay_ms = 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use floatip_common::store::{DEFAULT_PREFIX_LEN, DEFAULT_STORE_PATH};
use floatip_common::{FipError, FipResult, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::reconciler::ReconcileOptions;

/// Retry configuration for interface lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

/// Complete floatipd configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatipConfig {
    /// Desired-state JSON file
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Seconds between two reconciliation ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Mask for floating addresses stored without one
    #[serde(default = "default_prefix_len")]
    pub default_prefix_len: u8,

    /// Skip bindings whose floating address is the interface's primary address
    #[serde(default)]
    pub reject_primary_binding: bool,

    /// Managed interface; the default-route interface when unset
    #[serde(default)]
    pub iface: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,
}

// Default functions
fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

fn default_poll_interval() -> u64 {
    5
}

fn default_prefix_len() -> u8 {
    DEFAULT_PREFIX_LEN
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

// Default implementations
impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for FloatipConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            poll_interval_secs: default_poll_interval(),
            default_prefix_len: default_prefix_len(),
            reject_primary_binding: false,
            iface: None,
            retry: RetryConfig::default(),
        }
    }
}

impl FloatipConfig {
    /// Parse and validate TOML content
    pub fn from_toml_str(content: &str) -> FipResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FipError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file; a missing file is an error
    pub fn load(path: impl AsRef<Path>) -> FipResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FipError::invalid_config("config", format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.delay_ms))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            retry: self.retry_policy(),
            reject_primary_binding: self.reject_primary_binding,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> FipResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(FipError::invalid_config(
                "poll_interval_secs",
                "must be > 0",
            ));
        }

        if self.default_prefix_len > 32 {
            return Err(FipError::invalid_config(
                "default_prefix_len",
                "must be 0-32",
            ));
        }

        if self.retry.attempts == 0 {
            return Err(FipError::invalid_config("retry.attempts", "must be >= 1"));
        }

        if matches!(&self.iface, Some(iface) if iface.trim().is_empty()) {
            return Err(FipError::invalid_config("iface", "must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FloatipConfig::default();
        assert_eq!(config.store_path, PathBuf::from("/var/run/docker/emc_fip_db.json"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.default_prefix_len, 24);
        assert!(!config.reject_primary_binding);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(
            FloatipConfig::from_toml_str("").unwrap(),
            FloatipConfig::default()
        );
    }

    #[test]
    fn test_partial_config() {
        let config = FloatipConfig::from_toml_str(
            r#"
            poll_interval_secs = 10
            iface = "ens3"

            [retry]
            delay_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.iface.as_deref(), Some("ens3"));
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, 500);
        assert_eq!(config.default_prefix_len, 24);
    }

    #[test]
    fn test_validation_failures() {
        for content in [
            "poll_interval_secs = 0",
            "default_prefix_len = 33",
            "[retry]\nattempts = 0",
            "iface = \"  \"",
        ] {
            assert!(
                matches!(
                    FloatipConfig::from_toml_str(content),
                    Err(FipError::InvalidConfig { .. })
                ),
                "accepted: {content}"
            );
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(FloatipConfig::from_toml_str("poll_interval_secs = \"five\"").is_err());
        assert!(FloatipConfig::from_toml_str("[retry").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reject_primary_binding = true").unwrap();
        writeln!(file, "store_path = \"/tmp/fip.json\"").unwrap();
        file.flush().unwrap();

        let config = FloatipConfig::load(file.path()).unwrap();
        assert!(config.reject_primary_binding);
        assert!(config.reconcile_options().reject_primary_binding);
        assert_eq!(config.store_path, PathBuf::from("/tmp/fip.json"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FloatipConfig::load(dir.path().join("absent.toml")).is_err());
    }
}
