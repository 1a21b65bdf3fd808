//! Guard configuration.
//!
//! Loaded from `config/skillscan.toml` when the file exists, then overlaid
//! with environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `SECURITYSCAN_API_KEY` | `api_key` (never read from the file) |
//! | `SECURITYSCAN_API_URL` | `base_url` |
//! | `SKILLSCAN_DATA_DIR` | `data_dir` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skillscan_api::{DEFAULT_BASE_URL, Plan};
use skillscan_store::DB_FILE_NAME;
use tracing::{debug, info};

use crate::billing::BillingPolicy;
use crate::error::{GuardError, Result};

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/skillscan.toml";

pub const ENV_API_KEY: &str = "SECURITYSCAN_API_KEY";
pub const ENV_API_URL: &str = "SECURITYSCAN_API_URL";
pub const ENV_DATA_DIR: &str = "SKILLSCAN_DATA_DIR";

/// Runtime settings for the install guard.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Base URL of the SecurityScan service.
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Delay between billing status polls.
    pub poll_interval_secs: u64,
    /// Wall-clock bound on waiting for payment.
    pub billing_timeout_secs: u64,
    /// Freshness window of cached verdicts.
    pub cache_ttl_secs: u64,
    /// Hot verdicts kept in memory.
    pub cache_capacity: u64,
    /// Plan requested when the scan limit is hit.
    pub upgrade_plan: Plan,
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    /// Pre-provisioned API key. Environment only.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            poll_interval_secs: 3,
            billing_timeout_secs: 30,
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 10_000,
            upgrade_plan: Plan::PayPerScan,
            data_dir: PathBuf::from("data"),
            api_key: None,
        }
    }
}

impl fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("billing_timeout_secs", &self.billing_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_capacity", &self.cache_capacity)
            .field("upgrade_plan", &self.upgrade_plan)
            .field("data_dir", &self.data_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GuardConfig {
    /// Load `path` (defaults if it does not exist), apply the process
    /// environment, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| GuardError::Config {
                reason: format!("failed to read {}: {e}", path.display()),
            })?;
            let config = Self::from_toml_str(&content)?;
            info!(path = %path.display(), "configuration loaded");
            config
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };

        let config = config.with_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GuardError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Overlay variables resolved by `lookup`. Empty values count as unset.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = var(ENV_API_URL) {
            self.base_url = url;
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    /// Reject settings the guard cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(GuardError::Config { reason });

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return invalid(format!("base_url must be an http(s) URL, got `{}`", self.base_url));
        }
        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("billing_timeout_secs", self.billing_timeout_secs),
            ("cache_ttl_secs", self.cache_ttl_secs),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.poll_interval_secs > self.billing_timeout_secs {
            return invalid(format!(
                "poll_interval_secs ({}) exceeds billing_timeout_secs ({})",
                self.poll_interval_secs, self.billing_timeout_secs
            ));
        }
        if !self.upgrade_plan.is_paid() {
            return invalid(format!("upgrade_plan must be a paid plan, got {}", self.upgrade_plan));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
    }

    /// Path of the SQLite state file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn billing_policy(&self) -> BillingPolicy {
        BillingPolicy {
            target_plan: self.upgrade_plan,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.billing_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = GuardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_url, "https://api.securityscan.dev");
        assert_eq!(config.billing_policy().poll_interval, Duration::from_secs(3));
        assert_eq!(config.billing_policy().timeout, Duration::from_secs(30));
        assert_eq!(config.cache_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.db_path(), PathBuf::from("data").join("skillscan.db"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = GuardConfig::from_toml_str(
            r#"
            poll_interval_secs = 5
            upgrade_plan = "PRO"
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.upgrade_plan, Plan::Pro);
        assert_eq!(config.billing_timeout_secs, 30);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GuardConfig::from_toml_str("api_key = \"sk\"").unwrap_err();
        assert!(matches!(err, GuardError::Config { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = GuardConfig::default().with_env_overrides(env(&[
            (ENV_API_KEY, "k-env"),
            (ENV_API_URL, "http://localhost:8000"),
            (ENV_DATA_DIR, "  "),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("k-env"));
        assert_eq!(config.base_url, "http://localhost:8000");
        // Blank values are ignored.
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn validate_rejects_bad_intervals() {
        let zero = GuardConfig {
            poll_interval_secs: 0,
            ..GuardConfig::default()
        };
        assert!(zero.validate().is_err());

        let slow = GuardConfig {
            poll_interval_secs: 45,
            ..GuardConfig::default()
        };
        assert!(slow.validate().is_err());
    }

    #[test]
    fn validate_rejects_free_upgrade_and_bad_url() {
        let free = GuardConfig {
            upgrade_plan: Plan::Free,
            ..GuardConfig::default()
        };
        assert!(free.validate().is_err());

        let ftp = GuardConfig {
            base_url: "ftp://api".into(),
            ..GuardConfig::default()
        };
        assert!(ftp.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = GuardConfig {
            api_key: Some("sk-secret".into()),
            ..GuardConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = GuardConfig::load("/nonexistent/skillscan.toml").unwrap();
        assert_eq!(config.poll_interval_secs, 3);
    }
}
