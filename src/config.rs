//! Configuration for the load probe.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::Quota;

/// Which limiter operation the probe workers drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMode {
    /// Non-blocking checks; denials are counted
    Check,
    /// Blocking waits on pre-configured keys
    Wait,
    /// Waits that create each key on first touch
    WaitOrConfigure,
}

/// A key and the quota the probe gives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// The key name
    pub key: String,
    /// Quota applied to the key
    #[serde(flatten)]
    pub quota: Quota,
}

/// Main configuration for a probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Operations issued by each worker
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Operation under test
    #[serde(default = "default_mode")]
    pub mode: ProbeMode,

    /// Seed for key selection; random when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Keys workers pick from
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requests: default_requests(),
            mode: default_mode(),
            seed: None,
            keys: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    8
}

fn default_requests() -> usize {
    100
}

fn default_mode() -> ProbeMode {
    ProbeMode::Check
}

impl ProbeConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading probe configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse probe config: {}", e)))
    }

    /// Reject configurations the probe cannot run.
    ///
    /// Quotas themselves are passed through unchecked.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LimiterError::Config("workers must be at least 1".to_string()));
        }
        if self.keys.is_empty() {
            return Err(LimiterError::Config("at least one key is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.workers, 8);
        assert_eq!(config.requests, 100);
        assert_eq!(config.mode, ProbeMode::Check);
        assert!(config.keys.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
workers: 4
requests: 20
mode: wait-or-configure
seed: 42
keys:
  - key: backend-a
    max_uses: 10
    recovery_ms: 1000
  - key: backend-b
    max_uses: 1
    recovery_ms: 50
"#;
        let config = ProbeConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.requests, 20);
        assert_eq!(config.mode, ProbeMode::WaitOrConfigure);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.keys.len(), 2);
        assert_eq!(config.keys[0].key, "backend-a");
        assert_eq!(config.keys[0].quota, Quota::new(10, Duration::from_secs(1)));
        assert_eq!(config.keys[1].quota, Quota::new(1, Duration::from_millis(50)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let yaml = r#"
keys:
  - key: only
    max_uses: 3
    recovery_ms: 100
"#;
        let config = ProbeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.mode, ProbeMode::Check);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let result = ProbeConfig::from_yaml("workers: [not, a, number]");
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_runs() {
        let config = ProbeConfig::default();
        assert!(matches!(config.validate(), Err(LimiterError::Config(_))));

        let config = ProbeConfig {
            workers: 0,
            keys: vec![KeyConfig {
                key: "k".to_string(),
                quota: Quota::new(1, Duration::from_secs(1)),
            }],
            ..ProbeConfig::default()
        };
        assert!(matches!(config.validate(), Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_zero_quota_is_accepted() {
        let config = ProbeConfig {
            keys: vec![KeyConfig {
                key: "closed".to_string(),
                quota: Quota::new(0, Duration::ZERO),
            }],
            ..ProbeConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
