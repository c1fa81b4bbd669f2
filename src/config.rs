use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::mode::EvaluationMode;

/// EngineConfig tunes the caches, the reconnection policy and auto-provisioning.
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```yaml
/// local_cache:
///   max_capacity: 1000
///   ttl_secs: 30
/// distributed_cache:
///   ttl_secs: 300
///   key_prefix: flagwarden
///   scan_batch_size: 100
/// reconnect:
///   base_delay_ms: 100
///   max_delay_ms: 30000
///   max_attempts: 10
///   jitter: 0.2
/// provisioning:
///   enabled: true
///   default_mode: Off
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub distributed_cache: DistributedCacheConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.distributed_cache.scan_batch_size == 0 {
            anyhow::bail!("distributed_cache.scan_batch_size must be positive");
        }
        if !(0.0..1.0).contains(&self.reconnect.jitter) {
            anyhow::bail!(
                "reconnect.jitter must be in [0, 1), got {}",
                self.reconnect.jitter
            );
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            anyhow::bail!("reconnect.base_delay_ms exceeds reconnect.max_delay_ms");
        }
        Ok(())
    }
}

/// In-process tier.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalCacheConfig {
    #[serde(default = "default_local_capacity")]
    pub max_capacity: u64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "ttl_secs", default = "default_local_ttl")]
    pub ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_local_capacity(),
            ttl: default_local_ttl(),
        }
    }
}

fn default_local_capacity() -> u64 {
    1_000
}

fn default_local_ttl() -> Duration {
    Duration::from_secs(30)
}

/// Shared tier.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DistributedCacheConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "ttl_secs", default = "default_distributed_ttl")]
    pub ttl: Duration,
    /// Prepended to every key, so several engines can share one cache.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Page size used when scanning keys for bulk invalidation, and the size of each delete batch.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_distributed_ttl(),
            key_prefix: default_key_prefix(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

fn default_distributed_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_key_prefix() -> String {
    "flagwarden".to_string()
}

fn default_scan_batch_size() -> usize {
    100
}

/// Backoff for re-establishing the distributed cache connection.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms", default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms", default = "default_max_delay")]
    pub max_delay: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Relative spread applied to each delay: 0.2 means ±20%.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProvisioningConfig {
    /// Register unknown flags in the repository on first evaluation.
    #[serde(default = "default_provisioning_enabled")]
    pub enabled: bool,
    /// Mode given to flags that are evaluated before anybody configured them.
    #[serde(default = "default_provisioning_mode")]
    pub default_mode: EvaluationMode,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            enabled: default_provisioning_enabled(),
            default_mode: default_provisioning_mode(),
        }
    }
}

fn default_provisioning_enabled() -> bool {
    true
}

fn default_provisioning_mode() -> EvaluationMode {
    EvaluationMode::Off
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_that!(config).is_equal_to(EngineConfig::default());
        assert_that!(config.local_cache.max_capacity).is_equal_to(1_000);
        assert_that!(config.local_cache.ttl).is_equal_to(Duration::from_secs(30));
        assert_that!(config.distributed_cache.ttl).is_equal_to(Duration::from_secs(300));
        assert_that!(config.distributed_cache.key_prefix.as_str()).is_equal_to("flagwarden");
        assert_that!(config.reconnect.base_delay).is_equal_to(Duration::from_millis(100));
        assert_that!(config.reconnect.max_attempts).is_equal_to(10);
        assert_that!(config.provisioning.default_mode).is_equal_to(EvaluationMode::Off);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
distributed_cache:
  key_prefix: checkout
  scan_batch_size: 25
reconnect:
  base_delay_ms: 50
  jitter: 0.1
provisioning:
  default_mode: On
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_that!(config.distributed_cache.key_prefix.as_str()).is_equal_to("checkout");
        assert_that!(config.distributed_cache.scan_batch_size).is_equal_to(25);
        assert_that!(config.distributed_cache.ttl).is_equal_to(Duration::from_secs(300));
        assert_that!(config.reconnect.base_delay).is_equal_to(Duration::from_millis(50));
        assert_that!(config.reconnect.max_delay).is_equal_to(Duration::from_secs(30));
        assert_that!(config.reconnect.jitter).is_equal_to(0.1);
        assert_that!(config.provisioning.enabled).is_true();
        assert_that!(config.provisioning.default_mode).is_equal_to(EvaluationMode::On);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_that!(EngineConfig::from_yaml_str("distributed_cache: {scan_batch_size: 0}").is_err())
            .is_true();
        assert_that!(EngineConfig::from_yaml_str("reconnect: {jitter: 1.5}").is_err()).is_true();
        assert_that!(
            EngineConfig::from_yaml_str("reconnect: {base_delay_ms: 60000, max_delay_ms: 1000}")
                .is_err()
        )
        .is_true();
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join("flagwarden-engine-config-test.yaml");
        std::fs::write(&path, "local_cache:\n  ttl_secs: 5\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_that!(config.local_cache.ttl).is_equal_to(Duration::from_secs(5));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert_that!(EngineConfig::load("/nonexistent/flagwarden.yaml").is_err()).is_true();
    }
}
