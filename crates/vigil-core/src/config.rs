//! Configuration management for vigil
//!
//! This module provides the file-backed configuration for a vigil node:
//! node identity, breaker policy, sampling delay, HTTP timeout and the list
//! of sentinel jobs. Every field has a default so partial files are valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Result, SentinelConf, VigilError};

/// Node-level vigil configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Node identifier stamped on every snapshot
    #[serde(default = "default_name")]
    pub name: String,

    /// Worker threads for the runtime
    #[serde(default = "default_work_threads")]
    pub work_threads: usize,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Sentinel jobs
    #[serde(default)]
    pub sentinel: Vec<SentinelConf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Per-destination quick-fail policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before a destination is skipped
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds a destination is skipped once opened
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Rate-sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Delay between the two readings of a rate metric
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Scheduler behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Push a failed job's next execution out by a full interval
    #[serde(default)]
    pub advance_on_failure: bool,
}

// Default value providers
fn default_name() -> String {
    "vigil-node".to_string()
}

fn default_work_threads() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

impl VigilConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| VigilError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from `path` or use defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| VigilError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check field ranges and subscriber shape.
    ///
    /// Sentinel entries without tasks or subscribers pass validation; the
    /// scheduler drops them at start.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VigilError::Config("name must not be empty".to_string()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(VigilError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        for (idx, conf) in self.sentinel.iter().enumerate() {
            if conf.interval == 0 {
                return Err(VigilError::Config(format!(
                    "sentinel[{}].interval must be positive",
                    idx
                )));
            }
            if conf.count == 0 || conf.count < -1 {
                return Err(VigilError::Config(format!(
                    "sentinel[{}].count must be -1 or positive, got {}",
                    idx, conf.count
                )));
            }
            if conf.listened_ports.contains(&0) {
                return Err(VigilError::Config(format!(
                    "sentinel[{}].listened_ports must not contain port 0",
                    idx
                )));
            }
            for subscriber in &conf.subscribers {
                let url = subscriber.url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(VigilError::Config(format!(
                        "sentinel[{}] subscriber url must be http(s): '{}'",
                        idx, subscriber.url
                    )));
                }
                if let Some(auth) = subscriber.enabled_auth() {
                    if auth.username.is_empty() {
                        return Err(VigilError::Config(format!(
                            "sentinel[{}] subscriber '{}' enables auth without a username",
                            idx, subscriber.url
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sentinel entries that can actually be scheduled
    pub fn active_sentinels(&self) -> Vec<SentinelConf> {
        self.sentinel.iter().filter(|c| c.is_active()).cloned().collect()
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl SamplingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            work_threads: default_work_threads(),
            log: LogConfig::default(),
            breaker: BreakerConfig::default(),
            sampling: SamplingConfig::default(),
            http: HttpConfig::default(),
            scheduler: SchedulerConfig::default(),
            sentinel: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricKind, SubscriberKind};

    const SAMPLE: &str = r#"
name = "node-a"

[breaker]
failure_threshold = 3

[[sentinel]]
tasks = ["cpu", "disk_io", "sys", "port"]
interval = 15
listened_ports = [3306, 6379, 8080]

  [[sentinel.subscribers]]
  url = "http://127.0.0.1:8080/monitor"
  type = "http"

    [sentinel.subscribers.auth]
    enable = true
    username = "admin"
    password = "secret"

  [[sentinel.subscribers]]
  url = "http://127.0.0.1:9090/api/v1/write"
  type = "prometheus"

[[sentinel]]
tasks = []
"#;

    #[test]
    fn test_parse_sample() {
        let config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.name, "node-a");
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown_secs, 60);
        assert_eq!(config.sampling.delay(), Duration::from_secs(1));
        assert_eq!(config.sentinel.len(), 2);

        let job = &config.sentinel[0];
        assert_eq!(
            job.tasks,
            vec![MetricKind::Cpu, MetricKind::DiskIo, MetricKind::Sys, MetricKind::Port]
        );
        assert_eq!(job.listened_ports, vec![3306, 6379, 8080]);
        assert_eq!(job.count, -1);
        assert_eq!(job.interval, 15);
        assert_eq!(job.subscribers[1].kind, SubscriberKind::Prometheus);
        assert_eq!(job.subscribers[0].enabled_auth().unwrap().password, "secret");

        config.validate().unwrap();
        assert_eq!(config.active_sentinels().len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        config.sentinel[0].interval = 0;
        assert!(config.validate().is_err());

        let mut config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        config.sentinel[0].count = -5;
        assert!(config.validate().is_err());

        let mut config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        config.sentinel[0].subscribers[0].url = "ftp://nowhere".to_string();
        assert!(config.validate().is_err());

        let mut config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        config.sentinel[0].listened_ports.push(0);
        assert!(config.validate().is_err());

        let mut config = VigilConfig::from_toml_str(SAMPLE).unwrap();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_then_load_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/vigil.toml");

        VigilConfig::write_default(&path).unwrap();
        let loaded = VigilConfig::load(&path).unwrap();
        assert_eq!(loaded.name, "vigil-node");
        assert_eq!(loaded.breaker.failure_threshold, 5);
        assert!(loaded.sentinel.is_empty());
    }

    #[test]
    fn test_load_or_default_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = VigilConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert!(!config.scheduler.advance_on_failure);
    }
}
