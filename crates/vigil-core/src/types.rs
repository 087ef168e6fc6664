//! Core domain types for vigil
//!
//! These describe WHAT a sentinel job collects and WHERE the results go.
//! They are plain data: immutable once loaded from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::VigilError;

/// A kind of metric a sentinel job can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Process identity and uptime
    Process,
    /// Static disk inventory
    Disk,
    /// Load average, CPU count and system memory
    Sys,
    /// Mounted file stores
    SysFile,
    /// Runtime memory of this process
    Memory,
    /// Thread figures of this process
    Thread,
    /// Garbage-collector figures (empty for native runtimes)
    Gc,
    /// Listening state of the job's configured ports
    Port,
    /// CPU utilization (rate)
    Cpu,
    /// Disk I/O throughput (rate)
    DiskIo,
    /// Network throughput (rate)
    Network,
}

impl MetricKind {
    /// All metric kinds, synchronous first
    pub const ALL: [MetricKind; 11] = [
        MetricKind::Process,
        MetricKind::Disk,
        MetricKind::Sys,
        MetricKind::SysFile,
        MetricKind::Memory,
        MetricKind::Thread,
        MetricKind::Gc,
        MetricKind::Port,
        MetricKind::Cpu,
        MetricKind::DiskIo,
        MetricKind::Network,
    ];

    /// Whether this kind needs two time-separated readings
    pub fn is_rate(&self) -> bool {
        matches!(self, MetricKind::Cpu | MetricKind::DiskIo | MetricKind::Network)
    }

    /// Configuration identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Process => "process",
            MetricKind::Disk => "disk",
            MetricKind::Sys => "sys",
            MetricKind::SysFile => "sys_file",
            MetricKind::Memory => "memory",
            MetricKind::Thread => "thread",
            MetricKind::Gc => "gc",
            MetricKind::Port => "port",
            MetricKind::Cpu => "cpu",
            MetricKind::DiskIo => "disk_io",
            MetricKind::Network => "network",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        MetricKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| VigilError::Config(format!("Unknown metric kind: {}", s)))
    }
}

/// Wire format a subscriber expects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    /// JSON document POSTed over HTTP
    #[default]
    Http,
    /// Snappy-compressed protobuf remote-write request
    Prometheus,
}

impl fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberKind::Http => f.write_str("http"),
            SubscriberKind::Prometheus => f.write_str("prometheus"),
        }
    }
}

/// Basic-auth credentials for a subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOption {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// A destination that receives snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub url: String,

    #[serde(rename = "type", default)]
    pub kind: SubscriberKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOption>,
}

impl Subscriber {
    pub fn new(url: impl Into<String>, kind: SubscriberKind) -> Self {
        Self {
            url: url.into(),
            kind,
            auth: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthOption {
            enable: true,
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Credentials, only when present and enabled
    pub fn enabled_auth(&self) -> Option<&AuthOption> {
        self.auth.as_ref().filter(|auth| auth.enable)
    }

    /// Key used for per-destination failure isolation
    pub fn destination_key(&self) -> &str {
        &self.url
    }
}

/// Configuration for one periodic monitoring job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelConf {
    /// Metric kinds to collect
    #[serde(default)]
    pub tasks: Vec<MetricKind>,

    /// Destinations for every snapshot
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,

    /// Maximum number of executions, -1 for unbounded
    #[serde(default = "default_count")]
    pub count: i64,

    /// Seconds between executions
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// TCP ports reported by the `port` task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listened_ports: Vec<u16>,
}

fn default_count() -> i64 {
    -1
}

fn default_interval() -> u64 {
    10
}

impl SentinelConf {
    pub fn new(tasks: Vec<MetricKind>, subscribers: Vec<Subscriber>) -> Self {
        Self {
            tasks,
            subscribers,
            count: default_count(),
            interval: default_interval(),
            listened_ports: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_listened_ports(mut self, ports: Vec<u16>) -> Self {
        self.listened_ports = ports;
        self
    }

    /// A job is schedulable only with at least one task and one subscriber
    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty() && !self.subscribers.is_empty()
    }

    /// Whether the job has no execution limit. Only a positive count bounds it.
    pub fn is_unbounded(&self) -> bool {
        self.count <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_parse() {
        assert_eq!("cpu".parse::<MetricKind>().unwrap(), MetricKind::Cpu);
        assert_eq!("disk-io".parse::<MetricKind>().unwrap(), MetricKind::DiskIo);
        assert_eq!(" SYS_FILE ".parse::<MetricKind>().unwrap(), MetricKind::SysFile);
        assert!("heap".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_rate_kinds() {
        let rates: Vec<_> = MetricKind::ALL.iter().filter(|k| k.is_rate()).collect();
        assert_eq!(
            rates,
            vec![&MetricKind::Cpu, &MetricKind::DiskIo, &MetricKind::Network]
        );
    }

    #[test]
    fn test_enabled_auth() {
        let plain = Subscriber::new("http://a", SubscriberKind::Http);
        assert!(plain.enabled_auth().is_none());

        let mut disabled = Subscriber::new("http://a", SubscriberKind::Http).with_basic_auth("u", "p");
        if let Some(auth) = disabled.auth.as_mut() {
            auth.enable = false;
        }
        assert!(disabled.enabled_auth().is_none());

        let enabled = Subscriber::new("http://a", SubscriberKind::Http).with_basic_auth("u", "p");
        assert_eq!(enabled.enabled_auth().unwrap().username, "u");
    }

    #[test]
    fn test_sentinel_active() {
        let sub = Subscriber::new("http://a", SubscriberKind::Http);
        assert!(SentinelConf::new(vec![MetricKind::Cpu], vec![sub.clone()]).is_active());
        assert!(!SentinelConf::new(vec![], vec![sub]).is_active());
        assert!(!SentinelConf::new(vec![MetricKind::Cpu], vec![]).is_active());
    }

    #[test]
    fn test_listened_ports_default_empty() {
        let json = r#"{"tasks":["port"],"subscribers":[{"url":"http://a"}],"listened_ports":[3306,6379]}"#;
        let conf: SentinelConf = serde_json::from_str(json).unwrap();
        assert_eq!(conf.tasks, vec![MetricKind::Port]);
        assert_eq!(conf.listened_ports, vec![3306, 6379]);

        let plain = SentinelConf::new(vec![MetricKind::Cpu], Vec::new());
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("listened_ports").is_none());
    }

    #[test]
    fn test_subscriber_deserialize() {
        let json = r#"{"url":"http://prom:9090/api/v1/write","type":"prometheus"}"#;
        let sub: Subscriber = serde_json::from_str(json).unwrap();
        assert_eq!(sub.kind, SubscriberKind::Prometheus);
        assert!(sub.auth.is_none());
    }
}
