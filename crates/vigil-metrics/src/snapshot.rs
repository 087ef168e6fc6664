//! Immutable metric snapshots
//!
//! A [`SnapshotBuilder`] is filled in by the sampler while a collection is
//! in flight and frozen into a [`MetricSnapshot`] exactly once. Exporters
//! share the frozen snapshot behind an `Arc` and never mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{
    DiskInfo, FileStore, GcInfo, PortState, ProcessInfo, RuntimeMemory, SystemMemory, ThreadInfo,
};

/// CPU utilization over one sampling window, as ratios of the tick total
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub cpu_num: usize,
    pub sys: f64,
    pub user: f64,
    pub io_wait: f64,
    pub idle: f64,
}

impl CpuUsage {
    /// Fraction of the window the CPU was not idle
    pub fn busy(&self) -> f64 {
        (1.0 - self.idle).clamp(0.0, 1.0)
    }
}

/// I/O throughput of one block device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIoRate {
    pub name: String,
    pub queue_length: u64,
    pub read_per_second: f64,
    pub read_bytes_per_second: f64,
    pub write_per_second: f64,
    pub write_bytes_per_second: f64,
}

/// Throughput of one network interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetIfRate {
    pub name: String,
    pub recv_bytes: u64,
    pub recv_count: u64,
    pub sent_bytes: u64,
    pub sent_count: u64,
    pub recv_bytes_per_second: f64,
    pub sent_bytes_per_second: f64,
}

/// System load and memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub cpu_num: usize,
    pub load_average: f64,
    pub memory: SystemMemory,
}

/// One fully-assembled set of readings for a collection cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub node: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<Vec<DiskInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys: Option<SystemSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_file: Option<Vec<FileStore>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<RuntimeMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc: Option<Vec<GcInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Vec<PortState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_io: Option<Vec<DiskIoRate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetIfRate>>,
}

impl MetricSnapshot {
    /// Capture timestamp in milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Single representative value for single-sample backends.
    ///
    /// CPU busy ratio when CPU was sampled, otherwise the effective load
    /// average, otherwise zero.
    pub fn headline_value(&self) -> f64 {
        if let Some(cpu) = &self.cpu {
            return cpu.busy();
        }
        if let Some(sys) = &self.sys {
            return sys.load_average;
        }
        0.0
    }

    /// Render as a JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Mutable accumulator for an in-flight collection
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    inner: MetricSnapshot,
}

impl SnapshotBuilder {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            inner: MetricSnapshot {
                node: node.into(),
                timestamp: Utc::now(),
                ..MetricSnapshot::default()
            },
        }
    }

    pub fn process(&mut self, process: ProcessInfo) -> &mut Self {
        self.inner.process = Some(process);
        self
    }

    pub fn disk(&mut self, disks: Vec<DiskInfo>) -> &mut Self {
        self.inner.disk = Some(disks);
        self
    }

    pub fn sys(&mut self, sys: SystemSummary) -> &mut Self {
        self.inner.sys = Some(sys);
        self
    }

    pub fn sys_file(&mut self, stores: Vec<FileStore>) -> &mut Self {
        self.inner.sys_file = Some(stores);
        self
    }

    pub fn memory(&mut self, memory: RuntimeMemory) -> &mut Self {
        self.inner.memory = Some(memory);
        self
    }

    pub fn thread(&mut self, thread: ThreadInfo) -> &mut Self {
        self.inner.thread = Some(thread);
        self
    }

    pub fn gc(&mut self, gc: Vec<GcInfo>) -> &mut Self {
        self.inner.gc = Some(gc);
        self
    }

    pub fn port(&mut self, ports: Vec<PortState>) -> &mut Self {
        self.inner.port = Some(ports);
        self
    }

    pub fn cpu(&mut self, cpu: CpuUsage) -> &mut Self {
        self.inner.cpu = Some(cpu);
        self
    }

    pub fn disk_io(&mut self, rates: Vec<DiskIoRate>) -> &mut Self {
        self.inner.disk_io = Some(rates);
        self
    }

    pub fn network(&mut self, rates: Vec<NetIfRate>) -> &mut Self {
        self.inner.network = Some(rates);
        self
    }

    /// Freeze into an immutable snapshot
    pub fn build(self) -> MetricSnapshot {
        self.inner
    }
}
