//! Raw-reading provider seam
//!
//! The sampler never talks to the OS directly. Everything it needs comes
//! through [`MetricsProvider`], which returns raw counters and figures.
//! Rate metrics are derived from two calls to the same reading.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use vigil_core::{MetricKind, Result, VigilError};

/// Cumulative CPU ticks per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    /// Sum over all categories
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    fn scaled(&self, factor: u64) -> Self {
        Self {
            user: self.user * factor,
            nice: self.nice * factor,
            system: self.system * factor,
            idle: self.idle * factor,
            iowait: self.iowait * factor,
            irq: self.irq * factor,
            softirq: self.softirq * factor,
            steal: self.steal * factor,
        }
    }
}

/// Cumulative counters for one block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCounters {
    pub name: String,
    pub reads: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub queue_length: u64,
}

/// Cumulative counters for one network interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub name: String,
    pub recv_bytes: u64,
    pub recv_packets: u64,
    pub sent_bytes: u64,
    pub sent_packets: u64,
}

/// Load-average readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    /// Preferred reading; negative when unsupported on this platform
    pub instant: f64,
    /// Platform one-minute load average
    pub one_minute: f64,
}

impl LoadAverage {
    /// The instant reading, or the one-minute value when it is unsupported
    pub fn effective(&self) -> f64 {
        if self.instant >= 0.0 {
            self.instant
        } else {
            self.one_minute
        }
    }
}

/// System-wide memory, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMemory {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Static description of a block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub name: String,
    pub size_bytes: u64,
}

/// One mounted file store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStore {
    pub name: String,
    pub mount: String,
    pub fs_type: String,
}

/// Identity of the monitored process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Memory held by the monitored process, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMemory {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub peak_virtual_bytes: u64,
}

/// Thread figures of the monitored process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub count: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
}

/// Figures for one garbage collector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcInfo {
    pub name: String,
    pub collections: u64,
    pub time_ms: u64,
}

/// Whether one TCP port has a listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortState {
    pub port: u16,
    pub listening: bool,
}

/// Source of raw readings.
///
/// Calls are synchronous and expected to be cheap (a file read or a syscall).
/// Any call may fail; the sampler fails the whole snapshot when one does.
pub trait MetricsProvider: Send + Sync {
    fn cpu_ticks(&self) -> Result<CpuTicks>;

    fn cpu_count(&self) -> Result<usize>;

    fn disk_counters(&self) -> Result<Vec<DiskCounters>>;

    fn net_counters(&self) -> Result<Vec<NetCounters>>;

    fn load_average(&self) -> Result<LoadAverage>;

    fn system_memory(&self) -> Result<SystemMemory>;

    fn disks(&self) -> Result<Vec<DiskInfo>>;

    fn file_stores(&self) -> Result<Vec<FileStore>>;

    fn process(&self) -> Result<ProcessInfo>;

    fn runtime_memory(&self) -> Result<RuntimeMemory>;

    fn threads(&self) -> Result<ThreadInfo>;

    /// Listening state of each of `ports`, in the order given
    fn port_states(&self, ports: &[u16]) -> Result<Vec<PortState>>;

    /// Collector figures; runtimes without a collector report none
    fn gc(&self) -> Result<Vec<GcInfo>> {
        Ok(Vec::new())
    }
}

/// Mock provider for testing
///
/// Counters grow by a fixed step on every read, so any two consecutive
/// readings yield a known delta. Individual metric kinds can be made to fail.
pub struct MockProvider {
    cpu_step: CpuTicks,
    disk_step: u64,
    net_step: u64,
    load: LoadAverage,
    listening: Vec<u16>,
    cpu_reads: AtomicU64,
    disk_reads: AtomicU64,
    net_reads: AtomicU64,
    failing: Mutex<Vec<MetricKind>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            cpu_step: CpuTicks {
                user: 30,
                system: 10,
                idle: 50,
                iowait: 10,
                ..CpuTicks::default()
            },
            disk_step: 100,
            net_step: 1000,
            load: LoadAverage {
                instant: 0.5,
                one_minute: 0.75,
            },
            listening: Vec::new(),
            cpu_reads: AtomicU64::new(0),
            disk_reads: AtomicU64::new(0),
            net_reads: AtomicU64::new(0),
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cpu_step(mut self, step: CpuTicks) -> Self {
        self.cpu_step = step;
        self
    }

    pub fn with_load(mut self, load: LoadAverage) -> Self {
        self.load = load;
        self
    }

    /// Ports reported as listening
    pub fn with_listening(mut self, ports: Vec<u16>) -> Self {
        self.listening = ports;
        self
    }

    /// Make every reading that backs `kind` fail
    pub fn fail(&self, kind: MetricKind) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(kind);
        }
    }

    /// Stop failing every kind
    pub fn recover(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Number of counter reads served so far
    pub fn reads(&self) -> u64 {
        self.cpu_reads.load(Ordering::SeqCst)
            + self.disk_reads.load(Ordering::SeqCst)
            + self.net_reads.load(Ordering::SeqCst)
    }

    fn guard(&self, kind: MetricKind) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&kind))
            .unwrap_or(false);
        if failing {
            Err(VigilError::Provider(format!("mock failure reading {}", kind)))
        } else {
            Ok(())
        }
    }

    fn next_read(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl MetricsProvider for MockProvider {
    fn cpu_ticks(&self) -> Result<CpuTicks> {
        self.guard(MetricKind::Cpu)?;
        Ok(self.cpu_step.scaled(Self::next_read(&self.cpu_reads)))
    }

    fn cpu_count(&self) -> Result<usize> {
        Ok(4)
    }

    fn disk_counters(&self) -> Result<Vec<DiskCounters>> {
        self.guard(MetricKind::DiskIo)?;
        let n = Self::next_read(&self.disk_reads);
        Ok(vec![DiskCounters {
            name: "sda".to_string(),
            reads: n * self.disk_step,
            read_bytes: n * self.disk_step * 512,
            writes: n * self.disk_step / 2,
            write_bytes: n * self.disk_step * 256,
            queue_length: 1,
        }])
    }

    fn net_counters(&self) -> Result<Vec<NetCounters>> {
        self.guard(MetricKind::Network)?;
        let n = Self::next_read(&self.net_reads);
        Ok(vec![NetCounters {
            name: "eth0".to_string(),
            recv_bytes: n * self.net_step,
            recv_packets: n * 10,
            sent_bytes: n * self.net_step / 2,
            sent_packets: n * 5,
        }])
    }

    fn load_average(&self) -> Result<LoadAverage> {
        self.guard(MetricKind::Sys)?;
        Ok(self.load)
    }

    fn system_memory(&self) -> Result<SystemMemory> {
        self.guard(MetricKind::Sys)?;
        Ok(SystemMemory {
            total: 8 << 30,
            free: 2 << 30,
            available: 4 << 30,
            ..SystemMemory::default()
        })
    }

    fn disks(&self) -> Result<Vec<DiskInfo>> {
        self.guard(MetricKind::Disk)?;
        Ok(vec![DiskInfo {
            name: "sda".to_string(),
            size_bytes: 256 << 30,
        }])
    }

    fn file_stores(&self) -> Result<Vec<FileStore>> {
        self.guard(MetricKind::SysFile)?;
        Ok(vec![FileStore {
            name: "/dev/sda1".to_string(),
            mount: "/".to_string(),
            fs_type: "ext4".to_string(),
        }])
    }

    fn process(&self) -> Result<ProcessInfo> {
        self.guard(MetricKind::Process)?;
        Ok(ProcessInfo {
            pid: 4242,
            name: "mock".to_string(),
        })
    }

    fn runtime_memory(&self) -> Result<RuntimeMemory> {
        self.guard(MetricKind::Memory)?;
        Ok(RuntimeMemory {
            rss_bytes: 64 << 20,
            virtual_bytes: 512 << 20,
            peak_virtual_bytes: 600 << 20,
        })
    }

    fn threads(&self) -> Result<ThreadInfo> {
        self.guard(MetricKind::Thread)?;
        Ok(ThreadInfo {
            count: 8,
            ..ThreadInfo::default()
        })
    }

    fn port_states(&self, ports: &[u16]) -> Result<Vec<PortState>> {
        self.guard(MetricKind::Port)?;
        Ok(ports
            .iter()
            .map(|&port| PortState {
                port,
                listening: self.listening.contains(&port),
            })
            .collect())
    }

    fn gc(&self) -> Result<Vec<GcInfo>> {
        self.guard(MetricKind::Gc)?;
        Ok(Vec::new())
    }
}
