//! Linux procfs provider
//!
//! Reads raw counters from the text files under `/proc`. The root is
//! configurable so the parsers can be pointed at a fixture tree.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::trace;
use vigil_core::{Result, VigilError};

use crate::provider::{
    CpuTicks, DiskCounters, DiskInfo, FileStore, LoadAverage, MetricsProvider, NetCounters,
    PortState, ProcessInfo, RuntimeMemory, SystemMemory, ThreadInfo,
};

const SECTOR_SIZE: u64 = 512;
const KIB: u64 = 1024;
/// `st` column value of a listening socket in /proc/net/tcp
const TCP_LISTEN: &str = "0A";

/// [`MetricsProvider`] backed by procfs
#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
}

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsProvider {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }

    /// Read from `root` instead of `/proc`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, relative: &str) -> Result<String> {
        let path = self.root.join(relative);
        trace!("Reading {}", path.display());
        std::fs::read_to_string(&path)
            .map_err(|e| VigilError::Provider(format!("reading {}: {}", path.display(), e)))
    }
}

impl MetricsProvider for ProcfsProvider {
    fn cpu_ticks(&self) -> Result<CpuTicks> {
        parse_cpu_ticks(&self.read("stat")?)
    }

    fn cpu_count(&self) -> Result<usize> {
        parse_cpu_count(&self.read("stat")?)
    }

    fn disk_counters(&self) -> Result<Vec<DiskCounters>> {
        Ok(parse_diskstats(&self.read("diskstats")?))
    }

    fn net_counters(&self) -> Result<Vec<NetCounters>> {
        Ok(parse_net_dev(&self.read("net/dev")?))
    }

    fn load_average(&self) -> Result<LoadAverage> {
        parse_loadavg(&self.read("loadavg")?)
    }

    fn system_memory(&self) -> Result<SystemMemory> {
        let fields = parse_key_values(&self.read("meminfo")?);
        let kib = |key: &str| fields.get(key).copied().unwrap_or(0) * KIB;
        Ok(SystemMemory {
            total: kib("MemTotal"),
            free: kib("MemFree"),
            available: kib("MemAvailable"),
            buffers: kib("Buffers"),
            cached: kib("Cached"),
            swap_total: kib("SwapTotal"),
            swap_free: kib("SwapFree"),
        })
    }

    fn disks(&self) -> Result<Vec<DiskInfo>> {
        Ok(parse_partitions(&self.read("partitions")?))
    }

    fn file_stores(&self) -> Result<Vec<FileStore>> {
        Ok(parse_mounts(&self.read("mounts")?))
    }

    fn process(&self) -> Result<ProcessInfo> {
        Ok(ProcessInfo {
            pid: std::process::id(),
            name: self.read("self/comm")?.trim().to_string(),
        })
    }

    fn runtime_memory(&self) -> Result<RuntimeMemory> {
        let fields = parse_key_values(&self.read("self/status")?);
        let kib = |key: &str| fields.get(key).copied().unwrap_or(0) * KIB;
        Ok(RuntimeMemory {
            rss_bytes: kib("VmRSS"),
            virtual_bytes: kib("VmSize"),
            peak_virtual_bytes: kib("VmPeak"),
        })
    }

    fn threads(&self) -> Result<ThreadInfo> {
        let fields = parse_key_values(&self.read("self/status")?);
        let count = fields
            .get("Threads")
            .copied()
            .ok_or_else(|| VigilError::Provider("status has no Threads line".to_string()))?;
        Ok(ThreadInfo {
            count,
            voluntary_switches: fields.get("voluntary_ctxt_switches").copied().unwrap_or(0),
            involuntary_switches: fields
                .get("nonvoluntary_ctxt_switches")
                .copied()
                .unwrap_or(0),
        })
    }

    fn port_states(&self, ports: &[u16]) -> Result<Vec<PortState>> {
        let mut listening = parse_listening_ports(&self.read("net/tcp")?);
        // tcp6 is absent when IPv6 is disabled
        match self.read("net/tcp6") {
            Ok(tcp6) => listening.extend(parse_listening_ports(&tcp6)),
            Err(e) => trace!("Skipping IPv6 sockets: {}", e),
        }

        Ok(ports
            .iter()
            .map(|&port| PortState {
                port,
                listening: listening.contains(&port),
            })
            .collect())
    }
}

fn parse_u64(field: Option<&str>) -> u64 {
    field.and_then(|f| f.parse().ok()).unwrap_or(0)
}

/// Aggregate `cpu` line of /proc/stat
pub(crate) fn parse_cpu_ticks(stat: &str) -> Result<CpuTicks> {
    let line = stat
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| VigilError::Provider("stat has no aggregate cpu line".to_string()))?;

    let mut fields = line.split_whitespace().skip(1);
    let mut next = || parse_u64(fields.next());
    Ok(CpuTicks {
        user: next(),
        nice: next(),
        system: next(),
        idle: next(),
        iowait: next(),
        irq: next(),
        softirq: next(),
        steal: next(),
    })
}

/// Number of `cpuN` lines in /proc/stat
pub(crate) fn parse_cpu_count(stat: &str) -> Result<usize> {
    let count = stat
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|name| {
            name.strip_prefix("cpu")
                .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
        .count();
    if count == 0 {
        return Err(VigilError::Provider("stat lists no cpus".to_string()));
    }
    Ok(count)
}

/// /proc/diskstats rows
pub(crate) fn parse_diskstats(diskstats: &str) -> Vec<DiskCounters> {
    diskstats
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 12 {
                return None;
            }
            let at = |i: usize| parse_u64(fields.get(i).copied());
            Some(DiskCounters {
                name: fields[2].to_string(),
                reads: at(3),
                read_bytes: at(5) * SECTOR_SIZE,
                writes: at(7),
                write_bytes: at(9) * SECTOR_SIZE,
                queue_length: at(11),
            })
        })
        .collect()
}

/// /proc/partitions rows; sizes are given in 1 KiB blocks
pub(crate) fn parse_partitions(partitions: &str) -> Vec<DiskInfo> {
    partitions
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return None;
            }
            let blocks: u64 = fields[2].parse().ok()?;
            Some(DiskInfo {
                name: fields[3].to_string(),
                size_bytes: blocks * KIB,
            })
        })
        .collect()
}

/// /proc/net/dev rows, skipping the two header lines
pub(crate) fn parse_net_dev(net_dev: &str) -> Vec<NetCounters> {
    net_dev
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let at = |i: usize| parse_u64(fields.get(i).copied());
            Some(NetCounters {
                name: name.trim().to_string(),
                recv_bytes: at(0),
                recv_packets: at(1),
                sent_bytes: at(8),
                sent_packets: at(9),
            })
        })
        .collect()
}

/// /proc/loadavg. Linux has no separate instant reading, so both fields carry
/// the one-minute average.
pub(crate) fn parse_loadavg(loadavg: &str) -> Result<LoadAverage> {
    let one_minute: f64 = loadavg
        .split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| VigilError::Provider(format!("malformed loadavg: {:?}", loadavg.trim())))?;
    Ok(LoadAverage {
        instant: one_minute,
        one_minute,
    })
}

/// /proc/mounts rows backed by a device node
pub(crate) fn parse_mounts(mounts: &str) -> Vec<FileStore> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount = fields.next()?;
            let fs_type = fields.next()?;
            if !device.starts_with('/') {
                return None;
            }
            Some(FileStore {
                name: device.to_string(),
                mount: mount.replace("\\040", " "),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Local ports of listening sockets in a /proc/net/tcp or tcp6 table.
/// Addresses are `hexaddr:hexport`.
pub(crate) fn parse_listening_ports(table: &str) -> HashSet<u16> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[3] != TCP_LISTEN {
                return None;
            }
            let (_, port) = fields[1].rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

/// `Key: value [unit]` files such as meminfo and status. Values are the
/// leading integer; lines without one are skipped.
pub(crate) fn parse_key_values(text: &str) -> HashMap<String, u64> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}
