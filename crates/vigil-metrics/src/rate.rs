//! Rate computation from paired counter readings
//!
//! All functions here are pure: they take the reading at t0, the reading at
//! t1 and the elapsed time between them.

use std::collections::HashMap;
use std::time::Duration;

use crate::provider::{CpuTicks, DiskCounters, NetCounters};
use crate::snapshot::{CpuUsage, DiskIoRate, NetIfRate};

/// Growth of a cumulative counter; a counter that went backwards yields 0
pub fn counter_delta(r0: u64, r1: u64) -> u64 {
    r1.saturating_sub(r0)
}

/// Convert a delta over `elapsed` into a per-second rate.
///
/// A zero window is treated as one second.
pub fn per_second(delta: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        delta as f64 / secs
    } else {
        delta as f64
    }
}

/// CPU utilization between two tick readings.
///
/// When no ticks elapsed at all the denominator is forced to 1, so every
/// ratio comes out as 0 instead of NaN.
pub fn cpu_usage(prev: &CpuTicks, curr: &CpuTicks, cpu_num: usize) -> CpuUsage {
    let delta = CpuTicks {
        user: counter_delta(prev.user, curr.user),
        nice: counter_delta(prev.nice, curr.nice),
        system: counter_delta(prev.system, curr.system),
        idle: counter_delta(prev.idle, curr.idle),
        iowait: counter_delta(prev.iowait, curr.iowait),
        irq: counter_delta(prev.irq, curr.irq),
        softirq: counter_delta(prev.softirq, curr.softirq),
        steal: counter_delta(prev.steal, curr.steal),
    };

    let total = match delta.total() {
        0 => 1,
        total => total,
    } as f64;

    CpuUsage {
        cpu_num,
        sys: delta.system as f64 / total,
        user: delta.user as f64 / total,
        io_wait: delta.iowait as f64 / total,
        idle: delta.idle as f64 / total,
    }
}

/// Strip path separators and dots from a device name
fn normalize_disk_name(name: &str) -> String {
    name.chars().filter(|c| *c != '\\' && *c != '.').collect()
}

/// Per-device I/O rates. Devices missing from either reading are dropped.
pub fn disk_rates(prev: &[DiskCounters], curr: &[DiskCounters], elapsed: Duration) -> Vec<DiskIoRate> {
    let before: HashMap<&str, &DiskCounters> = prev.iter().map(|d| (d.name.as_str(), d)).collect();

    curr.iter()
        .filter_map(|now| {
            let then = before.get(now.name.as_str())?;
            Some(DiskIoRate {
                name: normalize_disk_name(&now.name),
                queue_length: now.queue_length,
                read_per_second: per_second(counter_delta(then.reads, now.reads), elapsed),
                read_bytes_per_second: per_second(
                    counter_delta(then.read_bytes, now.read_bytes),
                    elapsed,
                ),
                write_per_second: per_second(counter_delta(then.writes, now.writes), elapsed),
                write_bytes_per_second: per_second(
                    counter_delta(then.write_bytes, now.write_bytes),
                    elapsed,
                ),
            })
        })
        .collect()
}

/// Per-interface throughput. Interfaces missing from either reading are dropped.
pub fn network_rates(prev: &[NetCounters], curr: &[NetCounters], elapsed: Duration) -> Vec<NetIfRate> {
    let before: HashMap<&str, &NetCounters> = prev.iter().map(|n| (n.name.as_str(), n)).collect();

    curr.iter()
        .filter_map(|now| {
            let then = before.get(now.name.as_str())?;
            Some(NetIfRate {
                name: now.name.clone(),
                recv_bytes: now.recv_bytes,
                recv_count: now.recv_packets,
                sent_bytes: now.sent_bytes,
                sent_count: now.sent_packets,
                recv_bytes_per_second: per_second(
                    counter_delta(then.recv_bytes, now.recv_bytes),
                    elapsed,
                ),
                sent_bytes_per_second: per_second(
                    counter_delta(then.sent_bytes, now.sent_bytes),
                    elapsed,
                ),
            })
        })
        .collect()
}
