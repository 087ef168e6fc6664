//! Sentinel job state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use vigil_core::{MetricKind, SentinelConf};
use vigil_export::Destination;

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub id: usize,
    /// Executions dispatched so far
    pub runs: u64,
    /// Execution limit, `None` when unbounded
    pub max_count: Option<u64>,
    pub interval: Duration,
    /// Time until the job is due again, zero when already due
    pub next_in: Duration,
    pub in_flight: bool,
}

/// One periodic monitoring task with its runtime state
///
/// The scheduler's tick scan reads `next_exec` while the job's own execution
/// path updates it, so it sits behind a lock; the run counter and in-flight
/// flag are atomics.
#[derive(Debug)]
pub struct SentinelJob {
    id: usize,
    tasks: Vec<MetricKind>,
    ports: Vec<u16>,
    destinations: Vec<Destination>,
    interval: Duration,
    max_count: Option<u64>,
    next_exec: Mutex<Instant>,
    runs: AtomicU64,
    in_flight: AtomicBool,
}

impl SentinelJob {
    /// Build a job that is due immediately at `now`
    pub fn new(id: usize, conf: &SentinelConf, destinations: Vec<Destination>, now: Instant) -> Self {
        let max_count = if conf.is_unbounded() {
            None
        } else {
            Some(conf.count as u64)
        };

        Self {
            id,
            tasks: conf.tasks.clone(),
            ports: conf.listened_ports.clone(),
            destinations,
            interval: Duration::from_secs(conf.interval),
            max_count,
            next_exec: Mutex::new(now),
            runs: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tasks(&self) -> &[MetricKind] {
        &self.tasks
    }

    /// Ports reported by the `port` task
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    pub fn next_exec(&self) -> Instant {
        *self.next_exec.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_exec()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the job for one execution. Returns `None` while a previous one
    /// is running; the claim is released when the returned guard drops, even
    /// if the execution panics.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunClaim> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunClaim { job: self.clone() })
    }

    /// Count one dispatched execution and return the new total
    pub fn record_dispatch(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether dispatch number `run` uses up the job's execution limit
    pub fn is_final_run(&self, run: u64) -> bool {
        self.max_count.map(|max| run >= max).unwrap_or(false)
    }

    /// Schedule the next execution one interval after `now`
    pub fn advance(&self, now: Instant) {
        *self.next_exec.lock().unwrap_or_else(|e| e.into_inner()) = now + self.interval;
    }

    pub fn status(&self, now: Instant) -> JobStatus {
        JobStatus {
            id: self.id,
            runs: self.runs(),
            max_count: self.max_count,
            interval: self.interval,
            next_in: self.next_exec().saturating_duration_since(now),
            in_flight: self.is_in_flight(),
        }
    }
}

/// Exclusive right to run a job once, held for the whole execution
#[derive(Debug)]
pub struct RunClaim {
    job: Arc<SentinelJob>,
}

impl RunClaim {
    pub fn job(&self) -> &Arc<SentinelJob> {
        &self.job
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.job.in_flight.store(false, Ordering::Release);
    }
}
