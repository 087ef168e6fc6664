//! # vigil-metrics
//!
//! Metric sampling for vigil.
//!
//! This crate provides:
//! - The [`MetricsProvider`] seam for raw OS/runtime readings, with a
//!   Linux procfs implementation
//! - Rate computation from paired counter readings
//! - [`PendingJoin`], an exactly-once scatter-gather join
//! - [`MetricSampler`], which assembles one immutable [`MetricSnapshot`]
//!   from synchronous and delayed readings

mod join;
mod procfs;
mod provider;
mod rate;
mod sampler;
mod snapshot;

pub use join::PendingJoin;
pub use procfs::ProcfsProvider;
pub use provider::*;
pub use rate::{counter_delta, cpu_usage, disk_rates, network_rates, per_second};
pub use sampler::{MetricSampler, SAMPLING_DELAY};
pub use snapshot::*;
