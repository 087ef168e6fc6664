//! # vigil-core
//!
//! Shared building blocks for the vigil monitoring pipeline.
//!
//! - A unified error type ([`VigilError`]) used by every crate in the workspace
//! - Domain types describing what to collect and where to send it
//!   ([`MetricKind`], [`Subscriber`], [`SentinelConf`])
//! - File-backed configuration ([`VigilConfig`])

mod config;
mod error;
mod types;

pub use config::{
    BreakerConfig, HttpConfig, LogConfig, SamplingConfig, SchedulerConfig, VigilConfig,
};
pub use error::{Result, VigilError};
pub use types::*;
