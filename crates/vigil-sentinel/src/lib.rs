//! # vigil-sentinel
//!
//! Drives independently configured sentinel jobs off one shared timer.
//! Each due job collects a snapshot through the sampler and fans it out to
//! its subscribers through the exporter registry.

mod job;
mod scheduler;
mod shutdown;

pub use job::{JobStatus, RunClaim, SentinelJob};
pub use scheduler::{SchedulerContext, StartReport, TaskScheduler};
pub use shutdown::{ListenerOutcome, ShutdownListener, ShutdownPipeline};
