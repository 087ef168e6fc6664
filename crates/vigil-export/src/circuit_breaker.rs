//! Per-destination circuit breaker
//!
//! Stops repeated network calls to a destination that keeps failing and lets
//! it back in once a cooldown has passed.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_core::BreakerConfig;

/// Observable state of one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Fewer consecutive failures than the threshold
    Closed,
    /// Threshold reached and the cooldown is still running
    Open,
    /// Threshold reached but the cooldown has elapsed; the next attempt decides
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Default)]
struct CircuitState {
    failures: u32,
    open_until: Option<Instant>,
}

/// Quick-fail manager keyed by destination
///
/// # States
///
/// - **Closed**: attempts allowed
/// - **Open**: `threshold` consecutive failures; attempts denied until the
///   cooldown elapses
/// - **HalfOpen**: cooldown elapsed; attempts allowed, and one more failure
///   reopens the circuit immediately
///
/// State is created lazily on the first `check` of a key and kept for the
/// life of the breaker.
pub struct CircuitBreaker {
    circuits: DashMap<String, CircuitState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures and
    /// stays open for `cooldown`
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether an attempt against `key` may proceed.
    ///
    /// Does not change the failure count or the open window.
    pub fn check(&self, key: &str) -> bool {
        let state = *self.circuits.entry(key.to_string()).or_default();
        match state.open_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Record the outcome of an attempt allowed by [`check`](Self::check)
    pub fn result(&self, key: &str, success: bool) {
        let mut state = self.circuits.entry(key.to_string()).or_default();

        if success {
            if state.failures > 0 {
                debug!("Destination {} recovered after {} failures", key, state.failures);
            }
            state.failures = 0;
            state.open_until = None;
            return;
        }

        state.failures = state.failures.saturating_add(1);
        if state.failures >= self.threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            warn!(
                "Circuit open for {} after {} consecutive failures, retry in {:?}",
                key, state.failures, self.cooldown
            );
        }
    }

    /// Current status of `key`; unknown keys are closed
    pub fn state(&self, key: &str) -> BreakerStatus {
        let Some(state) = self.circuits.get(key).map(|s| *s) else {
            return BreakerStatus::Closed;
        };

        if state.failures < self.threshold {
            return BreakerStatus::Closed;
        }
        match state.open_until {
            Some(until) if Instant::now() < until => BreakerStatus::Open,
            _ => BreakerStatus::HalfOpen,
        }
    }

    /// Consecutive failures recorded for `key`
    pub fn failure_count(&self, key: &str) -> u32 {
        self.circuits.get(key).map(|s| s.failures).unwrap_or(0)
    }

    /// Time until `key` is allowed again, zero if it is not open
    pub fn time_until_retry(&self, key: &str) -> Duration {
        self.circuits
            .get(key)
            .and_then(|s| s.open_until)
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}
