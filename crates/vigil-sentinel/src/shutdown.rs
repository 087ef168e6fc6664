//! Shutdown listeners
//!
//! Listeners run when the scheduler stops. They are fail-open: an error or a
//! panic in one listener is logged and the remaining listeners still run.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};
use vigil_core::Result;

/// Callback invoked once per scheduler stop
#[async_trait]
pub trait ShutdownListener: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn on_shutdown(&self) -> Result<()>;
}

/// How one listener ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOutcome {
    pub name: String,
    /// Failure description, `None` on success
    pub error: Option<String>,
}

impl ListenerOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered set of shutdown listeners
#[derive(Default, Clone)]
pub struct ShutdownPipeline {
    listeners: Vec<Arc<dyn ShutdownListener>>,
}

impl ShutdownPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn ShutdownListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Run every listener in registration order (fail-open)
    pub async fn run_all(&self) -> Vec<ListenerOutcome> {
        let mut outcomes = Vec::with_capacity(self.listeners.len());

        for listener in &self.listeners {
            let name = listener.name().to_string();
            let result = AssertUnwindSafe(listener.on_shutdown()).catch_unwind().await;

            let error = match result {
                Ok(Ok(())) => {
                    info!("Shutdown listener '{}' finished", name);
                    None
                }
                Ok(Err(e)) => {
                    warn!("Shutdown listener '{}' failed (continuing): {}", name, e);
                    Some(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!("Shutdown listener '{}' panicked (continuing): {}", name, message);
                    Some(message)
                }
            };

            outcomes.push(ListenerOutcome { name, error });
        }

        outcomes
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
