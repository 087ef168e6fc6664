//! Exporter registry and breaker-gated delivery
//!
//! Each subscriber is bound to the exporter for its wire format once, when a
//! job is configured. The resulting [`Destination`] owns everything needed to
//! deliver a snapshot: the exporter, the transport and the shared breaker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use vigil_core::{Result, Subscriber, SubscriberKind, VigilError};
use vigil_metrics::MetricSnapshot;

use crate::circuit_breaker::CircuitBreaker;
use crate::http::JsonExporter;
use crate::remote_write::RemoteWriteExporter;
use crate::transport::{HttpRequest, HttpTransport};

/// One wire format
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Subscriber type this exporter serves
    fn kind(&self) -> SubscriberKind;

    /// Encode `snapshot` into a request for `subscriber`
    fn encode(&self, subscriber: &Subscriber, snapshot: &MetricSnapshot) -> Result<HttpRequest>;

    /// Encode and send. Any non-2xx response is an error.
    async fn export(
        &self,
        transport: &dyn HttpTransport,
        subscriber: &Subscriber,
        snapshot: &MetricSnapshot,
    ) -> Result<()> {
        let request = self.encode(subscriber, snapshot)?;
        let response = transport.post(&request).await?;
        if !response.is_success() {
            return Err(VigilError::HttpStatus {
                url: request.url,
                status: response.status,
            });
        }
        Ok(())
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Delivered,
    /// The breaker denied the attempt; nothing was sent
    Skipped,
    Failed,
}

/// Exporters by subscriber type, sharing one transport and one breaker
pub struct ExporterRegistry {
    exporters: HashMap<SubscriberKind, Arc<dyn Exporter>>,
    transport: Arc<dyn HttpTransport>,
    breaker: Arc<CircuitBreaker>,
}

impl ExporterRegistry {
    /// Registry with the JSON and remote-write exporters installed
    pub fn new(transport: Arc<dyn HttpTransport>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            exporters: HashMap::new(),
            transport,
            breaker,
        }
        .with_exporter(Arc::new(JsonExporter))
        .with_exporter(Arc::new(RemoteWriteExporter))
    }

    /// Install `exporter`, replacing any exporter of the same kind
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.insert(exporter.kind(), exporter);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Resolve the exporter for `subscriber`
    pub fn bind(&self, subscriber: &Subscriber) -> Result<Destination> {
        let exporter = self.exporters.get(&subscriber.kind).cloned().ok_or_else(|| {
            VigilError::Config(format!(
                "No exporter registered for subscriber type '{}' ({})",
                subscriber.kind, subscriber.url
            ))
        })?;

        Ok(Destination {
            subscriber: Arc::new(subscriber.clone()),
            exporter,
            transport: self.transport.clone(),
            breaker: self.breaker.clone(),
        })
    }

    /// Bind every subscriber, failing on the first unsupported one
    pub fn bind_all(&self, subscribers: &[Subscriber]) -> Result<Vec<Destination>> {
        subscribers.iter().map(|s| self.bind(s)).collect()
    }
}

/// A subscriber bound to its exporter
#[derive(Clone)]
pub struct Destination {
    subscriber: Arc<Subscriber>,
    exporter: Arc<dyn Exporter>,
    transport: Arc<dyn HttpTransport>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("url", &self.subscriber.url)
            .field("kind", &self.subscriber.kind)
            .finish()
    }
}

/// Reports the attempt to the breaker when dropped, however it ended
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    key: &'a str,
    success: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        self.breaker.result(self.key, self.success);
    }
}

impl Destination {
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Breaker key for this destination
    pub fn key(&self) -> &str {
        self.subscriber.destination_key()
    }

    /// Deliver `snapshot` unless the breaker is open for this destination
    pub async fn export(&self, snapshot: &MetricSnapshot) -> ExportOutcome {
        let key = self.key();
        if !self.breaker.check(key) {
            debug!("Skipping {}: circuit open", key);
            return ExportOutcome::Skipped;
        }

        let mut attempt = Attempt {
            breaker: &self.breaker,
            key,
            success: false,
        };

        match self
            .exporter
            .export(self.transport.as_ref(), &self.subscriber, snapshot)
            .await
        {
            Ok(()) => {
                attempt.success = true;
                debug!("Exported {} snapshot to {}", self.subscriber.kind, key);
                ExportOutcome::Delivered
            }
            Err(e) if e.is_connectivity() => {
                warn!("Can not connect monitor subscriber '{}': {}", key, e);
                ExportOutcome::Failed
            }
            Err(e) => {
                error!("Export to {} failed: {}", key, e);
                ExportOutcome::Failed
            }
        }
    }
}
