//! # vigil-export
//!
//! Delivery of metric snapshots to monitoring backends.
//!
//! - [`CircuitBreaker`]: per-destination quick-fail gate
//! - [`HttpTransport`]: the network seam, with a reqwest implementation and
//!   a scripted mock
//! - [`JsonExporter`] and [`RemoteWriteExporter`]: one encoder per wire format
//! - [`ExporterRegistry`]: binds subscribers to exporters and gates every
//!   attempt through the breaker

mod circuit_breaker;
mod http;
mod registry;
pub mod remote_write;
mod transport;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker};
pub use http::JsonExporter;
pub use registry::{Destination, ExportOutcome, Exporter, ExporterRegistry};
pub use remote_write::RemoteWriteExporter;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, MockOutcome, MockTransport, ReqwestTransport};
