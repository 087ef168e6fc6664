//! Remote-write exporter
//!
//! Encodes a snapshot as a protobuf `WriteRequest` holding one metadata
//! record and one single-sample time series, then snappy-compresses it.
//! The message types below are the subset of the remote-write protocol the
//! exporter emits, with the upstream field numbers.

use chrono::Utc;
use vigil_core::{Result, Subscriber, SubscriberKind, VigilError};
use vigil_metrics::MetricSnapshot;

use crate::http::with_auth;
use crate::registry::Exporter;
use crate::transport::HttpRequest;

pub const CONTENT_TYPE: &str = "application/x-protobuf";
pub const CONTENT_ENCODING: &str = "snappy";
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Help text attached to every metric family
const HELP: &str = "helper";

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetricMetadata>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the Unix epoch
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetricMetadata {
    #[prost(enumeration = "MetricType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub metric_family_name: String,
    #[prost(string, tag = "4")]
    pub help: String,
    #[prost(string, tag = "5")]
    pub unit: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Counter = 1,
    Gauge = 2,
    Histogram = 3,
    GaugeHistogram = 4,
    Summary = 5,
    Info = 6,
    Stateset = 7,
}

/// Build the write request for `snapshot`, with the sample stamped at
/// `timestamp_ms` (milliseconds since the Unix epoch)
pub fn write_request(snapshot: &MetricSnapshot, timestamp_ms: i64) -> WriteRequest {
    WriteRequest {
        metadata: vec![MetricMetadata {
            r#type: MetricType::Unknown as i32,
            metric_family_name: snapshot.node.clone(),
            help: HELP.to_string(),
            unit: String::new(),
        }],
        timeseries: vec![TimeSeries {
            labels: vec![Label {
                name: "__name__".to_string(),
                value: snapshot.node.clone(),
            }],
            samples: vec![Sample {
                value: snapshot.headline_value(),
                timestamp: timestamp_ms,
            }],
        }],
    }
}

/// Serialize and compress a write request
pub fn encode_compressed(request: &WriteRequest) -> Result<Vec<u8>> {
    let raw = prost::Message::encode_to_vec(request);
    snap::raw::Encoder::new()
        .compress_vec(&raw)
        .map_err(|e| VigilError::Encoding(format!("snappy compression: {}", e)))
}

/// POSTs the snapshot in the remote-write wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWriteExporter;

impl Exporter for RemoteWriteExporter {
    fn kind(&self) -> SubscriberKind {
        SubscriberKind::Prometheus
    }

    fn encode(&self, subscriber: &Subscriber, snapshot: &MetricSnapshot) -> Result<HttpRequest> {
        // Stamped at send time, not at capture time
        let body = encode_compressed(&write_request(snapshot, Utc::now().timestamp_millis()))?;

        let request = HttpRequest::post(&subscriber.url)
            .with_header("Content-Encoding", CONTENT_ENCODING)
            .with_header("Content-Type", CONTENT_TYPE)
            .with_header("X-Prometheus-Remote-Write-Version", PROTOCOL_VERSION)
            .with_body(body);
        Ok(with_auth(request, subscriber))
    }
}
