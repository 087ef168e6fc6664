//! JSON-over-HTTP exporter

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use vigil_core::{AuthOption, Result, Subscriber, SubscriberKind, VigilError};
use vigil_metrics::MetricSnapshot;

use crate::registry::Exporter;
use crate::transport::HttpRequest;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// `Authorization` header value for basic-auth credentials
pub(crate) fn basic_auth(auth: &AuthOption) -> String {
    let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    format!("Basic {}", token)
}

/// Add the subscriber's credentials, if enabled
pub(crate) fn with_auth(request: HttpRequest, subscriber: &Subscriber) -> HttpRequest {
    match subscriber.enabled_auth() {
        Some(auth) => request.with_header("Authorization", basic_auth(auth)),
        None => request,
    }
}

/// POSTs the snapshot as a JSON document
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn kind(&self) -> SubscriberKind {
        SubscriberKind::Http
    }

    fn encode(&self, subscriber: &Subscriber, snapshot: &MetricSnapshot) -> Result<HttpRequest> {
        let body = serde_json::to_vec(snapshot)
            .map_err(|e| VigilError::Encoding(format!("snapshot to JSON: {}", e)))?;

        let request = HttpRequest::post(&subscriber.url)
            .with_header("Content-Type", JSON_CONTENT_TYPE)
            .with_body(body);
        Ok(with_auth(request, subscriber))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_metrics::{CpuUsage, SnapshotBuilder};

    fn snapshot() -> MetricSnapshot {
        let mut builder = SnapshotBuilder::new("node-a");
        builder.cpu(CpuUsage {
            cpu_num: 4,
            user: 0.25,
            idle: 0.75,
            ..CpuUsage::default()
        });
        builder.build()
    }

    #[test]
    fn test_encode_json_body() {
        let subscriber = Subscriber::new("http://127.0.0.1:8080/monitor", SubscriberKind::Http);
        let request = JsonExporter.encode(&subscriber, &snapshot()).unwrap();

        assert_eq!(request.url, "http://127.0.0.1:8080/monitor");
        assert_eq!(request.header("Content-Type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(request.header("Authorization"), None);

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["node"], "node-a");
        assert_eq!(body["cpu"]["user"], 0.25);
    }

    #[test]
    fn test_basic_auth_only_when_enabled() {
        let subscriber = Subscriber::new("http://x", SubscriberKind::Http).with_basic_auth("u", "p");
        let request = JsonExporter.encode(&subscriber, &snapshot()).unwrap();
        // base64("u:p")
        assert_eq!(request.header("Authorization"), Some("Basic dTpw"));

        let mut disabled = subscriber.clone();
        if let Some(auth) = disabled.auth.as_mut() {
            auth.enable = false;
        }
        let request = JsonExporter.encode(&disabled, &snapshot()).unwrap();
        assert_eq!(request.header("Authorization"), None);
    }
}
