//! HTTP transport abstraction

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument};
use vigil_core::{Result, VigilError};

/// A fully encoded POST request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response to a POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for sending requests (allows mocking in tests)
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `request` and return the response, whatever its status.
    ///
    /// Errors are reserved for requests that produced no response at all.
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Real transport over a shared reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VigilError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(url = %request.url, bytes = request.body.len()))]
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                VigilError::Connect {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            } else {
                VigilError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!("POST {} -> {}", request.url, status);

        Ok(HttpResponse { status, body })
    }
}

/// Scripted behavior of a [`MockTransport`] destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Respond with this status
    Status(u16),
    /// Fail as if the connection was refused
    Refused,
    /// Respond with the status once the delay has passed
    Delayed(Duration, u16),
    /// Never respond
    Hang,
}

/// Mock transport for testing
///
/// Records every request it is given and answers per URL. URLs without a
/// scripted outcome get `200`.
#[derive(Default)]
pub struct MockTransport {
    requests: Mutex<Vec<HttpRequest>>,
    outcomes: Mutex<HashMap<String, MockOutcome>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, url: &str, outcome: MockOutcome) -> Self {
        self.set_outcome(url, outcome);
        self
    }

    /// Change the outcome for `url` from now on
    pub fn set_outcome(&self, url: &str, outcome: MockOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.insert(url.to_string(), outcome);
        }
    }

    /// Every request seen so far, in arrival order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Requests seen for `url`
    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }

    fn outcome_for(&self, url: &str) -> MockOutcome {
        self.outcomes
            .lock()
            .ok()
            .and_then(|o| o.get(url).copied())
            .unwrap_or(MockOutcome::Status(200))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match self.outcome_for(&request.url) {
            MockOutcome::Status(status) => Ok(HttpResponse {
                status,
                body: String::new(),
            }),
            MockOutcome::Refused => Err(VigilError::Connect {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            }),
            MockOutcome::Delayed(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse {
                    status,
                    body: String::new(),
                })
            }
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}
