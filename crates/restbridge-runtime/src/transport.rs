use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use restbridge_common::TransportStatus;
use thiserror::Error;

use crate::request::Headers;

/// HTTP verb for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Snapshot of everything a worker needs to perform one operation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Failure to obtain any response at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn status(&self) -> TransportStatus {
        match self {
            TransportError::Timeout(_) => TransportStatus::TimedOut,
            TransportError::Connect(_) | TransportError::Other(_) => TransportStatus::Failed,
        }
    }
}

pub type TransportResult = std::result::Result<HttpResponse, TransportError>;
pub type TransportFuture = Pin<Box<dyn Future<Output = TransportResult> + Send>>;

/// The wire side of the bridge. Futures run on the engine's worker pool,
/// never on the VM thread.
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> TransportFuture;
}

// ============================================================================
// reqwest
// ============================================================================

/// Transport backed by a shared async `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> TransportFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let mut builder = match request.method {
                Method::Get => client.get(&request.url),
                Method::Post => client.post(&request.url),
            };
            builder = builder.timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(classify)?;
            Ok(HttpResponse { status, body })
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

// ============================================================================
// Mock transport (for testing)
// ============================================================================

type Responder = dyn Fn(&HttpRequest) -> TransportResult + Send + Sync;

/// A transport that answers from a closure, optionally after a delay.
/// Used in tests and for offline runs.
#[derive(Clone)]
pub struct MockTransport {
    responder: Arc<Responder>,
    delay: Option<Duration>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("delay", &self.delay)
            .finish()
    }
}

impl MockTransport {
    pub fn new(responder: impl Fn(&HttpRequest) -> TransportResult + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            delay: None,
        }
    }

    /// Always answer `status` with `body`.
    pub fn fixed(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |_| {
            Ok(HttpResponse {
                status,
                body: body.clone(),
            })
        })
    }

    /// Echo the method, URL, headers and body back as a JSON object.
    pub fn echo() -> Self {
        Self::new(|request| {
            let body = serde_json::json!({
                "method": request.method.as_str(),
                "url": request.url,
                "headers": request.headers,
                "body": request.body,
            });
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: HttpRequest) -> TransportFuture {
        let responder = Arc::clone(&self.responder);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                if delay > request.timeout {
                    tokio::time::sleep(request.timeout).await;
                    return Err(TransportError::Timeout(format!(
                        "no response within {:?}",
                        request.timeout
                    )));
                }
                tokio::time::sleep(delay).await;
            }
            responder(&request)
        })
    }
}
