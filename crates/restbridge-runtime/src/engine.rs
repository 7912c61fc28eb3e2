use std::sync::Arc;
use std::time::Duration;

use restbridge_common::{BridgeSection, TransportStatus};
use tokio::runtime::Runtime;
use tracing::{debug, error, warn};

use crate::completion::{CompletionRecord, CompletionSender, OperationId, Payload, PayloadKind};
use crate::error::{BridgeError, Result};
use crate::node::Node;
use crate::request::{RequestId, RequestRegistry};
use crate::transport::{HttpRequest, Method, Transport, TransportResult};

const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Issues HTTP operations on a worker pool and turns each outcome into
/// exactly one [`CompletionRecord`].
///
/// Issuing never blocks the caller; workers talk back only through the
/// completion sender.
pub struct RequestEngine {
    runtime: Option<Runtime>,
    transport: Arc<dyn Transport>,
    registry: RequestRegistry,
    sender: CompletionSender,
    default_timeout: Duration,
    next_operation: OperationId,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("running", &self.runtime.is_some())
            .field("requests", &self.registry.len())
            .field("default_timeout", &self.default_timeout)
            .field("next_operation", &self.next_operation)
            .finish()
    }
}

impl RequestEngine {
    pub fn new(
        section: &BridgeSection,
        transport: Arc<dyn Transport>,
        sender: CompletionSender,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(section.worker_threads.max(1))
            .thread_name("restbridge-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
            transport,
            registry: RequestRegistry::new(),
            sender,
            default_timeout: Duration::from_millis(section.default_timeout_ms),
            next_operation: 0,
        })
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RequestRegistry {
        &mut self.registry
    }

    pub fn get(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        self.issue(request, Method::Get, path, None, callback, PayloadKind::Text)
    }

    pub fn post(
        &mut self,
        request: RequestId,
        path: &str,
        body: &str,
        callback: &str,
    ) -> Result<OperationId> {
        let body = Some((body.to_string(), TEXT_CONTENT_TYPE));
        self.issue(request, Method::Post, path, body, callback, PayloadKind::Text)
    }

    pub fn get_json(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        self.issue(request, Method::Get, path, None, callback, PayloadKind::Structured)
    }

    pub fn post_json(
        &mut self,
        request: RequestId,
        path: &str,
        body: &Node,
        callback: &str,
    ) -> Result<OperationId> {
        let body = Some((body.to_json_string()?, JSON_CONTENT_TYPE));
        self.issue(
            request,
            Method::Post,
            path,
            body,
            callback,
            PayloadKind::Structured,
        )
    }

    fn issue(
        &mut self,
        request: RequestId,
        method: Method,
        path: &str,
        body: Option<(String, &'static str)>,
        callback: &str,
        kind: PayloadKind,
    ) -> Result<OperationId> {
        if callback.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "callback name must not be empty".to_string(),
            ));
        }
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            BridgeError::InvalidArgument("request engine has been shut down".to_string())
        })?;

        let config = self.registry.get(request)?;
        let mut headers = config.headers.clone();
        let body = body.map(|(text, content_type)| {
            if !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            {
                headers.push(("Content-Type".to_string(), content_type.to_string()));
            }
            text
        });
        let http = HttpRequest {
            method,
            url: config.url_for(path),
            headers,
            body,
            timeout: config.options.timeout.unwrap_or(self.default_timeout),
        };

        let operation = self.next_operation;
        self.next_operation += 1;
        debug!(
            operation,
            request,
            method = method.as_str(),
            url = %http.url,
            callback,
            "operation issued"
        );

        let future = self.transport.execute(http);
        let sender = self.sender.clone();
        let callback = callback.to_string();
        runtime.spawn(async move {
            let result = future.await;
            sender.push(complete(operation, request, callback, kind, result));
        });
        Ok(operation)
    }

    /// Stop the worker pool. Operations still in flight never complete.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Translate a transport outcome into the record delivered to the script.
///
/// Transport failures still produce a record so the callback can observe
/// them through a negative status.
pub fn complete(
    operation: OperationId,
    request: RequestId,
    callback: String,
    kind: PayloadKind,
    result: TransportResult,
) -> CompletionRecord {
    let (status, payload) = match (kind, result) {
        (PayloadKind::Text, Ok(response)) => (
            TransportStatus::Http(response.status),
            Payload::Text(response.body),
        ),
        (PayloadKind::Text, Err(e)) => {
            error!(operation, request, "operation failed: {}", e);
            (e.status(), Payload::Text(e.to_string()))
        }
        (PayloadKind::Structured, Ok(response)) if response.body.trim().is_empty() => (
            TransportStatus::Http(response.status),
            Payload::Structured(Node::Null),
        ),
        (PayloadKind::Structured, Ok(response)) => match Node::from_json_str(&response.body) {
            Ok(node) => (
                TransportStatus::Http(response.status),
                Payload::Structured(node),
            ),
            Err(e) => {
                warn!(operation, request, status = response.status, "response is not JSON: {}", e);
                (TransportStatus::MalformedBody, Payload::Structured(Node::Null))
            }
        },
        (PayloadKind::Structured, Err(e)) => {
            error!(operation, request, "operation failed: {}", e);
            (e.status(), Payload::Structured(Node::Null))
        }
    };
    debug!(operation, request, %status, "operation completed");
    CompletionRecord {
        operation,
        request,
        callback,
        status,
        payload,
    }
}
