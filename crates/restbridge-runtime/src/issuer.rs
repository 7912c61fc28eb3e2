use std::collections::{HashMap, HashSet};

use restbridge_common::EndpointConfig;
use tracing::{debug, warn};

use crate::completion::OperationId;
use crate::engine::RequestEngine;
use crate::error::{BridgeError, Result};
use crate::request::{HeaderSetId, Headers, RequestId, RequestOptions};
use crate::store::{Handle, ValueStore};

/// Lifecycle of an issued operation as seen from the VM thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// In flight on the worker pool.
    Pending,
    /// Delivered to its callback, or dropped because the callback was
    /// missing. Terminal.
    Done,
    /// Still in flight when the bridge shut down; never delivered. Terminal.
    Abandoned,
}

#[derive(Debug)]
struct InFlight {
    request: RequestId,
    callback: String,
}

/// The issuing half of the bridge: request registrations, the engine and
/// per-operation bookkeeping.
///
/// Reachable both from the host through [`Bridge`](crate::Bridge) and from
/// inside a callback through [`CallContext`](crate::CallContext), so a
/// script can chain a follow-up request while handling a response.
#[derive(Debug)]
pub struct Issuer {
    engine: RequestEngine,
    endpoints: HashMap<String, EndpointConfig>,
    in_flight: HashMap<OperationId, InFlight>,
    abandoned: HashSet<OperationId>,
    issued: OperationId,
}

impl Issuer {
    pub fn new(engine: RequestEngine, endpoints: HashMap<String, EndpointConfig>) -> Self {
        Self {
            engine,
            endpoints,
            in_flight: HashMap::new(),
            abandoned: HashSet::new(),
            issued: 0,
        }
    }

    pub fn create_request(&mut self, endpoint: &str, options: RequestOptions) -> Result<RequestId> {
        self.engine.registry_mut().create(endpoint, options)
    }

    /// Create a request from a `[endpoints.<name>]` manifest entry.
    pub fn create_named_request(&mut self, name: &str) -> Result<RequestId> {
        let config = self.endpoints.get(name).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("no endpoint named '{}' in manifest", name))
        })?;
        self.engine.registry_mut().create_from_config(config, None)
    }

    pub fn register_headers(&mut self, headers: Headers) -> Result<HeaderSetId> {
        self.engine.registry_mut().register_headers(headers)
    }

    pub fn configure_headers(&mut self, request: RequestId, headers: Headers) -> Result<RequestId> {
        self.engine.registry_mut().configure_headers(request, headers)
    }

    pub fn get(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        let operation = self.engine.get(request, path, callback)?;
        Ok(self.track(operation, request, callback))
    }

    pub fn post(
        &mut self,
        request: RequestId,
        path: &str,
        body: &str,
        callback: &str,
    ) -> Result<OperationId> {
        let operation = self.engine.post(request, path, body, callback)?;
        Ok(self.track(operation, request, callback))
    }

    pub fn get_json(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        let operation = self.engine.get_json(request, path, callback)?;
        Ok(self.track(operation, request, callback))
    }

    /// POST the node at `body` in `store` as JSON. The handle stays live.
    pub fn post_json(
        &mut self,
        store: &ValueStore,
        request: RequestId,
        path: &str,
        body: Handle,
        callback: &str,
    ) -> Result<OperationId> {
        let node = store.peek(body)?;
        let operation = self.engine.post_json(request, path, node, callback)?;
        Ok(self.track(operation, request, callback))
    }

    fn track(&mut self, operation: OperationId, request: RequestId, callback: &str) -> OperationId {
        self.in_flight.insert(
            operation,
            InFlight {
                request,
                callback: callback.to_string(),
            },
        );
        self.issued = operation + 1;
        operation
    }

    /// Mark `operation` as drained from the completion queue.
    pub(crate) fn finish(&mut self, operation: OperationId) {
        match self.in_flight.remove(&operation) {
            Some(flight) => debug!(
                operation,
                request = flight.request,
                callback = %flight.callback,
                "operation completed"
            ),
            None => debug!(operation, "completion for untracked operation"),
        }
    }

    pub fn operation_state(&self, operation: OperationId) -> Option<OperationState> {
        if self.in_flight.contains_key(&operation) {
            Some(OperationState::Pending)
        } else if self.abandoned.contains(&operation) {
            Some(OperationState::Abandoned)
        } else if operation < self.issued {
            Some(OperationState::Done)
        } else {
            None
        }
    }

    pub fn pending_operations(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop the engine. Everything still in flight becomes abandoned.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
        if !self.in_flight.is_empty() {
            warn!(count = self.in_flight.len(), "abandoning in-flight operations");
        }
        self.abandoned
            .extend(self.in_flight.drain().map(|(operation, _)| operation));
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }
}
