use std::collections::HashMap;
use std::sync::Arc;

use restbridge_common::{BridgeManifest, BridgeSection, EndpointConfig};
use tracing::{debug, error, info};

use crate::callback::{CallArg, CallContext, CallbackTable, PublicIndex, Script};
use crate::completion::{CompletionQueue, CompletionRecord, OperationId, Payload, PayloadKind};
use crate::engine::RequestEngine;
use crate::error::Result;
use crate::issuer::{Issuer, OperationState};
use crate::request::{HeaderSetId, Headers, RequestId, RequestOptions};
use crate::store::{Handle, ValueStore};
use crate::transport::{ReqwestTransport, Transport};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// The VM-thread half of the bridge: owns the value store, issues requests
/// and replays completions into script callbacks once per tick.
#[derive(Debug)]
pub struct Bridge {
    store: ValueStore,
    issuer: Issuer,
    queue: CompletionQueue,
    callbacks: CallbackTable,
}

impl Bridge {
    /// Bridge backed by the real HTTP transport.
    pub fn new(manifest: &BridgeManifest) -> Result<Self> {
        Self::build(
            &manifest.bridge,
            Arc::new(ReqwestTransport::new()),
            manifest.endpoints.clone(),
        )
    }

    pub fn with_transport(section: &BridgeSection, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::build(section, transport, HashMap::new())
    }

    fn build(
        section: &BridgeSection,
        transport: Arc<dyn Transport>,
        endpoints: HashMap<String, EndpointConfig>,
    ) -> Result<Self> {
        let queue = CompletionQueue::new();
        let engine = RequestEngine::new(section, transport, queue.sender())?;
        info!(
            workers = section.worker_threads,
            timeout_ms = section.default_timeout_ms,
            endpoints = endpoints.len(),
            "bridge started"
        );
        Ok(Self {
            store: ValueStore::with_max_key_len(section.max_key_len),
            issuer: Issuer::new(engine, endpoints),
            queue,
            callbacks: CallbackTable::new(),
        })
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ValueStore {
        &mut self.store
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    /// The same view a callback gets, for host code outside a tick.
    pub fn context(&mut self) -> CallContext<'_> {
        CallContext {
            store: &mut self.store,
            issuer: &mut self.issuer,
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub fn create_request(&mut self, endpoint: &str, options: RequestOptions) -> Result<RequestId> {
        self.issuer.create_request(endpoint, options)
    }

    pub fn create_named_request(&mut self, name: &str) -> Result<RequestId> {
        self.issuer.create_named_request(name)
    }

    pub fn register_headers(&mut self, headers: Headers) -> Result<HeaderSetId> {
        self.issuer.register_headers(headers)
    }

    pub fn configure_headers(&mut self, request: RequestId, headers: Headers) -> Result<RequestId> {
        self.issuer.configure_headers(request, headers)
    }

    pub fn get(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        self.issuer.get(request, path, callback)
    }

    pub fn post(
        &mut self,
        request: RequestId,
        path: &str,
        body: &str,
        callback: &str,
    ) -> Result<OperationId> {
        self.issuer.post(request, path, body, callback)
    }

    pub fn get_json(&mut self, request: RequestId, path: &str, callback: &str) -> Result<OperationId> {
        self.issuer.get_json(request, path, callback)
    }

    /// POST the node at `body` as JSON. The handle stays live.
    pub fn post_json(
        &mut self,
        request: RequestId,
        path: &str,
        body: Handle,
        callback: &str,
    ) -> Result<OperationId> {
        self.issuer
            .post_json(&self.store, request, path, body, callback)
    }

    pub fn operation_state(&self, operation: OperationId) -> Option<OperationState> {
        self.issuer.operation_state(operation)
    }

    pub fn pending_operations(&self) -> usize {
        self.issuer.pending_operations()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Validate `name` against the script ahead of time.
    pub fn register_callback<S: Script + ?Sized>(
        &mut self,
        script: &S,
        name: &str,
        kind: PayloadKind,
    ) -> Result<PublicIndex> {
        self.callbacks.register(script, name, kind)
    }

    /// Forget validated callbacks, e.g. after the script is reloaded.
    pub fn reset_callbacks(&mut self) {
        self.callbacks.clear();
    }

    /// Deliver every completion queued since the last tick, in queue order.
    ///
    /// Must run on the thread that owns the script. A record whose callback
    /// is missing or has the wrong signature is logged and skipped; the
    /// rest of the batch is still delivered. Requests issued by a callback
    /// are delivered on a later tick.
    pub fn process_tick<S: Script + ?Sized>(&mut self, script: &mut S) -> TickReport {
        let mut report = TickReport::default();
        for record in self.queue.drain_all() {
            self.issuer.finish(record.operation);
            if self.deliver(script, record) {
                report.delivered += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    fn deliver<S: Script + ?Sized>(&mut self, script: &mut S, record: CompletionRecord) -> bool {
        let index = match self.callbacks.resolve(&*script, &record.callback, record.kind()) {
            Ok(index) => index,
            Err(e) => {
                error!(
                    operation = record.operation,
                    callback = %record.callback,
                    "failed to locate callback: {}",
                    e
                );
                return false;
            }
        };

        let request = CallArg::Int(record.request);
        let status = CallArg::Int(record.status.as_i32());
        match record.payload {
            Payload::Text(body) => {
                let len = i32::try_from(body.len()).unwrap_or(i32::MAX);
                script.exec(
                    index,
                    &[request, status, CallArg::Str(body), CallArg::Int(len)],
                    &mut self.context(),
                );
            }
            Payload::Structured(node) => {
                // The node only lives for the duration of the callback.
                let handle = match self.store.allocate(node) {
                    Ok(handle) => handle,
                    Err(e) => {
                        error!(operation = record.operation, "cannot store payload: {}", e);
                        return false;
                    }
                };
                script.exec(
                    index,
                    &[request, status, CallArg::Handle(handle)],
                    &mut self.context(),
                );
                if self.store.contains(handle) {
                    self.store.release(handle);
                }
            }
        }
        debug!(operation = record.operation, "operation delivered");
        true
    }

    /// Stop the workers and drop every stored value. Handles held by the
    /// script become invalid and operations still in flight are abandoned.
    pub fn shutdown(&mut self) {
        self.issuer.shutdown();
        self.queue.drain_all();
        self.store.clear();
        info!("bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.issuer.is_running()
    }
}
