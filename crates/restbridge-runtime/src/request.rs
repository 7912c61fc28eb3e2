use std::collections::HashMap;
use std::time::Duration;

use restbridge_common::EndpointConfig;

use crate::error::{BridgeError, Result};

/// Id of a registered request configuration.
pub type RequestId = i32;
/// Id of a registered, reusable list of headers.
pub type HeaderSetId = i32;

/// Ordered `(name, value)` header pairs. Duplicates are kept as given.
pub type Headers = Vec<(String, String)>;

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Overrides the bridge default when set.
    pub timeout: Option<Duration>,
    /// Prefix placed between the endpoint and each operation path.
    pub base_path: String,
    /// Header set copied onto the request when it is created.
    pub header_set: Option<HeaderSetId>,
}

impl RequestOptions {
    /// Build options from the VM's string-keyed option bag.
    ///
    /// Recognised keys: `timeout_ms`, `base_path`, `headers`.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut options = RequestOptions::default();
        for (key, value) in pairs {
            match *key {
                "timeout_ms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        BridgeError::InvalidArgument(format!("timeout_ms '{}' is not a number", value))
                    })?;
                    options.timeout = Some(Duration::from_millis(ms));
                }
                "base_path" => options.base_path = value.to_string(),
                "headers" => {
                    let id: HeaderSetId = value.parse().map_err(|_| {
                        BridgeError::InvalidArgument(format!("headers '{}' is not a header set id", value))
                    })?;
                    options.header_set = Some(id);
                }
                other => {
                    return Err(BridgeError::InvalidArgument(format!(
                        "unknown request option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }
}

/// A registered endpoint plus its configuration.
#[derive(Debug, Clone)]
pub struct Request {
    pub endpoint: String,
    pub options: RequestOptions,
    pub headers: Headers,
}

impl Request {
    /// Full URL for an operation against `path`.
    pub fn url_for(&self, path: &str) -> String {
        let mut url = self.endpoint.trim_end_matches('/').to_string();
        for segment in [self.options.base_path.as_str(), path] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        // Keep a trailing slash the caller asked for explicitly.
        if path.ends_with('/') && !url.ends_with('/') {
            url.push('/');
        }
        url
    }
}

/// Request and header-set registrations, keyed by their integer ids.
///
/// Lives on the VM thread; workers only ever see snapshots.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: HashMap<RequestId, Request>,
    header_sets: HashMap<HeaderSetId, Headers>,
    next_request: RequestId,
    next_header_set: HeaderSetId,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Headers from `options.header_set` are copied in.
    pub fn create(&mut self, endpoint: &str, options: RequestOptions) -> Result<RequestId> {
        validate_endpoint(endpoint)?;
        let headers = match options.header_set {
            Some(set) => self
                .header_sets
                .get(&set)
                .cloned()
                .ok_or(BridgeError::UnknownHeaderSet(set))?,
            None => Vec::new(),
        };
        let id = self.next_request;
        self.next_request = id
            .checked_add(1)
            .ok_or(BridgeError::Exhausted("request"))?;
        self.requests.insert(
            id,
            Request {
                endpoint: endpoint.to_string(),
                options,
                headers,
            },
        );
        Ok(id)
    }

    /// Register a request from a manifest endpoint entry.
    pub fn create_from_config(
        &mut self,
        config: &EndpointConfig,
        header_set: Option<HeaderSetId>,
    ) -> Result<RequestId> {
        let options = RequestOptions {
            timeout: config.timeout_ms.map(Duration::from_millis),
            base_path: config.base_path.clone().unwrap_or_default(),
            header_set,
        };
        let id = self.create(&config.url, options)?;
        self.configure_headers(id, config.headers.clone())
    }

    /// Register a reusable header list.
    pub fn register_headers(&mut self, headers: Headers) -> Result<HeaderSetId> {
        validate_headers(&headers)?;
        let id = self.next_header_set;
        self.next_header_set = id
            .checked_add(1)
            .ok_or(BridgeError::Exhausted("header set"))?;
        self.header_sets.insert(id, headers);
        Ok(id)
    }

    /// Append headers to an existing request, keeping their order.
    pub fn configure_headers(&mut self, id: RequestId, headers: Headers) -> Result<RequestId> {
        validate_headers(&headers)?;
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(BridgeError::UnknownRequest(id))?;
        request.headers.extend(headers);
        Ok(id)
    }

    pub fn get(&self, id: RequestId) -> Result<&Request> {
        self.requests.get(&id).ok_or(BridgeError::UnknownRequest(id))
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument(format!(
            "endpoint '{}' must start with http:// or https://",
            endpoint
        )))
    }
}

fn validate_headers(headers: &[(String, String)]) -> Result<()> {
    match headers.iter().position(|(name, _)| name.trim().is_empty()) {
        Some(i) => Err(BridgeError::InvalidArgument(format!(
            "header #{} has an empty name",
            i
        ))),
        None => Ok(()),
    }
}
