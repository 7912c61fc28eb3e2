use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::codes::MAX_KEY_LEN;

/// File name searched for by [`find_manifest`].
pub const MANIFEST_FILE: &str = "Restbridge.toml";

/// The parsed Restbridge.toml manifest.
#[derive(Debug, Clone)]
pub struct BridgeManifest {
    pub bridge: BridgeSection,
    pub endpoints: HashMap<String, EndpointConfig>,
    /// The directory containing the Restbridge.toml file.
    pub root_dir: PathBuf,
}

/// Process-wide bridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    /// Size of the transport worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Timeout applied to requests that do not set their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound on object key length accepted from the VM.
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
}

fn default_worker_threads() -> usize {
    2
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_key_len() -> usize {
    MAX_KEY_LEN
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            default_timeout_ms: default_timeout_ms(),
            max_key_len: default_max_key_len(),
        }
    }
}

/// A named endpoint that scripts can create requests against.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Ordered `[name, value]` pairs; duplicates are kept.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// Raw TOML structure for deserialization.
#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    bridge: Option<BridgeSection>,
    #[serde(default)]
    endpoints: HashMap<String, EndpointConfig>,
}

/// Errors that can occur when loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("no Restbridge.toml found (searched from {0})")]
    NotFound(String),
    #[error("failed to read Restbridge.toml: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid Restbridge.toml: {0}")]
    ParseError(String),
    #[error("invalid Restbridge.toml: [bridge] worker_threads must be at least 1")]
    NoWorkers,
    #[error("invalid Restbridge.toml: [bridge] max_key_len must be at least 1")]
    ZeroKeyLength,
    #[error("invalid Restbridge.toml: [endpoints.{0}] url '{1}' must start with http:// or https://")]
    InvalidUrl(String, String),
    #[error("invalid Restbridge.toml: [endpoints.{0}] header #{1} has an empty name")]
    EmptyHeaderName(String, usize),
}

impl Default for BridgeManifest {
    fn default() -> Self {
        Self {
            bridge: BridgeSection::default(),
            endpoints: HashMap::new(),
            root_dir: PathBuf::from("."),
        }
    }
}

/// Walk up from `start_dir` looking for `Restbridge.toml`.
/// Returns the path to the manifest file if found.
pub fn find_manifest(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let candidate = current.join(MANIFEST_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load and validate a Restbridge.toml manifest from a file path.
pub fn load_manifest(path: &Path) -> Result<BridgeManifest, ManifestError> {
    let content = std::fs::read_to_string(path)?;
    let root_dir = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    parse_manifest(&content, root_dir)
}

/// Parse and validate a Restbridge.toml manifest from a string.
pub fn parse_manifest(content: &str, root_dir: PathBuf) -> Result<BridgeManifest, ManifestError> {
    let raw: RawManifest =
        toml::from_str(content).map_err(|e| ManifestError::ParseError(e.to_string()))?;

    let bridge = raw.bridge.unwrap_or_default();
    if bridge.worker_threads == 0 {
        return Err(ManifestError::NoWorkers);
    }
    if bridge.max_key_len == 0 {
        return Err(ManifestError::ZeroKeyLength);
    }

    for (name, endpoint) in &raw.endpoints {
        validate_endpoint(name, endpoint)?;
    }

    Ok(BridgeManifest {
        bridge,
        endpoints: raw.endpoints,
        root_dir,
    })
}

/// Find and load the manifest starting from `start_dir`.
pub fn find_and_load_manifest(start_dir: &Path) -> Result<BridgeManifest, ManifestError> {
    let manifest_path = find_manifest(start_dir)
        .ok_or_else(|| ManifestError::NotFound(start_dir.display().to_string()))?;
    load_manifest(&manifest_path)
}

/// Find and load the manifest starting from `start_dir`, falling back to
/// defaults when none exists.
pub fn find_or_default(start_dir: &Path) -> Result<BridgeManifest, ManifestError> {
    match find_manifest(start_dir) {
        Some(path) => load_manifest(&path),
        None => Ok(BridgeManifest::default()),
    }
}

fn validate_endpoint(name: &str, endpoint: &EndpointConfig) -> Result<(), ManifestError> {
    if !(endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://")) {
        return Err(ManifestError::InvalidUrl(
            name.to_string(),
            endpoint.url.clone(),
        ));
    }
    for (i, (header, _)) in endpoint.headers.iter().enumerate() {
        if header.trim().is_empty() {
            return Err(ManifestError::EmptyHeaderName(name.to_string(), i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_manifest_uses_defaults() {
        let manifest = parse_manifest("", PathBuf::from(".")).unwrap();
        assert_eq!(manifest.bridge.worker_threads, 2);
        assert_eq!(manifest.bridge.default_timeout_ms, 30_000);
        assert_eq!(manifest.bridge.max_key_len, 512);
        assert!(manifest.endpoints.is_empty());
    }

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
[bridge]
worker_threads = 4
default_timeout_ms = 5000

[endpoints.api]
url = "https://api.example.com"
base_path = "/v1"
timeout_ms = 2500
headers = [["Authorization", "Bearer abc"], ["X-Trace", "1"], ["X-Trace", "2"]]

[endpoints.local]
url = "http://127.0.0.1:8080"
"#;
        let manifest = parse_manifest(toml, PathBuf::from("/project")).unwrap();
        assert_eq!(manifest.bridge.worker_threads, 4);
        assert_eq!(manifest.bridge.default_timeout_ms, 5000);
        assert_eq!(manifest.bridge.max_key_len, 512);
        assert_eq!(manifest.endpoints.len(), 2);

        let api = &manifest.endpoints["api"];
        assert_eq!(api.url, "https://api.example.com");
        assert_eq!(api.base_path.as_deref(), Some("/v1"));
        assert_eq!(api.timeout_ms, Some(2500));
        assert_eq!(api.headers.len(), 3);
        assert_eq!(api.headers[2], ("X-Trace".to_string(), "2".to_string()));

        let local = &manifest.endpoints["local"];
        assert!(local.base_path.is_none());
        assert!(local.headers.is_empty());
    }

    #[test]
    fn zero_workers_rejected() {
        let toml = r#"
[bridge]
worker_threads = 0
"#;
        let err = parse_manifest(toml, PathBuf::from(".")).unwrap_err().to_string();
        assert!(err.contains("worker_threads"), "got: {}", err);
    }

    #[test]
    fn non_http_url_rejected() {
        let toml = r#"
[endpoints.ftp]
url = "ftp://files.example.com"
"#;
        let err = parse_manifest(toml, PathBuf::from(".")).unwrap_err().to_string();
        assert!(err.contains("ftp://files.example.com"), "got: {}", err);
    }

    #[test]
    fn empty_header_name_rejected() {
        let toml = r#"
[endpoints.api]
url = "http://localhost"
headers = [["", "x"]]
"#;
        let result = parse_manifest(toml, PathBuf::from("."));
        assert!(matches!(result, Err(ManifestError::EmptyHeaderName(_, 0))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let result = parse_manifest("[bridge\nworker_threads = ", PathBuf::from("."));
        assert!(matches!(result, Err(ManifestError::ParseError(_))));
    }

    #[test]
    fn find_manifest_walks_up() {
        let root = std::env::temp_dir().join(format!("restbridge-manifest-{}", std::process::id()));
        let nested = root.join("scripts").join("gamemodes");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join(MANIFEST_FILE), "[bridge]\nworker_threads = 3\n").unwrap();

        let found = find_manifest(&nested).unwrap();
        assert_eq!(found, root.join(MANIFEST_FILE));

        let manifest = find_or_default(&nested).unwrap();
        assert_eq!(manifest.bridge.worker_threads, 3);
        assert_eq!(manifest.root_dir, root);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
