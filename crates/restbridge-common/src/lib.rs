pub mod codes;
pub mod manifest;

pub use codes::{ReturnCode, TransportStatus, MAX_KEY_LEN};
pub use manifest::{BridgeManifest, BridgeSection, EndpointConfig, ManifestError};
