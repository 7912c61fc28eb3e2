use restbridge_common::ReturnCode;
use thiserror::Error;

use crate::store::Handle;

/// Errors reported by bridge operations to their immediate caller.
///
/// None of these are fatal; each maps to an integer code the VM sees.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key length {len} out of bounds (1..={max})")]
    KeyLength { len: usize, max: usize },

    #[error("child handle {0} does not resolve to a value")]
    InvalidChild(Handle),

    #[error("type error: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no field '{0}'")]
    MissingField(String),

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("handle {0} is not live")]
    UnknownHandle(Handle),

    #[error("request {0} is not registered")]
    UnknownRequest(i32),

    #[error("header set {0} is not registered")]
    UnknownHeaderSet(i32),

    #[error("callback '{name}' takes {found} parameters, expected {expected}")]
    SignatureMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("no public function named '{0}'")]
    MissingCallback(String),

    #[error("no {0} ids left")]
    Exhausted(&'static str),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start worker runtime: {0}")]
    Startup(#[from] std::io::Error),
}

impl BridgeError {
    /// Return code handed back across the VM boundary.
    pub fn code(&self) -> ReturnCode {
        match self {
            BridgeError::InvalidArgument(_)
            | BridgeError::KeyLength { .. }
            | BridgeError::Exhausted(_) => ReturnCode::InvalidArgument,
            BridgeError::InvalidChild(_) => ReturnCode::InvalidChild,
            BridgeError::TypeMismatch { .. } => ReturnCode::TypeMismatch,
            BridgeError::MissingField(_) | BridgeError::IndexOutOfRange { .. } => {
                ReturnCode::NoSuchEntry
            }
            BridgeError::UnknownHandle(_) => ReturnCode::UnknownHandle,
            BridgeError::UnknownRequest(_) | BridgeError::UnknownHeaderSet(_) => {
                ReturnCode::UnknownRequest
            }
            BridgeError::SignatureMismatch { .. } | BridgeError::MissingCallback(_) => {
                ReturnCode::SignatureMismatch
            }
            BridgeError::Json(_) => ReturnCode::MalformedJson,
            BridgeError::Startup(_) => ReturnCode::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
