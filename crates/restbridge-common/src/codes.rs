/// Maximum length of an object key accepted from the VM.
pub const MAX_KEY_LEN: usize = 512;

/// Integer codes returned to the VM by bridge natives.
///
/// `0` is success. Negative codes are construction argument errors,
/// positive codes are access/resource errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReturnCode {
    Ok = 0,
    /// A literal argument was out of bounds (e.g. an oversized key).
    InvalidArgument = -1,
    /// A child handle passed to a constructor did not resolve.
    InvalidChild = -2,
    /// The value behind a handle has a different tag than requested.
    TypeMismatch = 1,
    /// Object key absent or array index out of range.
    NoSuchEntry = 2,
    /// The handle was never issued or has been released.
    UnknownHandle = 3,
    /// No request is registered under the id.
    UnknownRequest = 4,
    /// A callback's arity does not match the payload it would receive.
    SignatureMismatch = 5,
    /// Text could not be parsed as JSON.
    MalformedJson = 6,
}

impl ReturnCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ReturnCode::Ok
    }
}

impl From<ReturnCode> for i32 {
    fn from(code: ReturnCode) -> i32 {
        code as i32
    }
}

/// Status delivered to a completion callback.
///
/// Non-negative values are HTTP status codes from the remote end; negative
/// values describe why no usable response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    Http(u16),
    /// Connection refused, DNS failure or any other transport error.
    Failed,
    TimedOut,
    /// A JSON response body could not be parsed.
    MalformedBody,
}

impl TransportStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            TransportStatus::Http(code) => code as i32,
            TransportStatus::Failed => -1,
            TransportStatus::TimedOut => -2,
            TransportStatus::MalformedBody => -3,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, TransportStatus::Http(code) if (200..300).contains(&code))
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Http(code) => write!(f, "HTTP {}", code),
            TransportStatus::Failed => write!(f, "transport failure"),
            TransportStatus::TimedOut => write!(f, "timed out"),
            TransportStatus::MalformedBody => write!(f, "malformed body"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_values() {
        assert_eq!(ReturnCode::Ok.as_i32(), 0);
        assert_eq!(ReturnCode::InvalidArgument.as_i32(), -1);
        assert_eq!(ReturnCode::InvalidChild.as_i32(), -2);
        assert_eq!(i32::from(ReturnCode::TypeMismatch), 1);
        assert!(ReturnCode::Ok.is_ok());
        assert!(!ReturnCode::UnknownHandle.is_ok());
    }

    #[test]
    fn transport_status_values() {
        assert_eq!(TransportStatus::Http(404).as_i32(), 404);
        assert_eq!(TransportStatus::Failed.as_i32(), -1);
        assert_eq!(TransportStatus::TimedOut.as_i32(), -2);
        assert_eq!(TransportStatus::MalformedBody.as_i32(), -3);
        assert!(TransportStatus::Http(204).is_success());
        assert!(!TransportStatus::Http(500).is_success());
        assert!(!TransportStatus::TimedOut.is_success());
    }

    #[test]
    fn transport_status_display() {
        assert_eq!(TransportStatus::Http(200).to_string(), "HTTP 200");
        assert_eq!(TransportStatus::TimedOut.to_string(), "timed out");
    }
}
