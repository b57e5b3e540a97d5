//! Error types for WinRM operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level error type for all WinRM operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WinRmError {
    /// HTTP or connection-level failure from the underlying transport.
    Transport(String),
    /// The server answered with a SOAP Fault. `code` is the value of
    /// `WSManFault/@Code` when present.
    SoapFault { code: String, message: String },
    /// The response was missing an element the protocol requires
    /// (ShellId, CommandId, ExitCode at completion).
    Protocol(String),
    /// Rejected before anything was sent.
    InvalidArgument(String),
    /// Caller cancellation or an expired receive deadline.
    Cancelled(String),
    /// Authentication exchange failure.
    Auth(String),
}

impl fmt::Display for WinRmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::SoapFault { code, message } => {
                write!(f, "WSManFault [{}]: {}", code, message)
            }
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Cancelled(msg) => write!(f, "cancelled: {}", msg),
            Self::Auth(msg) => write!(f, "authentication error: {}", msg),
        }
    }
}

impl std::error::Error for WinRmError {}

impl WinRmError {
    /// Build a SOAP fault error from the parsed fault fields.
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SoapFault {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The WSManFault code, when this error is a SOAP fault.
    pub fn fault_code(&self) -> Option<&str> {
        match self {
            Self::SoapFault { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WinRmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<quick_xml::Error> for WinRmError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Protocol(format!("XML parse error: {}", e))
    }
}

impl From<base64::DecodeError> for WinRmError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Protocol(format!("base64 decode error: {}", e))
    }
}

/// Convenience result type for WinRM operations.
pub type WinRmResult<T> = Result<T, WinRmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_carries_code_and_text() {
        let err = WinRmError::fault("2150858778", "The WinRM client cannot process the request.");
        let s = err.to_string();
        assert!(s.contains("2150858778"));
        assert!(s.contains("cannot process the request"));
    }

    #[test]
    fn fault_code_accessor() {
        let err = WinRmError::fault("5", "access denied");
        assert_eq!(err.fault_code(), Some("5"));
        assert_eq!(WinRmError::Transport("boom".into()).fault_code(), None);
    }

    #[test]
    fn transport_display() {
        let err = WinRmError::Transport("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }
}
