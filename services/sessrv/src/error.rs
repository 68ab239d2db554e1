//! Error handling for the session service
//!
//! Every failure inside a session-level operation is converted to a log
//! entry at the operation boundary and returned as a plain value; callers
//! never see a panic or an unhandled fault.

use modlink::{LinkError, RegisterKind};
use thiserror::Error;

use crate::session::SessionId;

/// Session service error type
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Operation attempted on a disconnected session
    #[error("Not connected")]
    NotConnected,

    /// Client-side request guard tripped before any network call
    #[error("Request limit exceeded: {count} exceeds {limit} for {kind}")]
    RequestLimitExceeded {
        kind: RegisterKind,
        count: u16,
        limit: u16,
    },

    /// Register category with no execution path
    #[error("Unsupported type: {0}")]
    UnsupportedType(RegisterKind),

    /// Transport connect failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Read/write transport or protocol failure
    #[error("Request error: {0}")]
    Request(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Write entry index out of range
    #[error("No write entry at index {0}")]
    WriteEntryNotFound(usize),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for the session service
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Map a link failure from the connect phase
    pub fn connection(err: &LinkError) -> Self {
        SessionError::Connection(err.to_string())
    }

    /// Map a link failure from a read/write request
    pub fn request(err: &LinkError) -> Self {
        SessionError::Request(err.to_string())
    }
}

impl From<figment::Error> for SessionError {
    fn from(err: figment::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_error_display() {
        let err = SessionError::RequestLimitExceeded {
            kind: RegisterKind::Coil,
            count: 2001,
            limit: 2000,
        };
        let msg = err.to_string();
        assert!(msg.contains("2001"));
        assert!(msg.contains("2000"));
        assert!(msg.contains("Coils"));
    }

    #[test]
    fn test_link_error_mapping() {
        let link_err = LinkError::Timeout("Connection to 10.0.0.1:502 timed out".to_string());
        let err = SessionError::connection(&link_err);
        assert!(matches!(err, SessionError::Connection(_)));
        assert!(err.to_string().contains("timed out"));
    }
}
