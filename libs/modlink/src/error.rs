//! Error types for the Modbus link layer

use thiserror::Error;

/// Modbus link error type
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Protocol-level errors (malformed frames, mismatched responses)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Modbus exception response from the device
    #[error("Modbus exception: function {function:#04x}, {}", exception_description(*.code))]
    Exception {
        /// Original function code (exception bit stripped)
        function: u8,
        /// Exception code from the device
        code: u8,
    },

    /// Operation not supported by this link
    #[error("Not supported: {0}")]
    Unsupported(String),
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Human-readable description for standard Modbus exception codes
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target failed to respond",
        _ => "unknown exception",
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display() {
        let err = LinkError::Exception {
            function: 0x03,
            code: 0x02,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x03"));
        assert!(msg.contains("illegal data address"));
    }

    #[test]
    fn test_exception_description_unknown() {
        assert_eq!(exception_description(0xFF), "unknown exception");
    }
}
