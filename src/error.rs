//! Error types
//!
//! Every failure in the core falls into one of a handful of categories. None of
//! them is allowed to take down sibling operations: plugin and session failures
//! are reported through return values and state fields, and only setup errors
//! (binding the ingest listener, installing signal handlers) reach the caller
//! of [`Broker::run_until`](crate::broker::Broker::run_until).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::plugin::PluginState;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),
    /// Malformed or conflicting plugin descriptor
    Configuration(ConfigurationError),
    /// Plugin unreachable or its startup probe failed
    Connection {
        /// Protocol id of the plugin
        protocol: String,
        /// What went wrong
        reason: String,
    },
    /// A single RPC call failed
    Rpc(RpcError),
    /// A bounded queue was full and the item was dropped
    ResourceExhausted(String),
    /// Graceful stop exceeded its budget
    ShutdownTimeout {
        /// Protocol id of the plugin
        protocol: String,
        /// The budget that was exceeded
        timeout: Duration,
    },
    /// Malformed frame record on the ingest wire
    Codec(CodecError),
    /// Protocol id is not in the plugin registry
    UnknownProtocol(String),
    /// Plugin state machine rejected a transition
    InvalidTransition {
        /// State before the attempted transition
        from: PluginState,
        /// Requested state
        to: PluginState,
    },
    /// Cast provider or device failure
    Cast(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Configuration(e) => write!(f, "Configuration error: {}", e),
            Error::Connection { protocol, reason } => {
                write!(f, "Plugin {} unreachable: {}", protocol, reason)
            }
            Error::Rpc(e) => write!(f, "RPC error: {}", e),
            Error::ResourceExhausted(what) => write!(f, "Resource exhausted: {}", what),
            Error::ShutdownTimeout { protocol, timeout } => write!(
                f,
                "Plugin {} did not stop within {}ms",
                protocol,
                timeout.as_millis()
            ),
            Error::Codec(e) => write!(f, "Frame codec error: {}", e),
            Error::UnknownProtocol(p) => write!(f, "Unknown protocol: {}", p),
            Error::InvalidTransition { from, to } => {
                write!(f, "Invalid plugin state transition: {} -> {}", from, to)
            }
            Error::Cast(msg) => write!(f, "Cast error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Configuration(e) => Some(e),
            Error::Rpc(e) => Some(e),
            Error::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ConfigurationError> for Error {
    fn from(e: ConfigurationError) -> Self {
        Error::Configuration(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Rpc(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

/// Plugin descriptor errors
#[derive(Debug)]
pub enum ConfigurationError {
    /// Descriptor file could not be read
    Read {
        /// Descriptor path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// Descriptor is not valid JSON or is missing a required field
    Parse {
        /// Descriptor path
        path: PathBuf,
        /// Parser message
        message: String,
    },
    /// A required field is present but empty
    EmptyField {
        /// Descriptor path
        path: PathBuf,
        /// Field name
        field: &'static str,
    },
    /// Another descriptor already claimed this protocol id
    DuplicateProtocol {
        /// The contested protocol id
        protocol: String,
        /// Descriptor that lost the claim
        path: PathBuf,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigurationError::Parse { path, message } => {
                write!(f, "invalid descriptor {}: {}", path.display(), message)
            }
            ConfigurationError::EmptyField { path, field } => {
                write!(f, "descriptor {} has empty field '{}'", path.display(), field)
            }
            ConfigurationError::DuplicateProtocol { protocol, path } => write!(
                f,
                "protocol '{}' already claimed, rejecting {}",
                protocol,
                path.display()
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Control RPC errors
#[derive(Debug, Clone)]
pub enum RpcError {
    /// No response within the deadline
    Timeout {
        /// RPC method
        method: String,
        /// Deadline that elapsed
        timeout: Duration,
    },
    /// The plugin answered with an error
    Remote {
        /// RPC method
        method: String,
        /// Plugin-supplied message
        message: String,
    },
    /// Connection closed or failed
    Transport(String),
    /// Response could not be decoded
    Malformed(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout { method, timeout } => {
                write!(f, "{} timed out after {}ms", method, timeout.as_millis())
            }
            RpcError::Remote { method, message } => write!(f, "{} failed: {}", method, message),
            RpcError::Transport(msg) => write!(f, "transport failure: {}", msg),
            RpcError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Frame wire errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Header length exceeds the configured limit
    HeaderTooLarge(usize),
    /// Payload length exceeds the configured limit
    PayloadTooLarge(usize),
    /// Header is not valid JSON or misses fields
    InvalidHeader(String),
    /// Stream ended in the middle of a record
    Truncated,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::HeaderTooLarge(n) => write!(f, "header of {} bytes exceeds limit", n),
            CodecError::PayloadTooLarge(n) => write!(f, "payload of {} bytes exceeds limit", n),
            CodecError::InvalidHeader(msg) => write!(f, "invalid header: {}", msg),
            CodecError::Truncated => write!(f, "stream ended mid-record"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::InvalidHeader(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::Connection {
            protocol: "matrix".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "Plugin matrix unreachable: connection refused");

        let err = Error::ShutdownTimeout {
            protocol: "xmpp".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Plugin xmpp did not stop within 1500ms");

        let err = Error::from(RpcError::Timeout {
            method: "health".into(),
            timeout: Duration::from_secs(2),
        });
        assert_eq!(err.to_string(), "RPC error: health timed out after 2000ms");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::from(CodecError::Truncated);
        assert!(err.source().is_some());

        let err = Error::UnknownProtocol("sip".into());
        assert!(err.source().is_none());
    }
}
