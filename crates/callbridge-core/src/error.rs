//! Bridge error types
//!
//! `BridgeError` is what every fallible bridge operation returns. `ErrorInfo`
//! is its wire-level counterpart carried inside `Error` envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Well-known error kinds carried in `Error` envelopes
pub mod kinds {
    /// The remote side has no function registered under the called name
    pub const FUNCTION_NOT_EXPOSED: &str = "FunctionNotExposed";
    /// The call did not fit the remote side's contract
    pub const MALFORMED_ENVELOPE: &str = "MalformedEnvelope";
    /// Generic callable failure when the callable gave no kind of its own
    pub const CALLABLE_FAILURE: &str = "CallableFailure";
    /// The callable panicked while running
    pub const CALLABLE_PANICKED: &str = "CallablePanicked";
}

/// Bridge errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A frame could not be decoded into an envelope, or a call did not fit the contract
    #[error("Malformed envelope: {message}")]
    MalformedEnvelope { message: String },

    /// An argument could not be converted into the serializable value set
    #[error("Argument {index} is not serializable: {message}")]
    UnserializableArgument { index: usize, message: String },

    /// The remote side has no function with this name
    #[error("Function not exposed: {name}")]
    FunctionNotExposed { name: String },

    /// The remote callable failed; its kind and message are forwarded
    #[error("{kind}: {message}")]
    CallableFailure { kind: String, message: String },

    /// The channel is closed; no further calls can be made
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel died while the call was pending
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// Corrupt or truncated frame on the transport
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// The call did not complete in time
    #[error("Call timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// The call was cancelled by its caller
    #[error("Call cancelled")]
    Cancelled,

    /// `connect` was called on a bridge that already has a channel
    #[error("Bridge is already connected")]
    AlreadyConnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error outside of framing (spawning, binding, connecting)
    #[error("IO error: {0}")]
    Io(String),
}

impl BridgeError {
    /// Create a new MalformedEnvelope error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
        }
    }

    /// Create a new UnserializableArgument error
    pub fn unserializable(index: usize, message: impl Into<String>) -> Self {
        Self::UnserializableArgument {
            index,
            message: message.into(),
        }
    }

    /// Create a new FunctionNotExposed error
    pub fn not_exposed(name: impl Into<String>) -> Self {
        Self::FunctionNotExposed { name: name.into() }
    }

    /// Create a new CallableFailure error
    pub fn callable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallableFailure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a new ConnectionLost error
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create a new Framing error
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable machine-readable code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope { .. } => "BRIDGE_MALFORMED_ENVELOPE",
            Self::UnserializableArgument { .. } => "BRIDGE_UNSERIALIZABLE_ARGUMENT",
            Self::FunctionNotExposed { .. } => "BRIDGE_FUNCTION_NOT_EXPOSED",
            Self::CallableFailure { .. } => "BRIDGE_CALLABLE_FAILURE",
            Self::ChannelClosed => "BRIDGE_CHANNEL_CLOSED",
            Self::ConnectionLost { .. } => "BRIDGE_CONNECTION_LOST",
            Self::Framing { .. } => "BRIDGE_FRAMING",
            Self::Timeout { .. } => "BRIDGE_TIMEOUT",
            Self::Cancelled => "BRIDGE_CANCELLED",
            Self::AlreadyConnected => "BRIDGE_ALREADY_CONNECTED",
            Self::Config(_) => "BRIDGE_CONFIG",
            Self::Io(_) => "BRIDGE_IO",
        }
    }

    /// Whether this error ends the channel for good
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelClosed | Self::ConnectionLost { .. } | Self::Framing { .. } | Self::Io(_)
        )
    }

    /// Whether the call failed because the channel went away
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::ChannelClosed)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Error payload of an `Error` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorInfo {
    /// Error kind, either one of [`kinds`] or the callable's own
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error payload
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Callable failure without a more specific kind
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(kinds::CALLABLE_FAILURE, message)
    }

    /// Lookup miss on the receiving side
    pub fn not_exposed(name: &str) -> Self {
        Self::new(
            kinds::FUNCTION_NOT_EXPOSED,
            format!("no function exposed as '{}'", name),
        )
    }

    /// Convert into the error surfaced to the caller of `invoke`
    pub fn into_bridge_error(self, name: &str) -> BridgeError {
        match self.kind.as_str() {
            kinds::FUNCTION_NOT_EXPOSED => BridgeError::not_exposed(name),
            kinds::MALFORMED_ENVELOPE => BridgeError::malformed(self.message),
            _ => BridgeError::callable(self.kind, self.message),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<serde_json::Error> for ErrorInfo {
    fn from(err: serde_json::Error) -> Self {
        Self::new(kinds::MALFORMED_ENVELOPE, err.to_string())
    }
}

/// A callable whose own outgoing call failed reports that failure upstream.
/// Remote callable failures keep their kind.
impl From<BridgeError> for ErrorInfo {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::CallableFailure { kind, message } => Self::new(kind, message),
            BridgeError::FunctionNotExposed { name } => Self::not_exposed(&name),
            other => Self::failure(other.to_string()),
        }
    }
}
