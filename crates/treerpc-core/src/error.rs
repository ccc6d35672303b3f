//! Error types for the RPC bridge.
//!
//! Every failure a single call can hit is one variant of [`BridgeError`].
//! Variants carry rendered messages rather than source errors so the type is
//! `Clone`: a failed schema fetch is shared by every caller that was waiting
//! on it.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    // Schema errors
    #[error("Unknown call path: {path}")]
    UnknownPath { path: String },

    #[error("Unknown message type: {name}")]
    UnknownMessage { name: String },

    #[error("Unsupported field type '{type_name}' for field {field}")]
    UnsupportedType { type_name: String, field: String },

    #[error("Unsupported map key type '{key_type}' for field {field}")]
    UnsupportedKeyType { key_type: String, field: String },

    #[error("Call shape mismatch for {path}: schema declares {declared}, function is {bound}")]
    ShapeMismatch {
        path: String,
        declared: String,
        bound: String,
    },

    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    // Codec errors
    #[error("Type mismatch for field {field}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed message: {message}")]
    Malformed { message: String },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Remote error (status {code}): {message}")]
    Remote { code: u32, message: String },

    #[error("Stream ended without a status trailer")]
    TruncatedStream,

    // Call-site errors
    #[error("{what} not supported")]
    NotSupported { what: String },

    #[error("RPC handle already used as a {used}")]
    HandleModeConflict { used: &'static str },

    // Business function failures
    #[error("{message}")]
    Invocation { message: String },

    // Serialization / IO
    #[error("JSON error: {message}")]
    Json { message: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<prost::DecodeError> for BridgeError {
    fn from(err: prost::DecodeError) -> Self {
        BridgeError::Malformed {
            message: err.to_string(),
        }
    }
}

impl From<std::str::Utf8Error> for BridgeError {
    fn from(err: std::str::Utf8Error) -> Self {
        BridgeError::Malformed {
            message: format!("invalid UTF-8: {}", err),
        }
    }
}

impl BridgeError {
    /// Failure raised by a business function.
    pub fn invocation(message: impl std::fmt::Display) -> Self {
        BridgeError::Invocation {
            message: message.to_string(),
        }
    }

    /// Build the error a client observes for a non-zero status trailer.
    pub fn from_status(code: u32, message: impl Into<String>) -> Self {
        BridgeError::Remote {
            code,
            message: message.into(),
        }
    }

    /// Convert to the status code carried in a response trailer.
    ///
    /// - 2: Unknown (business function failure)
    /// - 3: Invalid argument (codec could not read or write a message)
    /// - 5: Not found (no such service/method)
    /// - 12: Unimplemented
    /// - 13: Internal
    ///
    /// Remote errors keep the code they arrived with.
    pub fn to_status_code(&self) -> u32 {
        match self {
            BridgeError::Invocation { .. } => 2,

            BridgeError::TypeMismatch { .. }
            | BridgeError::Malformed { .. }
            | BridgeError::FrameTooLarge { .. } => 3,

            BridgeError::UnknownPath { .. } => 5,

            BridgeError::NotSupported { .. } => 12,

            BridgeError::Remote { code, .. } => *code,

            _ => 13,
        }
    }
}
