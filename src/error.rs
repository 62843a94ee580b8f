//! Error types for the bridge

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed port text, missing device selection, port already bound,
    /// out-of-range tempo. Raised before any resource is opened.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A MIDI port failed to open, close or accept a message.
    #[error("Device error: {0}")]
    Device(String),

    /// An OSC packet or address that could not be parsed or encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A performance file that could not be read or parsed.
    #[error("File error ({path}): {reason}")]
    File { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn file(path: &std::path::Path, reason: impl ToString) -> Self {
        BridgeError::File {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
