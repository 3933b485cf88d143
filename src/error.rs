//! # Error Types
//!
//! Custom error types for the CRTP client using `thiserror`.

use thiserror::Error;

use crate::link::LinkError;

/// Main error type for the CRTP client
#[derive(Debug, Error)]
pub enum CrtpError {
    /// Raw transport failure reported by the link
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// The link disappeared while waiting for a reply (device removed)
    #[error("Link lost while waiting for a reply")]
    LinkLost,

    /// Malformed packet or payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Reply arrived but did not confirm the command
    #[error("CRTP protocol error: {0}")]
    Protocol(String),

    /// No TOC element with this full name
    #[error("Unknown TOC element: {0}")]
    UnknownElement(String),

    /// No logging block with this name or id
    #[error("Unknown logging block: {0}")]
    UnknownBlock(String),

    /// Requested Rust type does not match the element's type tag
    #[error("Type mismatch for {name}: element is {actual}, requested {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// Parameter is flagged read-only by the device
    #[error("Parameter is read-only: {0}")]
    ReadOnly(String),

    /// Element is known but no value has been received for it yet
    #[error("No value received yet for {0}")]
    NoValue(String),

    /// Logging frequency must be positive and finite
    #[error("Invalid logging frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Telemetry serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the CRTP client
pub type Result<T> = std::result::Result<T, CrtpError>;
