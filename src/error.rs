//! Error types for can-bridge.

use thiserror::Error;

use crate::bus::BusError;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure reported by the bus collaborator.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Frame fields outside classic CAN limits.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame could not be turned into a wire record.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A wire record could not be turned into a frame.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Accept/read/write failure on the peer connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer's outbound queue is full; the record was dropped.
    #[error("Peer backlog full")]
    PeerBacklogFull,

    /// The bus has no cyclic scheduler.
    #[error("Cyclic messages not supported")]
    CyclicUnsupported,

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
