//! Error types for the scheduler and ACK handler.

use std::io;

use thiserror::Error;

use crate::types::PacketNumber;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    // Receive-side errors
    #[error("invalid packet number: {0}")]
    InvalidPacketNumber(PacketNumber),

    #[error("too many outstanding received ACK ranges (limit {limit})")]
    TooManyOutstandingRanges { limit: usize },

    // Send-side errors
    #[error("too many outstanding non-acked and non-retransmitted packets")]
    TooManyTrackedPackets,

    #[error("packing failed: {0}")]
    Packing(String),

    #[error("send failed: {0}")]
    Send(String),

    // Policy errors
    #[error("closing: zero tolerance ({0})")]
    ZeroToleranceAbort(String),

    #[error("linear program failed: {0}")]
    LinearProgram(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<minilp::Error> for Error {
    fn from(e: minilp::Error) -> Self {
        Self::LinearProgram(e.to_string())
    }
}
