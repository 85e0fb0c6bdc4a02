//! Error types for the control plane

use stream_protocol::SettingsError;
use thiserror::Error;

/// Errors that can occur in the control plane
#[derive(Debug, Error)]
pub enum ControlError {
    /// Rejected settings mutation
    #[error(transparent)]
    InvalidConfig(#[from] SettingsError),

    /// Socket or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be written to durable storage
    #[error("failed to persist settings to {path}: {reason}")]
    Persist {
        /// Settings file path
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Settings could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
