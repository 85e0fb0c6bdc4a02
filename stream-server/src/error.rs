//! Error types for the orchestrator

use stream_protocol::SettingsError;
use stream_router::{RouterError, SinkError, SourceError};
use thiserror::Error;

/// Why a session could not be started or stopped
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Settings do not describe a streamable session
    #[error(transparent)]
    InvalidConfig(#[from] SettingsError),

    /// Frame source could not be opened
    #[error("source unavailable: {0}")]
    Source(#[from] SourceError),

    /// Sink could not be opened
    #[error("sink unavailable: {0}")]
    Sink(#[from] SinkError),

    /// Session task failed
    #[error(transparent)]
    Router(#[from] RouterError),
}
