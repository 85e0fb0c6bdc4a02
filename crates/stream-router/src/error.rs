//! Error types for sources, sinks and the session pipeline

use std::io;

use stream_protocol::PacketError;
use thiserror::Error;

/// Errors reported by a packet sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection reset, unreachable peer or other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Local storage has no room for the next frame
    #[error("out of space")]
    OutOfSpace,

    /// Sink was already closed
    #[error("sink closed")]
    Closed,

    /// This one packet was not accepted; the sink stays usable
    #[error("packet rejected: {0}")]
    Rejected(String),

    /// File I/O failure other than running out of space
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl SinkError {
    /// Classify an I/O error raised while writing to local storage
    pub fn from_io(err: io::Error) -> Self {
        if is_no_space(&err) {
            SinkError::OutOfSpace
        } else {
            SinkError::Io(err)
        }
    }

    /// Classify an I/O error raised by a network transport
    pub fn from_transport(err: io::Error) -> Self {
        SinkError::Transport(err.to_string())
    }

    /// Whether the session can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SinkError::Rejected(_))
    }
}

#[cfg(unix)]
fn is_no_space(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn is_no_space(_err: &io::Error) -> bool {
    false
}

/// Errors reported by a frame source or packet receiver
#[derive(Debug, Error)]
pub enum SourceError {
    /// Acquisition hardware or generator failure
    #[error("device error: {0}")]
    Device(String),

    /// I/O error while receiving packets
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received bytes are not a valid packet
    #[error(transparent)]
    Malformed(#[from] PacketError),
}

/// Errors from spawning or joining a session
#[derive(Debug, Error)]
pub enum RouterError {
    /// The session task panicked or was aborted
    #[error("session task failed: {0}")]
    Join(String),

    /// Sink could not be opened
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Source could not be opened
    #[error(transparent)]
    Source(#[from] SourceError),
}
