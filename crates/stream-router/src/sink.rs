//! Packet sink contract and lifecycle events

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use stream_protocol::{StartedKind, StreamPacket};
use tokio::sync::mpsc;

use crate::error::SinkError;

/// Transport behind a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Tcp,
    Udp,
    File,
}

impl SinkKind {
    /// Acknowledgement kind announced when a session using this sink starts
    pub fn started_kind(self) -> StartedKind {
        match self {
            SinkKind::Tcp => StartedKind::Tcp,
            SinkKind::Udp => StartedKind::Udp,
            SinkKind::File => StartedKind::File,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Tcp => write!(f, "TCP"),
            SinkKind::Udp => write!(f, "UDP"),
            SinkKind::File => write!(f, "file"),
        }
    }
}

/// Connection lifecycle notifications emitted by sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A data client attached
    Connected { peer: SocketAddr },
    /// The data client went away
    Disconnected { peer: SocketAddr },
    /// A write failed
    Error { message: String },
}

/// Destination for encoded packets
#[async_trait]
pub trait PacketSink: Send {
    /// Transport kind
    fn kind(&self) -> SinkKind;

    /// Wait until there is a peer to deliver to
    ///
    /// Must be cancel-safe: a stopping session abandons this wait. Sinks
    /// without a peer to wait for are always ready.
    async fn ready(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Deliver one packet
    ///
    /// Once started, a send runs to completion or to a transport error; it is
    /// never abandoned halfway. `SinkError::Rejected` drops only this packet;
    /// any other error ends the session.
    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError>;

    /// Flush and release the sink
    ///
    /// Calling `close` more than once is a no-op.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Optional lifecycle event channel shared by the network sinks
#[derive(Debug, Clone, Default)]
pub(crate) struct EventTap(Option<mpsc::Sender<SinkEvent>>);

impl EventTap {
    pub(crate) fn new(tx: mpsc::Sender<SinkEvent>) -> Self {
        Self(Some(tx))
    }

    pub(crate) async fn emit(&self, event: SinkEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}
