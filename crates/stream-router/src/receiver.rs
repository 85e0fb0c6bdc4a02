//! Client-side packet reception

use async_trait::async_trait;
use stream_protocol::StreamPacket;

use crate::error::SourceError;

/// Source of decoded packets from a data channel
#[async_trait]
pub trait PacketReceiver: Send {
    /// Wait for the next packet
    ///
    /// `Ok(None)` is end of stream. `SourceError::Malformed` drops one packet
    /// and the receiver stays usable.
    async fn next_packet(&mut self) -> Result<Option<StreamPacket>, SourceError>;
}

/// Tracks the sender's cumulative lost counter across received packets
#[derive(Debug, Default, Clone)]
pub struct LostTracker {
    last: Option<u64>,
}

impl LostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `packet` and return how many frames were lost since the
    /// previous packet
    pub fn observe(&mut self, packet: &StreamPacket) -> u64 {
        let delta = match self.last {
            Some(prev) => packet.lost.saturating_sub(prev),
            None => packet.lost,
        };
        self.last = Some(self.last.map_or(packet.lost, |prev| prev.max(packet.lost)));
        delta
    }

    /// Latest cumulative counter seen
    pub fn total(&self) -> u64 {
        self.last.unwrap_or(0)
    }
}
