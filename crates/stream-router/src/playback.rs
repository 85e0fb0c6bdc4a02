//! Generation direction: network packets to a frame consumer

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SinkError, SourceError};
use crate::receiver::{LostTracker, PacketReceiver};
use crate::source::FrameConsumer;

/// Outcome of a playback run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Frames handed to the consumer
    pub frames: u64,
    /// Sender's cumulative lost counter at the last packet
    pub lost: u64,
    /// Packets that failed to decode and were skipped
    pub malformed: u64,
}

/// Feed received packets to `consumer` until stop or end of stream
///
/// Malformed packets are skipped. A receive or consumer failure ends the run
/// with an error; the consumer is stopped in every case.
pub async fn run_playback<R, C>(
    receiver: &mut R,
    consumer: &mut C,
    stop: CancellationToken,
) -> Result<PlaybackReport, PlaybackError>
where
    R: PacketReceiver + ?Sized,
    C: FrameConsumer + ?Sized,
{
    let mut tracker = LostTracker::new();
    let mut report = PlaybackReport {
        frames: 0,
        lost: 0,
        malformed: 0,
    };

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break Ok(()),
            next = receiver.next_packet() => next,
        };

        let packet = match next {
            Ok(Some(packet)) => packet,
            Ok(None) => break Ok(()),
            Err(SourceError::Malformed(e)) => {
                report.malformed += 1;
                warn!(error = %e, "dropping malformed packet");
                continue;
            }
            Err(e) => break Err(PlaybackError::Receive(e)),
        };

        let delta = tracker.observe(&packet);
        if delta > 0 {
            debug!(seq = packet.frame.seq, delta, total = tracker.total(), "sender reported lost frames");
        }

        if let Err(e) = consumer.consume(packet.frame).await {
            break Err(PlaybackError::Consume(e));
        }
        report.frames += 1;
    };

    consumer.stop().await;
    report.lost = tracker.total();
    info!(frames = report.frames, lost = report.lost, "playback ended");
    result.map(|()| report)
}

/// Errors that end a playback run
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("receive failed: {0}")]
    Receive(SourceError),
    #[error("consumer failed: {0}")]
    Consume(SinkError),
}
