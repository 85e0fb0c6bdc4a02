//! Frame producer and consumer contracts
//!
//! A [`FrameSource`] is the acquisition side of the hardware boundary: the
//! router pulls frames from it one at a time. A [`FrameConsumer`] is the
//! generation side: frames received from the network are handed to it.

use async_trait::async_trait;
use stream_protocol::SampleFrame;

use crate::calibration::{Calibration, FilterCoefficients};
use crate::error::{SinkError, SourceError};

/// Producer of sample frames
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame
    ///
    /// `Ok(None)` means the source has no more frames and the session ends.
    async fn next_frame(&mut self) -> Result<Option<SampleFrame>, SourceError>;

    /// Per-channel calibration of the front end
    fn calibration(&self) -> Calibration {
        Calibration::default()
    }

    /// Program the front-end equalization filters before the first frame
    fn configure_filters(&mut self, _ch1: FilterCoefficients, _ch2: FilterCoefficients) {}

    /// Release the acquisition hardware
    async fn stop(&mut self) {}
}

/// Consumer of generated sample frames
#[async_trait]
pub trait FrameConsumer: Send {
    /// Hand one frame to the generation front end
    async fn consume(&mut self, frame: SampleFrame) -> Result<(), SinkError>;

    /// Release the generation hardware
    async fn stop(&mut self) {}
}
