//! Simulated generation front end

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_protocol::SampleFrame;
use stream_router::{FrameConsumer, SinkError};
use tracing::debug;

/// Everything the simulated DAC has been fed
#[derive(Debug, Default)]
pub struct DacState {
    pub frames: Vec<SampleFrame>,
    pub samples: u64,
    pub stopped: bool,
}

/// Frame consumer that records frames instead of driving an output
#[derive(Debug, Clone, Default)]
pub struct SimulatedDac {
    state: Arc<Mutex<DacState>>,
    capacity: Option<usize>,
}

impl SimulatedDac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `OutOfSpace` once `frames` frames are buffered
    pub fn with_capacity(mut self, frames: usize) -> Self {
        self.capacity = Some(frames);
        self
    }

    /// Shared view of the recorded state
    pub fn state(&self) -> Arc<Mutex<DacState>> {
        Arc::clone(&self.state)
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }
}

#[async_trait]
impl FrameConsumer for SimulatedDac {
    async fn consume(&mut self, frame: SampleFrame) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(SinkError::Closed);
        }
        if self.capacity.is_some_and(|cap| state.frames.len() >= cap) {
            return Err(SinkError::OutOfSpace);
        }
        state.samples += frame.samples_per_channel() as u64;
        state.frames.push(frame);
        Ok(())
    }

    async fn stop(&mut self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            debug!(frames = state.frames.len(), "simulated DAC stopped");
        }
    }
}
