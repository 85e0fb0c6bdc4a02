//! Streaming Simulation Library
//!
//! Hardware-free stand-ins for the collaborators at the edge of the
//! streaming pipeline:
//!
//! - **SimulatedAdc**: a [`FrameSource`](stream_router::FrameSource) producing
//!   synthetic waveforms at the converter's real frame cadence
//! - **SimulatedDac**: a [`FrameConsumer`](stream_router::FrameConsumer) that
//!   records generated frames
//! - **RecordingSink / GatedSink**: sinks that capture packets or refuse and
//!   delay chosen frames, for exercising loss accounting
//!
//! # Example
//!
//! ```rust
//! use stream_protocol::StreamSettings;
//! use stream_sim::{SimulatedAdc, SimulatedAdcConfig};
//!
//! let settings = StreamSettings::default();
//! let adc = SimulatedAdc::new(SimulatedAdcConfig::from_settings(&settings, 1024));
//! let frame = adc.generate(0);
//! assert_eq!(frame.ch1.len(), 1024);
//! ```

pub mod adc;
pub mod dac;
pub mod sinks;

pub use adc::{frame_period, SimulatedAdc, SimulatedAdcConfig, Waveform, BASE_CLOCK_HZ};
pub use dac::{DacState, SimulatedDac};
pub use sinks::{GatedSink, RecordingSink};
