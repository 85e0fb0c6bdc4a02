//! Simulated acquisition front end
//!
//! Produces frames of synthetic waveforms at the cadence a real converter
//! would deliver them for the configured decimation and frame size.

use std::f32::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use stream_protocol::{ChannelSelection, Resolution, SampleFrame, StreamSettings};
use stream_router::{Calibration, FilterCoefficients, FrameSource, SourceError};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Sample clock of the simulated converter
pub const BASE_CLOCK_HZ: u32 = 125_000_000;

/// Shortest frame period the simulator will produce at
pub const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Synthetic signal shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Sine completing `cycles` periods per frame
    Sine { cycles: f32 },
    /// Sawtooth across the full code range once per frame
    Ramp,
    /// Square wave completing `cycles` periods per frame
    Square { cycles: f32 },
    /// Fixed code
    Constant(i32),
}

impl Waveform {
    /// Value in -1.0..=1.0 at `position` (0.0..1.0 through the frame)
    fn level(self, position: f32) -> f32 {
        match self {
            Waveform::Sine { cycles } => (TAU * cycles * position).sin(),
            Waveform::Ramp => position * 2.0 - 1.0,
            Waveform::Square { cycles } => {
                if (cycles * position).fract() < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Constant(_) => 0.0,
        }
    }
}

/// Configuration of a simulated converter
#[derive(Debug, Clone)]
pub struct SimulatedAdcConfig {
    pub resolution: Resolution,
    pub channels: ChannelSelection,
    pub decimation: u32,
    pub samples_per_frame: usize,
    /// Time between frames
    pub period: Duration,
    pub ch1: Waveform,
    pub ch2: Waveform,
    /// Peak level as a fraction of full scale
    pub amplitude: f32,
    pub calibration: Calibration,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

impl SimulatedAdcConfig {
    /// Converter matching a settings document
    pub fn from_settings(settings: &StreamSettings, samples_per_frame: usize) -> Self {
        Self {
            resolution: settings.resolution,
            channels: settings.channels,
            decimation: settings.decimation,
            samples_per_frame,
            period: frame_period(settings.decimation, samples_per_frame),
            ch1: Waveform::Sine { cycles: 4.0 },
            ch2: Waveform::Ramp,
            amplitude: 0.8,
            calibration: Calibration::default()
                .with_full_scale_factor(settings.attenuator.factor()),
            max_frames: None,
        }
    }
}

/// Real-time period of a frame, never shorter than [`MIN_FRAME_PERIOD`]
pub fn frame_period(decimation: u32, samples_per_frame: usize) -> Duration {
    let rate = f64::from(BASE_CLOCK_HZ) / f64::from(decimation.max(1));
    Duration::from_secs_f64(samples_per_frame as f64 / rate).max(MIN_FRAME_PERIOD)
}

/// Frame source backed by a waveform generator
pub struct SimulatedAdc {
    config: SimulatedAdcConfig,
    seq: u64,
    ticker: Option<Interval>,
    filters: Option<(FilterCoefficients, FilterCoefficients)>,
    stopped: bool,
}

impl SimulatedAdc {
    pub fn new(config: SimulatedAdcConfig) -> Self {
        info!(
            resolution = config.resolution.bits(),
            channels = ?config.channels,
            period_us = config.period.as_micros() as u64,
            "simulated ADC opened"
        );
        Self {
            config,
            seq: 0,
            ticker: None,
            filters: None,
            stopped: false,
        }
    }

    /// Filters programmed by the last session
    pub fn filters(&self) -> Option<(FilterCoefficients, FilterCoefficients)> {
        self.filters
    }

    /// Build the frame with sequence id `seq` without waiting
    pub fn generate(&self, seq: u64) -> SampleFrame {
        let mut frame = SampleFrame::new(seq, self.config.resolution, self.config.decimation);
        if self.config.channels.ch1() {
            frame.ch1 = self.channel_bytes(self.config.ch1);
        }
        if self.config.channels.ch2() {
            frame.ch2 = self.channel_bytes(self.config.ch2);
        }
        frame
    }

    fn channel_bytes(&self, waveform: Waveform) -> Vec<u8> {
        let n = self.config.samples_per_frame;
        let width = self.config.resolution.sample_width();
        let max = match self.config.resolution {
            Resolution::Bits8 => f32::from(i8::MAX),
            Resolution::Bits16 => f32::from(i16::MAX),
        };

        let mut out = Vec::with_capacity(n * width);
        for i in 0..n {
            let code = match waveform {
                Waveform::Constant(code) => code,
                w => (w.level(i as f32 / n as f32) * self.config.amplitude * max).round() as i32,
            };
            match self.config.resolution {
                Resolution::Bits8 => out.push(code.clamp(-128, 127) as i8 as u8),
                Resolution::Bits16 => out.extend_from_slice(
                    &(code.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16).to_le_bytes(),
                ),
            }
        }
        out
    }
}

#[async_trait]
impl FrameSource for SimulatedAdc {
    async fn next_frame(&mut self) -> Result<Option<SampleFrame>, SourceError> {
        if self.stopped {
            return Ok(None);
        }
        if self.config.max_frames.is_some_and(|max| self.seq >= max) {
            return Ok(None);
        }

        let period = self.config.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;

        let frame = self.generate(self.seq);
        self.seq += 1;
        Ok(Some(frame))
    }

    fn calibration(&self) -> Calibration {
        self.config.calibration
    }

    fn configure_filters(&mut self, ch1: FilterCoefficients, ch2: FilterCoefficients) {
        debug!(?ch1, ?ch2, "equalization filters programmed");
        self.filters = Some((ch1, ch2));
    }

    async fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            debug!(frames = self.seq, "simulated ADC stopped");
        }
    }
}
