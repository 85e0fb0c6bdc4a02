//! Per-channel calibration and unit conversion
//!
//! Channel payloads carry little-endian signed converter codes (`i8` for 8-bit
//! frames, `i16` for 16-bit frames). Calibration corrects each code with an
//! integer offset and a gain factor; volt conversion maps a code onto the
//! channel's full-scale voltage.

use stream_protocol::{ModeFlags, Resolution, SampleFrame};

/// Hardware equalization filter coefficients
///
/// Opaque to the router: they are handed back to the source, which programs
/// them into the acquisition front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCoefficients {
    pub aa: u32,
    pub bb: u32,
    pub kk: u32,
    pub pp: u32,
}

impl Default for FilterCoefficients {
    /// Pass-through filter
    fn default() -> Self {
        Self {
            aa: 0,
            bb: 0,
            kk: 0x00FF_FFFF,
            pp: 0,
        }
    }
}

/// Calibration parameters for one input channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    /// Code measured with the input shorted
    pub offset: i32,
    /// Multiplicative correction, 1.0 when nominal
    pub gain: f32,
    /// Voltage represented by the largest positive code
    pub full_scale_volts: f32,
    /// Front-end equalization filter
    pub filter: FilterCoefficients,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            offset: 0,
            gain: 1.0,
            full_scale_volts: 1.0,
            filter: FilterCoefficients::default(),
        }
    }
}

impl ChannelCalibration {
    /// Convert a stored full-scale gain word into volts
    ///
    /// The word encodes the full-scale voltage as a fraction of 100 V over
    /// 2^32. A zero word means the channel was never calibrated.
    pub fn full_scale_from_word(word: u32) -> f32 {
        if word == 0 {
            return 1.0;
        }
        (f64::from(word) * 100.0 / (1u64 << 32) as f64) as f32
    }

    /// Apply offset and gain to one code, saturating at the code range
    pub fn correct(&self, code: i32, resolution: Resolution) -> i32 {
        let (min, max) = code_range(resolution);
        let corrected = ((code - self.offset) as f32 * self.gain).round();
        (corrected as i64).clamp(i64::from(min), i64::from(max)) as i32
    }

    /// Convert a code to volts
    ///
    /// When `calibrated` is false the code is corrected first.
    pub fn to_volts(&self, code: i32, resolution: Resolution, calibrated: bool) -> f32 {
        let (_, max) = code_range(resolution);
        let code = if calibrated {
            code as f32
        } else {
            (code - self.offset) as f32 * self.gain
        };
        code / max as f32 * self.full_scale_volts
    }
}

/// Calibration for both channels as supplied by a frame source
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    pub ch1: ChannelCalibration,
    pub ch2: ChannelCalibration,
}

impl Calibration {
    /// Scale both channels' full-scale voltage, e.g. by an attenuator factor
    pub fn with_full_scale_factor(mut self, factor: f32) -> Self {
        self.ch1.full_scale_volts *= factor;
        self.ch2.full_scale_volts *= factor;
        self
    }

    /// Correct every code in `frame` in place and mark it calibrated
    pub fn apply(&self, frame: &mut SampleFrame) {
        let resolution = frame.resolution;
        correct_channel(&mut frame.ch1, resolution, &self.ch1);
        correct_channel(&mut frame.ch2, resolution, &self.ch2);
        frame.mode = frame.mode.with(ModeFlags::CALIBRATED);
    }
}

fn correct_channel(bytes: &mut [u8], resolution: Resolution, cal: &ChannelCalibration) {
    match resolution {
        Resolution::Bits8 => {
            for b in bytes.iter_mut() {
                *b = cal.correct(i32::from(*b as i8), resolution) as i8 as u8;
            }
        }
        Resolution::Bits16 => {
            for chunk in bytes.chunks_exact_mut(2) {
                let code = i16::from_le_bytes([chunk[0], chunk[1]]);
                let corrected = cal.correct(i32::from(code), resolution) as i16;
                chunk.copy_from_slice(&corrected.to_le_bytes());
            }
        }
    }
}

/// Smallest and largest signed code for a resolution
pub fn code_range(resolution: Resolution) -> (i32, i32) {
    match resolution {
        Resolution::Bits8 => (i32::from(i8::MIN), i32::from(i8::MAX)),
        Resolution::Bits16 => (i32::from(i16::MIN), i32::from(i16::MAX)),
    }
}

/// Decode a channel payload into signed codes
pub fn codes(bytes: &[u8], resolution: Resolution) -> Vec<i32> {
    match resolution {
        Resolution::Bits8 => bytes.iter().map(|b| i32::from(*b as i8)).collect(),
        Resolution::Bits16 => bytes
            .chunks_exact(2)
            .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
    }
}
