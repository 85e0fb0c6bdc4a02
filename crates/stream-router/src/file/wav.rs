//! RIFF wave encoding
//!
//! Standard 44-byte header; sizes are written as zero and patched when the
//! sink closes. Raw 8-bit codes are stored unsigned, raw 16-bit codes as
//! signed PCM and volts as 32-bit IEEE float.

use super::Columns;

/// Size of the RIFF header in bytes
pub const WAV_HEADER_SIZE: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Build a 44-byte header
///
/// ```text
/// [0-3]    "RIFF"          [22-23] channels
/// [4-7]    36 + data_size  [24-27] sample_rate
/// [8-11]   "WAVE"          [28-31] byte_rate
/// [12-15]  "fmt "          [32-33] block_align
/// [16-19]  16              [34-35] bits per sample
/// [20-21]  format code     [36-39] "data", [40-43] data_size
/// ```
pub fn wav_header(
    format_code: u16,
    sample_rate: u32,
    bits: u16,
    channels: u16,
    data_size: u32,
) -> [u8; WAV_HEADER_SIZE] {
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));

    let mut header = [0u8; WAV_HEADER_SIZE];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_size.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format_code.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    header
}

/// Interleaving wave encoder
#[derive(Debug)]
pub struct WavEncoder {
    sample_rate: u32,
    channels: u16,
    bits: u16,
    float: bool,
}

impl WavEncoder {
    pub fn new(sample_rate: u32, channels: u16, code_bits: u16, volts: bool) -> Self {
        Self {
            sample_rate,
            channels,
            bits: if volts { 32 } else { code_bits },
            float: volts,
        }
    }

    fn format_code(&self) -> u16 {
        if self.float {
            FORMAT_IEEE_FLOAT
        } else {
            FORMAT_PCM
        }
    }

    /// Header written when the file is created
    pub fn header(&self) -> Vec<u8> {
        wav_header(self.format_code(), self.sample_rate, self.bits, self.channels, 0).to_vec()
    }

    /// Append one frame's samples, interleaved by channel
    pub fn encode(&self, columns: &Columns, out: &mut Vec<u8>) {
        match columns {
            Columns::Codes(cols) => {
                for row in 0..columns.rows() {
                    for col in cols {
                        let code = col.get(row).copied().unwrap_or(0);
                        if self.bits == 8 {
                            out.push((code + 128).clamp(0, 255) as u8);
                        } else {
                            out.extend_from_slice(&(code as i16).to_le_bytes());
                        }
                    }
                }
            }
            Columns::Volts(cols) => {
                for row in 0..columns.rows() {
                    for col in cols {
                        out.extend_from_slice(&col.get(row).copied().unwrap_or(0.0).to_le_bytes());
                    }
                }
            }
        }
    }

    /// Header patches once `data_size` bytes of samples were written
    pub fn finish(&self, data_size: u64) -> Vec<(u64, Vec<u8>)> {
        let data_size = u32::try_from(data_size).unwrap_or(u32::MAX - 36);
        vec![
            (4, data_size.saturating_add(36).to_le_bytes().to_vec()),
            (40, data_size.to_le_bytes().to_vec()),
        ]
    }
}
