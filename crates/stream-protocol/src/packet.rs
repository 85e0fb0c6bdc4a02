//! Binary streaming packet codec
//!
//! Each packet carries exactly one sample frame. The header is fixed-size and
//! written in network byte order; channel payloads follow verbatim.
//!
//! # Format
//!
//! ```text
//! offset  size  field
//! 0       8     sequence id (u64)
//! 8       8     lost frames, cumulative for the session (u64)
//! 16      4     decimation rate (u32)
//! 20      4     resolution in bits, 8 or 16 (u32)
//! 24      4     mode flags (u32)
//! 28      4     ADC/DAC bit depth (u32)
//! 32      4     channel 1 payload length in bytes (u32)
//! 36      4     channel 2 payload length in bytes (u32)
//! 40      n1    channel 1 samples
//! 40+n1   n2    channel 2 samples
//! ```
//!
//! A disabled channel is encoded with a zero length. The same bytes are used
//! for TCP (back to back on the stream) and UDP (one packet per datagram).

use crate::error::PacketError;

/// Size of the fixed packet header in bytes
pub const HEADER_LEN: usize = 40;

/// Sample width carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "u32", try_from = "u32"))]
pub enum Resolution {
    /// One signed byte per sample
    Bits8,
    /// Two bytes per sample, signed little-endian
    Bits16,
}

impl Resolution {
    /// Number of bits per sample
    pub fn bits(self) -> u32 {
        match self {
            Resolution::Bits8 => 8,
            Resolution::Bits16 => 16,
        }
    }

    /// Number of bytes per sample
    pub fn sample_width(self) -> usize {
        match self {
            Resolution::Bits8 => 1,
            Resolution::Bits16 => 2,
        }
    }

    /// Parse the on-wire bit count
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Resolution::Bits8),
            16 => Some(Resolution::Bits16),
            _ => None,
        }
    }
}

impl From<Resolution> for u32 {
    fn from(resolution: Resolution) -> Self {
        resolution.bits()
    }
}

impl TryFrom<u32> for Resolution {
    type Error = String;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Resolution::from_bits(bits).ok_or_else(|| format!("unsupported resolution: {bits} bits"))
    }
}

/// Mode flags describing where a frame came from and how it was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeFlags(pub u32);

impl ModeFlags {
    /// Frame was captured by the acquisition front end
    pub const ACQUISITION: u32 = 0x1;
    /// Frame is destined for the generation front end
    pub const GENERATION: u32 = 0x2;
    /// Calibration offset/gain were applied before transport
    pub const CALIBRATED: u32 = 0x4;
    /// Samples were taken through the 1:20 attenuator
    pub const ATTENUATED: u32 = 0x8;
    /// Front end was AC coupled
    pub const AC_COUPLED: u32 = 0x10;

    /// Check whether all bits of `flag` are set
    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Return a copy with `flag` set
    pub fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }
}

/// One capture or generation unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFrame {
    /// Monotonic sequence id within a session
    pub seq: u64,
    /// Sample width of both channel payloads
    pub resolution: Resolution,
    /// Decimation applied to the base sample clock
    pub rate: u32,
    /// Acquisition/generation mode flags
    pub mode: ModeFlags,
    /// Native converter bit depth (informational)
    pub bit_depth: u32,
    /// Channel 1 raw samples (empty when disabled)
    pub ch1: Vec<u8>,
    /// Channel 2 raw samples (empty when disabled)
    pub ch2: Vec<u8>,
}

impl SampleFrame {
    /// Create an acquisition frame with empty channels
    pub fn new(seq: u64, resolution: Resolution, rate: u32) -> Self {
        Self {
            seq,
            resolution,
            rate,
            mode: ModeFlags(ModeFlags::ACQUISITION),
            bit_depth: resolution.bits(),
            ch1: Vec::new(),
            ch2: Vec::new(),
        }
    }

    /// Set the channel 1 payload
    pub fn with_ch1(mut self, data: Vec<u8>) -> Self {
        self.ch1 = data;
        self
    }

    /// Set the channel 2 payload
    pub fn with_ch2(mut self, data: Vec<u8>) -> Self {
        self.ch2 = data;
        self
    }

    /// Set the mode flags
    pub fn with_mode(mut self, mode: ModeFlags) -> Self {
        self.mode = mode;
        self
    }

    /// Set the converter bit depth
    pub fn with_bit_depth(mut self, bits: u32) -> Self {
        self.bit_depth = bits;
        self
    }

    /// Combined payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.ch1.len() + self.ch2.len()
    }

    /// Number of samples per enabled channel
    pub fn samples_per_channel(&self) -> usize {
        self.ch1.len().max(self.ch2.len()) / self.resolution.sample_width()
    }

    /// Number of enabled channels
    pub fn channel_count(&self) -> usize {
        usize::from(!self.ch1.is_empty()) + usize::from(!self.ch2.is_empty())
    }

    /// Keep at most `samples` samples on each channel
    pub fn truncate_samples(&mut self, samples: usize) {
        let bytes = samples * self.resolution.sample_width();
        self.ch1.truncate(bytes);
        self.ch2.truncate(bytes);
    }
}

/// Wire projection of a frame plus the session's cumulative lost counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    /// The frame carried by this packet
    pub frame: SampleFrame,
    /// Frames dropped since the session started
    pub lost: u64,
}

impl StreamPacket {
    /// Pair a frame with the lost counter observed when it was produced
    pub fn new(frame: SampleFrame, lost: u64) -> Self {
        Self { frame, lost }
    }

    /// Encode this packet into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.frame, self.lost)
    }
}

/// Size of the packet that carries `samples` samples on `channels` channels
pub fn encoded_len(samples: usize, resolution: Resolution, channels: usize) -> usize {
    HEADER_LEN + samples * resolution.sample_width() * channels
}

/// Encode a frame into a fresh buffer
pub fn encode(frame: &SampleFrame, lost: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + frame.payload_len());
    encode_into(frame, lost, &mut buf);
    buf
}

/// Encode a frame into `buf`, replacing its contents
///
/// Lets hot paths reuse one allocation for every packet of a session.
pub fn encode_into(frame: &SampleFrame, lost: u64, buf: &mut Vec<u8>) {
    buf.clear();
    buf.reserve(HEADER_LEN + frame.payload_len());
    buf.extend_from_slice(&frame.seq.to_be_bytes());
    buf.extend_from_slice(&lost.to_be_bytes());
    buf.extend_from_slice(&frame.rate.to_be_bytes());
    buf.extend_from_slice(&frame.resolution.bits().to_be_bytes());
    buf.extend_from_slice(&frame.mode.0.to_be_bytes());
    buf.extend_from_slice(&frame.bit_depth.to_be_bytes());
    buf.extend_from_slice(&(frame.ch1.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(frame.ch2.len() as u32).to_be_bytes());
    buf.extend_from_slice(&frame.ch1);
    buf.extend_from_slice(&frame.ch2);
}

/// Read the payload length declared by a header
///
/// Stream transports read [`HEADER_LEN`] bytes, call this to learn how many
/// more bytes belong to the packet, then hand the whole packet to [`decode`].
pub fn payload_len(header: &[u8]) -> Result<usize, PacketError> {
    if header.len() < HEADER_LEN {
        return Err(PacketError::MalformedPacket(format!(
            "truncated header: {} of {} bytes",
            header.len(),
            HEADER_LEN
        )));
    }
    let ch1 = read_u32(header, 32) as usize;
    let ch2 = read_u32(header, 36) as usize;
    ch1.checked_add(ch2)
        .ok_or_else(|| PacketError::MalformedPacket("payload length overflow".into()))
}

/// Decode one complete packet
///
/// Fails with [`PacketError::MalformedPacket`] when the declared channel
/// lengths disagree with the number of bytes actually received.
pub fn decode(bytes: &[u8]) -> Result<StreamPacket, PacketError> {
    let payload = payload_len(bytes)?;

    let bits = read_u32(bytes, 20);
    let resolution = Resolution::from_bits(bits)
        .ok_or_else(|| PacketError::MalformedPacket(format!("unsupported resolution: {bits}")))?;

    let ch1_len = read_u32(bytes, 32) as usize;
    let ch2_len = read_u32(bytes, 36) as usize;
    let width = resolution.sample_width();
    if ch1_len % width != 0 || ch2_len % width != 0 {
        return Err(PacketError::MalformedPacket(format!(
            "channel lengths {ch1_len}/{ch2_len} are not multiples of {width}-byte samples"
        )));
    }

    let received = bytes.len() - HEADER_LEN;
    if received != payload {
        return Err(PacketError::MalformedPacket(format!(
            "declared payload of {payload} bytes, received {received}"
        )));
    }

    let body = &bytes[HEADER_LEN..];
    let frame = SampleFrame {
        seq: read_u64(bytes, 0),
        resolution,
        rate: read_u32(bytes, 16),
        mode: ModeFlags(read_u32(bytes, 24)),
        bit_depth: read_u32(bytes, 28),
        ch1: body[..ch1_len].to_vec(),
        ch2: body[ch1_len..].to_vec(),
    };

    Ok(StreamPacket {
        frame,
        lost: read_u64(bytes, 8),
    })
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(raw)
}
