//! Streaming settings model and key schema
//!
//! `StreamSettings` is the single document describing how the next streaming
//! session is set up. Remote clients address its fields through
//! [`SettingKey`] names on the configuration channel.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::command::FieldValue;
use crate::error::SettingsError;
use crate::packet::Resolution;
use crate::DEFAULT_DATA_PORT;

/// Largest decimation accepted by the acquisition front end
pub const MAX_DECIMATION: u32 = 65_536;

/// Largest finite sample limit
pub const MAX_SAMPLE_LIMIT: i64 = 2_000_000_000;

/// Where a session delivers its frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Destination {
    /// Stream to a remote client
    #[default]
    Network,
    /// Save to local storage
    File,
}

/// Network transport of the data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Transport {
    /// One persistent stream connection
    #[default]
    Tcp,
    /// One datagram per packet
    Udp,
}

/// Which input channels are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChannelSelection {
    /// Channel 1 only
    #[default]
    Ch1,
    /// Channel 2 only
    Ch2,
    /// Both channels
    Both,
}

impl ChannelSelection {
    /// Whether channel 1 is captured
    pub fn ch1(self) -> bool {
        matches!(self, ChannelSelection::Ch1 | ChannelSelection::Both)
    }

    /// Whether channel 2 is captured
    pub fn ch2(self) -> bool {
        matches!(self, ChannelSelection::Ch2 | ChannelSelection::Both)
    }

    /// Number of captured channels
    pub fn count(self) -> usize {
        usize::from(self.ch1()) + usize::from(self.ch2())
    }
}

/// Container format of the file sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SaveFormat {
    /// RIFF wave
    #[default]
    Wav,
    /// NI TDMS
    Tdms,
    /// Comma separated text
    Csv,
}

impl SaveFormat {
    /// File extension without the dot
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Wav => "wav",
            SaveFormat::Tdms => "tdms",
            SaveFormat::Csv => "csv",
        }
    }
}

/// Whether saved samples stay as converter codes or become volts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValueDomain {
    /// Integer converter codes
    #[default]
    Raw,
    /// Floating point volts
    Volt,
}

/// Input attenuator setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Attenuator {
    /// 1:1 (±1 V full scale)
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "1:1"))]
    A1To1,
    /// 1:20 (±20 V full scale)
    #[cfg_attr(feature = "serde", serde(rename = "1:20"))]
    A1To20,
}

impl Attenuator {
    /// Factor applied to the front-end full scale
    pub fn factor(self) -> f32 {
        match self {
            Attenuator::A1To1 => 1.0,
            Attenuator::A1To20 => 20.0,
        }
    }
}

/// Input coupling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Coupling {
    /// AC coupled
    #[default]
    Ac,
    /// DC coupled
    Dc,
}

/// Complete streaming configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamSettings {
    /// Address the control plane listens on
    pub host: Ipv4Addr,
    /// Data channel port
    pub port: u16,
    /// Network or file delivery
    pub destination: Destination,
    /// TCP or UDP when delivering over the network
    pub protocol: Transport,
    /// Captured channels
    pub channels: ChannelSelection,
    /// Sample width
    pub resolution: Resolution,
    /// Decimation of the base sample clock
    pub decimation: u32,
    /// Per-channel sample limit, -1 for unbounded
    pub samples: i64,
    /// File container format
    pub format: SaveFormat,
    /// Raw codes or volts in files
    pub value_type: ValueDomain,
    /// Apply calibration coefficients
    pub calibration: bool,
    /// Input attenuator
    pub attenuator: Attenuator,
    /// Input coupling
    pub coupling: Coupling,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: DEFAULT_DATA_PORT,
            destination: Destination::Network,
            protocol: Transport::Tcp,
            channels: ChannelSelection::Ch1,
            resolution: Resolution::Bits8,
            decimation: 4,
            samples: -1,
            format: SaveFormat::Wav,
            value_type: ValueDomain::Raw,
            calibration: true,
            attenuator: Attenuator::A1To1,
            coupling: Coupling::Ac,
        }
    }
}

/// Names of the remotely addressable settings fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Host,
    Port,
    Destination,
    Protocol,
    Channels,
    Resolution,
    Decimation,
    Samples,
    Format,
    ValueType,
    Calibration,
    Attenuator,
    Coupling,
}

impl SettingKey {
    /// Every key in document order
    pub const ALL: [SettingKey; 13] = [
        SettingKey::Host,
        SettingKey::Port,
        SettingKey::Destination,
        SettingKey::Protocol,
        SettingKey::Channels,
        SettingKey::Resolution,
        SettingKey::Decimation,
        SettingKey::Samples,
        SettingKey::Format,
        SettingKey::ValueType,
        SettingKey::Calibration,
        SettingKey::Attenuator,
        SettingKey::Coupling,
    ];

    /// Wire name of the key
    pub fn name(self) -> &'static str {
        match self {
            SettingKey::Host => "host",
            SettingKey::Port => "port",
            SettingKey::Destination => "destination",
            SettingKey::Protocol => "protocol",
            SettingKey::Channels => "channels",
            SettingKey::Resolution => "resolution",
            SettingKey::Decimation => "decimation",
            SettingKey::Samples => "samples",
            SettingKey::Format => "format",
            SettingKey::ValueType => "value_type",
            SettingKey::Calibration => "calibration",
            SettingKey::Attenuator => "attenuator",
            SettingKey::Coupling => "coupling",
        }
    }

    /// Human readable description used by annotated output
    pub fn description(self) -> &'static str {
        match self {
            SettingKey::Host => "control plane address",
            SettingKey::Port => "data channel port",
            SettingKey::Destination => "network streaming or local file",
            SettingKey::Protocol => "data channel transport",
            SettingKey::Channels => "captured channels",
            SettingKey::Resolution => "bits per sample",
            SettingKey::Decimation => "base clock divisor",
            SettingKey::Samples => "per-channel sample limit, -1 for none",
            SettingKey::Format => "file container format",
            SettingKey::ValueType => "raw codes or volts in files",
            SettingKey::Calibration => "apply calibration coefficients",
            SettingKey::Attenuator => "input attenuator",
            SettingKey::Coupling => "input coupling",
        }
    }

    /// Look up a key by its wire name
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl StreamSettings {
    /// Sample limit as an option (None when unbounded)
    pub fn sample_limit(&self) -> Option<u64> {
        u64::try_from(self.samples).ok()
    }

    /// Render the current value of `key` in its wire form
    pub fn value_string(&self, key: SettingKey) -> String {
        match key {
            SettingKey::Host => self.host.to_string(),
            SettingKey::Port => self.port.to_string(),
            SettingKey::Destination => match self.destination {
                Destination::Network => "network".into(),
                Destination::File => "file".into(),
            },
            SettingKey::Protocol => match self.protocol {
                Transport::Tcp => "tcp".into(),
                Transport::Udp => "udp".into(),
            },
            SettingKey::Channels => match self.channels {
                ChannelSelection::Ch1 => "ch1".into(),
                ChannelSelection::Ch2 => "ch2".into(),
                ChannelSelection::Both => "both".into(),
            },
            SettingKey::Resolution => self.resolution.bits().to_string(),
            SettingKey::Decimation => self.decimation.to_string(),
            SettingKey::Samples => self.samples.to_string(),
            SettingKey::Format => self.format.extension().into(),
            SettingKey::ValueType => match self.value_type {
                ValueDomain::Raw => "raw".into(),
                ValueDomain::Volt => "volt".into(),
            },
            SettingKey::Calibration => self.calibration.to_string(),
            SettingKey::Attenuator => match self.attenuator {
                Attenuator::A1To1 => "1:1".into(),
                Attenuator::A1To20 => "1:20".into(),
            },
            SettingKey::Coupling => match self.coupling {
                Coupling::Ac => "ac".into(),
                Coupling::Dc => "dc".into(),
            },
        }
    }

    /// Validate `value` against the schema of `key` and store it
    ///
    /// On error the settings are left untouched.
    pub fn apply_field(&mut self, key: SettingKey, value: &FieldValue) -> Result<(), SettingsError> {
        let invalid = |reason: &str| SettingsError::InvalidValue {
            key: key.name().to_string(),
            reason: reason.to_string(),
        };

        match key {
            SettingKey::Host => {
                let text = value.as_text();
                self.host = Ipv4Addr::from_str(&text).map_err(|_| invalid("expected IPv4 address"))?;
            }
            SettingKey::Port => {
                let port = value.as_int().ok_or_else(|| invalid("expected integer"))?;
                self.port = u16::try_from(port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| invalid("expected 1..=65535"))?;
            }
            SettingKey::Destination => {
                self.destination = match value.as_text().to_ascii_lowercase().as_str() {
                    "network" | "net" => Destination::Network,
                    "file" => Destination::File,
                    _ => return Err(invalid("expected network or file")),
                };
            }
            SettingKey::Protocol => {
                self.protocol = match value.as_text().to_ascii_lowercase().as_str() {
                    "tcp" => Transport::Tcp,
                    "udp" => Transport::Udp,
                    _ => return Err(invalid("expected tcp or udp")),
                };
            }
            SettingKey::Channels => {
                self.channels = match value.as_text().to_ascii_lowercase().as_str() {
                    "ch1" | "1" => ChannelSelection::Ch1,
                    "ch2" | "2" => ChannelSelection::Ch2,
                    "both" | "3" => ChannelSelection::Both,
                    _ => return Err(invalid("expected ch1, ch2 or both")),
                };
            }
            SettingKey::Resolution => {
                let bits = value.as_int().ok_or_else(|| invalid("expected 8 or 16"))?;
                self.resolution = u32::try_from(bits)
                    .ok()
                    .and_then(Resolution::from_bits)
                    .ok_or_else(|| invalid("expected 8 or 16"))?;
            }
            SettingKey::Decimation => {
                let rate = value.as_int().ok_or_else(|| invalid("expected integer"))?;
                self.decimation = u32::try_from(rate)
                    .ok()
                    .filter(|r| (1..=MAX_DECIMATION).contains(r))
                    .ok_or_else(|| invalid("expected 1..=65536"))?;
            }
            SettingKey::Samples => {
                let samples = value.as_int().ok_or_else(|| invalid("expected integer"))?;
                if samples != -1 && !(1..=MAX_SAMPLE_LIMIT).contains(&samples) {
                    return Err(invalid("expected -1 or 1..=2000000000"));
                }
                self.samples = samples;
            }
            SettingKey::Format => {
                self.format = match value.as_text().to_ascii_lowercase().as_str() {
                    "wav" => SaveFormat::Wav,
                    "tdms" => SaveFormat::Tdms,
                    "csv" => SaveFormat::Csv,
                    _ => return Err(invalid("expected wav, tdms or csv")),
                };
            }
            SettingKey::ValueType => {
                self.value_type = match value.as_text().to_ascii_lowercase().as_str() {
                    "raw" => ValueDomain::Raw,
                    "volt" => ValueDomain::Volt,
                    _ => return Err(invalid("expected raw or volt")),
                };
            }
            SettingKey::Calibration => {
                self.calibration = value.as_bool().ok_or_else(|| invalid("expected boolean"))?;
            }
            SettingKey::Attenuator => {
                self.attenuator = match value.as_text().as_str() {
                    "1:1" | "1" => Attenuator::A1To1,
                    "1:20" | "20" => Attenuator::A1To20,
                    _ => return Err(invalid("expected 1:1 or 1:20")),
                };
            }
            SettingKey::Coupling => {
                self.coupling = match value.as_text().to_ascii_lowercase().as_str() {
                    "ac" => Coupling::Ac,
                    "dc" => Coupling::Dc,
                    _ => return Err(invalid("expected ac or dc")),
                };
            }
        }
        Ok(())
    }

    /// Check that the settings describe a session that can be started
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.channels.count() == 0 {
            return Err(SettingsError::InvalidConfig("no channel selected".into()));
        }
        if self.destination == Destination::Network && self.port == 0 {
            return Err(SettingsError::InvalidConfig("data port is not set".into()));
        }
        if !(1..=MAX_DECIMATION).contains(&self.decimation) {
            return Err(SettingsError::InvalidConfig(format!(
                "decimation {} out of range",
                self.decimation
            )));
        }
        if self.samples == 0 {
            return Err(SettingsError::InvalidConfig("sample limit of zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lookup_is_case_insensitive() {
        assert_eq!(SettingKey::parse("PORT"), Some(SettingKey::Port));
        assert_eq!(SettingKey::parse(" value_type "), Some(SettingKey::ValueType));
        assert_eq!(SettingKey::parse("bogus"), None);
    }

    #[test]
    fn test_apply_valid_fields() {
        let mut s = StreamSettings::default();
        s.apply_field(SettingKey::Protocol, &FieldValue::Str("UDP".into())).unwrap();
        s.apply_field(SettingKey::Port, &FieldValue::Int(9000)).unwrap();
        s.apply_field(SettingKey::Resolution, &FieldValue::Int(16)).unwrap();
        s.apply_field(SettingKey::Attenuator, &FieldValue::Str("1:20".into())).unwrap();
        s.apply_field(SettingKey::Calibration, &FieldValue::Int(0)).unwrap();

        assert_eq!(s.protocol, Transport::Udp);
        assert_eq!(s.port, 9000);
        assert_eq!(s.resolution, Resolution::Bits16);
        assert_eq!(s.attenuator, Attenuator::A1To20);
        assert!(!s.calibration);
    }

    #[test]
    fn test_apply_rejects_out_of_range_without_mutation() {
        let mut s = StreamSettings::default();
        let before = s.clone();

        assert!(s.apply_field(SettingKey::Port, &FieldValue::Int(70000)).is_err());
        assert!(s.apply_field(SettingKey::Port, &FieldValue::Int(0)).is_err());
        assert!(s.apply_field(SettingKey::Decimation, &FieldValue::Int(0)).is_err());
        assert!(s.apply_field(SettingKey::Samples, &FieldValue::Int(0)).is_err());
        assert!(s.apply_field(SettingKey::Resolution, &FieldValue::Int(12)).is_err());
        assert!(s.apply_field(SettingKey::Host, &FieldValue::Str("not-an-ip".into())).is_err());
        assert!(s.apply_field(SettingKey::Format, &FieldValue::Str("mp3".into())).is_err());

        assert_eq!(s, before);
    }

    #[test]
    fn test_value_string_round_trips_through_apply() {
        let mut source = StreamSettings::default();
        source.channels = ChannelSelection::Both;
        source.format = SaveFormat::Tdms;
        source.coupling = Coupling::Dc;

        let mut target = StreamSettings::default();
        for key in SettingKey::ALL {
            let value = FieldValue::infer(&source.value_string(key));
            target.apply_field(key, &value).unwrap();
        }
        assert_eq!(target, source);
    }

    #[test]
    fn test_sample_limit() {
        let mut s = StreamSettings::default();
        assert_eq!(s.sample_limit(), None);
        s.samples = 1000;
        assert_eq!(s.sample_limit(), Some(1000));
    }

    #[test]
    fn test_channel_selection() {
        assert_eq!(ChannelSelection::Both.count(), 2);
        assert!(ChannelSelection::Ch2.ch2());
        assert!(!ChannelSelection::Ch2.ch1());
    }
}
