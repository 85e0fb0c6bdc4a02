//! Board capability descriptor
//!
//! Resolved once at startup and consulted whenever settings are mutated or a
//! session is started. Keys for front-end features the board does not have
//! are pinned to their defaults.

use std::fmt;
use std::str::FromStr;

use stream_protocol::{
    encoded_len, Attenuator, Coupling, SettingKey, SettingsError, StreamSettings, Transport,
};

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_UDP_DATAGRAM: usize = 65_507;

/// Samples per channel in one hardware frame
pub const DEFAULT_SAMPLES_PER_FRAME: usize = 16_384;

/// Known board families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardModel {
    /// 125 MS/s, 14 bit
    Stemlab125_14,
    /// 125 MS/s, 14 bit, Z7020
    Stemlab125_14Z20,
    /// 122.88 MS/s, 16 bit
    Sdrlab122_16,
    /// 250 MS/s, 12 bit, switchable attenuator and coupling
    Signalab250_12,
    /// Software-only board
    Simulated,
}

impl BoardModel {
    pub fn name(self) -> &'static str {
        match self {
            BoardModel::Stemlab125_14 => "stemlab-125-14",
            BoardModel::Stemlab125_14Z20 => "stemlab-125-14-z20",
            BoardModel::Sdrlab122_16 => "sdrlab-122-16",
            BoardModel::Signalab250_12 => "signalab-250-12",
            BoardModel::Simulated => "simulated",
        }
    }
}

impl fmt::Display for BoardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BoardModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            BoardModel::Stemlab125_14,
            BoardModel::Stemlab125_14Z20,
            BoardModel::Sdrlab122_16,
            BoardModel::Signalab250_12,
            BoardModel::Simulated,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| format!("unknown board model: {s}"))
    }
}

/// What the attached board can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardCapabilities {
    /// Model string announced over discovery
    pub model: String,
    /// Switchable 1:1 / 1:20 input attenuator
    pub has_attenuator: bool,
    /// Switchable AC/DC input coupling
    pub has_ac_dc: bool,
    /// Factory calibration coefficients available
    pub has_calibration: bool,
    /// Samples per channel in one frame
    pub samples_per_frame: usize,
    /// Largest datagram the UDP transport may emit
    pub max_udp_datagram: usize,
}

impl BoardCapabilities {
    pub fn for_model(model: BoardModel) -> Self {
        let (has_attenuator, has_ac_dc) = match model {
            BoardModel::Signalab250_12 | BoardModel::Simulated => (true, true),
            _ => (false, false),
        };
        Self {
            model: model.name().to_string(),
            has_attenuator,
            has_ac_dc,
            has_calibration: true,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            max_udp_datagram: MAX_UDP_DATAGRAM,
        }
    }

    /// Whether `key` may be changed over the configuration channel
    pub fn is_mutable(&self, key: SettingKey) -> bool {
        match key {
            SettingKey::Attenuator => self.has_attenuator,
            SettingKey::Coupling => self.has_ac_dc,
            SettingKey::Calibration => self.has_calibration,
            _ => true,
        }
    }

    /// Reject a change to a key this board does not support
    pub fn check_mutable(&self, key: SettingKey) -> Result<(), SettingsError> {
        if self.is_mutable(key) {
            Ok(())
        } else {
            Err(SettingsError::Immutable(key.name().to_string()))
        }
    }

    /// Pin capability-absent keys to their defaults
    pub fn normalize(&self, settings: &mut StreamSettings) {
        if !self.has_attenuator {
            settings.attenuator = Attenuator::default();
        }
        if !self.has_ac_dc {
            settings.coupling = Coupling::default();
        }
        if !self.has_calibration {
            settings.calibration = false;
        }
    }

    /// Encoded size of one packet under `settings`
    pub fn packet_len(&self, settings: &StreamSettings) -> usize {
        encoded_len(
            self.samples_per_frame,
            settings.resolution,
            settings.channels.count(),
        )
    }

    /// Check `settings` can be streamed by this board
    pub fn validate(&self, settings: &StreamSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        if settings.protocol == Transport::Udp {
            let len = self.packet_len(settings);
            if len > self.max_udp_datagram {
                return Err(SettingsError::InvalidConfig(format!(
                    "{len}-byte packets exceed the {}-byte UDP datagram limit",
                    self.max_udp_datagram
                )));
            }
        }
        Ok(())
    }
}

impl Default for BoardCapabilities {
    fn default() -> Self {
        Self::for_model(BoardModel::Simulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_protocol::{ChannelSelection, Resolution};

    #[test]
    fn test_model_names_round_trip() {
        for model in [
            BoardModel::Stemlab125_14,
            BoardModel::Sdrlab122_16,
            BoardModel::Signalab250_12,
            BoardModel::Simulated,
        ] {
            assert_eq!(model.name().parse::<BoardModel>().unwrap(), model);
        }
        assert!("mystery".parse::<BoardModel>().is_err());
    }

    #[test]
    fn test_front_end_keys_follow_capabilities() {
        let caps = BoardCapabilities::for_model(BoardModel::Stemlab125_14);
        assert!(!caps.is_mutable(SettingKey::Attenuator));
        assert!(!caps.is_mutable(SettingKey::Coupling));
        assert!(caps.is_mutable(SettingKey::Port));
        assert_eq!(
            caps.check_mutable(SettingKey::Coupling),
            Err(SettingsError::Immutable("coupling".into()))
        );

        let caps = BoardCapabilities::for_model(BoardModel::Signalab250_12);
        assert!(caps.is_mutable(SettingKey::Attenuator));
    }

    #[test]
    fn test_normalize_pins_absent_features() {
        let caps = BoardCapabilities::for_model(BoardModel::Sdrlab122_16);
        let mut settings = StreamSettings {
            attenuator: Attenuator::A1To20,
            coupling: Coupling::Dc,
            ..Default::default()
        };
        caps.normalize(&mut settings);
        assert_eq!(settings.attenuator, Attenuator::A1To1);
        assert_eq!(settings.coupling, Coupling::Ac);
    }

    #[test]
    fn test_udp_datagram_limit() {
        let caps = BoardCapabilities::default();
        let mut settings = StreamSettings {
            protocol: Transport::Udp,
            resolution: Resolution::Bits16,
            channels: ChannelSelection::Ch1,
            ..Default::default()
        };
        assert!(caps.validate(&settings).is_ok());

        settings.channels = ChannelSelection::Both;
        assert!(matches!(
            caps.validate(&settings),
            Err(SettingsError::InvalidConfig(_))
        ));

        // TCP has no datagram bound
        settings.protocol = Transport::Tcp;
        assert!(caps.validate(&settings).is_ok());
    }
}
