//! Discovery datagrams
//!
//! A requester broadcasts [`DISCOVERY_QUERY`]; every listening board answers
//! with one announcement datagram:
//!
//! ```text
//! SM-ANNOUNCE;<model>;<config-port>[;<0|1>]
//! ```
//!
//! The trailing field is the optional liveness flag (1 while streaming).

use crate::error::PacketError;

/// Opaque marker sent by discovery requesters
pub const DISCOVERY_QUERY: &[u8] = b"SM-DISCOVER";

const ANNOUNCE_PREFIX: &str = "SM-ANNOUNCE";

/// One board's reply to a discovery query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAnnouncement {
    /// Board identity / model string
    pub model: String,
    /// Port of the board's configuration channel
    pub config_port: u16,
    /// Whether a streaming session is running, when the board reports it
    pub running: Option<bool>,
}

impl DiscoveryAnnouncement {
    pub fn new(model: impl Into<String>, config_port: u16) -> Self {
        Self {
            model: model.into(),
            config_port,
            running: None,
        }
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    /// Encode into a datagram payload
    ///
    /// `;` in the model string is replaced so the payload stays splittable.
    pub fn encode(&self) -> Vec<u8> {
        let model = self.model.replace(';', "_");
        let mut text = format!("{ANNOUNCE_PREFIX};{model};{}", self.config_port);
        if let Some(running) = self.running {
            text.push_str(if running { ";1" } else { ";0" });
        }
        text.into_bytes()
    }

    /// Decode a datagram payload
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let malformed = |what: &str| PacketError::MalformedPacket(format!("announcement: {what}"));

        let text = std::str::from_utf8(bytes).map_err(|_| malformed("not utf-8"))?;
        let mut fields = text.trim_end().split(';');

        if fields.next() != Some(ANNOUNCE_PREFIX) {
            return Err(malformed("missing prefix"));
        }
        let model = fields.next().ok_or_else(|| malformed("missing model"))?;
        let config_port = fields
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| malformed("bad config port"))?;
        let running = match fields.next() {
            None => None,
            Some("1") => Some(true),
            Some("0") => Some(false),
            Some(_) => return Err(malformed("bad liveness flag")),
        };
        if fields.next().is_some() {
            return Err(malformed("trailing fields"));
        }

        Ok(Self {
            model: model.to_string(),
            config_port,
            running,
        })
    }
}

/// Whether a received datagram is a discovery query
pub fn is_query(bytes: &[u8]) -> bool {
    bytes == DISCOVERY_QUERY
}
