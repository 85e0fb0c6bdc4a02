//! Streaming Protocol Library
//!
//! This crate provides the pure (I/O free) building blocks shared by the
//! streaming server, its transport adapters and remote clients:
//!
//! - **Wire codec**: fixed-header binary packets carrying one sample frame plus
//!   the cumulative lost-frame counter ([`packet`])
//! - **Settings model**: the typed `StreamSettings` document and the key schema
//!   used to mutate it remotely ([`settings`])
//! - **Control grammar**: the line-oriented request/reply language spoken on the
//!   configuration channel ([`command`])
//! - **Discovery datagrams**: broadcast query marker and board announcements
//!   ([`discovery`])
//!
//! # Example
//!
//! ```rust
//! use stream_protocol::{decode, encode, Resolution, SampleFrame};
//!
//! let frame = SampleFrame::new(7, Resolution::Bits16, 4)
//!     .with_ch1(vec![0x01, 0x00, 0xFF, 0x7F])
//!     .with_ch2(vec![0x02, 0x00, 0x00, 0x80]);
//!
//! let bytes = encode(&frame, 3);
//! let packet = decode(&bytes).unwrap();
//! assert_eq!(packet.frame, frame);
//! assert_eq!(packet.lost, 3);
//! ```

pub mod command;
pub mod discovery;
pub mod error;
pub mod packet;
pub mod settings;

pub use command::{Ack, ConfigRequest, FieldValue, GetVerbosity, SetMode, StartedKind, StoppedKind};
pub use discovery::{DiscoveryAnnouncement, DISCOVERY_QUERY};
pub use error::{PacketError, ParseError, SettingsError};
pub use packet::{
    decode, encode, encode_into, encoded_len, payload_len, ModeFlags, Resolution, SampleFrame,
    StreamPacket, HEADER_LEN,
};
pub use settings::{
    Attenuator, ChannelSelection, Coupling, Destination, SaveFormat, SettingKey, StreamSettings,
    Transport, ValueDomain,
};

/// Default port of the data channel (TCP listener / UDP sender)
pub const DEFAULT_DATA_PORT: u16 = 8900;

/// Default port of the configuration channel
pub const DEFAULT_CONFIG_PORT: u16 = 8901;

/// Default port the discovery responder listens on
pub const DEFAULT_BROADCAST_PORT: u16 = 8902;
