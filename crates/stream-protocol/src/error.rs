//! Error types for the streaming protocol

use thiserror::Error;

/// Errors produced while decoding a wire packet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Header or payload disagrees with the received byte count
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

/// Errors produced while parsing configuration-channel lines
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Empty line
    #[error("empty request")]
    Empty,

    /// Unknown command word
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Command is known but its argument is not
    #[error("invalid argument for {command}: {argument}")]
    InvalidArgument { command: String, argument: String },

    /// A `key=value` field could not be split
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// Acknowledgement line could not be understood
    #[error("invalid acknowledgement: {0}")]
    InvalidAck(String),
}

/// Errors produced while validating a settings mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Key is not part of the settings schema
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// Key exists but is fixed on this board
    #[error("key {0} is not configurable on this board")]
    Immutable(String),

    /// Value has the wrong type or is out of range
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// The combination of values cannot be streamed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
