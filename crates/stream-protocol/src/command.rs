//! Configuration channel grammar
//!
//! The configuration channel is line oriented. A client sends one request per
//! line and the server answers each with a single `OK ...` or `ERR ...` line.
//! Streaming lifecycle acknowledgements are pushed as `ACK ...` lines.
//!
//! ```text
//! client                          server
//!   GET V                  ->
//!                          <-     OK {"model":"...","running":false,"settings":{...}}
//!   SET F                  ->
//!                          <-     OK receiving
//!   port=9000              ->
//!   protocol=udp           ->
//!   END                    ->
//!                          <-     OK applied 2
//!                          <-     ACK STARTED UDP      (after a start)
//! ```

use std::fmt;

use crate::error::ParseError;

/// Verbosity of a `GET` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetVerbosity {
    /// Model, running state and settings as JSON
    V,
    /// Settings JSON only
    V1,
    /// Annotated `key=value` listing
    VV,
}

/// Where a `SET` batch lands once applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Apply to the in-memory settings only
    Memory,
    /// Apply and persist to the settings file
    File,
}

/// A lexically typed field value
///
/// Values are classified on receipt: anything that parses as an integer is an
/// `Int`, then anything that parses as a float is a `Float`, else a `Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    /// Classify a raw value string
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return FieldValue::Str(raw[1..raw.len() - 1].to_string());
        }
        if let Ok(i) = raw.parse::<i64>() {
            FieldValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            FieldValue::Float(f)
        } else {
            FieldValue::Str(raw.to_string())
        }
    }

    /// Textual form of the value
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Str(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
        }
    }

    /// Integer view, accepting floats without a fractional part
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            FieldValue::Str(_) | FieldValue::Float(_) => None,
        }
    }

    /// Boolean view: `true`/`false`, `on`/`off` or `1`/`0`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Int(0) => Some(false),
            FieldValue::Int(1) => Some(true),
            FieldValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" => Some(true),
                "false" | "off" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// One parsed line from a configuration client
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigRequest {
    /// Read the current settings
    Get(GetVerbosity),
    /// Begin a settings batch; inline fields are applied as a complete batch
    Set {
        mode: SetMode,
        fields: Vec<(String, FieldValue)>,
    },
    /// One `key=value` line inside a batch
    Field(String, FieldValue),
    /// Commit the open batch
    End,
    /// Discard the open batch
    Abort,
    /// Start streaming with the current settings
    Start,
    /// Stop streaming
    Stop,
    /// Liveness check
    Ping,
}

impl ConfigRequest {
    /// Parse one request line
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parts = line.split_whitespace();
        let head = parts.next().ok_or(ParseError::Empty)?;

        if !head.contains('=') {
            match head.to_ascii_uppercase().as_str() {
                "GET" => {
                    let verbosity = match parts.next().map(str::to_ascii_uppercase).as_deref() {
                        None | Some("V") => GetVerbosity::V,
                        Some("V1") => GetVerbosity::V1,
                        Some("VV") => GetVerbosity::VV,
                        Some(other) => {
                            return Err(ParseError::InvalidArgument {
                                command: "GET".into(),
                                argument: other.into(),
                            })
                        }
                    };
                    return Ok(ConfigRequest::Get(verbosity));
                }
                "SET" => {
                    let mode = match parts.next().map(str::to_ascii_uppercase).as_deref() {
                        None | Some("M") => SetMode::Memory,
                        Some("F") => SetMode::File,
                        Some(other) => {
                            return Err(ParseError::InvalidArgument {
                                command: "SET".into(),
                                argument: other.into(),
                            })
                        }
                    };
                    let fields = parts
                        .map(parse_field)
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(ConfigRequest::Set { mode, fields });
                }
                "END" => return Ok(ConfigRequest::End),
                "ABORT" => return Ok(ConfigRequest::Abort),
                "START" => return Ok(ConfigRequest::Start),
                "STOP" => return Ok(ConfigRequest::Stop),
                "PING" => return Ok(ConfigRequest::Ping),
                _ => return Err(ParseError::UnknownCommand(head.to_string())),
            }
        }

        let (key, value) = parse_field(line)?;
        Ok(ConfigRequest::Field(key, value))
    }
}

fn parse_field(text: &str) -> Result<(String, FieldValue), ParseError> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| ParseError::InvalidField(text.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ParseError::InvalidField(text.to_string()));
    }
    Ok((key.to_ascii_lowercase(), FieldValue::infer(value)))
}

/// Transport named in a started acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartedKind {
    Tcp,
    Udp,
    File,
}

/// Reason named in a stopped acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppedKind {
    /// Operator requested stop
    Normal,
    /// Local storage ran out of space
    DiskFull,
    /// Configured sample limit reached
    Done,
    /// Network sink failed
    TransportError,
}

/// Streaming lifecycle acknowledgement pushed to configuration clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Started(StartedKind),
    Stopped(StoppedKind),
}

impl Ack {
    /// Parse an `ACK ...` line
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidAck(line.to_string());
        let mut parts = line.split_whitespace();
        if parts.next() != Some("ACK") {
            return Err(invalid());
        }
        let ack = match (parts.next(), parts.next()) {
            (Some("STARTED"), Some("TCP")) => Ack::Started(StartedKind::Tcp),
            (Some("STARTED"), Some("UDP")) => Ack::Started(StartedKind::Udp),
            (Some("STARTED"), Some("FILE")) => Ack::Started(StartedKind::File),
            (Some("STOPPED"), Some("NORMAL")) => Ack::Stopped(StoppedKind::Normal),
            (Some("STOPPED"), Some("DISK_FULL")) => Ack::Stopped(StoppedKind::DiskFull),
            (Some("STOPPED"), Some("DONE")) => Ack::Stopped(StoppedKind::Done),
            (Some("STOPPED"), Some("TRANSPORT_ERROR")) => Ack::Stopped(StoppedKind::TransportError),
            _ => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(ack)
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ack::Started(kind) => {
                let kind = match kind {
                    StartedKind::Tcp => "TCP",
                    StartedKind::Udp => "UDP",
                    StartedKind::File => "FILE",
                };
                write!(f, "ACK STARTED {kind}")
            }
            Ack::Stopped(kind) => {
                let kind = match kind {
                    StoppedKind::Normal => "NORMAL",
                    StoppedKind::DiskFull => "DISK_FULL",
                    StoppedKind::Done => "DONE",
                    StoppedKind::TransportError => "TRANSPORT_ERROR",
                };
                write!(f, "ACK STOPPED {kind}")
            }
        }
    }
}
