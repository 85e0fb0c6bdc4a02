//! Per-connection configuration state machine
//!
//! ```text
//!            SET M|F                      END / ABORT
//! AWAIT_COMMAND ──────▶ RECEIVING_FIELDS ─────────────▶ AWAIT_COMMAND
//!      │  ▲                 │ key=value
//!      └──┘ GET/START/...   └──┘
//! ```
//!
//! The session never touches the router. Accepted requests come back as a
//! [`SessionOutcome`] carrying the reply line and at most one lifecycle
//! event for the caller to dispatch.

use std::net::Ipv4Addr;

use serde_json::{json, Value};
use stream_protocol::{
    ConfigRequest, FieldValue, GetVerbosity, ParseError, SetMode, SettingKey, SettingsError,
};
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::events::{ControlErrorEvent, ControlEvent};
use crate::store::SettingsStore;

/// Pseudo-field requesting a lifecycle change, never stored
pub const STREAMING_FIELD: &str = "streaming";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitCommand,
    ReceivingFields {
        mode: SetMode,
        fields: Vec<(String, FieldValue)>,
    },
}

/// Result of handling one request line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    /// Line to send back, if any
    pub reply: Option<String>,
    /// Lifecycle event to raise
    pub event: Option<ControlEvent>,
    /// Error event to raise
    pub error: Option<ControlErrorEvent>,
    /// New listen address after an accepted host change
    pub rebind: Option<Ipv4Addr>,
}

impl SessionOutcome {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            reply: Some(line.into()),
            ..Default::default()
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

/// Configuration state of one client connection
#[derive(Debug)]
pub struct ConfigSession {
    state: SessionState,
}

impl Default for ConfigSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitCommand,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True while a SET batch is open
    pub fn is_receiving(&self) -> bool {
        matches!(self.state, SessionState::ReceivingFields { .. })
    }

    /// Handle one request line
    pub fn handle_line(
        &mut self,
        line: &str,
        store: &SettingsStore,
        running: bool,
    ) -> SessionOutcome {
        let request = match ConfigRequest::parse(line) {
            Ok(request) => request,
            Err(ParseError::Empty) => return SessionOutcome::silent(),
            Err(e) => return self.parse_failure(e),
        };

        match std::mem::replace(&mut self.state, SessionState::AwaitCommand) {
            SessionState::AwaitCommand => self.handle_command(request, store, running),
            SessionState::ReceivingFields { mode, mut fields } => match request {
                ConfigRequest::Field(key, value) => {
                    fields.push((key, value));
                    self.state = SessionState::ReceivingFields { mode, fields };
                    SessionOutcome::silent()
                }
                ConfigRequest::End => commit(mode, fields, store),
                ConfigRequest::Abort => {
                    debug!(discarded = fields.len(), "SET aborted");
                    SessionOutcome::reply("OK aborted")
                }
                _ => {
                    self.state = SessionState::ReceivingFields { mode, fields };
                    SessionOutcome::reply("ERR expected key=value, END or ABORT")
                }
            },
        }
    }

    fn handle_command(
        &mut self,
        request: ConfigRequest,
        store: &SettingsStore,
        running: bool,
    ) -> SessionOutcome {
        match request {
            ConfigRequest::Get(verbosity) => match render_settings(store, verbosity, running) {
                Ok(body) => SessionOutcome::reply(format!("OK {body}")),
                Err(e) => SessionOutcome {
                    reply: Some(format!("ERR {e}")),
                    error: Some(ControlErrorEvent::ServerInternal(e.to_string())),
                    ..Default::default()
                },
            },
            ConfigRequest::Set { mode, fields } if fields.is_empty() => {
                self.state = SessionState::ReceivingFields {
                    mode,
                    fields: Vec::new(),
                };
                SessionOutcome::reply("OK receiving")
            }
            ConfigRequest::Set { mode, fields } => commit(mode, fields, store),
            ConfigRequest::Start => lifecycle(ControlEvent::StartStreaming),
            ConfigRequest::Stop => lifecycle(ControlEvent::StopStreaming),
            ConfigRequest::Ping => SessionOutcome::reply("OK pong"),
            ConfigRequest::Field(..) | ConfigRequest::End | ConfigRequest::Abort => {
                SessionOutcome::reply("ERR no SET in progress")
            }
        }
    }

    fn parse_failure(&self, error: ParseError) -> SessionOutcome {
        if self.is_receiving() {
            return SessionOutcome::reply("ERR expected key=value, END or ABORT");
        }
        match error {
            ParseError::UnknownCommand(command) => {
                debug!(%command, "unknown command");
                SessionOutcome::reply("ERR unknown command")
            }
            other => SessionOutcome::reply(format!("ERR {other}")),
        }
    }
}

fn lifecycle(event: ControlEvent) -> SessionOutcome {
    SessionOutcome {
        reply: Some("OK".into()),
        event: Some(event),
        ..Default::default()
    }
}

fn rejected(error: ControlError) -> SessionOutcome {
    warn!(error = %error, "SET rejected");
    SessionOutcome {
        reply: Some(format!("ERR {error}")),
        error: Some(ControlErrorEvent::CannotSetData(error.to_string())),
        ..Default::default()
    }
}

fn commit(mode: SetMode, fields: Vec<(String, FieldValue)>, store: &SettingsStore) -> SessionOutcome {
    let mut event = ControlEvent::GetNewSetting;
    let mut stored = Vec::with_capacity(fields.len());

    for (key, value) in fields {
        if key != STREAMING_FIELD {
            stored.push((key, value));
            continue;
        }
        event = match value.as_text().to_ascii_lowercase().as_str() {
            "start" | "on" | "true" | "1" => ControlEvent::StartStreaming,
            "stop" | "off" | "false" | "0" => ControlEvent::StopStreaming,
            _ => {
                return rejected(
                    SettingsError::InvalidValue {
                        key: STREAMING_FIELD.into(),
                        reason: "expected start or stop".into(),
                    }
                    .into(),
                )
            }
        };
    }

    let previous_host = store.snapshot().host;
    match store.apply(&stored, mode == SetMode::File) {
        Ok(current) => {
            info!(fields = stored.len(), ?mode, %event, "SET accepted");
            SessionOutcome {
                reply: Some(format!("OK applied {}", stored.len())),
                event: Some(event),
                error: None,
                rebind: (current.host != previous_host).then_some(current.host),
            }
        }
        Err(e) => rejected(e),
    }
}

fn render_settings(
    store: &SettingsStore,
    verbosity: GetVerbosity,
    running: bool,
) -> Result<String, serde_json::Error> {
    let settings = store.snapshot();
    match verbosity {
        GetVerbosity::V => {
            let document = json!({
                "model": store.capabilities().model,
                "running": running,
                "settings": serde_json::to_value(&settings)?,
            });
            serde_json::to_string(&document)
        }
        GetVerbosity::V1 => serde_json::to_string(&serde_json::to_value(&settings)?),
        GetVerbosity::VV => {
            let caps = store.capabilities();
            let lines: Vec<String> = SettingKey::ALL
                .into_iter()
                .map(|key| {
                    let fixed = if caps.is_mutable(key) { "" } else { " (fixed)" };
                    format!(
                        "{}={} [{}]{}",
                        key,
                        settings.value_string(key),
                        key.description(),
                        fixed
                    )
                })
                .collect();
            Ok(lines.join("; "))
        }
    }
}

/// Parse the JSON body of a `GET V1` reply
pub fn parse_settings_reply(line: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(line.trim().trim_start_matches("OK").trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{BoardCapabilities, BoardModel};
    use stream_protocol::{StreamSettings, Transport};

    fn store() -> SettingsStore {
        SettingsStore::in_memory(StreamSettings::default(), BoardCapabilities::default())
    }

    fn reply(outcome: &SessionOutcome) -> &str {
        outcome.reply.as_deref().unwrap_or("")
    }

    #[test]
    fn test_multi_line_set_commits_on_end() {
        let store = store();
        let mut session = ConfigSession::new();

        let out = session.handle_line("SET M", &store, false);
        assert_eq!(reply(&out), "OK receiving");
        assert!(session.is_receiving());

        assert_eq!(session.handle_line("protocol=udp", &store, false), SessionOutcome::default());
        assert_eq!(session.handle_line("port=9000", &store, false), SessionOutcome::default());
        // Nothing applied before END
        assert_eq!(store.snapshot().port, 8900);

        let out = session.handle_line("END", &store, false);
        assert_eq!(reply(&out), "OK applied 2");
        assert_eq!(out.event, Some(ControlEvent::GetNewSetting));
        assert_eq!(session.state(), &SessionState::AwaitCommand);
        assert_eq!(store.snapshot().protocol, Transport::Udp);
        assert_eq!(store.snapshot().port, 9000);
    }

    #[test]
    fn test_unknown_key_rejects_batch_and_returns_to_await() {
        let store = store();
        let before = store.snapshot();
        let mut session = ConfigSession::new();

        let out = session.handle_line("SET F port=9000 bogus=1", &store, false);
        assert!(reply(&out).starts_with("ERR"));
        assert!(matches!(out.error, Some(ControlErrorEvent::CannotSetData(_))));
        assert_eq!(out.event, None);
        assert_eq!(session.state(), &SessionState::AwaitCommand);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_streaming_pseudo_field_raises_single_event() {
        let store = store();
        let mut session = ConfigSession::new();

        let out = session.handle_line("SET M decimation=8 streaming=start", &store, false);
        assert_eq!(reply(&out), "OK applied 1");
        assert_eq!(out.event, Some(ControlEvent::StartStreaming));
        assert_eq!(store.snapshot().decimation, 8);

        let out = session.handle_line("SET M streaming=stop", &store, true);
        assert_eq!(reply(&out), "OK applied 0");
        assert_eq!(out.event, Some(ControlEvent::StopStreaming));

        let out = session.handle_line("SET M streaming=sideways", &store, true);
        assert!(reply(&out).starts_with("ERR"));
        assert_eq!(out.event, None);
    }

    #[test]
    fn test_abort_discards_fields() {
        let store = store();
        let mut session = ConfigSession::new();
        session.handle_line("SET", &store, false);
        session.handle_line("port=1234", &store, false);
        let out = session.handle_line("ABORT", &store, false);
        assert_eq!(reply(&out), "OK aborted");
        assert_eq!(out.event, None);
        assert_eq!(store.snapshot().port, 8900);
    }

    #[test]
    fn test_host_change_requests_rebind() {
        let store = store();
        let mut session = ConfigSession::new();
        let out = session.handle_line("SET M host=0.0.0.0", &store, false);
        assert_eq!(out.rebind, Some(Ipv4Addr::UNSPECIFIED));

        let out = session.handle_line("SET M host=0.0.0.0", &store, false);
        assert_eq!(out.rebind, None);
    }

    #[test]
    fn test_get_verbosity_levels() {
        let caps = BoardCapabilities::for_model(BoardModel::Stemlab125_14);
        let store = SettingsStore::in_memory(StreamSettings::default(), caps);
        let mut session = ConfigSession::new();

        let out = session.handle_line("GET V", &store, true);
        let doc = parse_settings_reply(reply(&out)).unwrap();
        assert_eq!(doc["model"], "stemlab-125-14");
        assert_eq!(doc["running"], true);
        assert_eq!(doc["settings"]["port"], 8900);

        let out = session.handle_line("get v1", &store, false);
        let doc = parse_settings_reply(reply(&out)).unwrap();
        assert_eq!(doc["protocol"], "tcp");
        assert_eq!(doc["attenuator"], "1:1");

        let out = session.handle_line("GET VV", &store, false);
        let text = reply(&out);
        assert!(text.starts_with("OK host=127.0.0.1 [control plane address]; port=8900"));
        assert!(text.contains("coupling=ac [input coupling] (fixed)"));
    }

    #[test]
    fn test_commands_outside_batch() {
        let store = store();
        let mut session = ConfigSession::new();

        assert_eq!(reply(&session.handle_line("PING", &store, false)), "OK pong");
        assert_eq!(reply(&session.handle_line("FROB", &store, false)), "ERR unknown command");
        assert_eq!(reply(&session.handle_line("END", &store, false)), "ERR no SET in progress");
        assert_eq!(session.handle_line("   ", &store, false), SessionOutcome::default());

        let out = session.handle_line("START", &store, false);
        assert_eq!(reply(&out), "OK");
        assert_eq!(out.event, Some(ControlEvent::StartStreaming));
    }

    #[test]
    fn test_commands_inside_batch_are_refused() {
        let store = store();
        let mut session = ConfigSession::new();
        session.handle_line("SET F", &store, false);

        let out = session.handle_line("START", &store, false);
        assert_eq!(reply(&out), "ERR expected key=value, END or ABORT");
        assert_eq!(out.event, None);
        assert!(session.is_receiving());

        let out = session.handle_line("FROB", &store, false);
        assert_eq!(reply(&out), "ERR expected key=value, END or ABORT");
        assert!(session.is_receiving());
    }
}
