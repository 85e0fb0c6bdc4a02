//! Streaming Control Plane
//!
//! Out-of-band management of a streaming board:
//!
//! - **Settings store**: the single owner of [`StreamSettings`](stream_protocol::StreamSettings),
//!   mutated in validated all-or-nothing batches and persisted atomically
//! - **Capabilities**: per-board descriptor deciding which keys are mutable
//!   and which UDP configurations fit in a datagram
//! - **Config sessions**: the per-connection `AWAIT_COMMAND` /
//!   `RECEIVING_FIELDS` state machine and the TCP server hosting it
//! - **Event bus**: typed lifecycle and error events delivered to
//!   registered handlers
//! - **Discovery**: broadcast responder and timeout-bounded requester
//!
//! # Architecture
//!
//! The control plane never calls into the data pipeline. Accepted requests
//! raise events on the [`EventBus`]; whoever owns sessions subscribes and
//! reports back through [`ControlContext::announce`].
//!
//! ```text
//! client ──TCP──▶ ConfigServer ──▶ ConfigSession ──▶ SettingsStore
//!                      ▲                 │
//!                 ACK lines          EventBus ──▶ session owner
//! ```
//!
//! # Example
//!
//! ```rust
//! use stream_control::{BoardCapabilities, ConfigSession, SettingsStore};
//! use stream_protocol::StreamSettings;
//!
//! let store = SettingsStore::in_memory(StreamSettings::default(), BoardCapabilities::default());
//! let mut session = ConfigSession::new();
//! let outcome = session.handle_line("SET M port=9000", &store, false);
//! assert_eq!(outcome.reply.as_deref(), Some("OK applied 1"));
//! assert_eq!(store.snapshot().port, 9000);
//! ```

pub mod capabilities;
pub mod discovery;
pub mod error;
pub mod events;
pub mod server;
pub mod session;
pub mod store;

pub use capabilities::{BoardCapabilities, BoardModel, DEFAULT_SAMPLES_PER_FRAME, MAX_UDP_DATAGRAM};
pub use discovery::{
    discover, DiscoveredBoard, DiscoveryResponder, DiscoveryTransport, UdpDiscovery,
    DEFAULT_DISCOVERY_TIMEOUT,
};
pub use error::ControlError;
pub use events::{ControlErrorEvent, ControlEvent, EventBus};
pub use server::{ConfigServer, ControlContext};
pub use session::{ConfigSession, SessionOutcome, SessionState, STREAMING_FIELD};
pub use store::SettingsStore;
