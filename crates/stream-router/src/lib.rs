//! Stream Router
//!
//! This crate moves sample frames between the hardware boundary and the
//! transports:
//!
//! - **Contracts**: [`FrameSource`] (acquisition), [`FrameConsumer`]
//!   (generation) and [`PacketSink`] (any destination for encoded packets)
//! - **Network transports**: [`TcpSink`] / [`UdpSink`] on the board side and
//!   [`TcpPacketReceiver`] / [`UdpPacketReceiver`] on the client side
//! - **File transports**: [`FileSink`] writing WAV, TDMS or CSV, raw or volts,
//!   with free-space monitoring
//! - **Session pipeline**: [`run_session`] / [`spawn_session`] drive exactly one
//!   source into one sink, dropping frames (and counting them as lost) when
//!   the sink falls behind
//! - **Playback**: [`run_playback`] feeds received packets to a consumer
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_router::{spawn_session, SessionConfig, SessionLimits, TcpSink};
//!
//! let sink = TcpSink::bind("0.0.0.0:8900".parse()?).await?;
//! let session = spawn_session(source, Box::new(sink), SessionConfig {
//!     limits: SessionLimits { samples: Some(1_000_000), duration: None },
//!     ..Default::default()
//! });
//!
//! // later, from any task
//! session.stop();
//! let report = session.join().await?;
//! println!("lost {} frames", report.lost);
//! ```

pub mod calibration;
pub mod error;
pub mod file;
pub mod playback;
pub mod receiver;
pub mod router;
pub mod sink;
pub mod source;
pub mod tcp;
pub mod udp;

pub use calibration::{Calibration, ChannelCalibration, FilterCoefficients};
pub use error::{RouterError, SinkError, SourceError};
pub use file::{DiskSpace, FileSink, FileSinkConfig, FilesystemSpace, FixedBudget};
pub use playback::{run_playback, PlaybackError, PlaybackReport};
pub use receiver::{LostTracker, PacketReceiver};
pub use router::{
    front_end_flags, run_session, spawn_session, LimitReached, SessionConfig, SessionExit,
    SessionHandle, SessionLimits, SessionReport, SessionStats,
};
pub use sink::{PacketSink, SinkEvent, SinkKind};
pub use source::{FrameConsumer, FrameSource};
pub use tcp::{TcpPacketReceiver, TcpSink};
pub use udp::{UdpPacketReceiver, UdpSink, MAX_UDP_DATAGRAM, UDP_HELLO};

// Re-export the cancellation token so callers need not depend on tokio-util
pub use tokio_util::sync::CancellationToken;
