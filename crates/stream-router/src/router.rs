//! Session pipeline
//!
//! A session moves frames from one [`FrameSource`] to one [`PacketSink`].
//!
//! # Architecture
//!
//! ```text
//!   FrameSource ──▶ producer loop ──▶ [1-slot handoff] ──▶ consumer task ──▶ PacketSink
//!                      │                                        │
//!                      └──── lost += 1 when the slot is full ───┘ (lost += 1 on Rejected)
//! ```
//!
//! The producer never waits for the sink. When the consumer still holds the
//! previous frame, the new one is dropped and counted in the session's
//! cumulative lost counter. The consumer stamps each packet with the counter
//! as it is sent, so a receiver sees the jump on the first packet after a
//! gap.
//!
//! The loop ends on an explicit stop, a sample or time limit, the source
//! running dry, or a fatal sink error. The sink and source are released
//! exactly once, after both halves have finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stream_protocol::{ModeFlags, SampleFrame, StreamPacket};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::error::{RouterError, SinkError};
use crate::sink::PacketSink;
use crate::source::FrameSource;

/// Optional bounds on one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLimits {
    /// Per-channel samples to deliver before stopping
    pub samples: Option<u64>,
    /// Wall time before stopping
    pub duration: Option<Duration>,
}

/// Per-session pipeline options, fixed at start
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub limits: SessionLimits,
    /// Correct codes with the source's calibration before transport
    pub calibration: Option<Calibration>,
    /// Extra mode bits stamped on every frame (attenuator, coupling)
    pub mode_flags: u32,
}

/// Which limit ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReached {
    Samples,
    Duration,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Stop requested, limit reached or source exhausted
    Normal,
    /// File sink ran out of space
    OutOfSpace,
    /// Network sink failed
    TransportError(String),
    /// Source failed
    SourceFailed(String),
}

/// Live counters shared between the pipeline and observers
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    samples_sent: AtomicU64,
    lost: AtomicU64,
}

impl SessionStats {
    /// Cumulative frames dropped in this session
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Acquire)
    }

    /// Frames the sink accepted
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Acquire)
    }

    /// Per-channel samples the sink accepted
    pub fn samples_sent(&self) -> u64 {
        self.samples_sent.load(Ordering::Acquire)
    }

    fn record_lost(&self) -> u64 {
        self.lost.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn record_sent(&self, samples: u64) {
        self.frames_sent.fetch_add(1, Ordering::AcqRel);
        self.samples_sent.fetch_add(samples, Ordering::AcqRel);
    }
}

/// Final accounting of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub limit_reached: Option<LimitReached>,
    pub frames_sent: u64,
    pub samples_sent: u64,
    pub lost: u64,
}

/// Handle to a session running on its own task
#[derive(Debug)]
pub struct SessionHandle {
    stop: CancellationToken,
    stats: Arc<SessionStats>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Ask the pipeline to stop; returns immediately
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token that stops the session when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the session to end
    pub async fn join(self) -> Result<SessionReport, RouterError> {
        self.task
            .await
            .map_err(|e| RouterError::Join(e.to_string()))
    }
}

/// Run a session on a new task
pub fn spawn_session(
    source: Box<dyn FrameSource>,
    sink: Box<dyn PacketSink>,
    config: SessionConfig,
) -> SessionHandle {
    let stop = CancellationToken::new();
    let stats = Arc::new(SessionStats::default());
    let task = tokio::spawn(run_session(
        source,
        sink,
        config,
        stop.clone(),
        Arc::clone(&stats),
    ));
    SessionHandle { stop, stats, task }
}

/// Drive one session to completion
pub async fn run_session(
    mut source: Box<dyn FrameSource>,
    sink: Box<dyn PacketSink>,
    config: SessionConfig,
    stop: CancellationToken,
    stats: Arc<SessionStats>,
) -> SessionReport {
    let kind = sink.kind();
    info!(sink = %kind, limits = ?config.limits, "session started");

    if let Some(cal) = &config.calibration {
        source.configure_filters(cal.ch1.filter, cal.ch2.filter);
    }

    let (tx, rx) = mpsc::channel::<SampleFrame>(1);
    let (processed_tx, mut processed) = watch::channel(0u64);
    let consumer = tokio::spawn(run_consumer(
        sink,
        rx,
        stop.clone(),
        Arc::clone(&stats),
        processed_tx,
    ));

    let deadline = config.limits.duration.map(|d| Instant::now() + d);
    let mut handed_off: u64 = 0;
    let mut queued: u64 = 0;
    let mut limit_reached = None;
    let mut source_failure = None;

    loop {
        if stop.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tx.closed() => break,
            _ = sleep_until(deadline), if deadline.is_some() => {
                limit_reached = Some(LimitReached::Duration);
                break;
            }
            next = source.next_frame() => next,
        };

        let mut frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("source exhausted");
                break;
            }
            Err(e) => {
                warn!(error = %e, "source failed");
                source_failure = Some(e.to_string());
                break;
            }
        };

        if let Some(cal) = &config.calibration {
            cal.apply(&mut frame);
        }
        frame.mode = frame.mode.with(config.mode_flags);

        let mut last = None;
        if let Some(limit) = config.limits.samples {
            let remaining = limit.saturating_sub(handed_off);
            let samples = frame.samples_per_channel() as u64;
            if samples >= remaining {
                frame.truncate_samples(remaining as usize);
                last = Some(limit);
            }
        }

        let samples = frame.samples_per_channel() as u64;
        if let Some(limit) = last {
            // the frame completing a sample limit waits for the sink
            if tx.send(frame).await.is_err() {
                break;
            }
            queued += 1;
            let target = queued;
            let settled = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                settled = processed.wait_for(move |n| *n >= target) => settled.is_ok(),
            };
            if !settled {
                break;
            }
            // rejected frames give their samples back to the budget
            handed_off = stats.samples_sent();
            if handed_off >= limit {
                limit_reached = Some(LimitReached::Samples);
                break;
            }
            continue;
        }

        match tx.try_reserve() {
            Ok(permit) => {
                permit.send(frame);
                handed_off += samples;
                queued += 1;
            }
            Err(TrySendError::Full(())) => {
                let lost = stats.record_lost();
                debug!(seq = frame.seq, lost, "sink busy, frame dropped");
            }
            Err(TrySendError::Closed(())) => break,
        }
    }

    drop(tx);
    let (mut sink, sink_failure) = match consumer.await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "consumer task failed");
            source.stop().await;
            return SessionReport {
                exit: SessionExit::TransportError(e.to_string()),
                limit_reached,
                frames_sent: stats.frames_sent(),
                samples_sent: stats.samples_sent(),
                lost: stats.lost(),
            };
        }
    };

    source.stop().await;
    let close_result = sink.close().await;

    let exit = match (sink_failure, close_result) {
        (Some(SinkError::OutOfSpace), _) | (None, Err(SinkError::OutOfSpace)) => {
            SessionExit::OutOfSpace
        }
        (Some(e), _) => SessionExit::TransportError(e.to_string()),
        (None, Err(e)) => {
            warn!(error = %e, "sink close failed");
            match source_failure {
                Some(reason) => SessionExit::SourceFailed(reason),
                None => SessionExit::Normal,
            }
        }
        (None, Ok(())) => match source_failure {
            Some(reason) => SessionExit::SourceFailed(reason),
            None => SessionExit::Normal,
        },
    };

    let report = SessionReport {
        exit,
        limit_reached,
        frames_sent: stats.frames_sent(),
        samples_sent: stats.samples_sent(),
        lost: stats.lost(),
    };
    info!(
        exit = ?report.exit,
        limit = ?report.limit_reached,
        frames = report.frames_sent,
        lost = report.lost,
        "session ended"
    );
    report
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_consumer(
    mut sink: Box<dyn PacketSink>,
    mut rx: mpsc::Receiver<SampleFrame>,
    stop: CancellationToken,
    stats: Arc<SessionStats>,
    processed: watch::Sender<u64>,
) -> (Box<dyn PacketSink>, Option<SinkError>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        // Waiting for a peer is abandoned on stop; a started write is not
        let ready = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            ready = sink.ready() => ready,
        };
        if let Err(e) = ready {
            warn!(error = %e, "sink not ready");
            return (sink, Some(e));
        }

        let samples = frame.samples_per_channel() as u64;
        let seq = frame.seq;
        let packet = StreamPacket::new(frame, stats.lost());

        match sink.send(&packet).await {
            Ok(()) => stats.record_sent(samples),
            Err(e) if e.is_recoverable() => {
                let lost = stats.record_lost();
                debug!(seq, lost, error = %e, "sink rejected frame");
            }
            Err(e) => {
                warn!(seq, error = %e, "sink failed");
                return (sink, Some(e));
            }
        }
        processed.send_modify(|n| *n += 1);
    }
    (sink, None)
}

/// Mode bits for a frame captured with the given front-end settings
pub fn front_end_flags(attenuated: bool, ac_coupled: bool) -> u32 {
    let mut flags = ModeFlags::default();
    if attenuated {
        flags = flags.with(ModeFlags::ATTENUATED);
    }
    if ac_coupled {
        flags = flags.with(ModeFlags::AC_COUPLED);
    }
    flags.0
}
