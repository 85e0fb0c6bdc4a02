//! Session orchestrator
//!
//! Owns the single running session. `start` and `stop` are serialized by one
//! lock; the running flag is an atomic so the control plane can read it
//! without taking that lock.
//!
//! ```text
//!            start()                     stop() / session ends
//! STOPPED ────────────▶ RUNNING ───────────────────────────────▶ STOPPED
//!                        │  ▲
//!                        └──┘ start(): re-announce, AlreadyRunning
//! ```
//!
//! Settings are copied when a session starts. Changes made while it runs
//! apply to the next session.
//!
//! Control-plane events reach the orchestrator through a [`LifecycleQueue`].
//! One worker task drains it, so requests take effect in the order they
//! were raised and the event handlers never wait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stream_control::{ControlContext, ControlEvent, EventBus};
use stream_protocol::{Ack, Attenuator, Coupling, StartedKind, StoppedKind, StreamSettings};
use stream_router::{
    front_end_flags, spawn_session, CancellationToken, LimitReached, RouterError, SessionConfig,
    SessionExit, SessionHandle, SessionLimits, SessionReport, SessionStats,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::providers::{SinkProvider, SourceProvider};

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was started
    Started { id: u64, kind: StartedKind },
    /// A session was already running; its state was re-announced
    AlreadyRunning { id: u64, kind: StartedKind },
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The running session was stopped
    Stopped { id: u64, report: SessionReport },
    /// Nothing was running
    NotRunning,
}

/// Lifecycle request raised by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop(StoppedKind),
}

/// Ordered, non-blocking entry point to the orchestrator
#[derive(Debug, Clone)]
pub struct LifecycleQueue {
    tx: mpsc::UnboundedSender<Lifecycle>,
}

impl LifecycleQueue {
    /// Queue `request` behind every request already queued
    ///
    /// Returns false once the worker has gone away.
    pub fn push(&self, request: Lifecycle) -> bool {
        self.tx.send(request).is_ok()
    }

    /// Forward START and STOP events from `bus` to this queue
    pub fn register(&self, bus: &EventBus) {
        let start = self.clone();
        bus.add_handler(ControlEvent::StartStreaming, move || {
            if !start.push(Lifecycle::Start) {
                warn!("lifecycle worker gone, start dropped");
            }
        });

        let stop = self.clone();
        bus.add_handler(ControlEvent::StopStreaming, move || {
            if !stop.push(Lifecycle::Stop(StoppedKind::Normal)) {
                warn!("lifecycle worker gone, stop dropped");
            }
        });
    }
}

struct ActiveSession {
    id: u64,
    kind: StartedKind,
    settings: StreamSettings,
    stop: CancellationToken,
    stats: Arc<SessionStats>,
    done: oneshot::Receiver<SessionReport>,
}

/// Starts and stops streaming sessions on behalf of the control plane
pub struct Orchestrator {
    active: Mutex<Option<ActiveSession>>,
    running: Arc<AtomicBool>,
    next_id: AtomicU64,
    ctx: Arc<ControlContext>,
    sources: Arc<dyn SourceProvider>,
    sinks: Arc<dyn SinkProvider>,
    time_limit: Option<Duration>,
}

impl Orchestrator {
    /// `running` must be the flag the control context was built with
    pub fn new(
        ctx: Arc<ControlContext>,
        running: Arc<AtomicBool>,
        sources: Arc<dyn SourceProvider>,
        sinks: Arc<dyn SinkProvider>,
    ) -> Self {
        Self {
            active: Mutex::new(None),
            running,
            next_id: AtomicU64::new(0),
            ctx,
            sources,
            sinks,
            time_limit: None,
        }
    }

    /// Stop every session after `limit`
    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Settings the running session was started with
    pub async fn session_settings(&self) -> Option<StreamSettings> {
        self.active.lock().await.as_ref().map(|s| s.settings.clone())
    }

    /// Live counters of the running session
    pub async fn session_stats(&self) -> Option<Arc<SessionStats>> {
        self.active.lock().await.as_ref().map(|s| Arc::clone(&s.stats))
    }

    /// Start a session with a copy of the current settings
    ///
    /// Starting while a session runs re-announces that session and leaves
    /// it untouched.
    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome, OrchestratorError> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.as_ref() {
            info!(id = session.id, "start requested while running");
            self.ctx.announce(Ack::Started(session.kind));
            return Ok(StartOutcome::AlreadyRunning {
                id: session.id,
                kind: session.kind,
            });
        }

        let settings = self.ctx.store.snapshot();
        let capabilities = self.ctx.store.capabilities();
        capabilities.validate(&settings)?;

        let mut source = self.sources.open(&settings).await?;
        let calibration = source.calibration();
        let sink = match self.sinks.open(&settings, calibration).await {
            Ok(sink) => sink,
            Err(e) => {
                source.stop().await;
                return Err(e.into());
            }
        };
        let kind = sink.kind().started_kind();

        let config = SessionConfig {
            limits: SessionLimits {
                samples: settings.sample_limit(),
                duration: self.time_limit,
            },
            calibration: settings.calibration.then_some(calibration),
            mode_flags: front_end_flags(
                capabilities.has_attenuator && settings.attenuator == Attenuator::A1To20,
                capabilities.has_ac_dc && settings.coupling == Coupling::Ac,
            ),
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = spawn_session(source, sink, config);
        let stop = handle.stop_token();
        let stats = handle.stats();
        let (done_tx, done) = oneshot::channel();
        tokio::spawn(Arc::clone(self).watch(id, handle, done_tx));

        info!(id, ?kind, port = settings.port, "session started");
        *active = Some(ActiveSession {
            id,
            kind,
            settings,
            stop,
            stats,
            done,
        });
        self.running.store(true, Ordering::SeqCst);
        self.ctx.announce(Ack::Started(kind));

        Ok(StartOutcome::Started { id, kind })
    }

    /// Stop the running session and announce `reason`
    ///
    /// Safe to call any number of times. A session that already ended on its
    /// own announces its own reason instead.
    pub async fn stop(&self, reason: StoppedKind) -> Result<StopOutcome, OrchestratorError> {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            return Ok(StopOutcome::NotRunning);
        };

        session.stop.cancel();
        let report = session.done.await;
        self.running.store(false, Ordering::SeqCst);
        let report = report.map_err(|_| RouterError::Join("session watcher vanished".into()))?;

        let announced = match stopped_kind(&report) {
            StoppedKind::Normal => reason,
            own => own,
        };
        info!(id = session.id, lost = report.lost, ?announced, "session stopped");
        self.ctx.announce(Ack::Stopped(announced));

        Ok(StopOutcome::Stopped {
            id: session.id,
            report,
        })
    }

    /// Spawn the worker applying queued lifecycle requests one at a time
    ///
    /// The worker ends once every queue handle is dropped.
    pub fn spawn_lifecycle(self: &Arc<Self>) -> (LifecycleQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                debug!(?request, "lifecycle request");
                match request {
                    Lifecycle::Start => {
                        if let Err(e) = this.start().await {
                            warn!(error = %e, "cannot start streaming");
                        }
                    }
                    Lifecycle::Stop(reason) => {
                        if let Err(e) = this.stop(reason).await {
                            warn!(error = %e, "cannot stop streaming");
                        }
                    }
                }
            }
        });
        (LifecycleQueue { tx }, worker)
    }

    /// Wait for session `id` to end and retire it if nobody stopped it
    async fn watch(
        self: Arc<Self>,
        id: u64,
        handle: SessionHandle,
        done: oneshot::Sender<SessionReport>,
    ) {
        let report = handle.join().await.unwrap_or_else(|e| SessionReport {
            exit: SessionExit::TransportError(e.to_string()),
            limit_reached: None,
            frames_sent: 0,
            samples_sent: 0,
            lost: 0,
        });

        let _ = done.send(report.clone());

        // Already retired by stop(), which announces
        let mut active = self.active.lock().await;
        if !active.as_ref().is_some_and(|s| s.id == id) {
            return;
        }
        *active = None;
        self.running.store(false, Ordering::SeqCst);

        let reason = stopped_kind(&report);
        match &report.exit {
            SessionExit::Normal => {
                info!(id, ?reason, frames = report.frames_sent, lost = report.lost, "session ended")
            }
            other => warn!(id, exit = ?other, "session ended"),
        }
        self.ctx.announce(Ack::Stopped(reason));
    }
}

/// Stop reason announced for a session that ended on its own
pub fn stopped_kind(report: &SessionReport) -> StoppedKind {
    match (&report.exit, report.limit_reached) {
        (SessionExit::OutOfSpace, _) => StoppedKind::DiskFull,
        (SessionExit::TransportError(_), _) => StoppedKind::TransportError,
        (SessionExit::Normal, Some(LimitReached::Samples | LimitReached::Duration)) => {
            StoppedKind::Done
        }
        (SessionExit::Normal, None) | (SessionExit::SourceFailed(_), _) => StoppedKind::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use stream_control::{BoardCapabilities, EventBus, SettingsStore};
    use stream_protocol::{
        ChannelSelection, Destination, FieldValue, Resolution, SettingsError, Transport,
    };
    use stream_router::{Calibration, FixedBudget, PacketSink, SinkError, SinkKind};
    use stream_sim::RecordingSink;
    use tokio::sync::broadcast;

    use crate::providers::{SimulatedSourceProvider, TransportSinkProvider};

    // ========================================================================
    // Helpers
    // ========================================================================

    #[derive(Default)]
    struct RecordingSinks {
        opened: SyncMutex<Vec<(StreamSettings, RecordingSink)>>,
    }

    impl RecordingSinks {
        fn count(&self) -> usize {
            self.opened.lock().len()
        }

        fn sink(&self, index: usize) -> RecordingSink {
            self.opened.lock()[index].1.clone()
        }

        fn settings(&self, index: usize) -> StreamSettings {
            self.opened.lock()[index].0.clone()
        }
    }

    #[async_trait]
    impl SinkProvider for RecordingSinks {
        async fn open(
            &self,
            settings: &StreamSettings,
            _calibration: Calibration,
        ) -> Result<Box<dyn PacketSink>, SinkError> {
            let kind = match (settings.destination, settings.protocol) {
                (Destination::File, _) => SinkKind::File,
                (_, Transport::Tcp) => SinkKind::Tcp,
                (_, Transport::Udp) => SinkKind::Udp,
            };
            let sink = RecordingSink::new(kind);
            self.opened.lock().push((settings.clone(), sink.clone()));
            Ok(Box::new(sink))
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        ctx: Arc<ControlContext>,
        acks: broadcast::Receiver<Ack>,
    }

    fn harness(settings: StreamSettings, sinks: Arc<dyn SinkProvider>) -> Harness {
        let store = Arc::new(SettingsStore::in_memory(settings, BoardCapabilities::default()));
        let running = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ControlContext::new(
            store,
            Arc::new(EventBus::new()),
            Arc::clone(&running),
        ));
        let acks = ctx.subscribe_acks();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&ctx),
            running,
            Arc::new(SimulatedSourceProvider {
                samples_per_frame: 256,
            }),
            sinks,
        ));
        Harness {
            orchestrator,
            ctx,
            acks,
        }
    }

    async fn next_ack(acks: &mut broadcast::Receiver<Ack>) -> Ack {
        tokio::time::timeout(Duration::from_secs(5), acks.recv())
            .await
            .expect("no acknowledgement")
            .unwrap()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sinks = Arc::new(RecordingSinks::default());
        let mut h = harness(StreamSettings::default(), sinks.clone());

        let first = h.orchestrator.start().await.unwrap();
        assert_eq!(
            first,
            StartOutcome::Started {
                id: 1,
                kind: StartedKind::Tcp
            }
        );
        assert!(h.ctx.is_running());

        let second = h.orchestrator.start().await.unwrap();
        assert_eq!(
            second,
            StartOutcome::AlreadyRunning {
                id: 1,
                kind: StartedKind::Tcp
            }
        );
        assert_eq!(sinks.count(), 1);
        assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::Tcp));
        assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::Tcp));

        h.orchestrator.stop(StoppedKind::Normal).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_any_number_of_times_releases_once() {
        let sinks = Arc::new(RecordingSinks::default());
        let mut h = harness(StreamSettings::default(), sinks.clone());

        assert_eq!(
            h.orchestrator.stop(StoppedKind::Normal).await.unwrap(),
            StopOutcome::NotRunning
        );

        h.orchestrator.start().await.unwrap();
        let outcome = h.orchestrator.stop(StoppedKind::Normal).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Stopped { id: 1, .. }));
        assert!(!h.orchestrator.is_running());

        for _ in 0..3 {
            assert_eq!(
                h.orchestrator.stop(StoppedKind::Normal).await.unwrap(),
                StopOutcome::NotRunning
            );
        }
        assert_eq!(sinks.sink(0).close_count(), 1);

        assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::Tcp));
        assert_eq!(next_ack(&mut h.acks).await, Ack::Stopped(StoppedKind::Normal));
        assert!(h.acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_settings_change_applies_to_next_session() {
        let sinks = Arc::new(RecordingSinks::default());
        let h = harness(StreamSettings::default(), sinks.clone());

        h.orchestrator.start().await.unwrap();
        h.ctx
            .store
            .apply(
                &[
                    ("protocol".into(), FieldValue::Str("udp".into())),
                    ("port".into(), FieldValue::Int(9000)),
                ],
                false,
            )
            .unwrap();

        let running = h.orchestrator.session_settings().await.unwrap();
        assert_eq!(running.protocol, Transport::Tcp);
        assert_eq!(running.port, 8900);

        h.orchestrator.stop(StoppedKind::Normal).await.unwrap();
        let restarted = h.orchestrator.start().await.unwrap();
        assert_eq!(
            restarted,
            StartOutcome::Started {
                id: 2,
                kind: StartedKind::Udp
            }
        );
        assert_eq!(sinks.settings(1).port, 9000);
        assert_eq!(sinks.settings(0).port, 8900);
        h.orchestrator.stop(StoppedKind::Normal).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_then_stop_events_apply_in_order() {
        let sinks = Arc::new(RecordingSinks::default());
        let mut h = harness(StreamSettings::default(), sinks.clone());
        let (queue, _worker) = h.orchestrator.spawn_lifecycle();
        queue.register(&h.ctx.bus);

        for _ in 0..20 {
            h.ctx.bus.emit(ControlEvent::StartStreaming);
            h.ctx.bus.emit(ControlEvent::StopStreaming);
            assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::Tcp));
            assert_eq!(next_ack(&mut h.acks).await, Ack::Stopped(StoppedKind::Normal));
            assert!(!h.orchestrator.is_running());
        }

        assert_eq!(sinks.count(), 20);
        assert!((0..20).all(|i| sinks.sink(i).close_count() == 1));
    }

    #[tokio::test]
    async fn test_queued_stop_does_not_block_caller() {
        let sinks = Arc::new(RecordingSinks::default());
        let h = harness(StreamSettings::default(), sinks.clone());
        let (queue, worker) = h.orchestrator.spawn_lifecycle();

        h.orchestrator.start().await.unwrap();
        assert!(queue.push(Lifecycle::Stop(StoppedKind::Normal)));
        drop(queue);
        worker.await.unwrap();

        assert!(!h.orchestrator.is_running());
        assert_eq!(sinks.sink(0).close_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_udp_settings_refused_at_start() {
        let sinks = Arc::new(RecordingSinks::default());
        // Written behind the store's back, as a stale settings file would be
        let settings = StreamSettings {
            protocol: Transport::Udp,
            resolution: Resolution::Bits16,
            channels: ChannelSelection::Both,
            ..Default::default()
        };
        let h = harness(settings, sinks.clone());

        let err = h.orchestrator.start().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidConfig(SettingsError::InvalidConfig(_))
        ));
        assert!(!h.orchestrator.is_running());
        assert_eq!(sinks.count(), 0);
    }

    // ========================================================================
    // Sessions ending on their own
    // ========================================================================

    #[tokio::test]
    async fn test_sample_limit_announces_done() {
        let sinks = Arc::new(RecordingSinks::default());
        let settings = StreamSettings {
            samples: 1000,
            ..Default::default()
        };
        let mut h = harness(settings, sinks.clone());

        h.orchestrator.start().await.unwrap();
        assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::Tcp));
        assert_eq!(next_ack(&mut h.acks).await, Ack::Stopped(StoppedKind::Done));
        assert!(!h.orchestrator.is_running());

        let samples: usize = sinks
            .sink(0)
            .packets()
            .iter()
            .map(|p| p.frame.samples_per_channel())
            .sum();
        assert_eq!(samples, 1000);
        assert_eq!(
            h.orchestrator.stop(StoppedKind::Normal).await.unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn test_full_disk_announces_disk_full() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = Arc::new(
            TransportSinkProvider::new(dir.path(), 65_507)
                .with_space(Arc::new(FixedBudget::new(44 + 256 * 3)), 0),
        );
        let settings = StreamSettings {
            destination: Destination::File,
            ..Default::default()
        };
        let mut h = harness(settings, sinks);

        h.orchestrator.start().await.unwrap();
        assert_eq!(next_ack(&mut h.acks).await, Ack::Started(StartedKind::File));
        assert_eq!(next_ack(&mut h.acks).await, Ack::Stopped(StoppedKind::DiskFull));
        assert!(!h.orchestrator.is_running());
    }

    #[test]
    fn test_stop_reason_mapping() {
        let report = |exit, limit_reached| SessionReport {
            exit,
            limit_reached,
            frames_sent: 0,
            samples_sent: 0,
            lost: 0,
        };
        assert_eq!(stopped_kind(&report(SessionExit::Normal, None)), StoppedKind::Normal);
        assert_eq!(
            stopped_kind(&report(SessionExit::Normal, Some(LimitReached::Samples))),
            StoppedKind::Done
        );
        assert_eq!(
            stopped_kind(&report(SessionExit::OutOfSpace, None)),
            StoppedKind::DiskFull
        );
        assert_eq!(
            stopped_kind(&report(SessionExit::TransportError("reset".into()), None)),
            StoppedKind::TransportError
        );
        assert_eq!(
            stopped_kind(&report(SessionExit::SourceFailed("gone".into()), None)),
            StoppedKind::Normal
        );
    }
}
