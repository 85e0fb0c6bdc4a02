//! Instrumented sinks for exercising the pipeline

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use stream_protocol::StreamPacket;
use stream_router::{PacketSink, SinkError, SinkKind};
use tracing::debug;

/// Sink keeping every packet in memory
#[derive(Debug, Clone)]
pub struct RecordingSink {
    kind: SinkKind,
    packets: Arc<Mutex<Vec<StreamPacket>>>,
    closes: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            packets: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Copy of the packets received so far
    pub fn packets(&self) -> Vec<StreamPacket> {
        self.packets.lock().clone()
    }

    /// How often `close` was called
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Err(SinkError::Closed);
        }
        self.packets.lock().push(packet.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a sink and refuses or delays chosen frames
pub struct GatedSink<S> {
    inner: S,
    reject: HashSet<u64>,
    stall: HashMap<u64, Duration>,
}

impl<S: PacketSink> GatedSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reject: HashSet::new(),
            stall: HashMap::new(),
        }
    }

    /// Refuse the frame with sequence id `seq`
    pub fn reject(mut self, seq: u64) -> Self {
        self.reject.insert(seq);
        self
    }

    /// Hold the frame with sequence id `seq` for `delay` before forwarding it
    pub fn stall(mut self, seq: u64, delay: Duration) -> Self {
        self.stall.insert(seq, delay);
        self
    }
}

#[async_trait]
impl<S: PacketSink> PacketSink for GatedSink<S> {
    fn kind(&self) -> SinkKind {
        self.inner.kind()
    }

    async fn ready(&mut self) -> Result<(), SinkError> {
        self.inner.ready().await
    }

    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError> {
        let seq = packet.frame.seq;
        if self.reject.contains(&seq) {
            debug!(seq, "gate rejected frame");
            return Err(SinkError::Rejected(format!("frame {seq} gated")));
        }
        if let Some(delay) = self.stall.get(&seq) {
            tokio::time::sleep(*delay).await;
        }
        self.inner.send(packet).await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.inner.close().await
    }
}
