//! Acquisition and delivery endpoints opened per session

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use stream_protocol::{Destination, StreamSettings, Transport};
use stream_router::{
    Calibration, DiskSpace, FileSink, FileSinkConfig, FilesystemSpace, FrameSource, PacketSink,
    SinkError, SinkEvent, SourceError, TcpSink, UdpSink,
};
use stream_sim::{SimulatedAdc, SimulatedAdcConfig, BASE_CLOCK_HZ};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Opens the frame source for a session
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn open(&self, settings: &StreamSettings) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens the packet sink for a session
#[async_trait]
pub trait SinkProvider: Send + Sync {
    async fn open(
        &self,
        settings: &StreamSettings,
        calibration: Calibration,
    ) -> Result<Box<dyn PacketSink>, SinkError>;
}

/// Software converter standing in for acquisition hardware
#[derive(Debug, Clone)]
pub struct SimulatedSourceProvider {
    pub samples_per_frame: usize,
}

#[async_trait]
impl SourceProvider for SimulatedSourceProvider {
    async fn open(&self, settings: &StreamSettings) -> Result<Box<dyn FrameSource>, SourceError> {
        let config = SimulatedAdcConfig::from_settings(settings, self.samples_per_frame);
        Ok(Box::new(SimulatedAdc::new(config)))
    }
}

/// TCP, UDP or file sink chosen from the settings
pub struct TransportSinkProvider {
    data_dir: PathBuf,
    space: Arc<dyn DiskSpace>,
    min_free_bytes: u64,
    max_udp_datagram: usize,
}

impl TransportSinkProvider {
    pub fn new(data_dir: impl Into<PathBuf>, max_udp_datagram: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            space: Arc::new(FilesystemSpace),
            min_free_bytes: stream_router::file::DEFAULT_MIN_FREE_BYTES,
            max_udp_datagram,
        }
    }

    /// Replace the free-space probe
    pub fn with_space(mut self, space: Arc<dyn DiskSpace>, min_free_bytes: u64) -> Self {
        self.space = space;
        self.min_free_bytes = min_free_bytes;
        self
    }
}

#[async_trait]
impl SinkProvider for TransportSinkProvider {
    async fn open(
        &self,
        settings: &StreamSettings,
        calibration: Calibration,
    ) -> Result<Box<dyn PacketSink>, SinkError> {
        let addr = SocketAddr::from((settings.host, settings.port));
        match (settings.destination, settings.protocol) {
            (Destination::Network, Transport::Tcp) => {
                let sink = TcpSink::bind(addr).await?.with_events(log_sink_events());
                Ok(Box::new(sink))
            }
            (Destination::Network, Transport::Udp) => {
                let sink = UdpSink::bind(addr, self.max_udp_datagram)
                    .await?
                    .with_events(log_sink_events());
                Ok(Box::new(sink))
            }
            (Destination::File, _) => {
                let config = FileSinkConfig {
                    dir: self.data_dir.clone(),
                    stem: FileSinkConfig::timestamped_stem(),
                    format: settings.format,
                    value_type: settings.value_type,
                    resolution: settings.resolution,
                    channels: settings.channels,
                    sample_rate: BASE_CLOCK_HZ / settings.decimation.max(1),
                    calibration,
                    min_free_bytes: self.min_free_bytes,
                };
                let sink = FileSink::create(config, Arc::clone(&self.space)).await?;
                info!(path = %sink.path().display(), "saving to file");
                Ok(Box::new(sink))
            }
        }
    }
}

fn log_sink_events() -> mpsc::Sender<SinkEvent> {
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SinkEvent::Connected { peer } => info!(%peer, "data client connected"),
                SinkEvent::Disconnected { peer } => info!(%peer, "data client disconnected"),
                SinkEvent::Error { message } => warn!(%message, "data channel error"),
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_protocol::SaveFormat;
    use stream_router::SinkKind;

    #[tokio::test]
    async fn test_sink_follows_destination() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TransportSinkProvider::new(dir.path(), 65_507);

        let mut settings = StreamSettings {
            port: 0,
            ..Default::default()
        };
        let mut sink = provider.open(&settings, Calibration::default()).await.unwrap();
        assert_eq!(sink.kind(), SinkKind::Tcp);
        sink.close().await.unwrap();

        settings.protocol = Transport::Udp;
        let mut sink = provider.open(&settings, Calibration::default()).await.unwrap();
        assert_eq!(sink.kind(), SinkKind::Udp);
        sink.close().await.unwrap();

        settings.destination = Destination::File;
        settings.format = SaveFormat::Csv;
        let mut sink = provider.open(&settings, Calibration::default()).await.unwrap();
        assert_eq!(sink.kind(), SinkKind::File);
        sink.close().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_simulated_source_matches_settings() {
        let provider = SimulatedSourceProvider {
            samples_per_frame: 64,
        };
        let mut source = provider.open(&StreamSettings::default()).await.unwrap();
        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.ch1.len(), 64);
        assert!(frame.ch2.is_empty());
        source.stop().await;
    }
}
