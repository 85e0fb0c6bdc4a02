//! End-to-end scenarios with simulated hardware
//!
//! - A bounded file capture stops after exactly the configured sample count
//! - A gated UDP stream shows a single-frame gap through the lost counter
//! - Packets streamed over TCP play back into a simulated DAC

use std::sync::Arc;
use std::time::Duration;

use stream_protocol::{ChannelSelection, Resolution, SaveFormat, StreamSettings, ValueDomain};
use stream_router::{
    run_playback, spawn_session, CancellationToken, FileSink, FileSinkConfig, FilesystemSpace,
    LimitReached, PacketReceiver, SessionConfig, SessionExit, SessionLimits, TcpPacketReceiver,
    TcpSink, UdpPacketReceiver, UdpSink, MAX_UDP_DATAGRAM,
};
use stream_sim::{GatedSink, SimulatedAdc, SimulatedAdcConfig, SimulatedDac, Waveform};

fn adc(resolution: Resolution, channels: ChannelSelection, samples: usize, period_ms: u64) -> SimulatedAdc {
    let mut settings = StreamSettings::default();
    settings.resolution = resolution;
    settings.channels = channels;
    let mut config = SimulatedAdcConfig::from_settings(&settings, samples);
    config.period = Duration::from_millis(period_ms);
    config.ch1 = Waveform::Constant(0x0102);
    config.ch2 = Waveform::Constant(-2);
    SimulatedAdc::new(config)
}

#[tokio::test]
async fn test_bounded_wav_capture_holds_exact_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::create(
        FileSinkConfig {
            dir: dir.path().to_path_buf(),
            stem: "bounded".into(),
            format: SaveFormat::Wav,
            value_type: ValueDomain::Raw,
            resolution: Resolution::Bits16,
            channels: ChannelSelection::Both,
            sample_rate: 31_250_000,
            calibration: Default::default(),
            min_free_bytes: 0,
        },
        Arc::new(FilesystemSpace),
    )
    .await
    .unwrap();
    let path = sink.path().to_path_buf();

    let session = spawn_session(
        Box::new(adc(Resolution::Bits16, ChannelSelection::Both, 256, 2)),
        Box::new(sink),
        SessionConfig {
            limits: SessionLimits {
                samples: Some(1000),
                duration: None,
            },
            ..Default::default()
        },
    );
    let report = session.join().await.unwrap();

    assert_eq!(report.exit, SessionExit::Normal);
    assert_eq!(report.limit_reached, Some(LimitReached::Samples));
    assert_eq!(report.samples_sent, 1000);

    let bytes = std::fs::read(&path).unwrap();
    // 1000 samples x 2 channels x 2 bytes after the 44-byte header
    assert_eq!(bytes.len(), 44 + 4000);
    assert_eq!(&bytes[40..44], &4000u32.to_le_bytes());
    assert_eq!(&bytes[44..48], &[0x02, 0x01, 0xFE, 0xFF]);
}

#[tokio::test]
async fn test_gated_udp_stream_reports_single_gap() {
    let udp = UdpSink::bind("127.0.0.1:0".parse().unwrap(), MAX_UDP_DATAGRAM)
        .await
        .unwrap();
    let server = udp.local_addr().unwrap();

    let mut receiver = UdpPacketReceiver::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .with_idle_timeout(Duration::from_millis(500));
    receiver.register(server).await.unwrap();

    let mut config = SimulatedAdcConfig::from_settings(&StreamSettings::default(), 64);
    config.period = Duration::from_millis(3);
    config.max_frames = Some(50);
    let source = SimulatedAdc::new(config);

    let session = spawn_session(
        Box::new(source),
        Box::new(GatedSink::new(udp).reject(10)),
        SessionConfig::default(),
    );

    let mut packets = Vec::new();
    while let Some(packet) = receiver.next_packet().await.unwrap() {
        packets.push(packet);
    }
    let report = session.join().await.unwrap();

    assert_eq!(report.exit, SessionExit::Normal);
    assert_eq!(report.lost, 1);
    assert_eq!(packets.len(), 49);
    for pair in packets.windows(2) {
        assert!(pair[0].frame.seq < pair[1].frame.seq);
        let jump = pair[1].lost - pair[0].lost;
        if pair[0].frame.seq == 9 {
            assert_eq!(pair[1].frame.seq, 11);
            assert_eq!(jump, 1);
        } else {
            assert_eq!(jump, 0);
        }
    }
}

#[tokio::test]
async fn test_tcp_stream_plays_back_into_dac() {
    let tcp = TcpSink::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = tcp.local_addr().unwrap();

    let mut config = SimulatedAdcConfig::from_settings(&StreamSettings::default(), 128);
    config.period = Duration::from_millis(2);
    config.max_frames = Some(20);
    let session = spawn_session(
        Box::new(SimulatedAdc::new(config)),
        Box::new(tcp),
        SessionConfig::default(),
    );

    let mut receiver = TcpPacketReceiver::connect(addr).await.unwrap();
    let mut dac = SimulatedDac::new();
    let playback = run_playback(&mut receiver, &mut dac, CancellationToken::new())
        .await
        .unwrap();
    let report = session.join().await.unwrap();

    assert_eq!(playback.frames, report.frames_sent);
    assert!(playback.lost <= report.lost);
    assert_eq!(playback.malformed, 0);
    assert_eq!(dac.frame_count() as u64, report.frames_sent);
    assert!(dac.state().lock().stopped);
}

#[tokio::test]
async fn test_playback_stops_on_request() {
    let mut receiver = UdpPacketReceiver::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let mut dac = SimulatedDac::new();
    let stop = CancellationToken::new();
    stop.cancel();

    let report = run_playback(&mut receiver, &mut dac, stop).await.unwrap();
    assert_eq!(report.frames, 0);
    assert!(dac.state().lock().stopped);
}
