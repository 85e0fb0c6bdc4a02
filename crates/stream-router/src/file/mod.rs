//! Local file sinks
//!
//! A file sink writes one frame per `send` in one of three containers
//! (WAV, TDMS, CSV) holding either raw converter codes or volts. Before every
//! write the remaining free space is checked, so a full disk surfaces as
//! [`SinkError::OutOfSpace`] rather than a generic I/O failure.

mod csv;
mod space;
mod tdms;
mod wav;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use stream_protocol::{
    ChannelSelection, ModeFlags, Resolution, SampleFrame, SaveFormat, StreamPacket, ValueDomain,
};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

pub use self::csv::CsvEncoder;
pub use self::space::{DiskSpace, FilesystemSpace, FixedBudget};
pub use self::tdms::TdmsEncoder;
pub use self::wav::{wav_header, WavEncoder, WAV_HEADER_SIZE};

use crate::calibration::{codes, Calibration};
use crate::error::SinkError;
use crate::sink::{PacketSink, SinkKind};

/// Free space kept in reserve by default
pub const DEFAULT_MIN_FREE_BYTES: u64 = 1024 * 1024;

/// One frame's samples split per enabled channel
#[derive(Debug, Clone, PartialEq)]
pub enum Columns {
    Codes(Vec<Vec<i32>>),
    Volts(Vec<Vec<f32>>),
}

impl Columns {
    /// Longest column length
    pub fn rows(&self) -> usize {
        match self {
            Columns::Codes(cols) => cols.iter().map(Vec::len).max().unwrap_or(0),
            Columns::Volts(cols) => cols.iter().map(Vec::len).max().unwrap_or(0),
        }
    }
}

/// Container encoder selected by the save format
#[derive(Debug)]
enum Encoder {
    Wav(WavEncoder),
    Tdms(TdmsEncoder),
    Csv(CsvEncoder),
}

impl Encoder {
    fn header(&self) -> Vec<u8> {
        match self {
            Encoder::Wav(e) => e.header(),
            Encoder::Tdms(e) => e.header(),
            Encoder::Csv(e) => e.header(),
        }
    }

    fn encode(&self, columns: &Columns, out: &mut Vec<u8>) {
        match self {
            Encoder::Wav(e) => e.encode(columns, out),
            Encoder::Tdms(e) => e.encode(columns, out),
            Encoder::Csv(e) => e.encode(columns, out),
        }
    }

    fn finish(&self, data_size: u64) -> Vec<(u64, Vec<u8>)> {
        match self {
            Encoder::Wav(e) => e.finish(data_size),
            Encoder::Tdms(e) => e.finish(data_size),
            Encoder::Csv(_) => Vec::new(),
        }
    }
}

/// Everything a file sink needs to know up front
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Directory the file is created in
    pub dir: PathBuf,
    /// File stem, without extension
    pub stem: String,
    pub format: SaveFormat,
    pub value_type: ValueDomain,
    pub resolution: Resolution,
    pub channels: ChannelSelection,
    /// Effective sample rate in Hz, recorded in WAV headers
    pub sample_rate: u32,
    /// Used for volt conversion of codes that were not calibrated en route
    pub calibration: Calibration,
    /// Refuse to write once less than this many bytes are free
    pub min_free_bytes: u64,
}

impl FileSinkConfig {
    /// File stem stamped with the current UTC time
    pub fn timestamped_stem() -> String {
        format!("data_file_{}", chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"))
    }

    fn channel_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(2);
        if self.channels.ch1() {
            names.push("ch1");
        }
        if self.channels.ch2() {
            names.push("ch2");
        }
        names
    }

    /// Preferred path of the file this config produces
    pub fn path(&self) -> PathBuf {
        self.numbered_path(0)
    }

    fn numbered_path(&self, n: u32) -> PathBuf {
        let ext = self.format.extension();
        match n {
            0 => self.dir.join(format!("{}.{ext}", self.stem)),
            n => self.dir.join(format!("{}_{n}.{ext}", self.stem)),
        }
    }
}

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Create a file that did not exist before, numbering the stem when taken
async fn create_unique(config: &FileSinkConfig) -> Result<(File, PathBuf), SinkError> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = config.numbered_path(n);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SinkError::from_io(e)),
        }
    }
    Err(SinkError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for stem {}", config.stem),
    )))
}

/// Packet sink appending frames to a local file
pub struct FileSink {
    path: PathBuf,
    dir: PathBuf,
    file: Option<BufWriter<File>>,
    encoder: Encoder,
    config: FileSinkConfig,
    space: Arc<dyn DiskSpace>,
    scratch: Vec<u8>,
    data_bytes: u64,
}

impl FileSink {
    /// Create the file and write its header
    pub async fn create(config: FileSinkConfig, space: Arc<dyn DiskSpace>) -> Result<Self, SinkError> {
        fs::create_dir_all(&config.dir)
            .await
            .map_err(SinkError::from_io)?;

        let names = config.channel_names();
        let volts = config.value_type == ValueDomain::Volt;
        let bits = config.resolution.bits() as u16;
        let encoder = match config.format {
            SaveFormat::Wav => Encoder::Wav(WavEncoder::new(
                config.sample_rate,
                names.len() as u16,
                bits,
                volts,
            )),
            SaveFormat::Tdms => Encoder::Tdms(TdmsEncoder::new("stream", names, bits)),
            SaveFormat::Csv => Encoder::Csv(CsvEncoder::new(names)),
        };

        let (file, path) = create_unique(&config).await?;
        let mut file = BufWriter::new(file);

        let header = encoder.header();
        ensure_space(space.as_ref(), &config.dir, header.len() as u64, config.min_free_bytes)?;
        file.write_all(&header).await.map_err(SinkError::from_io)?;
        space.record_write(header.len() as u64);

        info!(path = %path.display(), format = ?config.format, "file sink created");

        Ok(Self {
            dir: config.dir.clone(),
            path,
            file: Some(file),
            encoder,
            config,
            space,
            scratch: Vec::new(),
            data_bytes: 0,
        })
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sample bytes written so far, excluding headers
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    fn columns(&self, frame: &SampleFrame) -> Columns {
        let calibrated = frame.mode.contains(ModeFlags::CALIBRATED);
        let mut raw = Vec::with_capacity(2);
        let mut cals = Vec::with_capacity(2);
        if self.config.channels.ch1() {
            raw.push(codes(&frame.ch1, frame.resolution));
            cals.push(self.config.calibration.ch1);
        }
        if self.config.channels.ch2() {
            raw.push(codes(&frame.ch2, frame.resolution));
            cals.push(self.config.calibration.ch2);
        }

        match self.config.value_type {
            ValueDomain::Raw => Columns::Codes(raw),
            ValueDomain::Volt => Columns::Volts(
                raw.iter()
                    .zip(&cals)
                    .map(|(col, cal)| {
                        col.iter()
                            .map(|c| cal.to_volts(*c, frame.resolution, calibrated))
                            .collect()
                    })
                    .collect(),
            ),
        }
    }
}

fn ensure_space(
    space: &dyn DiskSpace,
    dir: &Path,
    needed: u64,
    min_free: u64,
) -> Result<(), SinkError> {
    let available = space.available(dir).map_err(SinkError::from_io)?;
    if available < needed.saturating_add(min_free) {
        warn!(available, needed, "not enough free space");
        return Err(SinkError::OutOfSpace);
    }
    Ok(())
}

#[async_trait]
impl PacketSink for FileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Closed);
        }

        let columns = self.columns(&packet.frame);
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        self.encoder.encode(&columns, &mut scratch);

        let result = async {
            ensure_space(
                self.space.as_ref(),
                &self.dir,
                scratch.len() as u64,
                self.config.min_free_bytes,
            )?;
            let file = self.file.as_mut().ok_or(SinkError::Closed)?;
            file.write_all(&scratch).await.map_err(SinkError::from_io)
        }
        .await;

        if result.is_ok() {
            self.space.record_write(scratch.len() as u64);
            self.data_bytes += scratch.len() as u64;
        }
        self.scratch = scratch;
        result
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        file.flush().await.map_err(SinkError::from_io)?;
        let mut inner = file.into_inner();
        for (offset, bytes) in self.encoder.finish(self.data_bytes) {
            inner
                .seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(SinkError::from_io)?;
            inner.write_all(&bytes).await.map_err(SinkError::from_io)?;
        }
        inner.flush().await.map_err(SinkError::from_io)?;
        inner.sync_all().await.map_err(SinkError::from_io)?;

        debug!(path = %self.path.display(), bytes = self.data_bytes, "file sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, format: SaveFormat, value_type: ValueDomain) -> FileSinkConfig {
        FileSinkConfig {
            dir: dir.to_path_buf(),
            stem: "capture".into(),
            format,
            value_type,
            resolution: Resolution::Bits16,
            channels: ChannelSelection::Both,
            sample_rate: 1_000,
            calibration: Calibration::default(),
            min_free_bytes: 0,
        }
    }

    fn frame(seq: u64, samples: usize) -> SampleFrame {
        let ch: Vec<u8> = (0..samples as i16).flat_map(|v| v.to_le_bytes()).collect();
        SampleFrame::new(seq, Resolution::Bits16, 4)
            .with_ch1(ch.clone())
            .with_ch2(ch)
    }

    #[tokio::test]
    async fn test_wav_sizes_patched_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(
            config(dir.path(), SaveFormat::Wav, ValueDomain::Raw),
            Arc::new(FilesystemSpace),
        )
        .await
        .unwrap();

        sink.send(&StreamPacket::new(frame(0, 10), 0)).await.unwrap();
        sink.send(&StreamPacket::new(frame(1, 10), 0)).await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        let bytes = std::fs::read(sink.path()).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_SIZE + 80);
        assert_eq!(&bytes[40..44], &80u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &116u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_csv_volts() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), SaveFormat::Csv, ValueDomain::Volt);
        cfg.channels = ChannelSelection::Ch1;
        cfg.calibration = Calibration::default().with_full_scale_factor(20.0);
        let mut sink = FileSink::create(cfg, Arc::new(FilesystemSpace)).await.unwrap();

        let ch1 = i16::MAX.to_le_bytes().to_vec();
        let f = SampleFrame::new(0, Resolution::Bits16, 4).with_ch1(ch1);
        sink.send(&StreamPacket::new(f, 0)).await.unwrap();
        sink.close().await.unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, "ch1\n20.000000\n");
    }

    #[tokio::test]
    async fn test_out_of_space_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let budget = Arc::new(FixedBudget::new(WAV_HEADER_SIZE as u64 + 50));
        let mut sink = FileSink::create(config(dir.path(), SaveFormat::Wav, ValueDomain::Raw), budget)
            .await
            .unwrap();

        // 10 samples x 2 channels x 2 bytes = 40 bytes fits, the next 40 do not
        sink.send(&StreamPacket::new(frame(0, 10), 0)).await.unwrap();
        let err = sink.send(&StreamPacket::new(frame(1, 10), 0)).await.unwrap_err();
        assert!(matches!(err, SinkError::OutOfSpace));

        sink.close().await.unwrap();
        assert_eq!(sink.data_bytes(), 40);
    }

    #[tokio::test]
    async fn test_tdms_file_starts_with_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(
            config(dir.path(), SaveFormat::Tdms, ValueDomain::Raw),
            Arc::new(FilesystemSpace),
        )
        .await
        .unwrap();
        sink.send(&StreamPacket::new(frame(0, 4), 0)).await.unwrap();
        sink.close().await.unwrap();

        let bytes = std::fs::read(sink.path()).unwrap();
        assert_eq!(&bytes[0..4], b"TDSm");
        assert!(sink.path().extension().is_some_and(|e| e == "tdms"));
    }

    #[tokio::test]
    async fn test_existing_capture_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), SaveFormat::Csv, ValueDomain::Raw);

        let mut first = FileSink::create(cfg.clone(), Arc::new(FilesystemSpace))
            .await
            .unwrap();
        first.send(&StreamPacket::new(frame(0, 2), 0)).await.unwrap();
        first.close().await.unwrap();
        let kept = std::fs::read(first.path()).unwrap();

        let mut second = FileSink::create(cfg, Arc::new(FilesystemSpace))
            .await
            .unwrap();
        second.close().await.unwrap();

        assert_eq!(first.path(), dir.path().join("capture.csv"));
        assert_eq!(second.path(), dir.path().join("capture_1.csv"));
        assert_eq!(std::fs::read(first.path()).unwrap(), kept);
    }

    #[test]
    fn test_timestamped_stem() {
        let stem = FileSinkConfig::timestamped_stem();
        assert!(stem.starts_with("data_file_"));
        assert_eq!(stem.len(), "data_file_".len() + 19);
    }
}
