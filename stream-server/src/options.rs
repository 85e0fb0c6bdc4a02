//! Process options

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use stream_control::BoardModel;
use stream_protocol::{DEFAULT_BROADCAST_PORT, DEFAULT_CONFIG_PORT};

/// Streaming server - streams instrument samples over TCP, UDP or to files
#[derive(Parser, Debug)]
#[command(name = "streaming-server")]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// Persisted settings file
    #[arg(long, default_value = "/root/.streaming_config")]
    pub config_file: PathBuf,

    /// Address the discovery responder binds to
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    pub host: Ipv4Addr,

    /// Configuration channel port
    #[arg(long, default_value_t = DEFAULT_CONFIG_PORT)]
    pub config_port: u16,

    /// Discovery broadcast port
    #[arg(long, default_value_t = DEFAULT_BROADCAST_PORT)]
    pub broadcast_port: u16,

    /// Directory file sessions are written to
    #[arg(long, default_value = "/tmp/stream_files")]
    pub data_dir: PathBuf,

    /// Board model
    #[arg(long, default_value = "simulated")]
    pub model: BoardModel,

    /// Stop every session after this many milliseconds
    #[arg(long)]
    pub time_limit_ms: Option<u64>,
}

impl Options {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::parse_from(["streaming-server"]);
        assert_eq!(options.config_port, 8901);
        assert_eq!(options.broadcast_port, 8902);
        assert_eq!(options.host, Ipv4Addr::UNSPECIFIED);
        assert_eq!(options.model, BoardModel::Simulated);
        assert_eq!(options.time_limit(), None);
    }

    #[test]
    fn test_overrides() {
        let options = Options::parse_from([
            "streaming-server",
            "--model",
            "signalab-250-12",
            "--time-limit-ms",
            "1500",
            "--data-dir",
            "/srv/captures",
        ]);
        assert_eq!(options.model, BoardModel::Signalab250_12);
        assert_eq!(options.time_limit(), Some(Duration::from_millis(1500)));
        assert_eq!(options.data_dir, PathBuf::from("/srv/captures"));
    }
}
