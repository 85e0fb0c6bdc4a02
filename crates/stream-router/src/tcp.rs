//! TCP data channel
//!
//! The server side listens on the data port and streams to the first client
//! that connects. The connection is never re-established: once the client
//! goes away the sink reports a transport error and the session ends.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use stream_protocol::{decode, encode_into, payload_len, StreamPacket, HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{SinkError, SourceError};
use crate::receiver::PacketReceiver;
use crate::sink::{EventTap, PacketSink, SinkEvent, SinkKind};

/// Largest payload a receiver will allocate for
pub const MAX_TCP_PAYLOAD: usize = 16 * 1024 * 1024;

/// Packet sink writing to one TCP client
pub struct TcpSink {
    listener: TcpListener,
    client: Option<(TcpStream, SocketAddr)>,
    events: EventTap,
    buf: Vec<u8>,
    closed: bool,
}

impl TcpSink {
    /// Listen for the data client on `addr`
    pub async fn bind(addr: SocketAddr) -> Result<Self, SinkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(SinkError::from_transport)?;
        let local = listener.local_addr().map_err(SinkError::from_transport)?;
        info!(addr = %local, "TCP data channel listening");
        Ok(Self {
            listener,
            client: None,
            events: EventTap::default(),
            buf: Vec::with_capacity(HEADER_LEN),
            closed: false,
        })
    }

    /// Report connection lifecycle on `tx`
    pub fn with_events(mut self, tx: mpsc::Sender<SinkEvent>) -> Self {
        self.events = EventTap::new(tx);
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&mut self) -> Result<(), SinkError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(SinkError::from_transport)?;
        let _ = stream.set_nodelay(true);
        info!(%peer, "data client connected");
        self.events.emit(SinkEvent::Connected { peer }).await;
        self.client = Some((stream, peer));
        Ok(())
    }
}

#[async_trait]
impl PacketSink for TcpSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Tcp
    }

    async fn ready(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.client.is_none() {
            self.accept().await?;
        }
        Ok(())
    }

    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError> {
        self.ready().await?;

        encode_into(&packet.frame, packet.lost, &mut self.buf);

        let Some((stream, peer)) = self.client.as_mut() else {
            return Err(SinkError::Closed);
        };
        if let Err(e) = stream.write_all(&self.buf).await {
            let peer = *peer;
            warn!(%peer, error = %e, "data client write failed");
            self.client = None;
            self.events
                .emit(SinkEvent::Error {
                    message: e.to_string(),
                })
                .await;
            self.events.emit(SinkEvent::Disconnected { peer }).await;
            return Err(SinkError::from_transport(e));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some((mut stream, peer)) = self.client.take() {
            let _ = stream.shutdown().await;
            debug!(%peer, "data client released");
            self.events.emit(SinkEvent::Disconnected { peer }).await;
        }
        Ok(())
    }
}

/// Client side of the TCP data channel
///
/// Reassembles packets from the byte stream using the header's declared
/// channel lengths.
pub struct TcpPacketReceiver {
    stream: TcpStream,
    header: [u8; HEADER_LEN],
    buf: Vec<u8>,
}

impl TcpPacketReceiver {
    /// Connect to a board's data channel
    pub async fn connect(addr: SocketAddr) -> Result<Self, SourceError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            header: [0u8; HEADER_LEN],
            buf: Vec::new(),
        }
    }
}

#[async_trait]
impl PacketReceiver for TcpPacketReceiver {
    async fn next_packet(&mut self) -> Result<Option<StreamPacket>, SourceError> {
        match self.stream.read_exact(&mut self.header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = payload_len(&self.header)?;
        if len > MAX_TCP_PAYLOAD {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("declared payload of {len} bytes exceeds limit"),
            )));
        }

        self.buf.clear();
        self.buf.extend_from_slice(&self.header);
        self.buf.resize(HEADER_LEN + len, 0);
        self.stream.read_exact(&mut self.buf[HEADER_LEN..]).await?;

        Ok(Some(decode(&self.buf)?))
    }
}
