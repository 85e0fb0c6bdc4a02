//! UDP data channel
//!
//! One datagram per packet, never fragmented. The sink learns its peer from
//! the first datagram a client sends to the data port unless the peer is
//! given up front. Loss in transit is not recovered; receivers observe it by
//! diffing the cumulative lost counter.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use stream_protocol::{decode, encode_into, StreamPacket, HEADER_LEN};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{SinkError, SourceError};
use crate::receiver::PacketReceiver;
use crate::sink::{EventTap, PacketSink, SinkEvent, SinkKind};

/// Largest UDP payload over IPv4
pub const MAX_UDP_DATAGRAM: usize = 65_507;

/// Registration datagram a client sends to the data port
pub const UDP_HELLO: &[u8] = b"SM-HELLO";

/// Packet sink sending one datagram per packet
pub struct UdpSink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    max_datagram: usize,
    events: EventTap,
    buf: Vec<u8>,
    closed: bool,
}

impl UdpSink {
    /// Bind the data port
    pub async fn bind(addr: SocketAddr, max_datagram: usize) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(SinkError::from_transport)?;
        let local = socket.local_addr().map_err(SinkError::from_transport)?;
        info!(addr = %local, max_datagram, "UDP data channel bound");
        Ok(Self {
            socket,
            peer: None,
            max_datagram: max_datagram.min(MAX_UDP_DATAGRAM),
            events: EventTap::default(),
            buf: Vec::with_capacity(HEADER_LEN),
            closed: false,
        })
    }

    /// Send to `peer` without waiting for a registration datagram
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Report lifecycle on `tx`
    pub fn with_events(mut self, tx: mpsc::Sender<SinkEvent>) -> Self {
        self.events = EventTap::new(tx);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn wait_for_peer(&mut self) -> Result<SocketAddr, SinkError> {
        let mut hello = [0u8; 64];
        let (_, peer) = self
            .socket
            .recv_from(&mut hello)
            .await
            .map_err(SinkError::from_transport)?;
        info!(%peer, "UDP data client registered");
        self.events.emit(SinkEvent::Connected { peer }).await;
        self.peer = Some(peer);
        Ok(peer)
    }
}

#[async_trait]
impl PacketSink for UdpSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Udp
    }

    async fn ready(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.peer.is_none() {
            self.wait_for_peer().await?;
        }
        Ok(())
    }

    async fn send(&mut self, packet: &StreamPacket) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }

        encode_into(&packet.frame, packet.lost, &mut self.buf);
        if self.buf.len() > self.max_datagram {
            return Err(SinkError::Rejected(format!(
                "packet of {} bytes exceeds datagram limit {}",
                self.buf.len(),
                self.max_datagram
            )));
        }

        let peer = match self.peer {
            Some(peer) => peer,
            None => self.wait_for_peer().await?,
        };

        if let Err(e) = self.socket.send_to(&self.buf, peer).await {
            warn!(%peer, error = %e, "UDP send failed");
            self.events
                .emit(SinkEvent::Error {
                    message: e.to_string(),
                })
                .await;
            return Err(SinkError::from_transport(e));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(peer) = self.peer {
            debug!(%peer, "UDP data channel released");
            self.events.emit(SinkEvent::Disconnected { peer }).await;
        }
        Ok(())
    }
}

/// Client side of the UDP data channel
pub struct UdpPacketReceiver {
    socket: UdpSocket,
    idle_timeout: Option<Duration>,
    buf: Vec<u8>,
}

impl UdpPacketReceiver {
    /// Bind a local socket for receiving packets
    pub async fn bind(addr: SocketAddr) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            idle_timeout: None,
            buf: vec![0u8; MAX_UDP_DATAGRAM],
        })
    }

    /// Treat `timeout` without any datagram as end of stream
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Register with a board's data port so it knows where to send
    pub async fn register(&self, server: SocketAddr) -> Result<(), SourceError> {
        self.socket.send_to(UDP_HELLO, server).await?;
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl PacketReceiver for UdpPacketReceiver {
    async fn next_packet(&mut self) -> Result<Option<StreamPacket>, SourceError> {
        let len = match self.idle_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
                    Ok(result) => result?.0,
                    Err(_) => return Ok(None),
                }
            }
            None => self.socket.recv_from(&mut self.buf).await?.0,
        };
        Ok(Some(decode(&self.buf[..len])?))
    }
}
