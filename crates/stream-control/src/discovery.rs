//! Board discovery over UDP broadcast
//!
//! A requester broadcasts [`DISCOVERY_QUERY`]; every listening board answers
//! with a [`DiscoveryAnnouncement`]. There is no end-of-replies marker, so the
//! requester collects whatever arrives before its timeout.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stream_protocol::discovery::is_query;
use stream_protocol::{DiscoveryAnnouncement, DISCOVERY_QUERY};
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::events::ControlErrorEvent;
use crate::server::ControlContext;

/// Default collection window of a discovery round
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

const MAX_DATAGRAM: usize = 1024;

/// Answers discovery queries for this board
pub struct DiscoveryResponder {
    socket: UdpSocket,
    config_port: u16,
    ctx: Arc<ControlContext>,
}

impl DiscoveryResponder {
    pub async fn bind(
        addr: SocketAddr,
        config_port: u16,
        ctx: Arc<ControlContext>,
    ) -> Result<Self, ControlError> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        info!(addr = %socket.local_addr()?, "discovery responder listening");
        Ok(Self {
            socket,
            config_port,
            ctx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn announcement(&self) -> DiscoveryAnnouncement {
        DiscoveryAnnouncement::new(self.ctx.store.capabilities().model.clone(), self.config_port)
            .with_running(self.ctx.is_running())
    }

    /// Answer queries until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) if is_query(&buf[..n]) => {
                        let reply = self.announcement().encode();
                        match self.socket.send_to(&reply, peer).await {
                            Ok(_) => debug!(%peer, "answered discovery query"),
                            Err(e) => {
                                warn!(%peer, error = %e, "discovery reply failed");
                                self.ctx.bus.emit_error(ControlErrorEvent::BroadcastError(e.to_string()));
                            }
                        }
                    }
                    Ok((n, peer)) => debug!(%peer, bytes = n, "ignoring non-query datagram"),
                    Err(e) => {
                        warn!(error = %e, "discovery receive failed");
                        self.ctx.bus.emit_error(ControlErrorEvent::BroadcastError(e.to_string()));
                    }
                },
            }
        }
        info!("discovery responder stopped");
    }
}

/// A board that answered a discovery round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBoard {
    /// Address the announcement came from
    pub addr: SocketAddr,
    pub announcement: DiscoveryAnnouncement,
}

impl DiscoveredBoard {
    /// Where to reach the board's configuration channel
    pub fn config_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.announcement.config_port)
    }
}

/// Datagram transport used by a discovery requester
#[async_trait]
pub trait DiscoveryTransport: Send {
    async fn send_query(&mut self) -> std::io::Result<()>;

    async fn recv(&mut self) -> std::io::Result<(Vec<u8>, SocketAddr)>;
}

/// Broadcast UDP requester socket
pub struct UdpDiscovery {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpDiscovery {
    /// Requester broadcasting to `port` on the limited broadcast address
    pub async fn broadcast(port: u16) -> Result<Self, ControlError> {
        Self::to(SocketAddr::from((Ipv4Addr::BROADCAST, port))).await
    }

    /// Requester sending to a fixed address
    pub async fn to(target: SocketAddr) -> Result<Self, ControlError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, target })
    }
}

#[async_trait]
impl DiscoveryTransport for UdpDiscovery {
    async fn send_query(&mut self) -> std::io::Result<()> {
        self.socket.send_to(DISCOVERY_QUERY, self.target).await?;
        Ok(())
    }

    async fn recv(&mut self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, peer))
    }
}

/// Run one discovery round and collect every announcement that arrives
/// before `timeout`
///
/// Malformed replies are skipped. A board answering twice is listed once.
pub async fn discover<T: DiscoveryTransport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<Vec<DiscoveredBoard>, ControlError> {
    let deadline = Instant::now() + timeout;
    transport.send_query().await?;

    let mut boards: Vec<DiscoveredBoard> = Vec::new();
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            received = transport.recv() => {
                let (bytes, addr) = received?;
                match DiscoveryAnnouncement::decode(&bytes) {
                    Ok(announcement) => {
                        if boards.iter().any(|b| b.addr == addr) {
                            continue;
                        }
                        info!(%addr, model = %announcement.model, "board discovered");
                        boards.push(DiscoveredBoard { addr, announcement });
                    }
                    Err(e) => debug!(%addr, error = %e, "ignoring malformed announcement"),
                }
            }
        }
    }
    Ok(boards)
}
