//! Configuration channel server
//!
//! Accepts TCP clients and runs one [`ConfigSession`] per connection on its
//! own task. Replies go back to the requesting client; lifecycle
//! acknowledgements are pushed to every connected client.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stream_protocol::Ack;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::events::{ControlErrorEvent, EventBus};
use crate::session::ConfigSession;
use crate::store::SettingsStore;

const ACK_BACKLOG: usize = 32;

/// State shared by every control-plane task
#[derive(Debug)]
pub struct ControlContext {
    pub store: Arc<SettingsStore>,
    pub bus: Arc<EventBus>,
    running: Arc<AtomicBool>,
    acks: broadcast::Sender<Ack>,
}

impl ControlContext {
    /// `running` is owned by whoever drives sessions; the control plane
    /// only reads it
    pub fn new(store: Arc<SettingsStore>, bus: Arc<EventBus>, running: Arc<AtomicBool>) -> Self {
        let (acks, _) = broadcast::channel(ACK_BACKLOG);
        Self {
            store,
            bus,
            running,
            acks,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Push `ack` to every connected configuration client, returning how
    /// many were reached
    pub fn announce(&self, ack: Ack) -> usize {
        let reached = self.acks.send(ack).unwrap_or(0);
        info!(%ack, clients = reached, "acknowledgement");
        reached
    }

    pub fn subscribe_acks(&self) -> broadcast::Receiver<Ack> {
        self.acks.subscribe()
    }
}

/// Listener for configuration clients
pub struct ConfigServer {
    listener: TcpListener,
    ctx: Arc<ControlContext>,
}

impl ConfigServer {
    pub async fn bind(addr: SocketAddr, ctx: Arc<ControlContext>) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "configuration channel listening");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until `shutdown` fires
    ///
    /// An accepted host change moves the listener to the new address on the
    /// same port. Connected clients keep their connection.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControlError> {
        let ConfigServer { mut listener, ctx } = self;
        let (rebind_tx, mut rebind_rx) = mpsc::channel::<Ipv4Addr>(4);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(host) = rebind_rx.recv() => {
                    listener = rebind(listener, host, &ctx).await?;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        let rebind_tx = rebind_tx.clone();
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = serve_client(stream, peer, &ctx, rebind_tx, shutdown).await {
                                debug!(%peer, error = %e, "configuration client error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        ctx.bus.emit_error(ControlErrorEvent::ServerInternal(e.to_string()));
                    }
                },
            }
        }

        info!("configuration channel stopped");
        Ok(())
    }
}

async fn rebind(
    listener: TcpListener,
    host: Ipv4Addr,
    ctx: &ControlContext,
) -> Result<TcpListener, ControlError> {
    let old = listener.local_addr()?;
    let target = SocketAddr::from((host, old.port()));
    if target == old {
        return Ok(listener);
    }

    // The old socket must be gone before a wildcard bind on the same port
    drop(listener);
    match TcpListener::bind(target).await {
        Ok(listener) => {
            info!(from = %old, to = %target, "configuration channel moved");
            Ok(listener)
        }
        Err(e) => {
            warn!(addr = %target, error = %e, "rebind failed, restoring listener");
            ctx.bus.emit_error(ControlErrorEvent::ServerInternal(format!(
                "cannot listen on {target}: {e}"
            )));
            Ok(TcpListener::bind(old).await?)
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &ControlContext,
    rebind_tx: mpsc::Sender<Ipv4Addr>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(%peer, "configuration client connected");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut acks = ctx.subscribe_acks();
    let mut session = ConfigSession::new();

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let outcome = session.handle_line(&line, &ctx.store, ctx.is_running());
                    if let Some(reply) = &outcome.reply {
                        if let Err(e) = write_line(&mut writer, reply).await {
                            break Err(e);
                        }
                    }
                    if let Some(error) = outcome.error {
                        ctx.bus.emit_error(error);
                    }
                    if let Some(event) = outcome.event {
                        ctx.bus.emit(event);
                    }
                    if let Some(host) = outcome.rebind {
                        let _ = rebind_tx.send(host).await;
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },

            ack = acks.recv() => match ack {
                Ok(ack) => {
                    if let Err(e) = write_line(&mut writer, &ack.to_string()).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%peer, missed, "client missed acknowledgements");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    if session.is_receiving() {
        warn!(%peer, "client left during SET");
        ctx.bus.emit_error(ControlErrorEvent::BreakReceiveSettings);
    }
    info!(%peer, "configuration client disconnected");
    result
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
