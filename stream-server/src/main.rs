//! Streaming Server
//!
//! Streams samples from the acquisition front end to a TCP client, UDP peer
//! or local file, configured remotely over the configuration channel and
//! discoverable by UDP broadcast.
//!
//! # Architecture
//!
//! ```text
//!  config clients ──TCP──▶ ConfigServer ──▶ EventBus ──▶ Orchestrator ──▶ session
//!  discovery      ──UDP──▶ DiscoveryResponder              │
//!                                 ▲                         │
//!                                 └──── ACK STARTED/STOPPED ◀┘
//! ```

mod error;
mod options;
mod orchestrator;
mod providers;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stream_control::{
    BoardCapabilities, ConfigServer, ControlContext, ControlEvent, DiscoveryResponder, EventBus,
    SettingsStore,
};
use stream_protocol::StoppedKind;
use stream_router::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use options::Options;
use orchestrator::Orchestrator;
use providers::{SimulatedSourceProvider, TransportSinkProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "streaming_server=info,stream_router=info,stream_control=info,stream_protocol=info,stream_sim=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = Options::parse();
    info!(model = %options.model, "starting streaming server");

    let capabilities = BoardCapabilities::for_model(options.model);
    let samples_per_frame = capabilities.samples_per_frame;
    let max_udp_datagram = capabilities.max_udp_datagram;
    let store = Arc::new(SettingsStore::load_or_default(&options.config_file, capabilities));
    let settings = store.snapshot();

    let bus = Arc::new(EventBus::new());
    let running = Arc::new(AtomicBool::new(false));
    let ctx = Arc::new(ControlContext::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&running),
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::clone(&ctx),
            running,
            Arc::new(SimulatedSourceProvider { samples_per_frame }),
            Arc::new(TransportSinkProvider::new(&options.data_dir, max_udp_datagram)),
        )
        .with_time_limit(options.time_limit()),
    );
    register_handlers(&bus, &orchestrator);

    let shutdown = CancellationToken::new();

    let config_addr = SocketAddr::from((settings.host, options.config_port));
    let server = ConfigServer::bind(config_addr, Arc::clone(&ctx))
        .await
        .with_context(|| format!("cannot listen on {config_addr}"))?;
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    let discovery_addr = SocketAddr::from((options.host, options.broadcast_port));
    let responder = DiscoveryResponder::bind(discovery_addr, options.config_port, Arc::clone(&ctx))
        .await
        .with_context(|| format!("cannot listen on {discovery_addr}"))?;
    let responder_task = tokio::spawn(responder.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");

    if let (Some(settings), Some(stats)) = (
        orchestrator.session_settings().await,
        orchestrator.session_stats().await,
    ) {
        info!(
            port = settings.port,
            frames = stats.frames_sent(),
            lost = stats.lost(),
            "stopping running session"
        );
    }
    if let Err(e) = orchestrator.stop(StoppedKind::Normal).await {
        warn!(error = %e, "stop on shutdown failed");
    }
    shutdown.cancel();
    server_task.await??;
    responder_task.await?;
    Ok(())
}

/// Route control-plane events to the orchestrator
fn register_handlers(bus: &EventBus, orchestrator: &Arc<Orchestrator>) {
    let (lifecycle, _worker) = orchestrator.spawn_lifecycle();
    lifecycle.register(bus);

    bus.add_handler(ControlEvent::GetNewSetting, || {
        debug!("settings updated, applied at next start");
    });

    bus.add_error_handler(|event| warn!(?event, "control plane error"));
}
