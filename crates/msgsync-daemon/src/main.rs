//! msgsync: peer-to-peer message sync daemon for a local network.
//!
//! Discovers peers by UDP broadcast, exchanges message history with each of
//! them over TCP, and serves the local history over HTTP.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use msgsync_core::{MessageStore, PeerRegistry};
use msgsync_daemon::{
    ApiState, Config, ConfigArgs, DiscoveryProber, DiscoveryResponder, MessagingResponder,
    SyncConfig, SyncEngine, router,
};

#[derive(Parser, Debug)]
#[command(name = "msgsync")]
#[command(about = "P2P LAN message sync daemon")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,msgsync_daemon=debug,msgsync_core=debug"
    } else {
        "info,msgsync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting msgsync");

    let config = Config::from_args(&args.config)?;

    // Generate peer ID if not provided
    let peer_id = config.peer_id.clone().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Generated peer ID: {}", id);
        id
    });
    info!("Peer ID: {}", peer_id);

    let registry = Arc::new(PeerRegistry::new(config.peer_timeout()));
    let store = Arc::new(MessageStore::new(config.history_limit));

    let messaging_addr: SocketAddr =
        format!("{}:{}", config.bind_address, config.messaging_port).parse()?;
    let api_addr: SocketAddr = format!("{}:{}", config.bind_address, config.api_port).parse()?;
    let broadcast_target: SocketAddr =
        format!("{}:{}", config.broadcast_address, config.broadcast_port()).parse()?;

    // Failing to bind any socket is fatal; everything after this point is not
    let messaging = MessagingResponder::bind(messaging_addr, store.clone())?;
    let responder = DiscoveryResponder::bind(
        &messaging_addr.to_string(),
        peer_id.clone(),
        config.packet_buffer_length,
    )
    .await?;
    let prober = DiscoveryProber::bind(
        peer_id.clone(),
        broadcast_target,
        config.broadcast_timeout(),
        config.packet_buffer_length,
        registry.clone(),
    )
    .await?;
    let sync = SyncEngine::new(
        peer_id.clone(),
        registry,
        store.clone(),
        SyncConfig {
            connect_timeout: config.connect_timeout(),
            exchange_timeout: config.exchange_timeout(),
            interval: config.sync_interval(),
        },
    );
    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    info!("HTTP API listening on {}", api_addr);

    let cancel = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(messaging.run(cancel.clone())),
        tokio::spawn(responder.run(cancel.clone())),
        tokio::spawn(prober.run(cancel.clone())),
        tokio::spawn(sync.run(cancel.clone())),
    ];

    let app = router(Arc::new(ApiState { peer_id, store }));
    let shutdown = cancel.clone();
    let api = tokio::spawn(async move {
        axum::serve(api_listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    info!("Daemon running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = api => {
            match result {
                Ok(Ok(())) => info!("HTTP API stopped"),
                Ok(Err(e)) => error!("HTTP API failed: {}", e),
                Err(e) => error!("HTTP API task failed: {}", e),
            }
        }
    }

    cancel.cancel();
    for task in futures::future::join_all(tasks).await {
        if let Err(e) = task {
            error!("Component task failed: {}", e);
        }
    }

    info!("Shutting down");
    Ok(())
}
