// Rumble Linux: Wifi discovery, Rumble status dissemination and Firechat.
// Lines on stdin are posted as statuses; "/chat <text>" goes to the Firechat room.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rumble_core::{MemoryStore, NetworkCoordinator, NetworkEvent, StatusMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rumble-linux", version)]
#[command(about = "Rumble disruption-tolerant status sharing daemon")]
struct Args {
    /// Config file (default: ~/.config/rumble/config.toml, then /etc/rumble/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Author name for posts, overrides the config file
    #[arg(short, long)]
    author: Option<String>,

    /// Rumble TCP listen port, overrides config and environment
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Do not join the Firechat room
    #[arg(long)]
    no_firechat: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(author) = args.author {
        cfg.author = author;
    }
    if let Some(port) = args.tcp_port {
        cfg.network.tcp_port = port;
    }
    if args.no_firechat {
        cfg.network.enable_firechat = false;
    }

    let store = Arc::new(MemoryStore::new());
    let coordinator = NetworkCoordinator::new(cfg.network.clone(), store.clone(), store.clone());
    let mut events = coordinator.subscribe();
    coordinator.start().await.context("start network")?;
    info!(node = %coordinator.node_id(), author = %cfg.author, "rumble running");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&coordinator, &cfg.author, line.trim()),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(event) => log_event(&store, &event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down");
    coordinator.stop().await;
    Ok(())
}

fn handle_line(coordinator: &NetworkCoordinator, author: &str, line: &str) {
    if line.is_empty() {
        return;
    }
    if let Some(text) = line.strip_prefix("/chat ") {
        match coordinator.send_chat_message(author, text) {
            Ok(0) => warn!("no firechat channel open, message kept locally"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "chat not sent"),
        }
        return;
    }
    let status = StatusMessage::new(author, line);
    match coordinator.post_status(&status) {
        Ok(outcome) => info!(uid = %status.uid, row = outcome.row_id, "status posted"),
        Err(e) => warn!(error = %e, "status not posted"),
    }
}

fn log_event(store: &MemoryStore, event: &NetworkEvent) {
    match event {
        NetworkEvent::NeighbourReachable(n) => info!(neighbour = %n, "neighbour reachable"),
        NetworkEvent::NeighbourUnreachable(n) => info!(neighbour = %n, "neighbour gone"),
        NetworkEvent::ChannelConnected { channel, .. } => info!(%channel, "channel up"),
        NetworkEvent::ChannelDisconnected {
            channel,
            error,
            statistics,
            ..
        } => info!(
            %channel,
            error,
            sent = statistics.statuses_sent,
            received = statistics.statuses_received,
            "channel down"
        ),
        NetworkEvent::ConnectionFailed { channel, reason, .. } => {
            warn!(%channel, %reason, "connection failed")
        }
        NetworkEvent::StatusInserted { row_id } => {
            if let Some(status) = store.status(*row_id) {
                println!("[status] {}: {} (hops {})", status.author, status.post, status.hop_count);
            }
        }
        NetworkEvent::ChatMessageReceived(m) => println!("[{}] {}: {}", m.room, m.author, m.message),
        _ => {}
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("wait for ctrl-c")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    }
    Ok(())
}
