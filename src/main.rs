use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use peercall::config::Config;
use peercall::logger;
use peercall::peer::RtcPeerFactory;
use peercall::signaling::WsConnector;
use peercall::utils::random_id;
use peercall::{SampleTrackSource, SessionController, SessionStatus};

/// Two-party call over a room relay
#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Room to join
    #[arg(short, long)]
    room: String,

    /// User id announced to the room (random when omitted)
    #[arg(short, long)]
    user: Option<String>,

    /// Relay WebSocket URL (overrides config file)
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = args.relay_url {
        config.relay_url = url;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate().context("invalid configuration")?;

    logger::init(&config.log_level);

    let user = args.user.unwrap_or_else(random_id);
    info!(room = %args.room, user = %user, relay = %config.relay_url, "Starting peercall");

    let peers = Arc::new(RtcPeerFactory::new(config.ice_servers.clone()));
    let handle = SessionController::spawn(
        config,
        Arc::new(SampleTrackSource),
        Arc::new(WsConnector),
        peers,
    );
    let mut updates = handle.subscribe();
    handle.join(args.room, user);

    let mut joined = false;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                info!(status = ?snapshot.status, remote = snapshot.has_remote_media(), "Session update");
                if let Some(message) = &snapshot.error_message {
                    warn!("{}", message);
                }
                match snapshot.status {
                    SessionStatus::AwaitingMedia | SessionStatus::Connecting | SessionStatus::Connected => {
                        joined = true;
                    }
                    SessionStatus::Idle if joined || snapshot.error_message.is_some() => break,
                    SessionStatus::Failed => break,
                    SessionStatus::Idle => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                handle.leave();
                handle.wait_for(|s| s.status == SessionStatus::Idle).await;
                break;
            }
        }
    }

    handle.shutdown();
    // контроллер закрывает канал состояния, когда всё освобождено
    while updates.changed().await.is_ok() {}
    Ok(())
}
