//! Headless session runner: plays a channel list with a logging transport
//! and tails its chat to stdout. Useful for poking at a backend without a
//! real player attached.
//!
//! ```bash
//! RUST_LOG=zaptv=debug zaptv-cli <slug> [<slug>…]
//! ```

use eyre::Context;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use url::Url;
use zaptv::api::http::RestApi;
use zaptv::api::{PlaybackTransport, StatsSnapshot};
use zaptv::chat::pusher::PusherTransport;
use zaptv::chat::{ChatEngine, ChatStatus};
use zaptv::playback::PlaybackController;
use zaptv::{Channel, SessionOptions};

const API_BASE: &str = "https://kick.com/";

/// Stand-in for a media player: logs control calls and claims a healthy
/// bitrate so the stall watchdog stays quiet.
#[derive(Debug, Default)]
struct LoggingTransport;

impl PlaybackTransport for LoggingTransport {
    fn load(&self, url: &Url) {
        tracing::info!(%url, "transport: load");
    }

    fn play(&self) {
        tracing::info!("transport: play");
    }

    fn pause(&self) {
        tracing::info!("transport: pause");
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            decoded_bitrate: 1_000_000,
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let slugs: Vec<String> = std::env::args().skip(1).collect();
    if slugs.is_empty() {
        eyre::bail!("usage: zaptv-cli <slug> [<slug>…]");
    }
    let channels: Vec<Channel> = slugs.into_iter().map(Channel::live).collect();

    let api = Arc::new(RestApi::new(API_BASE.parse().context("parse API base")?)?);
    let options = SessionOptions::default();

    let (controller, session) = PlaybackController::new(
        Arc::clone(&api),
        Arc::clone(&api),
        Arc::new(LoggingTransport),
        channels,
        options.clone(),
    );
    let (chat, chat_handle) = ChatEngine::new(
        Arc::clone(&api),
        Arc::clone(&api),
        Arc::new(PusherTransport::default()),
        session.selection(),
        &options,
    );

    tokio::spawn(controller.run());
    tokio::spawn(chat.run());
    session.switch(0, false).await;

    let mut status = session.status();
    let mut view = chat_handle.view();
    let mut last_printed: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status.borrow_and_update().clone();
                tracing::info!(
                    state = ?status.state,
                    status = status.status.as_deref().unwrap_or("-"),
                    uptime = status.uptime.as_deref().unwrap_or("-"),
                    "playback"
                );
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view.borrow_and_update().clone();
                if let ChatStatus::Unavailable { reason } = &view.status {
                    tracing::warn!(%reason, "chat unavailable");
                }
                // print only messages we have not shown yet; the window
                // slides, so resume after the last printed id
                let start = last_printed
                    .as_deref()
                    .and_then(|id| view.messages.iter().position(|m| m.id == id))
                    .map_or(0, |i| i + 1);
                for message in &view.messages[start..] {
                    println!("[{}] {}: {}", message.created_at, message.author, message.content);
                }
                if let Some(message) = view.messages.last() {
                    last_printed = Some(message.id.clone());
                }
            }
        }
    }

    session.shutdown().await;
    chat_handle.shutdown().await;
    Ok(())
}
