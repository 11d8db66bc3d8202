//! Core client runtime for a live-video streaming frontend: a playback
//! session controller that drives a media transport across a rotating
//! channel list, and a chat engine that keeps a deduplicated message
//! timeline bound to whatever channel is playing.
//!
//! Neither component talks to a concrete backend or decoder. They consume
//! the traits in [`api`]; [`api::http::RestApi`] and
//! [`chat::pusher::PusherTransport`] are the production implementations.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use zaptv::api::http::RestApi;
//! use zaptv::chat::pusher::PusherTransport;
//! use zaptv::chat::ChatEngine;
//! use zaptv::playback::PlaybackController;
//! use zaptv::{Channel, SessionOptions};
//!
//! # struct NullTransport;
//! # impl zaptv::api::PlaybackTransport for NullTransport {
//! #     fn load(&self, _: &url::Url) {}
//! #     fn play(&self) {}
//! #     fn pause(&self) {}
//! #     fn stats(&self) -> zaptv::api::StatsSnapshot { zaptv::api::StatsSnapshot::default() }
//! # }
//! # async fn wire() -> eyre::Result<()> {
//! let api = Arc::new(RestApi::new("https://kick.com/".parse()?)?);
//! let options = SessionOptions::default();
//!
//! let (controller, session) = PlaybackController::new(
//!     Arc::clone(&api),
//!     Arc::clone(&api),
//!     Arc::new(NullTransport),
//!     vec![Channel::live("some-channel")],
//!     options.clone(),
//! );
//! let (chat, chat_handle) = ChatEngine::new(
//!     Arc::clone(&api),
//!     Arc::clone(&api),
//!     Arc::new(PusherTransport::default()),
//!     session.selection(),
//!     &options,
//! );
//! tokio::spawn(controller.run());
//! tokio::spawn(chat.run());
//!
//! session.switch(0, false).await;
//! # let _ = chat_handle;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod api;
pub mod channels;
pub mod chat;
pub mod playback;

pub use channels::{Channel, ChannelList};
pub use chat::{ChatEngine, ChatHandle, ChatStatus, ChatView};
pub use playback::{
    ChannelSelection, PlaybackController, PlaybackState, PlayerStatus, SessionHandle,
};

/// Tunables for the playback and chat cores.
///
/// The defaults are the shipped behavior; overrides mainly exist for tests
/// and for embedders with unusual backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Debounce applied to rapid channel stepping before a stream is
    /// actually resolved.
    pub zap_delay: Duration,
    /// Fixed delay between playback recovery attempts.
    pub retry_delay: Duration,
    /// Recovery attempts before the channel's liveness is re-checked.
    pub max_attempts: u32,
    /// How long after playback starts before stall sampling begins.
    pub watchdog_grace: Duration,
    /// Interval between stall samples.
    pub watchdog_interval: Duration,
    /// Consecutive zero-throughput samples that count as a stall.
    pub stall_threshold: u32,
    /// Live chat window size; older messages fall off the front.
    pub chat_capacity: usize,
    /// Interval between metadata refreshes of the active channel.
    pub refresh_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            zap_delay: Duration::from_millis(350),
            retry_delay: Duration::from_secs(3),
            max_attempts: 5,
            watchdog_grace: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
            stall_threshold: 10,
            chat_capacity: 100,
            refresh_interval: Duration::from_secs(30),
        }
    }
}
