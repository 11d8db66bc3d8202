//! Collaborator interfaces consumed by the playback and chat cores.
//!
//! The core never talks to the network or a decoder directly: stream
//! resolution, channel metadata, chat history, and the live feed all arrive
//! through the traits in this module. Production code wires in [`http::RestApi`]
//! and [`crate::chat::pusher::PusherTransport`]; tests substitute scripted
//! fakes.

use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio_stream::Stream;
use url::Url;

pub mod http;

/// Identifier of a channel's chat room, assigned by the backend.
pub type RoomId = u64;

/// Backend-assigned identifier of a channel (distinct from its slug).
pub type ChannelId = u64;

/// Point-in-time liveness and display metadata for a single channel.
///
/// Fetched on demand, most importantly during retry exhaustion to distinguish
/// "still live, API hiccup" from "confirmed offline".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveDetail {
    pub is_live: bool,
    pub title: Option<String>,
    pub category: Option<String>,
    pub viewer_count: u64,
    /// When the current broadcast started, if the channel is live.
    pub started_at: Option<Timestamp>,
}

/// Where a channel's chat lives: the room to subscribe to plus display
/// metadata that only the directory knows.
#[derive(Debug, Clone)]
pub struct FeedCoordinates {
    pub channel_id: ChannelId,
    pub room_id: RoomId,
    /// Months-subscribed threshold to badge image, for chat rendering.
    pub subscriber_badges: HashMap<u32, Url>,
    pub started_at: Option<Timestamp>,
}

/// A single chat message, from either a history page or the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend-assigned id, unique per room. Deduplication key.
    pub id: String,
    pub author: String,
    pub content: String,
    pub created_at: Timestamp,
}

/// One page of chat history, newest page first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    /// Opaque token for the next (older) page; `None` means no further pages.
    pub next_cursor: Option<String>,
}

/// Events emitted by a live feed subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The underlying connection is established and subscribed.
    Connected,
    /// The connection dropped; the transport may reconnect on its own.
    Disconnected,
    Message(ChatMessage),
}

/// Resolves a channel slug to a playable stream URL.
pub trait StreamResolver: Send + Sync + 'static {
    fn resolve(&self, slug: &str) -> impl Future<Output = eyre::Result<Url>> + Send;
}

/// Fetches current liveness detail for a channel.
pub trait ChannelDetailProvider: Send + Sync + 'static {
    fn live_detail(&self, slug: &str) -> impl Future<Output = eyre::Result<LiveDetail>> + Send;
}

/// Resolves a channel slug to its chat feed coordinates.
pub trait ChatDirectory: Send + Sync + 'static {
    fn feed_coordinates(
        &self,
        slug: &str,
    ) -> impl Future<Output = eyre::Result<FeedCoordinates>> + Send;
}

/// Fetches paginated chat history for a room.
pub trait HistoryProvider: Send + Sync + 'static {
    fn fetch_history(
        &self,
        room: RoomId,
        cursor: Option<&str>,
    ) -> impl Future<Output = eyre::Result<HistoryPage>> + Send;
}

/// The persistent live feed connection primitive.
///
/// Reconnection after a drop is the transport's own responsibility; consumers
/// only observe [`FeedEvent::Connected`] / [`FeedEvent::Disconnected`]. The
/// feed ends (the stream yields `None`) once the transport has given up for
/// good.
pub trait LiveFeedTransport: Send + Sync + 'static {
    type Feed: Stream<Item = FeedEvent> + Send + Unpin + 'static;

    fn open(&self, room: RoomId) -> impl Future<Output = eyre::Result<Self::Feed>> + Send;
}

/// Decoder-side statistics, sampled by the stall watchdog.
///
/// A typed snapshot rather than a stats string so the watchdog never has to
/// parse text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Decoded bitrate over the last sampling window, in bits per second.
    /// Zero while no media is flowing.
    pub decoded_bitrate: u64,
}

/// Lifecycle states reported by the playback transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Buffering,
    /// Media is loaded and ready but not yet rendering.
    Ready,
    Playing,
    Ended,
}

/// Events pushed by the playback transport into the session controller.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(TransportState),
    /// A playback error; the message is only used for logging.
    Error(String),
    QualityChanged { height: u32, framerate: f32 },
    /// In-band timed metadata, opaque bytes (typically a JSON object).
    Metadata(Bytes),
}

/// The media player abstraction the session controller drives.
///
/// Control calls are fire-and-forget; outcomes come back asynchronously as
/// [`TransportEvent`]s fed into the controller by the embedder.
pub trait PlaybackTransport: Send + Sync + 'static {
    fn load(&self, url: &Url);
    fn play(&self);
    fn pause(&self);
    fn stats(&self) -> StatsSnapshot;
}
