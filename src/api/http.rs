//! REST client for the channel directory backend.
//!
//! One [`RestApi`] implements every request-response collaborator trait:
//! stream resolution, live detail, chat room lookup, and chat history. The
//! wire shapes live here as private serde structs; the rest of the crate
//! only sees the typed values from [`crate::api`].

use crate::api::{
    ChannelDetailProvider, ChannelId, ChatDirectory, ChatMessage, FeedCoordinates, HistoryPage,
    HistoryProvider, LiveDetail, RoomId, StreamResolver,
};
use crate::playback::clock::parse_server_time;
use eyre::Context;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Typed client over the backend's v2 REST API.
#[derive(Debug, Clone)]
pub struct RestApi {
    client: reqwest::Client,
    base: Url,
}

impl RestApi {
    /// A client rooted at `base`, e.g. `https://kick.com/`.
    pub fn new(base: Url) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("build HTTP client")?;
        Ok(Self { client, base })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> eyre::Result<T> {
        let url = self
            .base
            .join(path)
            .with_context(|| format!("join API path {path}"))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("send GET request to {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(eyre::eyre!(
                "GET {url} failed with status {status}: {error_text}"
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("decode response from {url}"))
    }

    #[instrument(skip(self))]
    async fn fetch_channel(&self, slug: &str) -> eyre::Result<ChannelEnvelope> {
        self.get_json(&format!("api/v2/channels/{slug}")).await
    }
}

impl StreamResolver for RestApi {
    async fn resolve(&self, slug: &str) -> eyre::Result<Url> {
        let channel = self.fetch_channel(slug).await?;
        channel
            .playback_url
            .ok_or_else(|| eyre::eyre!("channel {slug} has no playback url"))
    }
}

impl ChannelDetailProvider for RestApi {
    async fn live_detail(&self, slug: &str) -> eyre::Result<LiveDetail> {
        let channel = self.fetch_channel(slug).await?;
        Ok(channel
            .livestream
            .map(LiveDetail::from)
            .unwrap_or_else(|| LiveDetail {
                is_live: false,
                title: None,
                category: None,
                viewer_count: 0,
                started_at: None,
            }))
    }
}

impl ChatDirectory for RestApi {
    async fn feed_coordinates(&self, slug: &str) -> eyre::Result<FeedCoordinates> {
        let channel = self.fetch_channel(slug).await?;
        let room_id = channel
            .chatroom
            .map(|c| c.id)
            .ok_or_else(|| eyre::eyre!("channel {slug} has no chat room"))?;

        let subscriber_badges = channel
            .subscriber_badges
            .into_iter()
            .map(|b| (b.months, b.badge_image.src))
            .collect();
        let started_at = channel
            .livestream
            .and_then(|l| l.created_at)
            .and_then(|s| parse_server_time(&s));

        Ok(FeedCoordinates {
            channel_id: channel.id,
            room_id,
            subscriber_badges,
            started_at,
        })
    }
}

impl HistoryProvider for RestApi {
    async fn fetch_history(&self, room: RoomId, cursor: Option<&str>) -> eyre::Result<HistoryPage> {
        let path = match cursor {
            Some(cursor) => format!("api/v2/channels/{room}/messages?cursor={cursor}"),
            None => format!("api/v2/channels/{room}/messages"),
        };
        let envelope: MessagesEnvelope = self.get_json(&path).await?;

        Ok(HistoryPage {
            messages: envelope
                .data
                .messages
                .into_iter()
                .map(ChatMessage::from)
                .collect(),
            next_cursor: envelope.data.cursor.filter(|c| !c.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChannelEnvelope {
    id: ChannelId,
    playback_url: Option<Url>,
    chatroom: Option<WireChatroom>,
    livestream: Option<WireLivestream>,
    #[serde(default)]
    subscriber_badges: Vec<WireBadge>,
}

#[derive(Debug, Deserialize)]
struct WireChatroom {
    id: RoomId,
}

#[derive(Debug, Deserialize)]
struct WireLivestream {
    #[serde(default)]
    is_live: bool,
    session_title: Option<String>,
    #[serde(default)]
    viewer_count: u64,
    /// `YYYY-MM-DD HH:MM:SS`, server local time assumed UTC.
    created_at: Option<String>,
    #[serde(default)]
    categories: Vec<WireCategory>,
}

impl From<WireLivestream> for LiveDetail {
    fn from(live: WireLivestream) -> Self {
        LiveDetail {
            is_live: live.is_live,
            title: live.session_title,
            category: live.categories.into_iter().next().map(|c| c.name),
            viewer_count: live.viewer_count,
            started_at: live.created_at.as_deref().and_then(parse_server_time),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireBadge {
    months: u32,
    badge_image: WireBadgeImage,
}

#[derive(Debug, Deserialize)]
struct WireBadgeImage {
    src: Url,
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    data: MessagesData,
}

#[derive(Debug, Deserialize)]
struct MessagesData {
    #[serde(default)]
    messages: Vec<WireMessage>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    content: String,
    created_at: jiff::Timestamp,
    sender: WireSender,
}

#[derive(Debug, Deserialize)]
struct WireSender {
    username: String,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        ChatMessage {
            id: wire.id,
            author: wire.sender.username,
            content: wire.content,
            created_at: wire.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn channel_envelope_decodes_a_live_channel() {
        let body = r#"{
            "id": 77,
            "slug": "trainwreck",
            "playback_url": "https://edge.example.com/master.m3u8",
            "chatroom": { "id": 7700, "chat_mode": "public" },
            "livestream": {
                "is_live": true,
                "session_title": "late night",
                "viewer_count": 1234,
                "created_at": "2026-08-01 18:00:00",
                "categories": [ { "id": 1, "name": "Just Chatting" } ]
            },
            "subscriber_badges": [
                { "months": 3, "badge_image": { "src": "https://cdn.example.com/3mo.png" } }
            ]
        }"#;

        let envelope: ChannelEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.id, 77);
        assert_eq!(envelope.chatroom.as_ref().unwrap().id, 7700);
        assert_eq!(envelope.subscriber_badges.len(), 1);

        let detail = LiveDetail::from(envelope.livestream.unwrap());
        assert!(detail.is_live);
        assert_eq!(detail.title.as_deref(), Some("late night"));
        assert_eq!(detail.category.as_deref(), Some("Just Chatting"));
        assert_eq!(detail.viewer_count, 1234);
        assert_eq!(
            detail.started_at,
            "2026-08-01T18:00:00Z".parse().ok()
        );
    }

    #[test]
    fn offline_channel_has_null_livestream() {
        let body = r#"{ "id": 5, "playback_url": null, "chatroom": { "id": 50 }, "livestream": null }"#;
        let envelope: ChannelEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.livestream.is_none());
        assert!(envelope.playback_url.is_none());
    }

    #[test]
    fn history_envelope_decodes_messages_and_cursor() {
        let body = r#"{
            "data": {
                "messages": [
                    {
                        "id": "uuid-1",
                        "content": "first",
                        "created_at": "2026-08-01T18:05:00Z",
                        "sender": { "id": 1, "username": "alice" }
                    }
                ],
                "cursor": "167..."
            }
        }"#;

        let envelope: MessagesEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.messages.len(), 1);
        let message = ChatMessage::from(envelope.data.messages.into_iter().next().unwrap());
        assert_eq!(message.author, "alice");
        assert_eq!(message.id, "uuid-1");
        assert_eq!(envelope.data.cursor.as_deref(), Some("167..."));
    }

    #[test]
    fn empty_cursor_means_no_more_pages() {
        let data = MessagesData {
            messages: vec![],
            cursor: Some(String::new()),
        };
        assert_eq!(data.cursor.filter(|c| !c.is_empty()), None);
    }
}
