//! Live chat feed over the Pusher websocket protocol.
//!
//! Implements [`LiveFeedTransport`] against a Pusher cluster: connect, wait
//! for `pusher:connection_established`, subscribe to the room's
//! `chatrooms.{id}.v2` channel, then forward `ChatMessageEvent`s. The
//! transport owns its own reconnect loop with exponential backoff; the chat
//! engine only ever sees [`FeedEvent`]s.

use crate::api::{ChatMessage, FeedEvent, LiveFeedTransport, RoomId};
use async_stream::stream;
use eyre::Context;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Pusher keeps idle connections alive for two minutes; ping well inside
/// that window.
const PING_INTERVAL: Duration = Duration::from_secs(60);

const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
const EVENT_PING: &str = "pusher:ping";
const EVENT_CHAT_MESSAGE: &str = "App\\Events\\ChatMessageEvent";

/// Exponential backoff for feed reconnects: 1s, 2s, 4s, then capped at 8s,
/// giving up for good after `max_attempts` consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based), or
    /// `None` once the budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

/// Connection parameters for the Pusher cluster the chat backend uses.
#[derive(Debug, Clone)]
pub struct PusherConfig {
    pub app_key: String,
    pub cluster: String,
    pub client_version: String,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            app_key: "32cbd69e4b950bf97679".to_string(),
            cluster: "us2".to_string(),
            client_version: "8.4.0".to_string(),
        }
    }
}

impl PusherConfig {
    fn endpoint(&self) -> Url {
        format!(
            "wss://ws-{}.pusher.com/app/{}?protocol=7&client=js&version={}&flash=false",
            self.cluster, self.app_key, self.client_version
        )
        .parse()
        .expect("cluster and app key produce a valid url")
    }
}

/// [`LiveFeedTransport`] backed by a Pusher websocket connection.
#[derive(Debug, Clone, Default)]
pub struct PusherTransport {
    config: PusherConfig,
    reconnect: ReconnectPolicy,
}

impl PusherTransport {
    pub fn new(config: PusherConfig, reconnect: ReconnectPolicy) -> Self {
        Self { config, reconnect }
    }
}

impl LiveFeedTransport for PusherTransport {
    type Feed = Pin<Box<dyn Stream<Item = FeedEvent> + Send>>;

    fn open(&self, room: RoomId) -> impl Future<Output = eyre::Result<Self::Feed>> + Send {
        let endpoint = self.config.endpoint();
        let policy = self.reconnect.clone();
        async move {
            // Connect eagerly so a dead cluster surfaces as an open error
            // instead of a silently empty feed.
            let (first, _) = connect_async(endpoint.as_str())
                .await
                .wrap_err_with(|| format!("connecting to {endpoint}"))?;
            tracing::debug!(room, %endpoint, "live feed socket connected");

            let feed = stream! {
                let mut socket = Some(first);
                let mut failures = 0u32;
                'reconnect: loop {
                    let mut ws = match socket.take() {
                        Some(ws) => ws,
                        None => {
                            let Some(delay) = policy.delay(failures) else {
                                tracing::warn!(room, "feed reconnect budget exhausted, closing");
                                break;
                            };
                            failures += 1;
                            tokio::time::sleep(delay).await;
                            match connect_async(endpoint.as_str()).await {
                                Ok((ws, _)) => {
                                    tracing::debug!(room, attempt = failures, "feed reconnected");
                                    ws
                                }
                                Err(e) => {
                                    tracing::warn!(room, error = %e, "feed reconnect failed");
                                    continue;
                                }
                            }
                        }
                    };

                    let mut ping = tokio::time::interval(PING_INTERVAL);
                    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    ping.tick().await; // the first tick fires immediately

                    loop {
                        tokio::select! {
                            _ = ping.tick() => {
                                if ws.send(Message::text(ping_frame())).await.is_err() {
                                    yield FeedEvent::Disconnected;
                                    continue 'reconnect;
                                }
                            }
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match parse_frame(text.as_str()) {
                                        Some(ServerFrame::ConnectionEstablished) => {
                                            if ws.send(Message::text(subscribe_frame(room))).await.is_err() {
                                                yield FeedEvent::Disconnected;
                                                continue 'reconnect;
                                            }
                                        }
                                        Some(ServerFrame::SubscriptionSucceeded) => {
                                            failures = 0;
                                            yield FeedEvent::Connected;
                                        }
                                        Some(ServerFrame::Ping) => {
                                            let _ = ws.send(Message::text(pong_frame())).await;
                                        }
                                        Some(ServerFrame::Chat(message)) => {
                                            yield FeedEvent::Message(message);
                                        }
                                        None => {}
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = ws.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!(room, "feed socket closed by peer");
                                    yield FeedEvent::Disconnected;
                                    continue 'reconnect;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(room, error = %e, "feed socket error");
                                    yield FeedEvent::Disconnected;
                                    continue 'reconnect;
                                }
                            }
                        }
                    }
                }
            };
            Ok(Box::pin(feed) as Self::Feed)
        }
    }
}

/// A frame from the server we know how to act on.
#[derive(Debug, PartialEq)]
enum ServerFrame {
    ConnectionEstablished,
    SubscriptionSucceeded,
    Ping,
    Chat(ChatMessage),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    /// Pusher double-encodes payloads: `data` is a JSON document inside a
    /// JSON string.
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct WireChatMessage {
    id: String,
    content: String,
    created_at: jiff::Timestamp,
    sender: WireSender,
}

#[derive(Deserialize)]
struct WireSender {
    username: String,
}

fn parse_frame(text: &str) -> Option<ServerFrame> {
    let frame: RawFrame = serde_json::from_str(text).ok()?;
    match frame.event.as_str() {
        EVENT_CONNECTION_ESTABLISHED => Some(ServerFrame::ConnectionEstablished),
        EVENT_SUBSCRIPTION_SUCCEEDED => Some(ServerFrame::SubscriptionSucceeded),
        EVENT_PING => Some(ServerFrame::Ping),
        EVENT_CHAT_MESSAGE => {
            let inner = frame.data.as_str()?;
            let wire: WireChatMessage = match serde_json::from_str(inner) {
                Ok(wire) => wire,
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable chat message payload");
                    return None;
                }
            };
            Some(ServerFrame::Chat(ChatMessage {
                id: wire.id,
                author: wire.sender.username,
                content: wire.content,
                created_at: wire.created_at,
            }))
        }
        _ => None,
    }
}

fn subscribe_frame(room: RoomId) -> String {
    serde_json::json!({
        "event": "pusher:subscribe",
        "data": { "auth": "", "channel": format!("chatrooms.{room}.v2") },
    })
    .to_string()
}

fn ping_frame() -> String {
    serde_json::json!({ "event": "pusher:ping", "data": {} }).to_string()
}

fn pong_frame() -> String {
    serde_json::json!({ "event": "pusher:pong", "data": {} }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn recognizes_lifecycle_frames() {
        assert_eq!(
            parse_frame(r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.1\"}"}"#),
            Some(ServerFrame::ConnectionEstablished)
        );
        assert_eq!(
            parse_frame(
                r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.7.v2"}"#
            ),
            Some(ServerFrame::SubscriptionSucceeded)
        );
        assert_eq!(
            parse_frame(r#"{"event":"pusher:ping","data":"{}"}"#),
            Some(ServerFrame::Ping)
        );
    }

    #[test]
    fn decodes_a_chat_message_event() {
        let inner = r#"{"id":"msg-1","content":"hello chat","created_at":"2024-05-04T12:30:00Z","sender":{"id":9,"username":"viewer42"}}"#;
        let text = serde_json::json!({
            "event": "App\\Events\\ChatMessageEvent",
            "data": inner,
            "channel": "chatrooms.7.v2",
        })
        .to_string();

        let Some(ServerFrame::Chat(message)) = parse_frame(&text) else {
            panic!("expected a chat frame");
        };
        assert_eq!(message.id, "msg-1");
        assert_eq!(message.author, "viewer42");
        assert_eq!(message.content, "hello chat");
        assert_eq!(
            message.created_at,
            "2024-05-04T12:30:00Z".parse().unwrap()
        );
    }

    #[test]
    fn unknown_and_malformed_frames_are_skipped() {
        assert_eq!(parse_frame(r#"{"event":"pusher:pong","data":"{}"}"#), None);
        assert_eq!(parse_frame("not json at all"), None);
        // chat event whose payload is not the expected shape
        let text = serde_json::json!({
            "event": "App\\Events\\ChatMessageEvent",
            "data": "{\"unexpected\":true}",
        })
        .to_string();
        assert_eq!(parse_frame(&text), None);
    }

    #[test]
    fn subscribe_frame_targets_the_room_channel() {
        let frame: serde_json::Value = serde_json::from_str(&subscribe_frame(12345)).unwrap();
        assert_eq!(frame["event"], "pusher:subscribe");
        assert_eq!(frame["data"]["channel"], "chatrooms.12345.v2");
        assert_eq!(frame["data"]["auth"], "");
    }

    #[test]
    fn reconnect_backoff_doubles_to_the_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (0..5).map(|n| policy.delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(8)),
                Some(Duration::from_secs(8)),
            ]
        );
        assert_eq!(policy.delay(9), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay(10), None);
    }

    #[test]
    fn endpoint_embeds_cluster_and_key() {
        let url = PusherConfig::default().endpoint();
        assert_eq!(url.host_str(), Some("ws-us2.pusher.com"));
        assert!(url.path().starts_with("/app/"));
        assert!(url.query().unwrap().contains("protocol=7"));
    }
}
