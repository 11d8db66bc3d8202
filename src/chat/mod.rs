//! Chat synchronization engine.
//!
//! Follows the playback controller's channel selection and keeps one chat
//! subscription bound to it: resolve the channel's room, open the live feed,
//! backfill recent history, and merge the two into a single deduplicated
//! timeline. Rebinding is epoch-scoped the same way playback is
//! generation-scoped: every async completion carries the epoch it was
//! started under, and completions from a superseded subscription are
//! discarded.

use crate::SessionOptions;
use crate::api::{
    ChatDirectory, ChatMessage, FeedCoordinates, FeedEvent, HistoryPage, HistoryProvider,
    LiveFeedTransport, RoomId,
};
use crate::playback::ChannelSelection;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

pub mod buffer;
pub mod pusher;

use buffer::MessageBuffer;

/// Connection status of the bound chat subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChatStatus {
    /// No channel selected.
    #[default]
    Idle,
    /// Room lookup or feed connection in progress.
    Connecting,
    /// Live feed connected.
    Live,
    /// The subscription failed; waiting for the next rebind.
    Unavailable { reason: String },
}

/// Everything a chat surface renders, published over a watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub status: ChatStatus,
    /// Most recent operation failure (history fetch, pagination). Does not
    /// imply the live feed is down.
    pub last_error: Option<String>,
    /// The rolling live window, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Older scrollback loaded on demand, oldest first, uncapped.
    pub transcript: Vec<ChatMessage>,
    /// Whether another page of scrollback can be requested.
    pub more_available: bool,
}

#[derive(Debug)]
pub enum ChatCommand {
    /// Fetch the next page of older history into the transcript.
    LoadMore,
    Shutdown,
}

#[derive(Debug)]
enum ChatEvent {
    /// Room coordinates resolved for the bound channel.
    Bound {
        epoch: u64,
        result: eyre::Result<FeedCoordinates>,
    },
    /// Initial history backfill completed.
    History {
        epoch: u64,
        result: eyre::Result<HistoryPage>,
    },
    /// A scrollback page completed.
    Older {
        epoch: u64,
        result: eyre::Result<HistoryPage>,
    },
    /// The live feed produced an event.
    Feed { epoch: u64, event: FeedEvent },
    /// The live feed could not be opened at all.
    FeedFailed { epoch: u64, error: String },
}

/// Cloneable handle for a running [`ChatEngine`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
    view: watch::Receiver<ChatView>,
}

impl ChatHandle {
    pub async fn load_more(&self) {
        let _ = self.commands.send(ChatCommand::LoadMore).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(ChatCommand::Shutdown).await;
    }

    pub fn view(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }
}

/// Binds chat subscriptions to the current channel selection.
pub struct ChatEngine<C, H, F> {
    directory: Arc<C>,
    history: Arc<H>,
    feeds: Arc<F>,
    capacity: usize,

    epoch: u64,
    room: Option<RoomId>,
    buffer: MessageBuffer,
    transcript: Vec<ChatMessage>,
    next_cursor: Option<String>,
    loading_more: bool,
    status: ChatStatus,
    last_error: Option<String>,
    feed_task: Option<JoinHandle<()>>,

    selection: watch::Receiver<ChannelSelection>,
    events: mpsc::Sender<ChatEvent>,
    events_rx: Option<mpsc::Receiver<ChatEvent>>,
    commands_rx: Option<mpsc::Receiver<ChatCommand>>,
    view: watch::Sender<ChatView>,
}

impl<C, H, F> ChatEngine<C, H, F>
where
    C: ChatDirectory,
    H: HistoryProvider,
    F: LiveFeedTransport,
{
    pub fn new(
        directory: Arc<C>,
        history: Arc<H>,
        feeds: Arc<F>,
        selection: watch::Receiver<ChannelSelection>,
        options: &SessionOptions,
    ) -> (Self, ChatHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (view_tx, view_rx) = watch::channel(ChatView::default());

        let engine = Self {
            directory,
            history,
            feeds,
            capacity: options.chat_capacity,
            epoch: 0,
            room: None,
            buffer: MessageBuffer::new(options.chat_capacity),
            transcript: Vec::new(),
            next_cursor: None,
            loading_more: false,
            status: ChatStatus::Idle,
            last_error: None,
            feed_task: None,
            selection,
            events: events_tx,
            events_rx: Some(events_rx),
            commands_rx: Some(commands_rx),
            view: view_tx,
        };
        let handle = ChatHandle {
            commands: commands_tx,
            view: view_rx,
        };
        (engine, handle)
    }

    /// Runs until [`ChatCommand::Shutdown`], all handles drop, or the
    /// selection publisher goes away.
    pub async fn run(mut self) {
        let mut commands = self
            .commands_rx
            .take()
            .expect("run is called at most once");
        let mut events = self.events_rx.take().expect("run is called at most once");
        let mut selection = self.selection.clone();

        // Bind to whatever channel was already selected before we started.
        let initial = selection.borrow_and_update().slug.clone();
        self.bind(initial);

        loop {
            tokio::select! {
                changed = selection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let slug = selection.borrow_and_update().slug.clone();
                    self.bind(slug);
                }
                cmd = commands.recv() => match cmd {
                    None | Some(ChatCommand::Shutdown) => break,
                    Some(ChatCommand::LoadMore) => self.load_more(),
                },
                Some(ev) = events.recv() => self.handle_event(ev),
            }
        }

        self.stop_feed();
        tracing::debug!("chat engine stopped");
    }

    /// Tears down the current subscription and starts one for `slug`.
    fn bind(&mut self, slug: Option<String>) {
        self.epoch += 1;
        self.stop_feed();
        self.room = None;
        self.buffer = MessageBuffer::new(self.capacity);
        self.transcript.clear();
        self.next_cursor = None;
        self.loading_more = false;
        self.last_error = None;

        let Some(slug) = slug else {
            self.status = ChatStatus::Idle;
            self.publish();
            return;
        };
        tracing::info!(slug = %slug, epoch = self.epoch, "binding chat to channel");
        self.status = ChatStatus::Connecting;
        self.publish();

        let epoch = self.epoch;
        let directory = Arc::clone(&self.directory);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = directory.feed_coordinates(&slug).await;
            let _ = events.send(ChatEvent::Bound { epoch, result }).await;
        });
    }

    fn handle_event(&mut self, ev: ChatEvent) {
        let epoch = match &ev {
            ChatEvent::Bound { epoch, .. }
            | ChatEvent::History { epoch, .. }
            | ChatEvent::Older { epoch, .. }
            | ChatEvent::Feed { epoch, .. }
            | ChatEvent::FeedFailed { epoch, .. } => *epoch,
        };
        if epoch != self.epoch {
            tracing::trace!(current = self.epoch, "discarding event from superseded epoch");
            return;
        }

        match ev {
            ChatEvent::Bound { result, .. } => self.on_bound(result),
            ChatEvent::History { result, .. } => self.on_history(result),
            ChatEvent::Older { result, .. } => self.on_older(result),
            ChatEvent::Feed { event, .. } => self.on_feed(event),
            ChatEvent::FeedFailed { error, .. } => {
                tracing::warn!(%error, "live feed could not be opened");
                self.status = ChatStatus::Unavailable { reason: error };
                self.publish();
            }
        }
    }

    fn on_bound(&mut self, result: eyre::Result<FeedCoordinates>) {
        let coordinates = match result {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "room lookup failed");
                self.status = ChatStatus::Unavailable {
                    reason: format!("room lookup failed: {e}"),
                };
                self.publish();
                return;
            }
        };
        let room = coordinates.room_id;
        self.room = Some(room);
        tracing::debug!(room, "chat room resolved");

        // History and the live feed start concurrently; the seen-set in the
        // buffer absorbs whatever overlap their race produces.
        let epoch = self.epoch;
        let history = Arc::clone(&self.history);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = history.fetch_history(room, None).await;
            let _ = events.send(ChatEvent::History { epoch, result }).await;
        });

        let feeds = Arc::clone(&self.feeds);
        let events = self.events.clone();
        self.feed_task = Some(tokio::spawn(async move {
            match feeds.open(room).await {
                Ok(mut feed) => {
                    while let Some(event) = feed.next().await {
                        if events.send(ChatEvent::Feed { epoch, event }).await.is_err() {
                            return;
                        }
                    }
                    let _ = events
                        .send(ChatEvent::Feed {
                            epoch,
                            event: FeedEvent::Disconnected,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = events
                        .send(ChatEvent::FeedFailed {
                            epoch,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }));
    }

    fn on_history(&mut self, result: eyre::Result<HistoryPage>) {
        match result {
            Ok(page) => {
                let admitted = self.buffer.seed_history(page.messages);
                self.next_cursor = page.next_cursor;
                tracing::debug!(admitted, "history backfill merged");
            }
            Err(e) => {
                // Surfaced, not retried; the live feed keeps running.
                tracing::warn!(error = %e, "history backfill failed");
                self.last_error = Some(format!("history unavailable: {e}"));
            }
        }
        self.publish();
    }

    fn load_more(&mut self) {
        if self.loading_more {
            return;
        }
        let (Some(room), Some(cursor)) = (self.room, self.next_cursor.clone()) else {
            return;
        };
        self.loading_more = true;

        let epoch = self.epoch;
        let history = Arc::clone(&self.history);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = history.fetch_history(room, Some(&cursor)).await;
            let _ = events.send(ChatEvent::Older { epoch, result }).await;
        });
    }

    fn on_older(&mut self, result: eyre::Result<HistoryPage>) {
        self.loading_more = false;
        match result {
            Ok(page) => {
                self.next_cursor = page.next_cursor;
                let mut fresh: Vec<ChatMessage> = page
                    .messages
                    .into_iter()
                    .filter(|m| self.buffer.mark_seen(&m.id))
                    .collect();
                fresh.sort_by_key(|m| m.created_at);
                // Older pages go in front of what is already scrolled back.
                fresh.extend(self.transcript.drain(..));
                self.transcript = fresh;
            }
            Err(e) => {
                tracing::warn!(error = %e, "scrollback page failed");
                self.last_error = Some(format!("could not load older messages: {e}"));
            }
        }
        self.publish();
    }

    fn on_feed(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => {
                self.status = ChatStatus::Live;
                self.publish();
            }
            FeedEvent::Disconnected => {
                self.status = ChatStatus::Unavailable {
                    reason: "live feed disconnected".into(),
                };
                self.publish();
            }
            FeedEvent::Message(message) => {
                if self.buffer.push_live(message) {
                    self.publish();
                }
            }
        }
    }

    fn stop_feed(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        self.view.send_replace(ChatView {
            status: self.status.clone(),
            last_error: self.last_error.clone(),
            messages: self.buffer.to_vec(),
            transcript: self.transcript.clone(),
            more_available: self.next_cursor.is_some(),
        });
    }
}
