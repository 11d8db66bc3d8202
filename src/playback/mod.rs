//! The playback session controller.
//!
//! Owns the active channel index and everything that can go wrong around it:
//! zap debouncing, stream resolution, transport errors, silent stalls, and
//! the transition to a confirmed-offline channel. All state lives on one
//! control task; network calls and timers run on spawned tasks that report
//! back as [`SessionEvent`]s tagged with the generation they were started
//! under. The dispatcher discards anything from a superseded generation, so
//! a slow response for channel A can never touch channel B's session.

use crate::SessionOptions;
use crate::api::{
    ChannelDetailProvider, LiveDetail, PlaybackTransport, StreamResolver, TransportEvent,
    TransportState,
};
use crate::channels::{Channel, ChannelList};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

pub mod backoff;
pub mod clock;
pub mod watchdog;

use backoff::{FailureClass, RetryPolicy, RetryState};
use clock::ServerClock;
use watchdog::StallDetector;

/// Lifecycle of the active playback session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Buffering,
    /// A retry timer or exhaustion check is in flight.
    Recovering,
    /// Confirmed offline; no automatic retries until re-selected or
    /// refreshed back to live.
    Offline,
}

/// What a display surface needs to render the playback side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// User-facing error/progress text, e.g. "retrying 2/5".
    pub status: Option<String>,
    /// Formatted stream uptime, when known and non-negative.
    pub uptime: Option<String>,
    /// Rendered quality badge, e.g. "1080p60".
    pub quality: Option<String>,
}

/// The channel the session is currently on, observed by the chat engine to
/// drive rebinds. Published on every switch, including to offline channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSelection {
    pub slug: Option<String>,
}

/// External inputs to the session controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Select a channel by index (clamped into range).
    Switch { index: usize, zap: bool },
    /// Step up/down the list, wrapping at both ends.
    Step { delta: isize, zap: bool },
    /// Replace the channel list and start playing its first entry.
    ReplaceChannels(Vec<Channel>),
    Shutdown,
}

/// Completions and timer fires re-entering the control task.
///
/// Every variant that resulted from work started under a particular session
/// carries the generation captured at spawn time.
#[derive(Debug)]
pub enum SessionEvent {
    /// Zap debounce delay elapsed; load the channel if still current.
    ZapElapsed { generation: u64 },
    /// Stream resolver completed.
    Resolved {
        generation: u64,
        result: eyre::Result<Url>,
    },
    /// Retry backoff delay elapsed.
    RetryElapsed { generation: u64 },
    /// Live detail fetched during retry exhaustion.
    DetailFetched {
        generation: u64,
        result: eyre::Result<LiveDetail>,
    },
    /// Periodic active-channel refresh timer elapsed.
    RefreshElapsed { generation: u64 },
    /// Periodic refresh detail fetch completed.
    Refreshed {
        generation: u64,
        result: eyre::Result<LiveDetail>,
    },
    /// Stall watchdog sampling tick.
    WatchdogTick { generation: u64 },
    /// One-second uptime display tick (not generation-scoped).
    UptimeTick,
    /// Event forwarded from the playback transport.
    Transport(TransportEvent),
}

/// Cloneable handle for driving a running [`PlaybackController`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    status: watch::Receiver<PlayerStatus>,
    selection: watch::Receiver<ChannelSelection>,
}

impl SessionHandle {
    pub async fn switch(&self, index: usize, zap: bool) {
        let _ = self
            .commands
            .send(SessionCommand::Switch { index, zap })
            .await;
    }

    pub async fn step(&self, delta: isize, zap: bool) {
        let _ = self.commands.send(SessionCommand::Step { delta, zap }).await;
    }

    pub async fn replace_channels(&self, channels: Vec<Channel>) {
        let _ = self
            .commands
            .send(SessionCommand::ReplaceChannels(channels))
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    /// Feeds a playback transport event into the controller. The embedder
    /// calls this from whatever callback surface its player exposes.
    pub async fn transport_event(&self, event: TransportEvent) {
        let _ = self.events.send(SessionEvent::Transport(event)).await;
    }

    pub fn status(&self) -> watch::Receiver<PlayerStatus> {
        self.status.clone()
    }

    /// The current-channel watch the chat engine follows.
    pub fn selection(&self) -> watch::Receiver<ChannelSelection> {
        self.selection.clone()
    }
}

/// State machine driving one playback transport over a rotating channel
/// list. Construct with [`PlaybackController::new`], then `tokio::spawn` the
/// [`run`](PlaybackController::run) future and talk to it through the
/// returned [`SessionHandle`].
pub struct PlaybackController<R, D, P> {
    resolver: Arc<R>,
    detail: Arc<D>,
    transport: Arc<P>,
    options: SessionOptions,
    policy: RetryPolicy,

    channels: ChannelList,
    current: usize,
    generation: u64,
    state: PlaybackState,
    retry: RetryState,
    stall: StallDetector,
    clock: ServerClock,
    stream_started_at: Option<jiff::Timestamp>,
    status_text: Option<String>,
    uptime_text: Option<String>,
    quality_text: Option<String>,
    watchdog: Option<JoinHandle<()>>,

    events: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    commands_rx: Option<mpsc::Receiver<SessionCommand>>,
    status: watch::Sender<PlayerStatus>,
    selection: watch::Sender<ChannelSelection>,
}

impl<R, D, P> PlaybackController<R, D, P>
where
    R: StreamResolver,
    D: ChannelDetailProvider,
    P: PlaybackTransport,
{
    pub fn new(
        resolver: Arc<R>,
        detail: Arc<D>,
        transport: Arc<P>,
        channels: Vec<Channel>,
        options: SessionOptions,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(PlayerStatus::default());
        let (selection_tx, selection_rx) = watch::channel(ChannelSelection::default());

        let policy = RetryPolicy {
            delay: options.retry_delay,
            max_attempts: options.max_attempts,
        };
        let stall = StallDetector::new(options.stall_threshold);

        let controller = Self {
            resolver,
            detail,
            transport,
            options,
            policy,
            channels: ChannelList::new(channels),
            current: 0,
            generation: 0,
            state: PlaybackState::Idle,
            retry: RetryState::default(),
            stall,
            clock: ServerClock::default(),
            stream_started_at: None,
            status_text: None,
            uptime_text: None,
            quality_text: None,
            watchdog: None,
            events: events_tx.clone(),
            events_rx: Some(events_rx),
            commands_rx: Some(commands_rx),
            status: status_tx,
            selection: selection_tx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            events: events_tx,
            status: status_rx,
            selection: selection_rx,
        };
        (controller, handle)
    }

    /// Runs the control loop until [`SessionCommand::Shutdown`] or all
    /// handles are dropped.
    pub async fn run(mut self) {
        let mut commands = self
            .commands_rx
            .take()
            .expect("run is called at most once");
        let mut events = self.events_rx.take().expect("run is called at most once");

        // Display tick for the uptime readout. Lives for the whole session;
        // ends once the event channel closes.
        let ticker = self.events.clone();
        let uptime_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if ticker.send(SessionEvent::UptimeTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(ev) = events.recv() => self.handle_event(ev),
            }
        }

        uptime_task.abort();
        self.stop_watchdog();
        self.transport.pause();
        tracing::debug!("playback session controller stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Switch { index, zap } => self.switch_channel(index, zap),
            SessionCommand::Step { delta, zap } => {
                let index = self.channels.step(self.current, delta);
                self.switch_channel(index, zap);
            }
            SessionCommand::ReplaceChannels(channels) => {
                let playing = self.channels.snapshot(self.current).map(|c| c.slug);
                self.channels.replace(channels);
                if self.channels.is_empty() {
                    return;
                }
                // stay on the same channel if the new list still has it
                let index = playing
                    .as_deref()
                    .and_then(|slug| self.channels.position(slug))
                    .unwrap_or(0);
                self.switch_channel(index, false);
            }
            SessionCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_event(&mut self, ev: SessionEvent) {
        // Generation gate: work started under a superseded session must not
        // touch current state, no matter how its timer or request raced.
        let generation = match &ev {
            SessionEvent::ZapElapsed { generation }
            | SessionEvent::Resolved { generation, .. }
            | SessionEvent::RetryElapsed { generation }
            | SessionEvent::DetailFetched { generation, .. }
            | SessionEvent::RefreshElapsed { generation }
            | SessionEvent::Refreshed { generation, .. }
            | SessionEvent::WatchdogTick { generation } => Some(*generation),
            SessionEvent::UptimeTick | SessionEvent::Transport(_) => None,
        };
        if let Some(generation) = generation
            && generation != self.generation
        {
            tracing::trace!(
                event = ?ev,
                current = self.generation,
                "discarding event from superseded generation"
            );
            return;
        }

        match ev {
            SessionEvent::ZapElapsed { .. } => self.begin_load(),
            SessionEvent::Resolved { result, .. } => self.on_resolved(result),
            SessionEvent::RetryElapsed { .. } => self.begin_load(),
            SessionEvent::DetailFetched { result, .. } => self.on_exhaustion_detail(result),
            SessionEvent::RefreshElapsed { .. } => self.begin_refresh(),
            SessionEvent::Refreshed { result, .. } => self.on_refreshed(result),
            SessionEvent::WatchdogTick { .. } => self.on_watchdog_tick(),
            SessionEvent::UptimeTick => self.refresh_uptime(),
            SessionEvent::Transport(ev) => self.handle_transport(ev),
        }
    }

    /// Selects a channel and (unless it is flagged offline) starts loading
    /// it, optionally after the zap debounce delay. Any previously pending
    /// zap timer, retry timer, or in-flight resolution dies with the old
    /// generation.
    fn switch_channel(&mut self, index: usize, zap: bool) {
        if self.channels.is_empty() {
            return;
        }
        let index = index.min(self.channels.len() - 1);
        let Some(channel) = self.channels.snapshot(index) else {
            return;
        };

        self.generation += 1;
        self.current = index;
        self.retry.reset();
        self.stall.reset();
        self.stream_started_at = channel.started_at;
        self.status_text = None;
        self.uptime_text = None;
        self.quality_text = None;
        tracing::info!(
            slug = %channel.slug,
            generation = self.generation,
            zap,
            live = channel.is_live,
            "switching channel"
        );

        // Chat follows the selection even when the channel is offline.
        self.selection.send_replace(ChannelSelection {
            slug: Some(channel.slug.clone()),
        });
        self.arm_refresh();

        if !channel.is_live {
            self.transport.pause();
            self.status_text = Some("stream is offline".into());
            self.set_state(PlaybackState::Offline);
            return;
        }

        self.set_state(PlaybackState::Idle);
        if zap && !self.options.zap_delay.is_zero() {
            let generation = self.generation;
            let delay = self.options.zap_delay;
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // A later switch supersedes this fire via the generation
                // gate; no explicit timer cancellation is needed.
                let _ = events.send(SessionEvent::ZapElapsed { generation }).await;
            });
        } else {
            self.begin_load();
        }
    }

    fn begin_load(&mut self) {
        let Some(channel) = self.channels.snapshot(self.current) else {
            return;
        };
        self.set_state(PlaybackState::Loading);

        let generation = self.generation;
        let resolver = Arc::clone(&self.resolver);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = resolver.resolve(&channel.slug).await;
            let _ = events
                .send(SessionEvent::Resolved { generation, result })
                .await;
        });
    }

    fn on_resolved(&mut self, result: eyre::Result<Url>) {
        match result {
            Ok(url) => {
                tracing::debug!(url = %url, "stream resolved, handing to transport");
                self.transport.pause();
                self.transport.load(&url);
                self.transport.play();
                // stay in Loading until the transport reports progress
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream resolution failed");
                self.schedule_retry(FailureClass::Transient);
            }
        }
    }

    /// Shared recovery path for resolver failures, transport errors, and
    /// watchdog stalls. One attempt budget covers all three.
    fn schedule_retry(&mut self, class: FailureClass) {
        self.retry.last_failure = Some(class);

        match self.policy.next_delay(self.retry.attempts) {
            Some(delay) => {
                self.retry.attempts += 1;
                self.status_text = Some(format!(
                    "retrying {}/{}",
                    self.retry.attempts, self.policy.max_attempts
                ));
                self.set_state(PlaybackState::Recovering);

                let generation = self.generation;
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(SessionEvent::RetryElapsed { generation }).await;
                });
            }
            None => {
                // Budget spent. Ask the detail provider whether this is an
                // API hiccup on a live channel or a genuinely dead stream.
                tracing::info!(
                    attempts = self.retry.attempts,
                    "retry budget exhausted, checking live detail"
                );
                self.set_state(PlaybackState::Recovering);

                let Some(channel) = self.channels.snapshot(self.current) else {
                    return;
                };
                let generation = self.generation;
                let detail = Arc::clone(&self.detail);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = detail.live_detail(&channel.slug).await;
                    let _ = events
                        .send(SessionEvent::DetailFetched { generation, result })
                        .await;
                });
            }
        }
    }

    fn on_exhaustion_detail(&mut self, result: eyre::Result<LiveDetail>) {
        match result {
            Ok(detail) if detail.is_live => {
                tracing::info!("channel still live after exhaustion, starting a fresh cycle");
                self.retry.reset();
                self.begin_load();
            }
            Ok(detail) => {
                if let Some(channel) = self.channels.get(self.current) {
                    let slug = channel.slug.clone();
                    self.channels.apply_refresh(&slug, &detail);
                    self.channels.mark_offline(&slug);
                }
                self.go_offline();
            }
            Err(e) => {
                // Can't even reach the detail endpoint; treat as offline
                // rather than retrying forever.
                tracing::warn!(error = %e, "live detail check failed after exhaustion");
                if let Some(channel) = self.channels.get(self.current) {
                    let slug = channel.slug.clone();
                    self.channels.mark_offline(&slug);
                }
                self.go_offline();
            }
        }
    }

    fn go_offline(&mut self) {
        self.transport.pause();
        self.retry.reset();
        self.status_text = Some("stream is offline".into());
        self.uptime_text = None;
        self.set_state(PlaybackState::Offline);
    }

    /// Arms the periodic metadata refresh for the current channel.
    fn arm_refresh(&mut self) {
        let generation = self.generation;
        let delay = self.options.refresh_interval;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(SessionEvent::RefreshElapsed { generation })
                .await;
        });
    }

    fn begin_refresh(&mut self) {
        let Some(channel) = self.channels.snapshot(self.current) else {
            return;
        };
        let generation = self.generation;
        let detail = Arc::clone(&self.detail);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = detail.live_detail(&channel.slug).await;
            let _ = events
                .send(SessionEvent::Refreshed { generation, result })
                .await;
        });
    }

    fn on_refreshed(&mut self, result: eyre::Result<LiveDetail>) {
        match result {
            Ok(detail) => {
                if let Some(channel) = self.channels.get(self.current) {
                    let slug = channel.slug.clone();
                    self.channels.apply_refresh(&slug, &detail);
                    self.stream_started_at = detail.started_at.or(self.stream_started_at);

                    // An offline channel coming back live is the one case
                    // where recovery restarts without user input.
                    if self.state == PlaybackState::Offline && detail.is_live {
                        tracing::info!(slug = %slug, "channel came back live, resuming playback");
                        self.status_text = None;
                        self.begin_load();
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "active channel refresh failed");
            }
        }
        self.arm_refresh();
    }

    fn handle_transport(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::StateChanged(TransportState::Playing) => {
                self.retry.reset();
                self.stall.reset();
                self.status_text = None;
                self.set_state(PlaybackState::Playing);
                self.start_watchdog();
                self.refresh_uptime();
            }
            TransportEvent::StateChanged(TransportState::Buffering) => {
                // Health checks need a playing baseline; the watchdog stops
                // via set_state.
                self.set_state(PlaybackState::Buffering);
            }
            TransportEvent::StateChanged(TransportState::Ended) => {
                tracing::info!("transport reports stream ended");
                self.schedule_retry(FailureClass::Transient);
            }
            TransportEvent::StateChanged(TransportState::Ready | TransportState::Idle) => {}
            TransportEvent::Error(message) => {
                tracing::warn!(%message, "transport error");
                self.schedule_retry(FailureClass::Transient);
            }
            TransportEvent::QualityChanged { height, framerate } => {
                self.quality_text = Some(if framerate > 0.0 {
                    format!("{height}p{framerate:.0}")
                } else {
                    format!("{height}p")
                });
                self.publish();
            }
            TransportEvent::Metadata(payload) => {
                if let Some(direct) = self.clock.observe_metadata(&payload) {
                    self.uptime_text = Some(clock::format_uptime(direct));
                    self.publish();
                } else {
                    self.refresh_uptime();
                }
            }
        }
    }

    fn start_watchdog(&mut self) {
        self.stop_watchdog();
        let generation = self.generation;
        let grace = self.options.watchdog_grace;
        let period = self.options.watchdog_interval;
        let events = self.events.clone();
        self.watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if events
                    .send(SessionEvent::WatchdogTick { generation })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn stop_watchdog(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
        self.stall.reset();
    }

    fn on_watchdog_tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let stats = self.transport.stats();
        if self.stall.observe(stats.decoded_bitrate) {
            tracing::warn!(
                threshold = self.options.stall_threshold,
                "sustained zero throughput while playing, treating as stall"
            );
            self.schedule_retry(FailureClass::Stall);
        }
    }

    fn refresh_uptime(&mut self) {
        let uptime = self
            .stream_started_at
            .and_then(|start| self.clock.uptime(start))
            .map(clock::format_uptime);
        if uptime != self.uptime_text {
            self.uptime_text = uptime;
            self.publish();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if state != PlaybackState::Playing {
            self.stop_watchdog();
        }
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "playback state changed");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(PlayerStatus {
            state: self.state,
            status: self.status_text.clone(),
            uptime: self.uptime_text.clone(),
            quality: self.quality_text.clone(),
        });
    }
}
