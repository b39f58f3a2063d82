//! Connection Controller
//!
//! Owns the connection state machine, the open transport and its receive
//! loop.
//!
//! # Architecture
//!
//! ```text
//! ConnectionController (handle, Clone)
//!        │ Command + oneshot reply
//!        ▼
//! ControllerActor ── open ──▶ FeedTransport
//!        │                         │
//!        │ spawn                   ▼
//!        └──────────▶ receive loop ── frames ──▶ PriceFrameDecoder ──▶ EventBus
//!                          │
//!                          └── SessionExit (generation) ──▶ ControllerActor
//! ```
//!
//! Every state-changing operation runs on the actor task, one at a time, so
//! two reconnects can never race. Replacing a receive loop always cancels
//! and awaits the previous one first, then closes its transport with errors
//! swallowed.
//!
//! # Failure Handling
//!
//! An open failure, read failure, remote close or idle timeout tears the
//! session down and moves to `Reconnecting` with a backoff delay from the
//! [`ReconnectPolicy`]. When the delay elapses the attempt is counted; once
//! the count reaches the policy's threshold the stream settles in `Failed`
//! instead of reopening, and stays there until `connect()` is called again.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::codec::{DecodeError, PriceFrameDecoder};
use super::endpoint::FeedEndpoint;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::stats::{StreamStats, StreamStatsSnapshot};
use crate::StreamConfig;
use crate::application::ports::{
    ControllerError, FeedConnection, FeedTransport, PriceStreamControl, TransportError,
};
use crate::domain::streaming::{ConnectionState, PriceBook, StateTransition};
use crate::domain::subscription::{Symbol, SubscriptionChanges, SubscriptionTracker};
use crate::infrastructure::broadcast::{
    BroadcastConfig, BroadcastStats, EventBus, PriceUpdateReceiver,
};
use crate::infrastructure::metrics::DropReason;

const COMMAND_CAPACITY: usize = 32;

// =============================================================================
// Configuration
// =============================================================================

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Feed base address.
    pub endpoint: FeedEndpoint,
    /// Backoff and give-up settings.
    pub reconnect: ReconnectConfig,
    /// Channel capacities.
    pub broadcast: BroadcastConfig,
    /// Upper bound on opening the transport.
    pub connect_timeout: Duration,
    /// Silence after which an open connection is treated as broken.
    pub idle_timeout: Duration,
    /// Upper bound on closing the transport.
    pub close_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint: FeedEndpoint::default(),
            reconnect: ReconnectConfig::default(),
            broadcast: BroadcastConfig::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&StreamConfig> for ControllerConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            endpoint: FeedEndpoint::new(config.feed_url.clone()),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            broadcast: BroadcastConfig::from(config.broadcast.clone()),
            connect_timeout: config.timeouts.connect,
            idle_timeout: config.timeouts.idle,
            close_timeout: config.timeouts.close,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Connect {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<SubscriptionChanges>,
    },
    Unsubscribe {
        ids: Vec<String>,
        reply: oneshot::Sender<SubscriptionChanges>,
    },
    WatchedSymbols {
        reply: oneshot::Sender<Vec<Symbol>>,
    },
}

/// Handle to a running price stream.
///
/// Cheap to clone. The stream keeps running until every handle is dropped,
/// at which point the open connection is closed and the state settles in
/// `Disconnected`.
///
/// Each operation returns once the controller has finished acting on it, so
/// after `subscribe(..)` resolves the first connection attempt has already
/// succeeded or failed.
#[derive(Debug, Clone)]
pub struct ConnectionController {
    commands: mpsc::Sender<Command>,
    bus: Arc<EventBus>,
    book: Arc<Mutex<PriceBook>>,
    stats: Arc<StreamStats>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect { .. } => "Connect",
            Self::Disconnect { .. } => "Disconnect",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::WatchedSymbols { .. } => "WatchedSymbols",
        };
        f.write_str(name)
    }
}

impl ConnectionController {
    /// Start the controller on the current Tokio runtime.
    #[must_use]
    pub fn spawn(transport: Arc<dyn FeedTransport>, config: ControllerConfig) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(EventBus::new(config.broadcast));
        let book = Arc::new(Mutex::new(PriceBook::new()));
        let stats = Arc::new(StreamStats::new());

        let actor = ControllerActor {
            transport,
            endpoint: config.endpoint,
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            close_timeout: config.close_timeout,
            tracker: SubscriptionTracker::new(),
            policy: ReconnectPolicy::new(config.reconnect),
            book: Arc::clone(&book),
            bus: Arc::clone(&bus),
            stats: Arc::clone(&stats),
            session: None,
            retry: None,
            generation: 0,
            exits_tx,
            exits_rx,
        };
        tokio::spawn(actor.run(commands_rx));

        Self {
            commands,
            bus,
            book,
            stats,
        }
    }

    /// Open the feed for the watched symbols.
    ///
    /// No-op while connected or connecting, and while nothing is watched.
    /// Connection failures are not returned; they show up as state changes.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller has stopped.
    pub async fn connect(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Connect { reply }).await
    }

    /// Close the feed and settle in `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller has stopped.
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Watch additional symbols.
    ///
    /// Returns the symbols that were newly added. Any addition reopens the
    /// feed with the new list.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller has stopped.
    pub async fn subscribe<I, S>(&self, ids: I) -> Result<SubscriptionChanges, ControllerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        self.request(|reply| Command::Subscribe { ids, reply }).await
    }

    /// Stop watching symbols.
    ///
    /// Returns the symbols that were actually removed. Removing the last
    /// symbol disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller has stopped.
    pub async fn unsubscribe<I, S>(&self, ids: I) -> Result<SubscriptionChanges, ControllerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        self.request(|reply| Command::Unsubscribe { ids, reply }).await
    }

    /// Currently watched symbols, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller has stopped.
    pub async fn watched_symbols(&self) -> Result<Vec<Symbol>, ControllerError> {
        self.request(|reply| Command::WatchedSymbols { reply }).await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.bus.state()
    }

    /// Receiver that always holds the latest connection state.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.bus.state_rx()
    }

    /// Ordered state transitions from now on.
    #[must_use]
    pub fn state_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.bus.transitions_rx()
    }

    /// Price updates from now on.
    #[must_use]
    pub fn price_updates(&self) -> PriceUpdateReceiver {
        self.bus.price_rx()
    }

    /// Last price seen for `symbol` in this session.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.book.lock().last_price(symbol)
    }

    /// Current stream statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Receiver counts on the event bus.
    #[must_use]
    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.bus.stats()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }
}

#[async_trait]
impl PriceStreamControl for ConnectionController {
    async fn watched(&self) -> Result<Vec<Symbol>, ControllerError> {
        self.watched_symbols().await
    }

    async fn add(&self, ids: Vec<String>) -> Result<SubscriptionChanges, ControllerError> {
        self.subscribe(ids).await
    }

    async fn remove(&self, ids: Vec<String>) -> Result<SubscriptionChanges, ControllerError> {
        self.unsubscribe(ids).await
    }
}

// =============================================================================
// Actor
// =============================================================================

struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<Box<dyn FeedConnection>>,
}

#[derive(Debug)]
struct SessionExit {
    generation: u64,
    reason: ExitReason,
}

#[derive(Debug)]
enum ExitReason {
    RemoteClosed,
    Transport(TransportError),
    Idle(Duration),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteClosed => f.write_str("feed closed the connection"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Idle(after) => write!(f, "no frames for {}s", after.as_secs()),
        }
    }
}

struct ControllerActor {
    transport: Arc<dyn FeedTransport>,
    endpoint: FeedEndpoint,
    connect_timeout: Duration,
    idle_timeout: Duration,
    close_timeout: Duration,
    tracker: SubscriptionTracker,
    policy: ReconnectPolicy,
    book: Arc<Mutex<PriceBook>>,
    bus: Arc<EventBus>,
    stats: Arc<StreamStats>,
    session: Option<ActiveSession>,
    retry: Option<Pin<Box<Sleep>>>,
    generation: u64,
    exits_tx: mpsc::UnboundedSender<SessionExit>,
    exits_rx: mpsc::UnboundedReceiver<SessionExit>,
}

impl ControllerActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("Price stream controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                () = retry_elapsed(self.retry.as_mut()) => {
                    self.retry = None;
                    self.retry_now().await;
                }
                Some(exit) = self.exits_rx.recv() => self.handle_exit(exit).await,
            }
        }

        self.retry = None;
        self.teardown().await;
        self.transition(ConnectionState::Disconnected);
        tracing::debug!("Price stream controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::trace!(?command, "Handling command");

        match command {
            Command::Connect { reply } => {
                self.connect().await;
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Subscribe { ids, reply } => {
                let changes = self.subscribe(ids).await;
                let _ = reply.send(changes);
            }
            Command::Unsubscribe { ids, reply } => {
                let changes = self.unsubscribe(ids).await;
                let _ = reply.send(changes);
            }
            Command::WatchedSymbols { reply } => {
                let _ = reply.send(self.tracker.symbols());
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    async fn connect(&mut self) {
        let state = self.bus.state();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::debug!(%state, "Connect ignored, already active");
            return;
        }
        if self.tracker.is_empty() {
            tracing::debug!("Connect ignored, no symbols watched");
            return;
        }

        match state {
            // Run the pending retry now instead of waiting out the backoff.
            ConnectionState::Reconnecting => {
                self.retry = None;
                self.retry_now().await;
            }
            ConnectionState::Failed => {
                self.policy.reset();
                self.open_session().await;
            }
            _ => self.open_session().await,
        }
    }

    async fn disconnect(&mut self) {
        self.retry = None;
        self.teardown().await;
        self.transition(ConnectionState::Disconnected);
        self.policy.reset();
        self.book.lock().clear();
    }

    async fn subscribe(&mut self, ids: Vec<String>) -> SubscriptionChanges {
        let changes = self.tracker.subscribe(&ids);
        if changes.is_empty() {
            tracing::debug!(symbols = ?ids, "Already watching all requested symbols");
            return changes;
        }

        self.stats.set_watched_symbols(self.tracker.len());
        tracing::info!(added = ?changes.added, total = self.tracker.len(), "Watching new symbols");

        if self.bus.state().is_connected() {
            self.open_session().await;
        } else {
            self.connect().await;
        }
        changes
    }

    async fn unsubscribe(&mut self, ids: Vec<String>) -> SubscriptionChanges {
        let changes = self.tracker.unsubscribe(&ids);
        if changes.is_empty() {
            tracing::debug!(symbols = ?ids, "None of the requested symbols were watched");
            return changes;
        }

        self.stats.set_watched_symbols(self.tracker.len());
        tracing::info!(removed = ?changes.removed, total = self.tracker.len(), "Stopped watching symbols");

        if self.tracker.is_empty() {
            self.disconnect().await;
            return changes;
        }

        let reconnect = self.bus.state().is_connected();
        if reconnect {
            // Stop the old loop before forgetting so it cannot re-add samples.
            self.teardown().await;
        }
        self.book.lock().forget(&changes.removed);
        if reconnect {
            self.open_session().await;
        }
        changes
    }

    async fn retry_now(&mut self) {
        self.record_attempt();

        let attempt = self.policy.attempt_count();
        if self.policy.should_fallback(attempt) {
            tracing::error!(
                attempts = attempt,
                max_attempts = self.policy.max_attempts(),
                "Giving up on price feed"
            );
            self.transition(ConnectionState::Failed);
            return;
        }

        self.open_session().await;
    }

    async fn handle_exit(&mut self, exit: SessionExit) {
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(exit.generation) {
            tracing::trace!(generation = exit.generation, "Ignoring exit from stale session");
            return;
        }

        match &exit.reason {
            ExitReason::RemoteClosed => tracing::info!("Price feed closed the connection"),
            reason => tracing::warn!(error = %reason, "Price feed connection lost"),
        }
        self.stats.record_error(exit.reason.to_string());
        self.handle_failure().await;
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Close any current session and open a new one for the current symbols.
    async fn open_session(&mut self) {
        self.teardown().await;
        self.transition(ConnectionState::Connecting);

        let url = self.endpoint.url_for(&self.tracker);
        tracing::info!(
            url = %url,
            symbols = self.tracker.len(),
            attempt = self.policy.attempt_count(),
            "Opening price feed"
        );

        let error = match timeout(self.connect_timeout, self.transport.open(&url)).await {
            Ok(Ok(connection)) => {
                self.policy.reset();
                self.stats.record_connected();
                self.transition(ConnectionState::Connected);
                self.start_receive_loop(connection);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connection timed out after {}s",
                self.connect_timeout.as_secs()
            ),
        };

        tracing::warn!(error = %error, "Failed to open price feed");
        self.stats.record_error(error);
        self.handle_failure().await;
    }

    async fn handle_failure(&mut self) {
        self.teardown().await;

        let attempt = self.policy.attempt_count();
        self.transition(ConnectionState::Reconnecting);
        let delay = self.policy.jittered(self.policy.next_delay(attempt));
        tracing::info!(
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling price feed reconnect"
        );
        self.retry = Some(Box::pin(sleep(delay)));
    }

    fn start_receive_loop(&mut self, connection: Box<dyn FeedConnection>) {
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        let receiver = ReceiveLoop {
            generation,
            cancel: cancel.clone(),
            idle_timeout: self.idle_timeout,
            decoder: PriceFrameDecoder::new(),
            book: Arc::clone(&self.book),
            bus: Arc::clone(&self.bus),
            stats: Arc::clone(&self.stats),
            exits: self.exits_tx.clone(),
        };

        let span = tracing::info_span!(
            "price_session",
            session_id = %Uuid::new_v4(),
            generation
        );
        let handle = tokio::spawn(receiver.run(connection).instrument(span));

        self.session = Some(ActiveSession {
            generation,
            cancel,
            handle,
        });
    }

    /// Cancel and await the receive loop, then close its transport.
    async fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();
        let mut connection = match session.handle.await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "Receive loop ended abnormally");
                return;
            }
        };

        match timeout(self.close_timeout, connection.close()).await {
            Ok(Ok(())) => tracing::debug!("Price feed connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Ignoring close error"),
            Err(_) => tracing::debug!("Close timed out, dropping connection"),
        }
    }

    fn transition(&self, next: ConnectionState) {
        if let Some(transition) = self.bus.publish_state(next) {
            tracing::info!(from = %transition.from, to = %transition.to, "Price stream state changed");
        }
    }

    fn record_attempt(&mut self) {
        self.policy.record_attempt();
        self.stats.record_reconnect_attempt();
    }
}

async fn retry_elapsed(retry: Option<&mut Pin<Box<Sleep>>>) {
    match retry {
        Some(delay) => delay.await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Receive Loop
// =============================================================================

struct ReceiveLoop {
    generation: u64,
    cancel: CancellationToken,
    idle_timeout: Duration,
    decoder: PriceFrameDecoder,
    book: Arc<Mutex<PriceBook>>,
    bus: Arc<EventBus>,
    stats: Arc<StreamStats>,
    exits: mpsc::UnboundedSender<SessionExit>,
}

impl ReceiveLoop {
    /// Read frames until cancelled or the connection breaks.
    ///
    /// Hands the connection back so the controller can close it.
    async fn run(self, mut connection: Box<dyn FeedConnection>) -> Box<dyn FeedConnection> {
        tracing::debug!("Receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                next = timeout(self.idle_timeout, connection.next_frame()) => Some(next),
            };

            let Some(next) = next else {
                tracing::debug!("Receive loop cancelled");
                return connection;
            };

            let reason = match next {
                Ok(Ok(Some(frame))) => {
                    self.dispatch(&frame);
                    continue;
                }
                Ok(Ok(None)) => ExitReason::RemoteClosed,
                Ok(Err(e)) => ExitReason::Transport(e),
                Err(_) => ExitReason::Idle(self.idle_timeout),
            };

            let _ = self.exits.send(SessionExit {
                generation: self.generation,
                reason,
            });
            return connection;
        }
    }

    fn dispatch(&self, frame: &str) {
        let started = Instant::now();
        self.stats.record_frame();

        let decoded = {
            let mut book = self.book.lock();
            self.decoder.decode(frame, &mut book)
        };

        match decoded {
            Ok(decoded) => {
                self.stats.record_skipped(decoded.skipped.len());
                let count = decoded.events.len();
                for event in decoded.events {
                    tracing::trace!(
                        symbol = event.symbol(),
                        price = event.price(),
                        direction = ?event.direction(),
                        "Price update"
                    );
                    let _ = self.bus.publish_price(event);
                }
                self.stats.record_published(count);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                let reason = match e {
                    DecodeError::Json(_) => DropReason::Json,
                    DecodeError::InvalidFormat(_) => DropReason::Format,
                };
                self.stats.record_dropped(reason);
            }
        }

        crate::infrastructure::metrics::record_decode_duration(started.elapsed());
    }
}
