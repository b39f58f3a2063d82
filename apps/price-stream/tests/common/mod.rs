//! Scripted in-memory feed shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use price_stream::{
    BroadcastConfig, ConnectionState, ControllerConfig, FeedConnection, FeedEndpoint,
    FeedTransport, PriceUpdateEvent, PriceUpdateReceiver, ReconnectConfig, StateTransition,
    TransportError,
};
use tokio::sync::{broadcast, mpsc};

pub const FEED_URL: &str = "ws://feed.test/prices";

type Item = Result<Option<String>, TransportError>;

/// Controller configuration with a deterministic, short backoff.
pub fn test_config(max_attempts: u32) -> ControllerConfig {
    ControllerConfig {
        endpoint: FeedEndpoint::new(FEED_URL),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        },
        broadcast: BroadcastConfig::default(),
        connect_timeout: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(60),
        close_timeout: Duration::from_millis(100),
    }
}

/// Test-side end of one accepted connection.
#[derive(Clone)]
pub struct FeedSender {
    frames: mpsc::UnboundedSender<Item>,
    closed: Arc<AtomicBool>,
}

impl FeedSender {
    pub fn send_frame(&self, frame: &str) {
        // The receive loop may already be gone; that is what some tests check.
        let _ = self.frames.send(Ok(Some(frame.to_string())));
    }

    pub fn close_remote(&self) {
        let _ = self.frames.send(Ok(None));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.frames.send(Err(TransportError::Read(message.to_string())));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedConnection {
    frames: mpsc::UnboundedReceiver<Item>,
    closed: Arc<AtomicBool>,
    hang_on_close: bool,
}

#[async_trait]
impl FeedConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.frames.recv().await {
            Some(item) => item,
            // Test dropped its sender: stay open but silent.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Err(TransportError::Close("close errors are swallowed".to_string()))
    }
}

/// What the next `open` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Accept,
    Refuse,
    /// Never completes.
    Hang,
}

/// Transport whose opens follow a switchable [`OpenBehavior`].
pub struct ScriptedTransport {
    behavior: Mutex<OpenBehavior>,
    hang_on_close: AtomicBool,
    open_calls: AtomicUsize,
    opened_urls: Mutex<Vec<String>>,
    connections: Mutex<Vec<FeedSender>>,
}

impl ScriptedTransport {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::new(OpenBehavior::Accept))
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self::new(OpenBehavior::Refuse))
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::new(OpenBehavior::Hang))
    }

    fn new(behavior: OpenBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            hang_on_close: AtomicBool::new(false),
            open_calls: AtomicUsize::new(0),
            opened_urls: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Connections opened from now on never finish closing.
    pub fn hang_on_close(&self) {
        self.hang_on_close.store(true, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened_urls.lock().clone()
    }

    pub fn connection(&self, index: usize) -> FeedSender {
        self.connections.lock()[index].clone()
    }

    pub fn latest(&self) -> FeedSender {
        self.connections.lock().last().cloned().unwrap()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn FeedConnection>, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.opened_urls.lock().push(url.to_string());

        let behavior = *self.behavior.lock();
        match behavior {
            OpenBehavior::Accept => {}
            OpenBehavior::Refuse => {
                return Err(TransportError::Open("connection refused".to_string()));
            }
            OpenBehavior::Hang => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.connections.lock().push(FeedSender {
            frames: tx,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(ScriptedConnection {
            frames: rx,
            closed,
            hang_on_close: self.hang_on_close.load(Ordering::SeqCst),
        }))
    }
}

/// States of every transition already buffered on `rx`.
pub fn drain_states(rx: &mut broadcast::Receiver<StateTransition>) -> Vec<ConnectionState> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|t| t.to)
        .collect()
}

/// Wait for the next transition.
pub async fn next_state(rx: &mut broadcast::Receiver<StateTransition>) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a state transition")
        .unwrap()
        .to
}

/// Wait for the next price update.
pub async fn next_price(rx: &mut PriceUpdateReceiver) -> PriceUpdateEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a price update")
        .unwrap()
}

/// Wait until `sender`'s connection has been closed by the controller.
pub async fn wait_closed(sender: &FeedSender) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !sender.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection was never closed");
}
