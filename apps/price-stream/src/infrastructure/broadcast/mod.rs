//! Broadcast Channel Adapters
//!
//! Fan-out of connection state and price updates to any number of
//! observers.
//!
//! # Architecture
//!
//! The `EventBus` owns three channels:
//! - A `watch` channel holding the current [`ConnectionState`]. New
//!   observers see the latest value immediately.
//! - A bounded `broadcast` channel of [`StateTransition`]s in the order the
//!   controller made them.
//! - A bounded `broadcast` channel of [`PriceUpdateEvent`]s. When a receiver
//!   falls behind, the oldest events are overwritten and the receiver is told
//!   how many it missed; the controller is never blocked.
//!
//! Price events published while nobody is listening are discarded.

use std::pin::Pin;

use chrono::Utc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::BroadcastSettings;
use crate::domain::streaming::{ConnectionState, PriceUpdateEvent, StateTransition};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the price update channel.
    pub price_capacity: usize,
    /// Capacity for the state transition channel.
    pub state_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            price_capacity: 64,
            state_capacity: 64,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            price_capacity: settings.price_capacity,
            state_capacity: settings.state_capacity,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Central hub for state and price broadcasts.
///
/// # Example
///
/// ```rust
/// use price_stream::domain::streaming::ConnectionState;
/// use price_stream::infrastructure::broadcast::EventBus;
///
/// let bus = EventBus::with_defaults();
/// let state = bus.state_rx();
///
/// bus.publish_state(ConnectionState::Connecting);
/// assert_eq!(*state.borrow(), ConnectionState::Connecting);
///
/// // Re-publishing the current state is not a transition
/// assert!(bus.publish_state(ConnectionState::Connecting).is_none());
/// ```
#[derive(Debug)]
pub struct EventBus {
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<StateTransition>,
    prices_tx: broadcast::Sender<PriceUpdateEvent>,
}

impl EventBus {
    /// Create a new bus with the given configuration.
    ///
    /// Capacities of zero are raised to one.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            state_tx: watch::channel(ConnectionState::default()).0,
            transitions_tx: broadcast::channel(config.state_capacity.max(1)).0,
            prices_tx: broadcast::channel(config.price_capacity.max(1)).0,
        }
    }

    /// Create a new bus with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Connection State
    // =========================================================================

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Move to `next` and notify observers.
    ///
    /// Returns the transition that was published, or `None` when `next` is
    /// the current state or not reachable from it.
    pub fn publish_state(&self, next: ConnectionState) -> Option<StateTransition> {
        let mut transition = None;

        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                tracing::warn!(from = %current, to = %next, "Rejected invalid state transition");
                return false;
            }
            transition = Some(StateTransition {
                from: *current,
                to: next,
                at: Utc::now(),
            });
            *current = next;
            true
        });

        let transition = transition?;
        tracing::debug!(from = %transition.from, to = %transition.to, "Connection state changed");
        metrics::set_connection_state(next);
        // No receivers is fine; the watch value is the source of truth.
        let _ = self.transitions_tx.send(transition);
        Some(transition)
    }

    /// Get a receiver that always holds the latest state.
    #[must_use]
    pub fn state_rx(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Get a receiver for state transitions published from now on.
    #[must_use]
    pub fn transitions_rx(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions_tx.subscribe()
    }

    // =========================================================================
    // Price Updates
    // =========================================================================

    /// Send a price update to all subscribers.
    ///
    /// Returns the number of receivers that received the event, or `None`
    /// if there are no active receivers.
    #[must_use]
    pub fn publish_price(&self, event: PriceUpdateEvent) -> Option<usize> {
        self.prices_tx.send(event).ok()
    }

    /// Get a new receiver for price updates published from now on.
    #[must_use]
    pub fn price_rx(&self) -> PriceUpdateReceiver {
        PriceUpdateReceiver {
            inner: self.prices_tx.subscribe(),
            missed: 0,
        }
    }

    /// Get the number of active price receivers.
    #[must_use]
    pub fn price_receiver_count(&self) -> usize {
        self.prices_tx.receiver_count()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            price_receivers: self.prices_tx.receiver_count(),
            transition_receivers: self.transitions_tx.receiver_count(),
            state_receivers: self.state_tx.receiver_count(),
        }
    }
}

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStats {
    /// Number of price update receivers.
    pub price_receivers: usize,
    /// Number of state transition receivers.
    pub transition_receivers: usize,
    /// Number of latest-state receivers.
    pub state_receivers: usize,
}

// =============================================================================
// Price Receiver
// =============================================================================

/// Receiver for price updates that skips over events it was too slow for.
#[derive(Debug)]
pub struct PriceUpdateReceiver {
    inner: broadcast::Receiver<PriceUpdateEvent>,
    missed: u64,
}

impl PriceUpdateReceiver {
    /// Wait for the next price update.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<PriceUpdateEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(count)) => self.record_lag(count),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered price update without waiting.
    pub fn try_recv(&mut self) -> Option<PriceUpdateEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(count)) => self.record_lag(count),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total events this receiver missed by falling behind.
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }

    /// Convert into a `Stream` of price updates.
    ///
    /// Missed events are logged and counted in metrics.
    #[must_use]
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = PriceUpdateEvent> + Send>> {
        Box::pin(
            BroadcastStream::new(self.inner).filter_map(|item| match item {
                Ok(event) => Some(event),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(count)) => {
                    tracing::warn!(missed = count, "Price stream consumer lagged");
                    metrics::record_events_lagged(count);
                    None
                }
            }),
        )
    }

    fn record_lag(&mut self, count: u64) {
        tracing::warn!(missed = count, "Price receiver lagged");
        metrics::record_events_lagged(count);
        self.missed = self.missed.saturating_add(count);
    }
}

// =============================================================================
// Tests
// =============================================================================
