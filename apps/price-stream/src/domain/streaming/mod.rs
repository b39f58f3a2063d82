//! Price Streaming Types
//!
//! Core domain types for the price stream: the connection state machine,
//! price-update events with their directional delta, and the table of
//! last-seen prices the decoder consults.
//!
//! These types are transport-agnostic and represent the canonical
//! internal representation of streamed prices.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::subscription::Symbol;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the price stream.
///
/// `Disconnected` is both the initial state and the state reached by an
/// explicit disconnect. `Failed` is terminal and only reached once the
/// reconnection policy gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not streaming.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, receive loop running.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Reconnection attempts exhausted.
    Failed,
}

impl ConnectionState {
    /// All states, in declaration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Disconnected,
            Self::Connecting,
            Self::Connected,
            Self::Reconnecting,
            Self::Failed,
        ]
    }

    /// Whether the transition `self -> next` is part of the state machine.
    ///
    /// Self-transitions are never valid; the controller does not publish
    /// them.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            // Explicit disconnect is always allowed.
            (Self::Connecting | Self::Connected | Self::Reconnecting | Self::Failed, Self::Disconnected)
            | (Self::Disconnected | Self::Reconnecting | Self::Failed, Self::Connecting)
            | (Self::Connected, Self::Connecting)
            | (Self::Connecting, Self::Connected)
            | (Self::Connecting | Self::Connected, Self::Reconnecting)
            // Giving up happens when a scheduled retry is due.
            | (Self::Reconnecting, Self::Failed) => true,
            _ => false,
        }
    }

    /// Whether a transport is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Lower-case name used in logs, metrics and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single published state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    /// State before the change.
    pub from: ConnectionState,
    /// State after the change.
    pub to: ConnectionState,
    /// When the controller made the change.
    pub at: DateTime<Utc>,
}

// =============================================================================
// Price Updates
// =============================================================================

/// Direction of a price move relative to the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    /// Price rose.
    Up,
    /// Price fell.
    Down,
    /// Price did not move (or this is the first sample).
    Unchanged,
}

impl PriceDirection {
    /// Compute the direction of `price` relative to `previous`.
    #[must_use]
    pub fn between(price: f64, previous: f64) -> Self {
        if price > previous {
            Self::Up
        } else if price < previous {
            Self::Down
        } else {
            Self::Unchanged
        }
    }
}

/// A decoded price update for one symbol.
///
/// Fields are private so an event can only be built through
/// [`PriceUpdateEvent::new`], which derives `direction` from the two prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdateEvent {
    symbol: Symbol,
    price: f64,
    previous_price: f64,
    timestamp: DateTime<Utc>,
    direction: PriceDirection,
}

impl PriceUpdateEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(symbol: Symbol, price: f64, previous_price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            previous_price,
            timestamp,
            direction: PriceDirection::between(price, previous_price),
        }
    }

    /// Symbol identifier.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// New price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Price before this update.
    #[must_use]
    pub const fn previous_price(&self) -> f64 {
        self.previous_price
    }

    /// When the update was decoded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Direction of the move.
    #[must_use]
    pub const fn direction(&self) -> PriceDirection {
        self.direction
    }

    /// Absolute change from the previous price.
    #[must_use]
    pub fn change(&self) -> f64 {
        self.price - self.previous_price
    }

    /// Relative change in percent, or `None` when the previous price is zero.
    #[must_use]
    pub fn change_percent(&self) -> Option<f64> {
        if self.previous_price == 0.0 {
            None
        } else {
            Some(self.change() / self.previous_price * 100.0)
        }
    }
}

// =============================================================================
// Price Book
// =============================================================================

/// Last-known price per symbol.
#[derive(Debug, Default, Clone)]
pub struct PriceBook {
    samples: HashMap<Symbol, f64>,
}

impl PriceBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `price` for `symbol`, returning the previous price.
    ///
    /// On first sight of a symbol the previous price is the new price
    /// itself, so the first computed direction is always unchanged.
    pub fn observe(&mut self, symbol: &str, price: f64) -> f64 {
        match self.samples.get_mut(symbol) {
            Some(last) => std::mem::replace(last, price),
            None => {
                self.samples.insert(symbol.to_string(), price);
                price
            }
        }
    }

    /// Last known price for `symbol`.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.samples.get(symbol).copied()
    }

    /// Forget the samples for the given symbols.
    pub fn forget<'a>(&mut self, symbols: impl IntoIterator<Item = &'a Symbol>) {
        for symbol in symbols {
            self.samples.remove(symbol);
        }
    }

    /// Forget every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of symbols with a sample.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no symbol has a sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
