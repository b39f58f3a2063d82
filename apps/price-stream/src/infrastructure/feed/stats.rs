//! Stream Statistics
//!
//! Counters shared between the controller, its receive loop and the health
//! server. Updates mirror into the Prometheus metrics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::infrastructure::metrics::{self, DropReason};

/// Live statistics for one price stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    fields_skipped: AtomicU64,
    events_published: AtomicU64,
    reconnect_attempts: AtomicU64,
    watched_symbols: AtomicUsize,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
}

impl StreamStats {
    /// Create zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame read from the feed.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received();
    }

    /// Count a frame discarded whole.
    pub fn record_dropped(&self, reason: DropReason) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_dropped(reason);
    }

    /// Count price fields skipped inside a frame.
    pub fn record_skipped(&self, count: usize) {
        let count = count as u64;
        self.fields_skipped.fetch_add(count, Ordering::Relaxed);
        metrics::record_fields_skipped(count);
    }

    /// Count price events handed to the bus.
    pub fn record_published(&self, count: usize) {
        let count = count as u64;
        self.events_published.fetch_add(count, Ordering::Relaxed);
        metrics::record_events_published(count);
    }

    /// Count a reconnection attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
    }

    /// Note a successful connection.
    pub fn record_connected(&self) {
        *self.last_connected_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
    }

    /// Note the most recent connection failure.
    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Update the watched symbol count.
    pub fn set_watched_symbols(&self, count: usize) {
        self.watched_symbols.store(count, Ordering::Relaxed);
        metrics::set_watched_symbols(count);
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            fields_skipped: self.fields_skipped.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            watched_symbols: self.watched_symbols.load(Ordering::Relaxed),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable copy of [`StreamStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatsSnapshot {
    /// Frames read from the feed.
    pub frames_received: u64,
    /// Frames discarded because they could not be decoded.
    pub frames_dropped: u64,
    /// Price fields skipped inside otherwise valid frames.
    pub fields_skipped: u64,
    /// Price events published.
    pub events_published: u64,
    /// Reconnection attempts.
    pub reconnect_attempts: u64,
    /// Symbols currently watched.
    pub watched_symbols: usize,
    /// When the feed last connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection failure, cleared on connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
