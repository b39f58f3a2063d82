//! Prometheus Metrics Module
//!
//! Exposes price stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames received from the feed, frames dropped, fields skipped
//! - **Events**: Price updates published and missed by slow receivers
//! - **Connection**: Current state, reconnection attempts, watched symbols
//! - **Latency**: Frame decode time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until a recorder is installed, so library users that
//! never call [`init_metrics`] pay nothing.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "price_stream_frames_received_total",
        "Total frames received from the price feed"
    );
    describe_counter!(
        "price_stream_frames_dropped_total",
        "Total frames discarded because they could not be decoded"
    );
    describe_counter!(
        "price_stream_fields_skipped_total",
        "Total price fields skipped because their value was unusable"
    );

    // Event counters
    describe_counter!(
        "price_stream_events_published_total",
        "Total price update events published"
    );
    describe_counter!(
        "price_stream_events_lagged_total",
        "Total price update events missed by slow receivers"
    );

    // Connection
    describe_gauge!(
        "price_stream_connection_state",
        "1 for the current connection state, 0 otherwise"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "price_stream_watched_symbols",
        "Number of symbols currently watched"
    );

    // Latency histograms
    describe_histogram!(
        "price_stream_frame_decode_seconds",
        "Time to decode a frame and publish its events"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a frame is dropped.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Not valid JSON.
    Json,
    /// JSON, but not an object.
    Format,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Format => "format",
        }
    }
}

/// Record a frame received from the feed.
pub fn record_frame_received() {
    counter!("price_stream_frames_received_total").increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "price_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record price fields skipped within a frame.
pub fn record_fields_skipped(count: u64) {
    if count > 0 {
        counter!("price_stream_fields_skipped_total").increment(count);
    }
}

/// Record price update events published.
pub fn record_events_published(count: u64) {
    counter!("price_stream_events_published_total").increment(count);
}

/// Record events a receiver missed because it fell behind.
pub fn record_events_lagged(count: u64) {
    counter!("price_stream_events_lagged_total").increment(count);
}

/// Mark `state` as the current connection state.
pub fn set_connection_state(state: ConnectionState) {
    for candidate in ConnectionState::all() {
        let value = if *candidate == state { 1.0 } else { 0.0 };
        gauge!(
            "price_stream_connection_state",
            "state" => candidate.as_str()
        )
        .set(value);
    }
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Update the watched symbol count.
pub fn set_watched_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("price_stream_watched_symbols").set(count as f64);
}

/// Record frame decode duration.
pub fn record_decode_duration(duration: Duration) {
    histogram!("price_stream_frame_decode_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::Json.as_str(), "json");
        assert_eq!(DropReason::Format.as_str(), "format");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_frame_dropped(DropReason::Json);
        record_fields_skipped(0);
        record_events_published(3);
        set_connection_state(ConnectionState::Connected);
        set_watched_symbols(2);
        record_decode_duration(Duration::from_micros(40));
    }
}
