#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Stream - Real-Time Price Streaming Client
//!
//! Holds a long-lived connection to a market-data feed for a changing set
//! of watched symbols, recovers from failures with exponential backoff, and
//! fans decoded price updates and connection-state changes out to any
//! number of observers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Connection state machine, price events, last-price book
//!   - `subscription`: Watched-symbol set with change detection
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed transport, symbol source, stream control
//!   - `services`: Watchlist sync
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket transport, frame codec, reconnect policy, controller
//!   - `broadcast`: State and price fan-out
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `watchlist`: In-memory symbol source
//!
//! # Data Flow
//!
//! ```text
//!                  subscribe / unsubscribe
//! Symbol Source ──────────────┐
//!                             ▼
//!                  ┌─────────────────────┐   open(url?assets=..)   ┌──────────┐
//!                  │ ConnectionController│ ──────────────────────▶ │   Feed   │
//!                  └─────────────────────┘                         └──────────┘
//!                             │ receive loop                             │
//!                             ▼                                          │
//!                  ┌─────────────────────┐ ◀──────── frames ─────────────┘
//!                  │  PriceFrameDecoder  │
//!                  └─────────────────────┘
//!                             ▼
//!                  ┌─────────────────────┐ ──▶ Observer 1
//!                  │      EventBus       │ ──▶ Observer 2
//!                  └─────────────────────┘ ──▶ Observer N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    ConnectionState, PriceBook, PriceDirection, PriceUpdateEvent, StateTransition,
};
pub use domain::subscription::{SubscriptionChanges, SubscriptionTracker, Symbol};

// Ports and services
pub use application::ports::{
    ControllerError, FeedConnection, FeedTransport, PriceStreamControl, SymbolSource,
    SymbolSourceError, TransportError,
};
pub use application::services::{SyncError, WatchlistSync};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, DEFAULT_FEED_URL, ReconnectSettings, ServerSettings,
    StreamConfig, TimeoutSettings,
};

// Feed
pub use infrastructure::feed::{
    ConnectionController, ControllerConfig, FeedEndpoint, ReconnectConfig, StreamStatsSnapshot,
    WebSocketTransport,
};

// Broadcast
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastStats, PriceUpdateReceiver};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Watchlist
pub use infrastructure::watchlist::StaticSymbolSource;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
