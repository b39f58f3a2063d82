//! Price Feed Adapters
//!
//! Everything between the wire and the event bus:
//!
//! - **transport**: WebSocket adapter for the feed transport port
//! - **codec**: JSON frame decoding into price update events
//! - **reconnect**: Backoff schedule and give-up threshold
//! - **controller**: Connection state machine and receive loop

pub mod codec;
pub mod controller;
pub mod endpoint;
pub mod reconnect;
pub mod stats;
pub mod transport;

pub use codec::{DecodeError, DecodedFrame, PriceFrameDecoder};
pub use controller::{ConnectionController, ControllerConfig};
pub use endpoint::FeedEndpoint;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use stats::{StreamStats, StreamStatsSnapshot};
pub use transport::{WebSocketConnection, WebSocketTransport};
