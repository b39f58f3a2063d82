//! Configuration Module
//!
//! Configuration loading for the price stream.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DEFAULT_FEED_URL, ReconnectSettings, ServerSettings,
    StreamConfig, TimeoutSettings,
};
