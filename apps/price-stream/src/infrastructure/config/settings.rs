//! Price Stream Configuration Settings
//!
//! Configuration types for the price stream, loaded from environment
//! variables.

use std::time::Duration;

/// Default feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.coincap.io/prices";

/// Reconnection backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Jitter applied to each delay, as a fraction of it.
    pub jitter_factor: f64,
    /// Reconnection attempts before settling in `Failed` (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

/// Transport timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    /// Upper bound on opening the transport.
    pub connect: Duration,
    /// Silence after which an open connection is considered dead.
    pub idle: Duration,
    /// Upper bound on closing the transport.
    pub close: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            idle: Duration::from_secs(60),
            close: Duration::from_millis(2000),
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the price update channel.
    pub price_capacity: usize,
    /// Capacity of the state transition channel.
    pub state_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            price_capacity: 64,
            state_capacity: 64,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete price stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed endpoint, without query string.
    pub feed_url: String,
    /// Initial watchlist.
    pub symbols: Vec<String>,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Transport timeouts.
    pub timeouts: TimeoutSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            symbols: Vec::new(),
            reconnect: ReconnectSettings::default(),
            timeouts: TimeoutSettings::default(),
            broadcast: BroadcastSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed URL is not a WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed URL is not a WebSocket URL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let feed_url = env
            .get("PRICE_STREAM_FEED_URL")
            .map_or_else(|| DEFAULT_FEED_URL.to_string(), |url| url.trim().to_string());
        validate_feed_url(&feed_url)?;

        let symbols = env
            .get("PRICE_STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "PRICE_STREAM_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            ),
            delay_max: env.duration_secs(
                "PRICE_STREAM_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            delay_multiplier: env.parse(
                "PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            ),
            jitter_factor: env.parse(
                "PRICE_STREAM_RECONNECT_JITTER",
                reconnect_defaults.jitter_factor,
            ),
            max_attempts: env.parse(
                "PRICE_STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let timeout_defaults = TimeoutSettings::default();
        let timeouts = TimeoutSettings {
            connect: env.duration_secs("PRICE_STREAM_CONNECT_TIMEOUT_SECS", timeout_defaults.connect),
            idle: env.duration_secs("PRICE_STREAM_IDLE_TIMEOUT_SECS", timeout_defaults.idle),
            close: env.duration_millis("PRICE_STREAM_CLOSE_TIMEOUT_MS", timeout_defaults.close),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            price_capacity: env.parse("PRICE_STREAM_PRICE_CAPACITY", broadcast_defaults.price_capacity),
            state_capacity: env.parse("PRICE_STREAM_STATE_CAPACITY", broadcast_defaults.state_capacity),
        };

        let server = ServerSettings {
            health_port: env.parse("PRICE_STREAM_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            feed_url,
            symbols,
            reconnect,
            timeouts,
            broadcast,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Feed URL does not use a WebSocket scheme.
    #[error("feed URL must start with ws:// or wss://, got: {0}")]
    InvalidFeedUrl(String),
}

fn validate_feed_url(url: &str) -> Result<(), ConfigError> {
    let host = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"));

    match host {
        Some(rest) if !rest.is_empty() && !rest.contains('?') => Ok(()),
        _ => Err(ConfigError::InvalidFeedUrl(url.to_string())),
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<StreamConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert!(config.symbols.is_empty());
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(500));
        assert_eq!(config.reconnect.delay_max, Duration::from_secs(30));
        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.reconnect.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.timeouts.connect, Duration::from_secs(10));
        assert_eq!(config.timeouts.idle, Duration::from_secs(60));
        assert_eq!(config.timeouts.close, Duration::from_millis(2000));
        assert_eq!(config.broadcast.price_capacity, 64);
        assert_eq!(config.broadcast.state_capacity, 64);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("PRICE_STREAM_FEED_URL", "ws://localhost:9000/prices"),
            ("PRICE_STREAM_SYMBOLS", "bitcoin, ethereum,,monero "),
            ("PRICE_STREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("PRICE_STREAM_RECONNECT_DELAY_MAX_SECS", "5"),
            ("PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("PRICE_STREAM_RECONNECT_JITTER", "0"),
            ("PRICE_STREAM_MAX_RECONNECT_ATTEMPTS", "3"),
            ("PRICE_STREAM_IDLE_TIMEOUT_SECS", "15"),
            ("PRICE_STREAM_PRICE_CAPACITY", "128"),
            ("PRICE_STREAM_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.feed_url, "ws://localhost:9000/prices");
        assert_eq!(config.symbols, vec!["bitcoin", "ethereum", "monero"]);
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(250));
        assert_eq!(config.reconnect.delay_max, Duration::from_secs(5));
        assert!((config.reconnect.delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert!(config.reconnect.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.timeouts.idle, Duration::from_secs(15));
        assert_eq!(config.broadcast.price_capacity, 128);
        assert_eq!(config.server.health_port, 0);
    }

    #[test_case("PRICE_STREAM_MAX_RECONNECT_ATTEMPTS", "lots")]
    #[test_case("PRICE_STREAM_MAX_RECONNECT_ATTEMPTS", "-1")]
    #[test_case("PRICE_STREAM_MAX_RECONNECT_ATTEMPTS", "   ")]
    fn unparseable_values_fall_back(key: &str, value: &str) {
        let config = config_from(&[(key, value)]).unwrap();
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn unparseable_port_falls_back() {
        let config = config_from(&[("PRICE_STREAM_HEALTH_PORT", "70000")]).unwrap();
        assert_eq!(config.server.health_port, 8083);
    }

    #[test_case("https://ws.coincap.io/prices")]
    #[test_case("wss://")]
    #[test_case("ws.coincap.io/prices")]
    #[test_case("wss://ws.coincap.io/prices?assets=bitcoin")]
    fn invalid_feed_urls_are_rejected(url: &str) {
        let result = config_from(&[("PRICE_STREAM_FEED_URL", url)]);
        assert!(matches!(result, Err(ConfigError::InvalidFeedUrl(_))));
    }

    #[test]
    fn default_config_matches_empty_environment() {
        let from_env = config_from(&[]).unwrap();
        let default = StreamConfig::default();
        assert_eq!(from_env.feed_url, default.feed_url);
        assert_eq!(from_env.server.health_port, default.server.health_port);
    }
}
