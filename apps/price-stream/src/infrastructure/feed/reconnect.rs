//! Reconnection Policy
//!
//! Exponential backoff with a ceiling for price feed reconnection, plus the
//! give-up threshold after which the stream settles into `Failed`.
//!
//! The delay computation is a pure function of the attempt number so the
//! schedule is predictable; jitter is applied separately by the caller.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Create configuration from `ReconnectSettings`.
    #[must_use]
    pub const fn from_settings(settings: &crate::ReconnectSettings) -> Self {
        Self::new(
            settings.delay_initial,
            settings.delay_max,
            settings.delay_multiplier,
            settings.jitter_factor,
            settings.max_attempts,
        )
    }
}

/// Reconnection policy implementing exponential backoff with a cap.
///
/// # Example
///
/// ```rust
/// use price_stream::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = ReconnectConfig {
///     jitter_factor: 0.0,
///     max_attempts: 3,
///     ..ReconnectConfig::default()
/// };
/// let mut policy = ReconnectPolicy::new(config);
///
/// assert_eq!(policy.next_delay(0), Duration::from_millis(500));
/// assert!(!policy.should_fallback(policy.attempt_count()));
///
/// policy.record_attempt();
/// assert_eq!(policy.attempt_count(), 1);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    ///
    /// Multipliers below 1.0 are treated as 1.0 so the schedule never
    /// shrinks.
    #[must_use]
    pub fn new(mut config: ReconnectConfig) -> Self {
        if config.multiplier.is_nan() || config.multiplier < 1.0 {
            config.multiplier = 1.0;
        }
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay to wait before reconnection attempt number `attempt`.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max_delay;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

        #[allow(clippy::cast_precision_loss)]
        let initial_millis = self.config.initial_delay.as_millis() as f64;
        let scaled = initial_millis * self.config.multiplier.powi(exponent);

        #[allow(clippy::cast_precision_loss)]
        let max_millis = max.as_millis() as f64;
        if !scaled.is_finite() || scaled >= max_millis {
            return max;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = scaled.round() as u64;
        Duration::from_millis(millis).min(max)
    }

    /// Whether the stream should stop retrying after `attempt` attempts.
    #[must_use]
    pub const fn should_fallback(&self, attempt: u32) -> bool {
        self.config.max_attempts > 0 && attempt >= self.config.max_attempts
    }

    /// Count one reconnection attempt.
    pub const fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Give-up threshold (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Apply jitter to a duration.
    #[must_use]
    pub fn jittered(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
