//! Engine configuration loaded from environment variables.

use std::time::Duration;

use crate::controller::RetryPolicy;

/// Engine settings with sensible defaults.
///
/// Reads from environment variables:
/// - `BOOKING_MAX_RETRIES` — conflict retries after the first attempt (default: `5`)
/// - `BOOKING_INITIAL_BACKOFF_MS` — delay before the first retry (default: `5`)
/// - `BOOKING_MAX_BACKOFF_MS` — cap on the retry delay (default: `200`)
/// - `BOOKING_VERIFY_CONSERVATION` — recount Active seats inside every write (default: `true`)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub verify_conservation: bool,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("BOOKING_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_backoff: env_parse("BOOKING_INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("BOOKING_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            verify_conservation: env_parse("BOOKING_VERIFY_CONSERVATION")
                .unwrap_or(defaults.verify_conservation),
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn verify_conservation(mut self, enabled: bool) -> Self {
        self.verify_conservation = enabled;
        self
    }

    /// Retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff,
            multiplier: 2.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
            verify_conservation: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
