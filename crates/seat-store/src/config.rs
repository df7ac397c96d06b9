//! Store configuration loaded from environment variables.

use std::time::Duration;

/// Settings shared by every store implementation.
///
/// Reads from environment variables:
/// - `SEAT_STORE_LOCK_TIMEOUT_MS` — how long a transaction waits for a row lock (default: `2000`)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub lock_timeout: Duration,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout: std::env::var("SEAT_STORE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
        }
    }

    /// Sets the lock wait window.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Lock timeout formatted for PostgreSQL's `lock_timeout` setting.
    pub fn pg_lock_timeout(&self) -> String {
        format!("{}ms", self.lock_timeout.as_millis().max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
        }
    }
}
