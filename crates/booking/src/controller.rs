//! Isolation wrapper for engine operations.
//!
//! Every mutation runs as one store transaction. If the transaction is
//! aborted by an isolation conflict (lock timeout, stale version,
//! serialization failure, deadlock) the whole operation is restarted on a
//! fresh transaction after an exponential backoff, up to a bounded number of
//! retries. Any other outcome is returned unchanged.

use std::future::Future;
use std::time::{Duration, Instant};

use seat_store::SeatStore;

use crate::error::{BookingError, Result};

/// Exponential backoff settings for conflict retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based): `initial * multiplier^retry`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }
}

/// Runs transactional operations against a store with bounded conflict retries.
pub struct ConcurrencyController<S: SeatStore> {
    store: S,
    policy: RetryPolicy,
}

impl<S: SeatStore> ConcurrencyController<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `attempt` on a fresh transaction until it stops failing with a conflict.
    ///
    /// `attempt` owns the transaction and must commit it to make its writes
    /// durable; returning early drops the transaction and rolls it back.
    pub async fn execute<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        let outcome = loop {
            attempts += 1;

            let result = match self.store.begin().await {
                Ok(tx) => attempt(tx).await,
                Err(e) => Err(BookingError::from(e)),
            };

            match result {
                Err(err) if err.is_conflict() && attempts <= self.policy.max_retries => {
                    let delay = self.policy.delay_for_retry(attempts - 1);
                    metrics::counter!("booking_conflict_retries_total", "operation" => operation)
                        .increment(1);
                    tracing::debug!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "isolation conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(BookingError::Conflict { reason, .. }) => {
                    tracing::warn!(operation, attempts, %reason, "conflict retries exhausted");
                    break Err(BookingError::Conflict { attempts, reason });
                }
                other => break other,
            }
        };

        metrics::histogram!("booking_operation_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        outcome
    }
}
