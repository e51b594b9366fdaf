//! Bounded retry with exponential backoff.
//!
//! Shared by the model stream handshake, mid-session model reconnects, and the
//! call-control redirect issued during a handoff.

use std::future::Future;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Retry/backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never below 1.
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds).
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    pub backoff_multiplier: f32,

    /// Add up to ±25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after `attempt` failed attempts (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        let millis = if self.jitter {
            (delay + rand_jitter(delay * 0.25)).max(0.0)
        } else {
            delay
        };
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the last error together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_when(operation, |_| true, op).await
    }

    /// Like [`run`](Self::run), but stops early on errors `retryable` rejects.
    pub async fn run_when<T, E, R, F, Fut>(
        &self,
        operation: &str,
        retryable: R,
        mut op: F,
    ) -> Result<T, (E, u32)>
    where
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !retryable(&e) || !self.should_retry(attempt) {
                        tracing::warn!(
                            operation,
                            attempt,
                            "Giving up after {} attempt(s): {}",
                            attempt,
                            e
                        );
                        return Err((e, attempt));
                    }
                    let delay = self.delay_for(attempt);
                    tracing::info!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Attempt failed ({}), retrying in {}ms",
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Pseudo-random jitter in `-range..=range` from the clock's nanoseconds.
fn rand_jitter(range: f64) -> f64 {
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}
