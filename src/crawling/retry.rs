//! Bounded exponential backoff shared by catalog fetches and enrichment
//!
//! Attempt 1 runs immediately; attempt `n > 1` waits
//! `base * multiplier^(n-2)` capped at `max_delay_ms`, plus optional jitter.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::infrastructure::config::defaults;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added to each wait; 0 disables jitter
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            defaults::MAX_ATTEMPTS,
            defaults::RETRY_BASE_DELAY_MS,
            defaults::RETRY_MAX_DELAY_MS,
            defaults::RETRY_MULTIPLIER,
        )
    }
}

/// What a retried operation produced, and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            jitter_ms: 0,
        }
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (self.base_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent))
            .min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(millis)
    }

    /// Wait before `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if delay.is_zero() || self.jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
    }

    /// Jitter-free waits before attempts 2..=max_attempts.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (2..=self.max_attempts).map(|attempt| self.base_delay(attempt)).collect()
    }

    /// Run `op` until it succeeds, `should_retry` rejects its error, or the
    /// attempts are used up. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        should_retry: impl Fn(&E) -> bool,
        mut op: F,
    ) -> RetryOutcome<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                debug!("⏳ {} attempt {}/{} after {:?}", label, attempt, max_attempts, delay);
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return RetryOutcome { result: Ok(value), attempts: attempt },
                Err(e) if attempt < max_attempts && should_retry(&e) => {
                    warn!("🔄 {} attempt {}/{} failed: {}", label, attempt, max_attempts, e);
                    attempt += 1;
                }
                Err(e) => return RetryOutcome { result: Err(e), attempts: attempt },
            }
        }
    }
}
