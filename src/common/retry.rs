//! Centralized retry policy with exponential backoff.
//!
//! Every remote call site (dispatch, provisioning, media queueing) consults the
//! same policy. Only failures classified as transient are retried.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::error::Classify;
use crate::config::types::RetryConfig;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    factor: f32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
            jitter: config.jitter,
        }
    }

    /// Start tracking a fresh sequence of attempts.
    pub fn start(&self) -> RetryState {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .without_max_times();
        if self.jitter {
            builder = builder.with_jitter();
        }

        RetryState {
            backoff: builder.build(),
            attempts: 0,
            max_attempts: self.max_attempts,
            max_delay: self.max_delay,
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, exhausts the attempt
    /// bound, or `cancel` fires during a backoff pause.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned on failure.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut state = self.start();
        loop {
            let attempt = state.attempts() + 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let Some(delay) = state.next_delay(&e) else {
                        return Err(e);
                    };
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying after transient failure");
                    if !pause(delay, cancel).await {
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Tracks attempts and calculates delays for one retried operation.
pub struct RetryState {
    backoff: ExponentialBackoff,
    attempts: u32,
    max_attempts: u32,
    max_delay: Duration,
}

impl RetryState {
    /// Record a failed attempt and return the delay before the next one.
    ///
    /// Returns `None` when the failure is not transient or the attempt
    /// bound has been reached.
    pub fn next_delay<E: Classify>(&mut self, error: &E) -> Option<Duration> {
        self.attempts += 1;

        if !error.is_transient() || self.attempts >= self.max_attempts {
            return None;
        }

        let delay = self.backoff.next().unwrap_or(self.max_delay);
        Some(match error.retry_after() {
            Some(requested) => delay.max(requested),
            None => delay,
        })
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` if cancelled.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
