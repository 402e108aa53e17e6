//! Rate-limited executor for external recovery calls
//!
//! One call in flight at a time, a fixed pause after every success, and bounded
//! exponential backoff on transient failures. Bulk reconciliation routes its
//! external calls through here unless the operator override is in effect.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::external::{ExternalError, ExternalResult};
use starboard_common::config::RecoveryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Pause after every successful call
    pub call_delay: Duration,
    /// Total attempts per call, first try included
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for ExecutorSettings {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            call_delay: config.call_delay(),
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            backoff_cap: config.backoff_cap(),
        }
    }
}

impl ExecutorSettings {
    /// Wait before retry number `retry` (0-based): base * 2^retry, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

pub struct RateLimitedExecutor {
    settings: ExecutorSettings,
    in_flight: Mutex<()>,
}

impl RateLimitedExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run one external call under the single-flight, throttle and retry rules
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ExternalResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExternalResult<T>>,
    {
        let _slot = self.in_flight.lock().await;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    tokio::time::sleep(self.settings.call_delay).await;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.settings.max_attempts => {
                    let wait = self.retry_wait(attempt - 1, &e);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.settings.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient external failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(operation, attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Computed backoff, stretched to a longer server hint but never past the cap
    fn retry_wait(&self, retry: u32, error: &ExternalError) -> Duration {
        let computed = self.settings.backoff(retry);
        match error.retry_after() {
            Some(hint) if hint > computed => hint.min(self.settings.backoff_cap),
            _ => computed,
        }
    }
}

/// How a caller wants an external call dispatched
#[derive(Clone, Copy)]
pub enum CallPolicy<'a> {
    /// Straight to the store; used by live signal handling and fast mode
    Direct,
    Throttled(&'a RateLimitedExecutor),
}

impl<'a> CallPolicy<'a> {
    pub fn for_mode(executor: &'a RateLimitedExecutor, fast: bool) -> Self {
        if fast {
            CallPolicy::Direct
        } else {
            CallPolicy::Throttled(executor)
        }
    }

    pub async fn call<T, F, Fut>(&self, operation: &str, call: F) -> ExternalResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExternalResult<T>>,
    {
        match self {
            CallPolicy::Direct => {
                let mut call = call;
                call().await
            }
            CallPolicy::Throttled(executor) => executor.run(operation, call).await,
        }
    }
}
