//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite "database is locked" errors. Signal
//! handlers and reconciliation jobs write the entry table concurrently, so short
//! lock contention is expected and must not lose a write.

use starboard_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default upper bound on time spent retrying a locked write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` while it fails with a lock error, until `max_wait_ms` elapses.
///
/// Any other error is returned immediately without retrying.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_database_locked() {
            return Err(err);
        }

        let elapsed = start_time.elapsed();
        if elapsed >= max_duration {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database operation failed: max retry time exceeded"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts ({} ms elapsed)",
                operation_name,
                attempt,
                elapsed.as_millis()
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, will retry after backoff"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
