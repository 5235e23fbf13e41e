//! Retry for SQLite lock contention
//!
//! Pipeline writes share one SQLite file with whatever else has it open, so a
//! write can see "database is locked". Those are retried with exponential
//! backoff; every other error is returned untouched.

use atlas_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default upper bound on time spent retrying one operation
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `operation`, retrying while it fails with a lock error and `max_wait_ms` has not elapsed.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. Success or non-lock error: return it
/// 3. Lock error within budget: sleep (10ms doubling, capped at 1s) and retry
/// 4. Lock error past budget: return `Error::Internal` describing the attempts
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_database_locked() {
            return Err(err);
        }

        let elapsed = started.elapsed();
        if elapsed >= budget {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts ({} ms)",
                operation_name,
                attempt,
                elapsed.as_millis()
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("op", 100, || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_lock_errors_are_retried() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_lock("op", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(locked())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result = retry_on_lock("op", 30, || async { Err::<(), _>(locked()) }).await;
        match result {
            Err(Error::Internal(msg)) => assert!(msg.contains("database locked")),
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_lock("op", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::NotFound("row".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
