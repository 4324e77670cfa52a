//! Bounded retry for store reads.

use std::future::Future;
use std::time::Duration;

use super::TicketError;

/// Retry policy applied to read-only store calls.
///
/// Writes are never retried here: a failed allocation may or may not have
/// committed, and the caller must decide what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Base delay; the wait before attempt `n + 1` is `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op`, retrying transient failures with linear backoff.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TicketError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TicketError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.saturating_mul(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        error = %e,
                        "Store read failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketId;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = policy
            .run("get_ticket", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TicketError::Database("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("get_ticket", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TicketError::Database("down".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_domain_errors() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = policy
            .run("get_ticket", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TicketError::NotFound(TicketId(4)))
            })
            .await;

        assert_eq!(result, Err(TicketError::NotFound(TicketId(4))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_runs_once() {
        let policy = RetryPolicy::none();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let _: Result<(), _> = policy
            .run("get_ticket", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TicketError::Database("down".to_string()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
