//! Retry with exponential backoff for transient transport errors

use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::Result;

/// How often and how patiently a request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or
    /// the attempts are used up
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempt(s)", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        error!("{} failed after {} attempt(s): {}", what, attempt, e);
                        return Err(e);
                    }

                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff with cap
                    delay = (delay * 2).min(self.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = quick(5)
            .run("get job", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::api_error(503, "unavailable"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = quick(3)
            .run("get job", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::api_error(500, "boom"))
            })
            .await;

        assert!(result.unwrap_err().is_server_error());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_surface_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = quick(5)
            .run("get job", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::api_error(404, "missing"))
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
    }
}
