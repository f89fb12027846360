//! Exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ClientResult;

/// How a caller retries transient (`Io`) errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Run `op`, retrying transient failures with a blocking sleep.
    pub fn with_retry<T>(&self, mut op: impl FnMut() -> ClientResult<T>) -> ClientResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Async variant of [`with_retry`](Self::with_retry), sleeping on tokio.
    pub async fn with_retry_async<T, F, Fut>(&self, mut op: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.backoff(20), Duration::from_millis(1_000));
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = fast(5).with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ClientError::Io("flaky".into()))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: ClientResult<()> = fast(3).with_retry(|| {
            calls.set(calls.get() + 1);
            Err(ClientError::Io("down".into()))
        });
        assert!(matches!(result, Err(ClientError::Io(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: ClientResult<()> = fast(5).with_retry(|| {
            calls.set(calls.get() + 1);
            Err(ClientError::NoSuchObject("abc".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn async_retry_matches_sync_behaviour() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = fast(4)
            .with_retry_async(|| {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                async move {
                    if n < 4 {
                        Err(ClientError::Io("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 4);
    }

    #[test]
    fn deserializes_partial_policy() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 7}"#).unwrap();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff_ms, 10);
    }
}
