use crate::Result;
use std::future::Future;
use tokio::time::{sleep, Duration};

/// Backoff between exchange retries: 1s, 1s, 3s, 3s, then 5s (10 attempts total)
const DEFAULT_BACKOFF_SECS: [u64; 9] = [1, 1, 3, 3, 5, 5, 5, 5, 5];

/// Bounded retry schedule for exchange calls
///
/// `delays[i]` is the pause after the `i+1`-th failed attempt, so a policy with
/// N delays makes at most N + 1 attempts before giving up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Retry `retries` times without sleeping (tests, backfills)
    pub fn immediate(retries: usize) -> Self {
        Self {
            delays: vec![Duration::ZERO; retries],
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Run `op` until it succeeds or the schedule is exhausted
    ///
    /// Errors that are not transient (malformed data, store failures) are
    /// returned after the first attempt. Otherwise returns the last error once
    /// every attempt has failed.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("✓ {} succeeded after {} attempts", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!("{} failed with a non-retryable error: {}", what, e);
                    return Err(e);
                }
                Err(e) => match self.delays.get(attempt - 1) {
                    Some(delay) => {
                        tracing::warn!(
                            "Attempt {}/{} failed for {}: {}. Retrying in {:?}...",
                            attempt,
                            max_attempts,
                            what,
                            e,
                            delay
                        );
                        sleep(*delay).await;
                    }
                    None => {
                        tracing::error!("{} failed after {} attempts: {}", what, attempt, e);
                        return Err(e);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 10);

        let secs: Vec<u64> = policy.delays().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 1, 3, 3, 5, 5, 5, 5, 5]);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(9);

        let result = policy
            .run("depth KEYBTC", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(Error::Fetch("503 Service Unavailable".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(9);

        let result: Result<()> = policy
            .run("depth KEYBTC", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Fetch("timeout".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Fetch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_no_retries() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(0);

        let result: Result<()> = policy
            .run("klines KEYBTC", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Fetch("timeout".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_data_is_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(9);

        let result: Result<()> = policy
            .run("depth KEYBTC", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidData("Bad decimal \"abc\"".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
