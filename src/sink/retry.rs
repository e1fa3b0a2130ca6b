use crate::error::{Result, SegmenterError};
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Linear backoff for networked writes: after failed attempt `n` the next
/// one starts `n * base_delay` later.
///
/// Only errors that [`SegmenterError::is_transient`] accepts are retried.
/// Running out of attempts ends in [`SegmenterError::RetriesExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("giving up on {} after {} attempts: {}", name, attempt, e);
                    return Err(SegmenterError::RetriesExhausted {
                        name: name.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "attempt {} for {} failed ({}), retrying in {:?}",
                        attempt, name, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(40, Duration::from_millis(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn transient() -> SegmenterError {
        SegmenterError::Io(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<()> = policy
            .run("chunk_00000.ts", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SegmenterError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // waits of 100 ms and 200 ms
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        let result = policy
            .run("chunklist.m3u8", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("chunk_00001.ts", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SegmenterError::Sink {
                    name: "chunk_00001.ts".into(),
                    reason: "403 Forbidden".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(SegmenterError::Sink { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
