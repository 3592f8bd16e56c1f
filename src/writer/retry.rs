use crate::config::types::WriterConfig;
use crate::storage::{ObjectStore, StorageError};
use crate::writer::WriteError;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exponential backoff with jitter for object writes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Randomizes each delay by +/- this fraction
    pub jitter_factor: f64,
    /// Total time budget for all attempts of one write
    pub retry_duration: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_factor: 0.25,
            retry_duration: Duration::from_secs(10),
        }
    }
}

impl From<&WriterConfig> for RetryPolicy {
    fn from(config: &WriterConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            retry_duration: config.retry_duration,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based; 0 means first try)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt_with_jitter(attempt, rand::thread_rng().gen::<f64>())
    }

    /// `jitter` in `[0.0, 1.0]`, 0.5 means no jitter
    pub fn delay_for_attempt_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_us = self.initial_backoff.as_micros() as f64
            * self.multiplier.powi(attempt.saturating_sub(1).min(63) as i32);
        let base_us = base_us.min(self.max_backoff.as_micros() as f64);

        let jitter_offset = (jitter.clamp(0.0, 1.0) * 2.0 - 1.0) * base_us * self.jitter_factor;
        let final_us = (base_us + jitter_offset).max(1.0);

        Duration::from_micros(final_us as u64)
    }
}

/// Put one object, retrying transient failures until the time budget runs
/// out. Returns the number of attempts made.
pub async fn put_with_retry(
    store: &dyn ObjectStore,
    key: &str,
    body: &[u8],
    policy: &RetryPolicy,
    mut on_retry: impl FnMut(),
) -> Result<u32, WriteError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let error = match store.put(key, body).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(key = key, attempts = attempt, "Write recovered after retry");
                }
                return Ok(attempt);
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            return Err(permanent(key, error));
        }

        let delay = policy.delay_for_attempt(attempt);
        let elapsed = started.elapsed();
        if elapsed + delay > policy.retry_duration {
            return Err(WriteError::RetriesExhausted {
                key: key.to_string(),
                attempts: attempt,
                elapsed,
                source: error,
            });
        }

        warn!(
            key = key,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Object write failed, retrying"
        );
        on_retry();
        tokio::time::sleep(delay).await;
    }
}

fn permanent(key: &str, source: StorageError) -> WriteError {
    WriteError::Permanent {
        key: key.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt_with_jitter(0, 0.5), Duration::ZERO);
        assert_eq!(
            policy.delay_for_attempt_with_jitter(1, 0.5),
            Duration::from_millis(100)
        );
        assert_eq!(
            policy.delay_for_attempt_with_jitter(2, 0.5),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.delay_for_attempt_with_jitter(5, 0.5),
            Duration::from_millis(1600)
        );
        assert_eq!(
            policy.delay_for_attempt_with_jitter(6, 0.5),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for_attempt_with_jitter(40, 0.5),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt_with_jitter(1, 0.0),
            Duration::from_millis(75)
        );
        assert_eq!(
            policy.delay_for_attempt_with_jitter(1, 1.0),
            Duration::from_millis(125)
        );
        for attempt in 1..10 {
            let d = policy.delay_for_attempt(attempt);
            assert!(d <= Duration::from_millis(2500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let store = MemoryObjectStore::new();
        store.fail_next(3);
        let mut retries = 0;

        let attempts = put_with_retry(&store, "k.gz", b"x", &RetryPolicy::default(), || {
            retries += 1
        })
        .await
        .unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(retries, 3);
        assert_eq!(store.get("k.gz").await.unwrap(), b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_duration() {
        let store = MemoryObjectStore::new();
        store.fail_next(usize::MAX);
        let started = Instant::now();

        let err = put_with_retry(&store, "k.gz", b"x", &RetryPolicy::default(), || {})
            .await
            .unwrap_err();

        match err {
            WriteError::RetriesExhausted { attempts, .. } => assert!(attempts > 5),
            other => panic!("unexpected {:?}", other),
        }
        assert!(started.elapsed() <= Duration::from_secs(10));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let store = MemoryObjectStore::new();
        store.put("k.gz", b"first").await.unwrap();

        let err = put_with_retry(&store, "k.gz", b"x", &RetryPolicy::default(), || {})
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Permanent { .. }));
        assert_eq!(store.put_attempts(), 2);
    }
}
