use crate::config::types::{BackpressureConfig, BackpressureStrategy};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// Queue stayed full for as long as the strategy allows
    Full,
    /// Receiving stage is gone
    Closed,
}

/// Applies the configured backpressure strategy when handing work to a
/// bounded channel.
#[derive(Debug, Clone)]
pub struct BackpressureHandler {
    strategy: BackpressureStrategy,
    max_wait: Duration,
}

impl BackpressureHandler {
    pub fn new(strategy: BackpressureStrategy, max_wait: Duration) -> Self {
        Self { strategy, max_wait }
    }

    pub fn strategy(&self) -> BackpressureStrategy {
        self.strategy
    }

    /// `reject` fails at once on a full queue, `block` waits up to `max_wait`
    pub async fn offer<T>(&self, tx: &mpsc::Sender<T>, item: T) -> Result<(), OfferError> {
        match self.strategy {
            BackpressureStrategy::Reject => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => OfferError::Full,
                TrySendError::Closed(_) => OfferError::Closed,
            }),
            BackpressureStrategy::Block => {
                tx.send_timeout(item, self.max_wait)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => OfferError::Full,
                        SendTimeoutError::Closed(_) => OfferError::Closed,
                    })
            }
        }
    }
}

impl From<&BackpressureConfig> for BackpressureHandler {
    fn from(config: &BackpressureConfig) -> Self {
        Self::new(config.strategy, config.max_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_fails_immediately_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handler = BackpressureHandler::new(BackpressureStrategy::Reject, Duration::ZERO);
        handler.offer(&tx, 1).await.unwrap();
        assert_eq!(handler.offer(&tx, 2).await, Err(OfferError::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waits_then_gives_up() {
        let (tx, mut rx) = mpsc::channel(1);
        let handler = BackpressureHandler::new(BackpressureStrategy::Block, Duration::from_secs(1));
        handler.offer(&tx, 1).await.unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(handler.offer(&tx, 2).await, Err(OfferError::Full));
        assert!(started.elapsed() >= Duration::from_secs(1));

        // Space frees up while blocked
        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let first = rx.recv().await;
            (first, rx)
        });
        handler.offer(&tx, 3).await.unwrap();

        let (first, mut rx) = consumer.await.unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (tx, rx) = mpsc::channel::<u8>(1);
        drop(rx);
        let handler = BackpressureHandler::new(BackpressureStrategy::Block, Duration::from_secs(1));
        assert_eq!(handler.offer(&tx, 1).await, Err(OfferError::Closed));
    }
}
