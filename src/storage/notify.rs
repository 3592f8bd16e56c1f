use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const FILE_CREATED_TOPIC: &str = "pubsub-FileCreated";

/// Published once per successfully written object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectCreated {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub record_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Fan-out of object-created notifications.
///
/// Publishing never waits on subscribers. A subscriber that falls more than
/// `capacity` messages behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct NotificationTopic {
    sender: broadcast::Sender<ObjectCreated>,
}

impl NotificationTopic {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObjectCreated> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ObjectCreated) {
        // Err only means nobody is subscribed right now
        if self.sender.send(event).is_err() {
            debug!(topic = FILE_CREATED_TOPIC, "No subscribers for notification");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(key: &str) -> ObjectCreated {
        ObjectCreated {
            bucket: "b".to_string(),
            key: key.to_string(),
            size_bytes: 10,
            record_count: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let topic = NotificationTopic::new(8);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();

        topic.publish(created("x.gz"));

        assert_eq!(a.recv().await.unwrap().key, "x.gz");
        assert_eq!(b.recv().await.unwrap().key, "x.gz");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_and_lag() {
        let topic = NotificationTopic::new(2);
        topic.publish(created("dropped.gz"));

        let mut slow = topic.subscribe();
        for i in 0..4 {
            topic.publish(created(&format!("{}.gz", i)));
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(slow.recv().await.unwrap().key, "2.gz");
    }
}
