//! Fire-and-forget event fan-out to websocket subscribers.
//!
//! Backed by a tokio broadcast channel; a send with no receivers is not an
//! error, and the settlement path never awaits delivery.

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ServerEvent;

#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event scoped to one match's subscribers.
    pub fn publish_to_match(&self, match_id: &str, event: ServerEvent) {
        debug!("publish match={} event={:?}", match_id, event);
        let _ = self.tx.send(event);
    }

    /// Publish an event scoped to one user (settlement, wallet updates).
    pub fn publish_to_user(&self, user_id: i64, event: ServerEvent) {
        debug!("publish user={} event={:?}", user_id, event);
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let publisher = EventPublisher::new(16);
        publisher.publish_to_match(
            "m1",
            ServerEvent::WalletUpdate {
                user_id: 1,
                balance: 100.0,
            },
        );
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        publisher.publish_to_user(
            7,
            ServerEvent::WalletUpdate {
                user_id: 7,
                balance: 250.0,
            },
        );
        match rx.recv().await.unwrap() {
            ServerEvent::WalletUpdate { user_id, balance } => {
                assert_eq!(user_id, 7);
                assert!((balance - 250.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
