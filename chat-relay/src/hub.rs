use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{bridge::Broadcast, notice::Notice};

/// A serialized notice tagged with the topic it was published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: Arc<str>,
    pub body: Arc<str>,
}

/// Topic fan-out owned by the transport.
///
/// Every connection holds one receiver and keeps the deliveries whose topic it
/// subscribed to. Notices are encoded once, whatever the number of listeners.
#[derive(Debug)]
pub struct TopicHub {
    sender: broadcast::Sender<Delivery>,
}

impl TopicHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Broadcast for TopicHub {
    fn broadcast(&self, topic: &str, notice: &Notice) {
        let body = match notice.to_json() {
            Ok(body) => body,
            Err(error) => {
                warn!(?error, topic, "failed to encode notice");
                return;
            }
        };

        let delivery = Delivery {
            topic: Arc::from(topic),
            body: Arc::from(body),
        };
        if self.sender.send(delivery).is_err() {
            trace!(topic, "no connections to deliver to");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_listener_receives_encoded_notice() {
        let hub = TopicHub::new(16);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.listeners(), 2);

        hub.broadcast("chat.to.client", &Notice::register(3));

        let one = first.recv().await.expect("first listener");
        let two = second.recv().await.expect("second listener");
        assert_eq!(&*one.topic, "chat.to.client");
        assert_eq!(&*one.body, r#"{"type":"register","online":3}"#);
        assert_eq!(one, two);
    }

    #[test]
    fn broadcast_without_listeners_is_dropped() {
        let hub = TopicHub::new(4);
        hub.broadcast("chat.to.client", &Notice::close(0));
        assert_eq!(hub.listeners(), 0);
    }
}
