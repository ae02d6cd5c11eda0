use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

use super::types::Event;

/// Typed publish/subscribe hub shared by every component of a mounted session
#[derive(Clone)]
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Subscribe to every event published after this call
    pub fn subscribe(&self) -> Subscription {
        debug!(
            "New subscriber (now {})",
            self.event_tx.receiver_count() + 1
        );
        Subscription {
            rx: self.event_tx.subscribe(),
        }
    }

    /// Publish an event; returns how many subscribers it reached
    pub fn publish(&self, event: Event) -> usize {
        trace!("Publishing event: {:?}", event);
        // No subscribers is fine: events are advisory.
        self.event_tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next event; `None` once the bus is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Explicitly end the subscription
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Consume the subscription as a `Stream`
    pub fn into_stream(self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Notice;
    use tether_common::types::ConnectionState;

    #[tokio::test]
    async fn test_event_broadcast() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(Event::Notice(Notice::NoBackend)), 2);

        assert_eq!(first.recv().await, Some(Event::Notice(Notice::NoBackend)));
        assert_eq!(second.recv().await, Some(Event::Notice(Notice::NoBackend)));
    }

    #[tokio::test]
    async fn test_unsubscribe_disposes_receiver() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.publish(Event::ConnectionChanged(ConnectionState::Connecting)),
            0
        );
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        use tokio_stream::StreamExt;

        let bus = EventBus::new();
        let events = bus.subscribe().into_stream();
        bus.publish(Event::Notice(Notice::NoBackend));
        bus.publish(Event::Closed);
        drop(bus);

        let received: Vec<Event> = events.filter_map(Result::ok).collect().await;
        assert_eq!(received, vec![Event::Notice(Notice::NoBackend), Event::Closed]);
    }

    #[tokio::test]
    async fn test_closed_bus_ends_subscription() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }
}
