//! Typed, topic-based publish/subscribe bus for goal lifecycle events.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the bridge.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Lifecycle`] | Admission, rejection, submission, cancellation, terminal resolution |
//! | [`Topic::Feedback`] | One event per relayed feedback message |
//! | [`Topic::Diagnostics`] | Legacy server availability |
//!
//! Every event is also delivered on the firehose channel returned by
//! [`EventBus::subscribe`], which is what the WebSocket monitor consumes.

use actbridge_types::{BridgeError, Event};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Lifecycle,
    Feedback,
    Diagnostics,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    firehose: broadcast::Sender<Event>,
    lifecycle: broadcast::Sender<Event>,
    feedback: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        let (lifecycle, _) = broadcast::channel(capacity);
        let (feedback, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        Self {
            firehose,
            lifecycle,
            feedback,
            diagnostics,
        }
    }

    /// Publish `event` to the given [`Topic`] and to the firehose.
    ///
    /// Returns the total number of receivers that were handed the event, or
    /// [`BridgeError::Channel`] when nobody is listening at all.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, BridgeError> {
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_firehose = self.firehose.send(event).unwrap_or(0);
        match on_topic + on_firehose {
            0 => Err(BridgeError::Channel(format!(
                "no subscribers for topic {topic:?}"
            ))),
            n => Ok(n),
        }
    }

    /// Subscribe to a single [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Lifecycle => &self.lifecycle,
            Topic::Feedback => &self.feedback,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actbridge_types::EventPayload;
    use uuid::Uuid;

    fn make_event() -> Event {
        Event::new(
            "actbridge-middleware::test",
            EventPayload::GoalReceived {
                goal_id: Uuid::new_v4(),
            },
        )
    }

    #[tokio::test]
    async fn publish_reaches_topic_and_firehose() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut lifecycle = bus.subscribe_to(Topic::Lifecycle);
        let mut all = bus.subscribe();

        let event = make_event();
        let delivered = bus.publish_to(Topic::Lifecycle, event.clone())?;
        assert_eq!(delivered, 2);

        assert_eq!(lifecycle.recv().await?.id, event.id);
        assert_eq!(all.recv().await?.id, event.id);
        assert_eq!(lifecycle.topic(), Topic::Lifecycle);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Diagnostics, make_event());
        assert!(matches!(result, Err(BridgeError::Channel(_))));
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut feedback = bus.subscribe_to(Topic::Feedback);
        let _lifecycle = bus.subscribe_to(Topic::Lifecycle);

        bus.publish_to(Topic::Lifecycle, make_event()).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            feedback.recv(),
        )
        .await;
        assert!(
            result.is_err(),
            "Feedback subscriber must not receive a Lifecycle event"
        );
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Feedback);

        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::Feedback, make_event());
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
