//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Odometry`] | High-frequency relative-motion samples |
//! | [`Topic::Vision`] | Per-frame fiducial detections from every camera |
//! | [`Topic::Config`] | Pose priors and marker layouts, on change only |
//! | [`Topic::Telemetry`] | Flushed key-value batches (the fused estimate) |
//! | [`Topic::SystemAlerts`] | Faults and operator-facing warnings |

use tagfuse_types::{Event, FusionError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 1024;

/// Routing lanes on the [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Odometry,
    Vision,
    Config,
    Telemetry,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    odometry: broadcast::Sender<Event>,
    vision: broadcast::Sender<Event>,
    config: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (odometry, _) = broadcast::channel(capacity);
        let (vision, _) = broadcast::channel(capacity);
        let (config, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            odometry,
            vision,
            config,
            telemetry,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when nobody is listening on the topic; that is a
    /// normal condition for telemetry nobody has asked for yet.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, FusionError> {
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => Ok(0),
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Odometry => &self.odometry,
            Topic::Vision => &self.vision,
            Topic::Config => &self.config,
            Topic::Telemetry => &self.telemetry,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-bound receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single [`Topic`] channel.
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
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for plain OS threads.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.blocking_recv()
    }

    /// Non-blocking poll.
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
    use tagfuse_types::{EventPayload, OdometrySample, Timestamp, Transform3D};

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::Odometry(OdometrySample {
                timestamp: Timestamp(10),
                delta: Transform3D::identity(),
                translation_sigma: 0.01,
                rotation_sigma: 0.01,
            }),
        )
    }

    #[test]
    fn publish_no_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        let delivered = bus.publish_to(Topic::Odometry, make_event("test")).unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::Odometry);
        let mut subscriber2 = bus.subscribe_to(Topic::Odometry);

        let event = make_event("tagfuse-hal::sim");
        assert_eq!(bus.publish_to(Topic::Odometry, event.clone())?, 2);

        let recv1 = subscriber1.recv().await?;
        let recv2 = subscriber2.recv().await?;
        assert_eq!(recv1.id, event.id, "subscriber 1 got wrong event");
        assert_eq!(recv2.id, event.id, "subscriber 2 got wrong event");
        Ok(())
    }

    /// A subscriber on `Vision` must not receive events published to
    /// `Odometry` because they are routed through separate channels.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut vision_sub = bus.subscribe_to(Topic::Vision);
        let _odom_sub = bus.subscribe_to(Topic::Odometry);

        bus.publish_to(Topic::Odometry, make_event("tagfuse-hal::sim"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), vision_sub.recv()).await;
        assert!(
            result.is_err(),
            "Vision subscriber must not receive an Odometry event"
        );
        assert_eq!(vision_sub.topic(), Topic::Vision);
        Ok(())
    }

    #[test]
    fn try_recv_reports_empty_then_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Config);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        let event = make_event("config");
        bus.publish_to(Topic::Config, event.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap().id, event.id);
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        const CAPACITY: usize = 64;
        let bus = EventBus::new(CAPACITY);
        let mut slow_sub = bus.subscribe_to(Topic::Vision);

        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::Vision, make_event("flood::camera"));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn receiver_count_tracks_subscriptions() {
        let bus = EventBus::default();
        assert_eq!(bus.receiver_count(Topic::Telemetry), 0);
        let rx = bus.subscribe_to(Topic::Telemetry);
        assert_eq!(bus.receiver_count(Topic::Telemetry), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(Topic::Telemetry), 0);
    }
}
