//! Headless, typed, topic-based telemetry bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every event without a slow subscriber blocking the relay.  The relay
//! itself is synchronous: publishing never awaits, and receivers are drained
//! with [`TopicReceiver::try_recv`] or [`TopicReceiver::blocking_recv`].
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Commands`] | Tokens forwarded to the robot driver |
//! | [`Topic::Telemetry`] | Accepted/suppressed actions, base-frame points, turns sent |
//! | [`Topic::SystemAlerts`] | Connection lifecycle, rejections, decode and log failures |

use armlink_types::{Event, RelayEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Commands,
    Telemetry,
    SystemAlerts,
}

impl Topic {
    /// The lane a given payload travels on.
    pub fn of(payload: &RelayEvent) -> Self {
        match payload {
            RelayEvent::CommandForwarded { .. } => Topic::Commands,
            RelayEvent::ActionAccepted { .. }
            | RelayEvent::ActionSuppressed { .. }
            | RelayEvent::BasePoint { .. }
            | RelayEvent::TurnSent { .. } => Topic::Telemetry,
            RelayEvent::Connected { .. }
            | RelayEvent::Rejected { .. }
            | RelayEvent::Disconnected { .. }
            | RelayEvent::DecodeFailed { .. }
            | RelayEvent::LogWriteFailed { .. }
            | RelayEvent::Shutdown { .. } => Topic::SystemAlerts,
        }
    }
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    commands: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            commands,
            telemetry,
            system_alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event; `0` when nobody is
    /// listening, which is a normal condition.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Wrap `payload` in an [`Event`] from `source` and publish it on the
    /// topic it belongs to.
    pub fn emit(&self, source: &str, payload: RelayEvent) -> usize {
        let topic = Topic::of(&payload);
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Subscribe to one topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Commands => &self.commands,
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

/// A receiver bound to a single [`Topic`].  Obtained via
/// [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Next buffered event without blocking.  Lagged gaps are logged and
    /// skipped; `None` means nothing is pending (or the bus is gone).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, dropped = n, "bus subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Block the current thread until an event arrives.  `None` once every
    /// bus handle has been dropped.  Must not be called from async code.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, dropped = n, "bus subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Every event currently buffered, oldest first.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_types::{CanonicalAction, GripperState};

    fn accepted() -> RelayEvent {
        RelayEvent::ActionAccepted {
            action: CanonicalAction {
                pos_end_effector: "move".into(),
                gripper: GripperState::Close,
            },
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.emit("test", accepted()), 0);
    }

    #[test]
    fn emit_routes_by_payload() {
        let bus = EventBus::default();
        let mut telemetry = bus.subscribe_to(Topic::Telemetry);
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let mut commands = bus.subscribe_to(Topic::Commands);

        bus.emit("test", accepted());
        bus.emit("test", RelayEvent::DecodeFailed { details: "bad".into() });
        bus.emit("test", RelayEvent::CommandForwarded { token: "move".into() });

        assert!(matches!(
            telemetry.try_recv().unwrap().payload,
            RelayEvent::ActionAccepted { .. }
        ));
        assert!(matches!(
            alerts.try_recv().unwrap().payload,
            RelayEvent::DecodeFailed { .. }
        ));
        assert!(matches!(
            commands.try_recv().unwrap().payload,
            RelayEvent::CommandForwarded { .. }
        ));
        assert!(telemetry.try_recv().is_none());
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::Telemetry);
        let mut b = bus.subscribe_to(Topic::Telemetry);
        assert_eq!(bus.emit("test", accepted()), 2);
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }

    #[test]
    fn clones_share_channels() {
        let bus = EventBus::default();
        let clone = bus.clone();
        let mut rx = bus.subscribe_to(Topic::Commands);
        clone.emit("clone", RelayEvent::CommandForwarded { token: "reset_pose".into() });
        assert_eq!(rx.try_recv().unwrap().source, "clone");
    }

    #[test]
    fn lagged_subscriber_skips_to_oldest_retained() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_to(Topic::Commands);
        for i in 0..5 {
            bus.emit("test", RelayEvent::CommandForwarded { token: format!("c{i}") });
        }
        let tokens: Vec<String> = rx
            .drain()
            .into_iter()
            .map(|e| match e.payload {
                RelayEvent::CommandForwarded { token } => token,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(tokens, vec!["c3", "c4"]);
    }

    #[test]
    fn blocking_recv_returns_none_when_bus_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SystemAlerts);
        drop(bus);
        assert!(rx.blocking_recv().is_none());
    }
}
