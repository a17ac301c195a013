use crate::detection::Algorithm;
use crate::error::{EventBusError, FailureKind};
use crate::monitor::ConnectionState;
use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the pillocam client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PillocamEvent {
    /// The camera session moved to a new state
    SessionStateChanged {
        state: SessionState,
        timestamp: SystemTime,
    },
    /// The set of available capture devices changed
    DeviceListChanged {
        device_count: usize,
        timestamp: SystemTime,
    },
    /// The analysis service returned a result for a submitted frame
    DetectionCompleted { count: u64, timestamp: SystemTime },
    /// A detection submission failed
    DetectionFailed {
        kind: FailureKind,
        message: String,
        timestamp: SystemTime,
    },
    /// Heartbeat outcome changed the connection state
    ConnectionChanged {
        state: ConnectionState,
        timestamp: SystemTime,
    },
    /// The analysis algorithm in use changed
    AlgorithmChanged { algorithm: Algorithm },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl PillocamEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            PillocamEvent::SessionStateChanged { timestamp, .. } => *timestamp,
            PillocamEvent::DeviceListChanged { timestamp, .. } => *timestamp,
            PillocamEvent::DetectionCompleted { timestamp, .. } => *timestamp,
            PillocamEvent::DetectionFailed { timestamp, .. } => *timestamp,
            PillocamEvent::ConnectionChanged { timestamp, .. } => *timestamp,
            PillocamEvent::AlgorithmChanged { .. } => SystemTime::now(),
            PillocamEvent::SystemError { .. } => SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PillocamEvent::SessionStateChanged { state, .. } => {
                format!("Camera session {}", state.label())
            }
            PillocamEvent::DeviceListChanged { device_count, .. } => {
                format!("{} camera(s) available", device_count)
            }
            PillocamEvent::DetectionCompleted { count, .. } => {
                format!("Detection completed: {} object(s)", count)
            }
            PillocamEvent::DetectionFailed { kind, message, .. } => {
                format!("Detection failed ({}): {}", kind, message)
            }
            PillocamEvent::ConnectionChanged { state, .. } => {
                format!("Analysis service {}", state)
            }
            PillocamEvent::AlgorithmChanged { algorithm } => {
                format!("Algorithm changed to {}", algorithm)
            }
            PillocamEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PillocamEvent::SessionStateChanged { .. } => "session_state_changed",
            PillocamEvent::DeviceListChanged { .. } => "device_list_changed",
            PillocamEvent::DetectionCompleted { .. } => "detection_completed",
            PillocamEvent::DetectionFailed { .. } => "detection_failed",
            PillocamEvent::ConnectionChanged { .. } => "connection_changed",
            PillocamEvent::AlgorithmChanged { .. } => "algorithm_changed",
            PillocamEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<PillocamEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PillocamEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers.
    ///
    /// Fails only when nobody is subscribed; callers usually ignore that.
    pub fn publish(&self, event: PillocamEvent) -> Result<usize, EventBusError> {
        match &event {
            PillocamEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            PillocamEvent::DetectionFailed { kind, message, .. } => {
                warn!("Detection failed ({}): {}", kind, message);
            }
            PillocamEvent::ConnectionChanged { state, .. } => match state {
                ConnectionState::Error => warn!("Analysis service unreachable"),
                _ => info!("Analysis service {}", state),
            },
            PillocamEvent::AlgorithmChanged { algorithm } => {
                info!("Algorithm changed to {}", algorithm);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &PillocamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PillocamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PillocamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event.
    ///
    /// Lagging skips the dropped events and keeps going.
    pub async fn recv(&mut self) -> Result<PillocamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_functionality() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        let event = PillocamEvent::DetectionCompleted {
            count: 3,
            timestamp: SystemTime::now(),
        };

        let subscriber_count = bus.publish(event.clone()).unwrap();
        assert_eq!(subscriber_count, 1);

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();

        match received {
            PillocamEvent::DetectionCompleted { count, .. } => assert_eq!(count, 3),
            other => panic!("Unexpected event type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let bus = EventBus::new(4);
        let result = bus.publish(PillocamEvent::AlgorithmChanged {
            algorithm: Algorithm::Threshold,
        });
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(PillocamEvent::DeviceListChanged {
            device_count: 2,
            timestamp: SystemTime::now(),
        })
        .unwrap();

        assert_eq!(first.recv().await.unwrap().event_type(), "device_list_changed");
        assert_eq!(second.recv().await.unwrap().event_type(), "device_list_changed");
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["connection_changed"]),
            "connection-only",
        );

        bus.publish(PillocamEvent::DetectionCompleted {
            count: 1,
            timestamp: SystemTime::now(),
        })
        .unwrap();
        bus.publish(PillocamEvent::ConnectionChanged {
            state: ConnectionState::Connected,
            timestamp: SystemTime::now(),
        })
        .unwrap();

        let event = receiver.recv().await.unwrap();
        assert!(matches!(
            event,
            PillocamEvent::ConnectionChanged {
                state: ConnectionState::Connected,
                ..
            }
        ));
        assert!(timeout(Duration::from_millis(50), receiver.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_filtered_receiver_survives_lag() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe_filtered(EventFilter::All, "lagging");

        for count in 0..5 {
            bus.publish(PillocamEvent::DetectionCompleted {
                count,
                timestamp: SystemTime::now(),
            })
            .unwrap();
        }

        match receiver.recv().await.unwrap() {
            PillocamEvent::DetectionCompleted { count, .. } => assert_eq!(count, 3),
            other => panic!("Unexpected event type: {:?}", other),
        }
        drop(bus);
        assert!(receiver.recv().await.is_ok());
        assert!(matches!(
            receiver.recv().await,
            Err(EventBusError::ChannelClosed)
        ));
    }

    #[test]
    fn test_event_filters() {
        let error = PillocamEvent::SystemError {
            component: "remote".to_string(),
            error: "boom".to_string(),
        };
        let failed = PillocamEvent::DetectionFailed {
            kind: FailureKind::NetworkError,
            message: "timeout".to_string(),
            timestamp: SystemTime::now(),
        };

        assert!(EventFilter::All.matches(&error));
        let detection = EventFilter::EventTypes(vec!["detection_failed"]);
        assert!(detection.matches(&failed));
        assert!(!detection.matches(&error));
    }

    #[test]
    fn test_event_descriptions() {
        let event = PillocamEvent::SessionStateChanged {
            state: SessionState::Ready,
            timestamp: SystemTime::now(),
        };
        assert_eq!(event.description(), "Camera session ready");

        let event = PillocamEvent::AlgorithmChanged {
            algorithm: Algorithm::ObjectDetection,
        };
        assert_eq!(event.description(), "Algorithm changed to algorithm3");
    }
}
