// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Controller Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// The CLI and integration tests observe reconciliation progress through it.
//
// In-memory only (events lost on restart)

use crate::domain::events::{TemplateEvent, VersionEvent};
use crate::domain::meta::ObjectKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    Version(VersionEvent),
    Template(TemplateEvent),
}

impl ControllerEvent {
    /// Key of the object the event is about
    pub fn object(&self) -> &ObjectKey {
        match self {
            Self::Version(e) => e.version(),
            Self::Template(e) => e.template(),
        }
    }
}

/// Event bus for publishing and subscribing to controller events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ControllerEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_version_event(&self, event: VersionEvent) {
        self.publish(ControllerEvent::Version(event));
    }

    pub fn publish_template_event(&self, event: TemplateEvent) {
        self.publish(ControllerEvent::Template(event));
    }

    fn publish(&self, event: ControllerEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all controller events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all controller events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ControllerEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<ControllerEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ControllerEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_version_event(VersionEvent::VersionAssigned {
            version: ObjectKey::new("default", "v1"),
            template: ObjectKey::new("default", "llama"),
            number: 1,
            assigned_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            ControllerEvent::Version(VersionEvent::VersionAssigned { number, .. }) => {
                assert_eq!(number, 1)
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[test]
    fn test_event_object_key() {
        let version = ControllerEvent::Version(VersionEvent::VersionLinked {
            version: ObjectKey::new("default", "v1"),
            template: ObjectKey::new("default", "llama"),
            linked_at: Utc::now(),
        });
        assert_eq!(version.object(), &ObjectKey::new("default", "v1"));

        let template = ControllerEvent::Template(TemplateEvent::LatestVersionSynced {
            template: ObjectKey::new("default", "llama"),
            latest_version: 2,
            synced_at: Utc::now(),
        });
        assert_eq!(template.object(), &ObjectKey::new("default", "llama"));
    }

    #[test]
    fn test_try_recv_empty() {
        let event_bus = EventBus::default();
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_event_json_carries_type_tag() {
        let event = ControllerEvent::Template(TemplateEvent::LedgerEntryRemoved {
            template: ObjectKey::new("default", "llama"),
            removed_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "template");
        assert_eq!(json["LedgerEntryRemoved"]["template"]["name"], "llama");

        let decoded: ControllerEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(
            decoded,
            ControllerEvent::Template(TemplateEvent::LedgerEntryRemoved { .. })
        ));
    }
}
