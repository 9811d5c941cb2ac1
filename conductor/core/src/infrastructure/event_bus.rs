// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Goal Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Escalations, terminal goal outcomes, and blocked policy calls surface
// here for the product API, notification delivery, and observers.
//
// In-memory only: events are lost on restart. The durable record of a goal
// run is the delegation trace store, not this bus.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::GoalEvent;

/// Event bus for publishing and subscribing to goal events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GoalEvent>>,
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

    /// Publish a goal event to all subscribers
    pub fn publish(&self, event: GoalEvent) {
        debug!("Publishing event: {:?}", event);

        // send() returns the number of receivers that received the message
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all goal events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for goal events
pub struct EventReceiver {
    receiver: broadcast::Receiver<GoalEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<GoalEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<GoalEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => EventBusError::Lagged(n),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus closed")]
    Closed,

    #[error("no event available")]
    Empty,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::goal::GoalId;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(GoalEvent::GoalCompleted {
            goal_id: GoalId::new(),
            iterations: 3,
            at: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, GoalEvent::GoalCompleted { iterations: 3, .. }));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::with_default_capacity();

        bus.publish(GoalEvent::GoalBlocked {
            goal_id: GoalId::new(),
            reason: "missing access".to_string(),
            at: chrono::Utc::now(),
        });

        assert_eq!(bus.subscriber_count(), 0);
    }
}
