//! Publish-subscribe bus for orchestration events
//!
//! Components publish typed events; subscribers hold an explicit
//! [`Subscription`] handle and detach by dropping it or calling
//! [`Subscription::unsubscribe`].

use crate::alerting::Alert;
use crate::collector::{AggregatedMetricEvent, MetricEvent};
use crate::health::GlobalHealth;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events published by the orchestration layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Initialized,
    HealthCheck(GlobalHealth),
    Alert(Alert),
    AlertResolved(Alert),
    Metric(MetricEvent),
    AggregatedMetric(AggregatedMetricEvent),
    ConfigurationReloaded,
    Shutdown,
}

impl OrchestrationEvent {
    /// Event name as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::HealthCheck(_) => "health_check",
            Self::Alert(_) => "alert",
            Self::AlertResolved(_) => "alert_resolved",
            Self::Metric(_) => "metric",
            Self::AggregatedMetric(_) => "aggregated_metric",
            Self::ConfigurationReloaded => "configuration_reloaded",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Broadcast bus shared by all components
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    ///
    /// Returns the number of subscribers that received it. Publishing with
    /// no subscribers is not an error.
    pub fn publish(&self, event: OrchestrationEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "Event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle for one subscriber
pub struct Subscription {
    receiver: broadcast::Receiver<OrchestrationEvent>,
}

impl Subscription {
    /// Wait for the next event
    ///
    /// Returns `None` once the bus is gone. A subscriber that falls behind
    /// skips the events it missed and keeps receiving.
    pub async fn recv(&mut self) -> Option<OrchestrationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, skipping missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<OrchestrationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, skipping missed events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Detach from the bus
    pub fn unsubscribe(self) {}
}
