//! The `Subject` collaborator: fans typed events out to observers.
//!
//! Emission is best-effort. A missing or lagging observer must never alter
//! request handling, so every `notify` call swallows its own failures.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::model::event::GatewayEvent;

pub trait Subject: Send + Sync {
    fn notify(&self, event: GatewayEvent);
}

/// Always-on fallback: every event is logged regardless of whether a
/// downstream observer is registered, so turning off the broadcast
/// channel never blinds operators.
pub struct LoggingSubject;

impl Subject for LoggingSubject {
    fn notify(&self, event: GatewayEvent) {
        match event.event_type {
            crate::model::event::EventType::CircuitBreakerOpen
            | crate::model::event::EventType::BackendUnhealthy
            | crate::model::event::EventType::RequestFailed
            | crate::model::event::EventType::Error => {
                warn!("{} source={} data={}", event.event_type.as_str(), event.source, event.data);
            }
            _ => {
                debug!("{} source={} data={}", event.event_type.as_str(), event.source, event.data);
            }
        }
    }
}

/// Broadcasts events on a bounded channel so the debug/introspection
/// layer (or any other in-process observer) can subscribe without
/// coupling to the dispatcher.
pub struct BroadcastSubject {
    sender: broadcast::Sender<GatewayEvent>,
    fallback: LoggingSubject,
}

impl BroadcastSubject {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            fallback: LoggingSubject,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl Subject for BroadcastSubject {
    fn notify(&self, event: GatewayEvent) {
        self.fallback.notify(event.clone_lossy());
        // A send error just means nobody is subscribed; that is not a failure.
        let _ = self.sender.send(event);
    }
}

impl GatewayEvent {
    /// Clone cheaply for the dual-dispatch to the logging fallback and the
    /// broadcast channel; avoids requiring `Clone` bounds everywhere events
    /// are constructed.
    fn clone_lossy(&self) -> GatewayEvent {
        self.clone()
    }
}

/// A no-op subject for contexts (unit tests, dry construction) that don't
/// care about observability.
pub struct NullSubject;

impl Subject for NullSubject {
    fn notify(&self, _event: GatewayEvent) {}
}

pub fn default_subject() -> Arc<dyn Subject> {
    Arc::new(LoggingSubject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventType;
    use serde_json::json;

    #[test]
    fn logging_subject_does_not_panic_on_any_event_type() {
        let subject = LoggingSubject;
        subject.notify(GatewayEvent::new(EventType::RequestReceived, "test", json!({})));
        subject.notify(GatewayEvent::new(EventType::CircuitBreakerOpen, "test", json!({})));
    }

    #[test]
    fn broadcast_subject_delivers_to_subscriber() {
        let subject = BroadcastSubject::new(8);
        let mut receiver = subject.subscribe();
        subject.notify(GatewayEvent::new(EventType::ModuleStarted, "test", json!({})));
        let received = receiver.try_recv().expect("event delivered");
        assert_eq!(received.event_type.as_str(), "module.started");
    }

    #[test]
    fn notify_without_subscribers_does_not_error() {
        let subject = BroadcastSubject::new(8);
        subject.notify(GatewayEvent::new(EventType::ModuleStarted, "test", json!({})));
    }
}
