//! Internal event bus (component I).
//!
//! spec.md §5 calls for "an explicit Event Bus for low-frequency status
//! changes" as the replacement for the source's callback-heavy event
//! subscriptions (§9 redesign flag). High-frequency resource data still goes
//! through the pull-based Snapshot API (§4.7); this bus only ever carries
//! connection-state transitions, discovery/schema warnings and storage
//! warnings — things the UI wants to know about but that arrive rarely
//! enough that polling them would be wasteful.
//!
//! Built on `tokio::sync::broadcast`: multiple subscribers, each seeing
//! every event published after they subscribed. A slow or absent subscriber
//! never blocks a publisher — `broadcast` drops the oldest buffered events
//! for a lagging receiver rather than stalling the sender, which matches
//! "the Engine does not fail as a whole because one cluster is unhealthy"
//! (§7): a UI that isn't currently polling status must never back-pressure
//! the engine.

use tokio::sync::broadcast;

/// Severity for bus events that don't otherwise carry structured state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A status notification: "the thing named `component` reports `message` at
/// `severity`". Used for discovery/schema/favorites warnings (§4.3, §4.4,
/// §4.8) that don't need a bespoke event variant.
#[derive(Clone, Debug)]
pub struct StatusEvent {
    pub severity: Severity,
    pub component: &'static str,
    pub message: String,
}

impl StatusEvent {
    pub fn warning(component: &'static str, message: impl Into<String>) -> Self {
        StatusEvent {
            severity: Severity::Warning,
            component,
            message: message.into(),
        }
    }

    pub fn error(component: &'static str, message: impl Into<String>) -> Self {
        StatusEvent {
            severity: Severity::Error,
            component,
            message: message.into(),
        }
    }
}

/// A generic one-to-many notification channel. `EngineEvent` is the
/// concrete payload `kubeview-engine` publishes (connection state, GVK
/// discovery warnings, watch-worker health, favorites I/O errors); this
/// type stays generic so `kubeview-transport` can run its own bus of
/// connection-only events without a dependency cycle back into the engine.
#[derive(Clone)]
pub struct EventBus<E: Clone + Send + 'static> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Subscribe to future events. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. A return value of
    /// `Ok(0)` (no receivers) is not an error: the UI may not be listening.
    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        EventBus::new(256)
    }
}

/// Placeholder alias kept at crate root for crates that only need "some
/// event bus of status notifications" without defining their own payload.
pub type EngineEvent = StatusEvent;
