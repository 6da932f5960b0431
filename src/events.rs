//! In-process notifications about gateway lifecycle changes.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc;

use crate::endpoint::EndpointId;

/// Notification emitted by the gateway core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GatewayEvent {
    /// Endpoint got an active publisher.
    EndpointActive(EndpointId),

    /// Endpoint's session was torn down.
    EndpointInactive(EndpointId),

    /// Connection to the media backend was lost.
    BackendDisconnected,

    /// Connection to the media backend was re-established.
    BackendReconnected,
}

/// Fan-out bus for [`GatewayEvent`]s.
///
/// Subscribers which dropped their receiving side are forgotten on the next
/// [`Events::publish`] call.
#[derive(Clone, Debug, Default)]
pub struct Events {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Events {
    /// Creates a new bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Delivers the provided event to every live subscriber.
    pub fn publish(&self, event: &GatewayEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
