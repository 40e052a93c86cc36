//! Request lifecycle notifications.
//!
//! The router emits an [`Event`] on every stage transition via
//! [`EventBus::emit`]; anyone interested subscribes with
//! [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`], so a slow
//! or absent listener never blocks a request.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::request::BackendKind;
use crate::router::Stage;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A request moved to a new stage. `backend` is unknown until validated.
    StageChanged {
        request_id: Uuid,
        backend: Option<BackendKind>,
        stage: Stage,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of receivers that will see the event.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Future events only; nothing is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
