// src/engine/events.rs

use tokio::sync::broadcast;
use tracing::trace;

use crate::engine::step::EventSet;
use crate::engine::PipelineEvent;

/// Broadcasts coalesced [`PipelineEvent`]s to any number of subscribers.
///
/// Subscribers receive events on their own tasks, never on the caller that
/// caused the change. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish each event in `events` once.
    pub fn publish(&self, events: EventSet) {
        for event in events.events() {
            trace!(?event, "publishing pipeline event");
            // Err only means nobody is listening right now.
            let _ = self.sender.send(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}
