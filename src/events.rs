//! Progress events
//!
//! Navigators publish what happened on a page to an event bus so that UI
//! layers and audit logging can react without being called directly.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Events emitted by course navigators
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PageReady {
        unit_key: String,
        completed: bool,
    },
    QuizSubmitted {
        unit_key: String,
        score: u32,
        passed: bool,
    },
    CompletionRecorded {
        learner_id: String,
        unit_key: String,
    },
    CompletionRefused {
        unit_key: String,
        reason: String,
    },
    CompletionFailed {
        unit_key: String,
        error: String,
    },
    Advanced {
        from: String,
        to: Option<String>,
    },
    DraftSaved {
        unit_key: String,
        field_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Event bus for broadcasting progress events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::CompletionRecorded { learner_id, unit_key } => {
                info!(learner_id = %learner_id, unit_key = %unit_key, "Unit completed");
            }
            ProgressEvent::CompletionFailed { unit_key, error } => {
                warn!(unit_key = %unit_key, error = %error, "Completion not saved");
            }
            ProgressEvent::CompletionRefused { unit_key, reason } => {
                debug!(unit_key = %unit_key, reason = %reason, "Completion refused");
            }
            ProgressEvent::Advanced { from, to } => {
                debug!(from = %from, to = ?to, "Advanced");
            }
            _ => {
                trace!(event = ?event, "Progress event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
