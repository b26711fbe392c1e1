use super::buffer::EventCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast from the controller to whoever displays recording state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum RecorderEvent {
    StateChanged {
        is_recording: bool,
        started_at: Option<DateTime<Utc>>,
    },
    CountsChanged {
        network_count: usize,
        console_count: usize,
    },
    SaveCompleted {
        files: Vec<String>,
    },
    SaveFailed {
        message: String,
    },
}

impl RecorderEvent {
    pub fn counts(counts: EventCounts) -> Self {
        RecorderEvent::CountsChanged {
            network_count: counts.network_count,
            console_count: counts.console_count,
        }
    }

    /// Notification method name on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            RecorderEvent::StateChanged { .. } => "stateChanged",
            RecorderEvent::CountsChanged { .. } => "countsChanged",
            RecorderEvent::SaveCompleted { .. } => "saveCompleted",
            RecorderEvent::SaveFailed { .. } => "saveFailed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(usize),
    NoListener,
}

/// Fire-and-forget broadcast. Having nobody listening is a normal outcome.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<RecorderEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }

    pub fn notify(&self, event: RecorderEvent) -> Delivery {
        match self.tx.send(event) {
            Ok(receivers) => Delivery::Delivered(receivers),
            Err(_) => Delivery::NoListener,
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
