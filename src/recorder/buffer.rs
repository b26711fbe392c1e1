use super::events::{ConsoleEvent, NetworkEvent, RecordedEvent};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub network_count: usize,
    pub console_count: usize,
}

/// Captured events of the current session, in arrival order.
///
/// Each category holds at most `max_per_kind` events; anything beyond that is
/// dropped and counted.
#[derive(Debug)]
pub struct EventBuffer {
    network: Vec<NetworkEvent>,
    console: Vec<ConsoleEvent>,
    max_per_kind: usize,
    dropped: usize,
}

/// Contents taken out of (or copied from) an [`EventBuffer`].
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub network: Vec<NetworkEvent>,
    pub console: Vec<ConsoleEvent>,
}

impl BufferSnapshot {
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.console.is_empty()
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            network_count: self.network.len(),
            console_count: self.console.len(),
        }
    }
}

impl EventBuffer {
    pub fn new(max_per_kind: usize) -> Self {
        Self {
            network: Vec::new(),
            console: Vec::new(),
            max_per_kind,
            dropped: 0,
        }
    }

    /// Appends one event. Returns `false` when the category is full.
    pub fn push(&mut self, event: RecordedEvent) -> bool {
        match event {
            RecordedEvent::Network(e) if self.network.len() < self.max_per_kind => {
                self.network.push(e);
                true
            }
            RecordedEvent::Console(e) if self.console.len() < self.max_per_kind => {
                self.console.push(e);
                true
            }
            _ => {
                self.dropped += 1;
                false
            }
        }
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = RecordedEvent>) -> usize {
        let mut accepted = 0;
        for event in events {
            if self.push(event) {
                accepted += 1;
            }
        }
        accepted
    }

    pub fn counts(&self) -> EventCounts {
        EventCounts {
            network_count: self.network.len(),
            console_count: self.console.len(),
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.console.is_empty()
    }

    pub fn network(&self) -> &[NetworkEvent] {
        &self.network
    }

    pub fn console(&self) -> &[ConsoleEvent] {
        &self.console
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            network: self.network.clone(),
            console: self.console.clone(),
        }
    }

    /// Moves all events out and leaves the buffer empty.
    pub fn take(&mut self) -> BufferSnapshot {
        self.dropped = 0;
        BufferSnapshot {
            network: std::mem::take(&mut self.network),
            console: std::mem::take(&mut self.console),
        }
    }

    pub fn clear(&mut self) {
        self.network.clear();
        self.console.clear();
        self.dropped = 0;
    }
}
