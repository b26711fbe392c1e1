//! Recording core: session state, buffering, tab tracking and export.
//!
//! Nothing in here talks to a browser directly. Hosts plug in through
//! [`ContextLifecycle`], [`ObservationSource`] and [`FileDelivery`].

pub mod buffer;
pub mod context;
pub mod controller;
pub mod events;
pub mod exporter;
pub mod notify;
pub mod settings;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BufferSnapshot, EventBuffer, EventCounts};
pub use context::{
    ContextId, ContextInfo, ContextLifecycle, ContextSignal, ContextSignalSink, ContextTracker,
    MonitoredContext, Subscription, is_eligible_url,
};
pub use controller::{
    RecorderHandle, RecorderParts, RecordingSession, RecordingStatus, SessionController,
    SessionPolicy, StartOutcome, StateSnapshot, StopOutcome, StopReason, spawn,
};
pub use events::{
    ConsoleArg, ConsoleEvent, ConsoleLevel, NetworkDetail, NetworkEvent, NetworkPhase,
    RecordedEvent, render_console_args,
};
pub use exporter::{DeliveredFile, DirectoryDelivery, ExportReport, Exporter, FileDelivery};
pub use notify::{Delivery, Notifier, RecorderEvent};
pub use settings::{FileSettingsStore, MemorySettingsStore, PersistedState, SettingsStore};
pub use source::{BatchingSink, EventSink, ObservationSource, SourceHandle, SourceKind};
