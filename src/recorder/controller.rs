use super::buffer::{BufferSnapshot, EventBuffer, EventCounts};
use super::context::{ContextId, ContextLifecycle, ContextSignal, ContextTracker, Enumeration};
use super::events::RecordedEvent;
use super::exporter::{ExportReport, Exporter};
use super::notify::{Notifier, RecorderEvent};
use super::settings::{PersistedState, SettingsStore};
use super::source::{EventSink, ObservationSource, SourceHandle, SourceKind};
use crate::config::RecorderConfig;
use crate::timeouts::ms;
use crate::{RecorderError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Idle,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    pub status: RecordingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub auto_restart_enabled: bool,
}

impl RecordingSession {
    pub fn is_recording(&self) -> bool {
        self.status == RecordingStatus::Recording
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Requested by the user or by the recording time limit; exports the buffer.
    Explicit,
    /// Periodic segment rotation; the buffer is kept.
    AutoRestart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { eligible_contexts: usize },
    AlreadyRecording,
}

#[derive(Debug, Clone)]
pub enum StopOutcome {
    Stopped { export: Option<ExportReport> },
    AlreadyIdle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub is_recording: bool,
    pub recording_start_time: Option<DateTime<Utc>>,
    pub network_count: usize,
    pub console_count: usize,
    pub auto_restart_enabled: bool,
    #[serde(default)]
    pub dropped_count: usize,
    #[serde(default)]
    pub tracked_contexts: usize,
}

/// Timing and capacity rules applied by the controller.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub auto_restart_enabled: bool,
    pub auto_restart_interval: Duration,
    pub check_interval: Duration,
    pub max_recording: Option<Duration>,
    pub max_buffered_events: usize,
    /// Cap on console messages submitted through [`RecorderHandle::ingest`].
    pub max_message_length: usize,
    pub resume_on_startup: bool,
}

impl From<&RecorderConfig> for SessionPolicy {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            auto_restart_enabled: config.auto_restart_enabled,
            auto_restart_interval: config.auto_restart_interval(),
            check_interval: config.check_interval(),
            max_recording: config.max_recording(),
            max_buffered_events: config.max_buffered_events,
            max_message_length: config.max_arg_length,
            resume_on_startup: config.resume_on_startup,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&RecorderConfig::default())
    }
}

/// Everything a controller needs from the outside world.
pub struct RecorderParts {
    pub lifecycle: Arc<dyn ContextLifecycle>,
    pub sources: Vec<Arc<dyn ObservationSource>>,
    pub allowed_schemes: Vec<String>,
    pub exporter: Exporter,
    pub settings: Arc<dyn SettingsStore>,
    pub notifier: Notifier,
    pub policy: SessionPolicy,
}

#[derive(Debug)]
pub(crate) struct AttachOutcome {
    pub(crate) generation: u64,
    pub(crate) context_id: ContextId,
    pub(crate) kind: SourceKind,
    pub(crate) result: Result<SourceHandle>,
}

#[derive(Debug)]
pub(crate) enum Command {
    Start(oneshot::Sender<StartOutcome>),
    Stop(oneshot::Sender<StopOutcome>),
    GetState(oneshot::Sender<StateSnapshot>),
    ClearLogs(oneshot::Sender<()>),
    SetAutoRestart(bool, oneshot::Sender<()>),
    RequestSave(oneshot::Sender<Option<ExportReport>>),
    Ingest(Vec<RecordedEvent>, oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Everything the controller reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum Message {
    Command(Command),
    Ingest(Vec<RecordedEvent>),
    Attached(AttachOutcome),
    Enumerated(Enumeration),
    Context(ContextSignal),
}

/// Owns the recording session, the event buffer and the tracked tabs.
///
/// All mutation happens on the controller's own task, so commands, ingested
/// events, lifecycle signals and attach results are applied one at a time in
/// the order they were queued. Nothing that talks to the host is awaited on
/// that task except file delivery and the bounded drain of a stopping
/// recording.
pub struct SessionController {
    rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::UnboundedSender<Message>,
    deferred: VecDeque<Message>,
    pending_starts: Vec<oneshot::Sender<StartOutcome>>,
    session: RecordingSession,
    buffer: EventBuffer,
    tracker: ContextTracker,
    exporter: Exporter,
    settings: Arc<dyn SettingsStore>,
    notifier: Notifier,
    policy: SessionPolicy,
    session_started: Option<Instant>,
    session_started_at: Option<DateTime<Utc>>,
    restart_armed_at: Option<Instant>,
}

impl SessionController {
    pub(crate) fn new(parts: RecorderParts) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let RecorderParts {
            lifecycle,
            sources,
            allowed_schemes,
            exporter,
            settings,
            notifier,
            policy,
        } = parts;

        Self {
            rx,
            tx: tx.clone(),
            deferred: VecDeque::new(),
            pending_starts: Vec::new(),
            session: RecordingSession {
                status: RecordingStatus::Idle,
                started_at: None,
                auto_restart_enabled: policy.auto_restart_enabled,
            },
            buffer: EventBuffer::new(policy.max_buffered_events),
            tracker: ContextTracker::new(lifecycle, sources, allowed_schemes, tx),
            exporter,
            settings,
            notifier,
            policy,
            session_started: None,
            session_started_at: None,
            restart_armed_at: None,
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.tx.clone()
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn counts(&self) -> EventCounts {
        self.buffer.counts()
    }

    pub fn is_restart_armed(&self) -> bool {
        self.restart_armed_at.is_some()
    }

    pub(crate) async fn run(mut self) {
        self.restore();

        let mut ticker = tokio::time::interval(self.policy.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let message = match self.deferred.pop_front() {
                Some(message) => message,
                None => {
                    let received = tokio::select! {
                        received = self.rx.recv() => Some(received),
                        _ = ticker.tick() => None,
                    };
                    let Some(received) = received else {
                        self.on_tick(Instant::now()).await;
                        continue;
                    };
                    let Some(message) = received else {
                        break;
                    };
                    message
                }
            };

            if let Message::Command(Command::Shutdown(reply)) = message {
                self.shutdown().await;
                reply.send(()).ok();
                break;
            }
            self.handle(message).await;
        }
        tracing::debug!("Recording controller stopped");
    }

    /// Next message already waiting, if any, without blocking.
    pub(crate) fn next_queued(&mut self) -> Option<Message> {
        self.deferred
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.handle_command(command).await,
            Message::Ingest(events) => {
                self.ingest(events);
            }
            Message::Attached(outcome) => self.tracker.on_attach_result(outcome),
            Message::Enumerated(enumeration) => self.on_enumerated(enumeration),
            Message::Context(signal) => self.tracker.on_signal(signal),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                if self.start() {
                    self.pending_starts.push(reply);
                } else {
                    reply.send(StartOutcome::AlreadyRecording).ok();
                }
            }
            Command::Stop(reply) => {
                reply.send(self.stop(StopReason::Explicit).await).ok();
            }
            Command::GetState(reply) => {
                reply.send(self.state()).ok();
            }
            Command::ClearLogs(reply) => {
                self.clear_logs();
                reply.send(()).ok();
            }
            Command::SetAutoRestart(enabled, reply) => {
                self.set_auto_restart(enabled);
                reply.send(()).ok();
            }
            Command::RequestSave(reply) => {
                reply.send(self.request_save().await).ok();
            }
            Command::Ingest(events, reply) => {
                let limit = self.policy.max_message_length;
                let events = events
                    .into_iter()
                    .map(|event| match event {
                        RecordedEvent::Console(console) => console.truncated(limit).into(),
                        other => other,
                    })
                    .collect();
                reply.send(self.ingest(events)).ok();
            }
            Command::Shutdown(reply) => {
                self.shutdown().await;
                reply.send(()).ok();
            }
        }
    }

    /// Begins a new session with an empty buffer. Returns `false` without
    /// doing anything while already recording.
    ///
    /// Tabs are attached once their enumeration arrives; callers waiting for
    /// the eligible tab count are answered once that enumeration is applied.
    pub fn start(&mut self) -> bool {
        if self.session.is_recording() {
            tracing::debug!("Start requested while already recording");
            return false;
        }

        self.buffer.clear();
        self.session_started = Some(Instant::now());
        self.session_started_at = Some(Utc::now());
        self.notify_counts();

        self.begin_segment();
        true
    }

    fn begin_segment(&mut self) {
        self.session.status = RecordingStatus::Recording;
        self.session.started_at = Some(Utc::now());
        self.persist();

        self.tracker.attach_all();
        if self.session.auto_restart_enabled {
            self.restart_armed_at = Some(Instant::now());
        }
        self.notify_state();
    }

    fn on_enumerated(&mut self, enumeration: Enumeration) {
        let Some(eligible) = self.tracker.on_enumerated(enumeration) else {
            return;
        };
        if eligible == 0 {
            tracing::warn!("{}", RecorderError::NoEligibleContext);
        }
        tracing::info!("Recording started on {} tab(s)", eligible);
        self.answer_pending_starts(eligible);
    }

    fn answer_pending_starts(&mut self, eligible_contexts: usize) {
        for reply in self.pending_starts.drain(..) {
            reply
                .send(StartOutcome::Started { eligible_contexts })
                .ok();
        }
    }

    /// Ends the current segment. An explicit stop also exports and empties
    /// the buffer; an auto-restart stop keeps it.
    pub async fn stop(&mut self, reason: StopReason) -> StopOutcome {
        if !self.session.is_recording() {
            tracing::debug!("Stop requested while idle");
            return StopOutcome::AlreadyIdle;
        }

        self.restart_armed_at = None;
        let tracked = self.tracker.len();
        self.answer_pending_starts(tracked);
        let flushes = self.tracker.detach_all();

        // After a rotation the old flushes keep feeding the new segment.
        if reason == StopReason::Explicit {
            self.drain_sources(flushes).await;
        }

        self.session.status = RecordingStatus::Idle;
        self.session.started_at = None;
        self.persist();
        self.notify_state();

        if reason == StopReason::AutoRestart {
            return StopOutcome::Stopped { export: None };
        }

        self.session_started = None;
        let started_at = self.session_started_at.take();
        let snapshot = self.buffer.take();
        self.notify_counts();
        tracing::info!(
            "Recording stopped with {} network and {} console events",
            snapshot.network.len(),
            snapshot.console.len()
        );

        if snapshot.is_empty() {
            return StopOutcome::Stopped { export: None };
        }
        let report = self.export(&snapshot, started_at).await;
        StopOutcome::Stopped {
            export: Some(report),
        }
    }

    /// Waits for closed sources to hand over their queued events, then
    /// applies every event already waiting in the queue. Other messages are
    /// kept for after the stop.
    async fn drain_sources(&mut self, flushes: Vec<JoinHandle<()>>) {
        if !flushes.is_empty() {
            let limit = Duration::from_millis(ms::SOURCE_DRAIN);
            if tokio::time::timeout(limit, futures::future::join_all(flushes))
                .await
                .is_err()
            {
                tracing::warn!("Some observers did not flush within {:?}", limit);
            }
        }

        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Ingest(events) => {
                    self.ingest(events);
                }
                other => self.deferred.push_back(other),
            }
        }
    }

    async fn auto_restart(&mut self) {
        tracing::info!(
            "Auto-restarting recording after {:?}",
            self.policy.auto_restart_interval
        );
        self.stop(StopReason::AutoRestart).await;
        self.begin_segment();
    }

    /// Periodic check for segment rotation and the session time limit.
    pub async fn on_tick(&mut self, now: Instant) {
        if !self.session.is_recording() {
            return;
        }

        if let (Some(limit), Some(started)) = (self.policy.max_recording, self.session_started)
            && now.saturating_duration_since(started) >= limit
        {
            tracing::info!("Recording time limit of {:?} reached", limit);
            self.stop(StopReason::Explicit).await;
            return;
        }

        if let Some(armed_at) = self.restart_armed_at
            && now.saturating_duration_since(armed_at) >= self.policy.auto_restart_interval
        {
            self.auto_restart().await;
        }
    }

    /// Appends events while recording; drops them silently otherwise.
    pub fn ingest(&mut self, events: Vec<RecordedEvent>) -> usize {
        if !self.session.is_recording() {
            tracing::trace!("Dropping {} event(s) received while idle", events.len());
            return 0;
        }

        let offered = events.len();
        let accepted = self.buffer.extend(events);
        if accepted < offered {
            tracing::debug!(
                "Buffer full, dropped {} event(s)",
                offered - accepted
            );
        }
        if accepted > 0 {
            self.notify_counts();
        }
        accepted
    }

    pub fn state(&self) -> StateSnapshot {
        let counts = self.buffer.counts();
        StateSnapshot {
            is_recording: self.session.is_recording(),
            recording_start_time: self.session.started_at,
            network_count: counts.network_count,
            console_count: counts.console_count,
            auto_restart_enabled: self.session.auto_restart_enabled,
            dropped_count: self.buffer.dropped(),
            tracked_contexts: self.tracker.len(),
        }
    }

    pub fn clear_logs(&mut self) {
        self.buffer.clear();
        self.notify_counts();
    }

    /// Takes effect immediately when recording; arming restarts the interval.
    pub fn set_auto_restart(&mut self, enabled: bool) {
        self.session.auto_restart_enabled = enabled;
        if self.session.is_recording() {
            match (enabled, self.restart_armed_at) {
                (true, None) => self.restart_armed_at = Some(Instant::now()),
                (false, Some(_)) => self.restart_armed_at = None,
                _ => {}
            }
        }
        self.persist();
        tracing::info!("Auto-restart {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Exports what has been captured so far without clearing it.
    pub async fn request_save(&mut self) -> Option<ExportReport> {
        let snapshot = self.buffer.snapshot();
        if snapshot.is_empty() {
            tracing::info!("Nothing captured yet, skipping save");
            return None;
        }
        let started_at = self.session_started_at;
        Some(self.export(&snapshot, started_at).await)
    }

    /// Applies persisted state. An interrupted recording is resumed only when
    /// the policy allows it; otherwise the persisted state is reset to idle.
    pub fn restore(&mut self) {
        let persisted = match self.settings.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!("Failed to load persisted state: {}", e);
                None
            }
        };

        let Some(state) = persisted else {
            return;
        };
        self.session.auto_restart_enabled = state.auto_restart_enabled;

        if state.is_recording && self.policy.resume_on_startup {
            tracing::info!("Resuming interrupted recording");
            self.start();
            return;
        }
        if state.is_recording {
            tracing::info!("Previous recording was interrupted, starting idle");
        }
        self.persist();
    }

    async fn shutdown(&mut self) {
        if self.session.is_recording() {
            tracing::info!("Stopping recording before shutdown");
            self.stop(StopReason::Explicit).await;
        }
    }

    async fn export(
        &self,
        snapshot: &BufferSnapshot,
        started_at: Option<DateTime<Utc>>,
    ) -> ExportReport {
        let report = self.exporter.export(snapshot, started_at).await;
        let event = if report.is_success() {
            RecorderEvent::SaveCompleted {
                files: report.filenames(),
            }
        } else {
            RecorderEvent::SaveFailed {
                message: report.failures.join("; "),
            }
        };
        self.notifier.notify(event);
        report
    }

    fn persist(&self) {
        let state = PersistedState {
            is_recording: self.session.is_recording(),
            recording_start_time: self.session.started_at,
            auto_restart_enabled: self.session.auto_restart_enabled,
        };
        if let Err(e) = self.settings.save(&state) {
            tracing::warn!("Failed to persist recording state: {}", e);
        }
    }

    fn notify_state(&self) {
        self.notifier.notify(RecorderEvent::StateChanged {
            is_recording: self.session.is_recording(),
            started_at: self.session.started_at,
        });
    }

    fn notify_counts(&self) {
        self.notifier
            .notify(RecorderEvent::counts(self.buffer.counts()));
    }
}

/// Cheap, cloneable front door to a running controller.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<Message>,
    notifier: Notifier,
}

/// Starts a controller on its own task.
pub fn spawn(parts: RecorderParts) -> (RecorderHandle, JoinHandle<()>) {
    let notifier = parts.notifier.clone();
    let controller = SessionController::new(parts);
    let handle = RecorderHandle {
        tx: controller.sender(),
        notifier,
    };
    let task = tokio::spawn(controller.run());
    (handle, task)
}

impl RecorderHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Command(make(reply)))
            .map_err(|_| RecorderError::ControllerGone)?;
        response.await.map_err(|_| RecorderError::ControllerGone)
    }

    pub async fn start_recording(&self) -> Result<StartOutcome> {
        self.call(Command::Start).await
    }

    pub async fn stop_recording(&self) -> Result<StopOutcome> {
        self.call(Command::Stop).await
    }

    pub async fn state(&self) -> Result<StateSnapshot> {
        self.call(Command::GetState).await
    }

    pub async fn clear_logs(&self) -> Result<()> {
        self.call(Command::ClearLogs).await
    }

    pub async fn set_auto_restart(&self, enabled: bool) -> Result<()> {
        self.call(|reply| Command::SetAutoRestart(enabled, reply))
            .await
    }

    pub async fn request_save(&self) -> Result<Option<ExportReport>> {
        self.call(Command::RequestSave).await
    }

    /// Submits externally observed events and reports how many were kept.
    pub async fn ingest(&self, events: Vec<RecordedEvent>) -> Result<usize> {
        self.call(|reply| Command::Ingest(events, reply)).await
    }

    /// Stops a running recording (exporting it) and ends the controller task.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Command::Shutdown).await
    }

    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.notifier.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
