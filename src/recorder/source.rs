use super::context::{ContextId, ContextInfo};
use super::controller::Message;
use super::events::RecordedEvent;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Network,
    Console,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Network => write!(f, "network"),
            SourceKind::Console => write!(f, "console"),
        }
    }
}

/// A producer of raw events for one attached context.
///
/// `attach` must not assume anything about other contexts; a slow or failing
/// attach only affects its own context. Events are pushed through the sink
/// for as long as the returned handle lives.
#[async_trait::async_trait]
pub trait ObservationSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle>;

    async fn detach(&self, handle: SourceHandle) -> Result<()>;
}

/// Instrumentation attached to one context by one source.
///
/// Dropping the handle stops its listener tasks. A flush task registered with
/// [`SourceHandle::with_flush`] is left to drain its queue and exit.
#[derive(Debug)]
pub struct SourceHandle {
    token: u64,
    context_id: ContextId,
    kind: SourceKind,
    alive: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    flush: Option<JoinHandle<()>>,
}

static NEXT_HANDLE_TOKEN: AtomicU64 = AtomicU64::new(1);

impl SourceHandle {
    pub fn new(context_id: ContextId, kind: SourceKind) -> Self {
        Self {
            token: NEXT_HANDLE_TOKEN.fetch_add(1, Ordering::Relaxed),
            context_id,
            kind,
            alive: Arc::new(AtomicBool::new(true)),
            tasks: Vec::new(),
            flush: None,
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Registers the task returned by [`EventSink::batched`].
    pub fn with_flush(mut self, flush: JoinHandle<()>) -> Self {
        self.flush = Some(flush);
        self
    }

    /// Stops the listener tasks and hands back the flush task, which finishes
    /// once everything queued so far has reached the controller.
    pub fn close(&mut self) -> Option<JoinHandle<()>> {
        self.stop_tasks();
        self.flush.take()
    }

    fn stop_tasks(&self) {
        self.alive.store(false, Ordering::Release);
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Flag shared with listener tasks; a task clears it when its stream ends.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    /// Unique per handle, even across attachments to the same context.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.tasks.iter().all(|t| !t.is_finished())
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Push side of the controller's ingest path.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the controller is gone.
    pub fn emit(&self, event: impl Into<RecordedEvent>) -> bool {
        self.emit_batch(vec![event.into()])
    }

    pub fn emit_batch(&self, events: Vec<RecordedEvent>) -> bool {
        if events.is_empty() {
            return true;
        }
        self.tx.send(Message::Ingest(events)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wraps this sink in a queue that is flushed every `flush_every` or as
    /// soon as `max_items` events are waiting, whichever comes first.
    ///
    /// The flush task drains what is left and exits once every
    /// [`BatchingSink`] clone has been dropped.
    pub fn batched(&self, max_items: usize, flush_every: Duration) -> (BatchingSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RecordedEvent>();
        let sink = self.clone();
        let max_items = max_items.max(1);

        let task = tokio::spawn(async move {
            let mut queue: Vec<RecordedEvent> = Vec::with_capacity(max_items);
            let mut ticker = tokio::time::interval(flush_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(event) => {
                            queue.push(event);
                            if queue.len() >= max_items
                                && !sink.emit_batch(std::mem::take(&mut queue))
                            {
                                break;
                            }
                        }
                        None => {
                            sink.emit_batch(std::mem::take(&mut queue));
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if !queue.is_empty() && !sink.emit_batch(std::mem::take(&mut queue)) {
                            break;
                        }
                    }
                }
            }
        });

        (BatchingSink { tx }, task)
    }
}

#[derive(Debug, Clone)]
pub struct BatchingSink {
    tx: mpsc::UnboundedSender<RecordedEvent>,
}

impl BatchingSink {
    pub fn push(&self, event: impl Into<RecordedEvent>) -> bool {
        self.tx.send(event.into()).is_ok()
    }
}
