//! In-memory stand-ins for the host side of the recorder.

use super::context::{ContextId, ContextInfo, ContextLifecycle, ContextSignalSink, Subscription};
use super::context::ContextTracker;
use super::controller::Message;
use super::exporter::{DeliveredFile, FileDelivery};
use super::source::{EventSink, ObservationSource, SourceHandle, SourceKind};
use crate::{RecorderError, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Polls `condition` until it holds or the wait limit passes.
pub(crate) async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for the tab enumeration started by `attach_all` and applies it.
pub(crate) async fn enumerate(
    tracker: &mut ContextTracker,
    rx: &mut mpsc::UnboundedReceiver<Message>,
) -> Option<usize> {
    loop {
        let message = tokio::time::timeout(WAIT_LIMIT, rx.recv())
            .await
            .expect("tab enumeration in time")
            .expect("channel open");
        if let Message::Enumerated(enumeration) = message {
            return tracker.on_enumerated(enumeration);
        }
    }
}

/// Receives `n` attach results and feeds them to the tracker.
pub(crate) async fn drain_attach_results(
    tracker: &mut ContextTracker,
    rx: &mut mpsc::UnboundedReceiver<Message>,
    n: usize,
) {
    let mut seen = 0;
    while seen < n {
        let message = tokio::time::timeout(WAIT_LIMIT, rx.recv())
            .await
            .expect("attach result in time")
            .expect("channel open");
        if let Message::Attached(outcome) = message {
            tracker.on_attach_result(outcome);
            seen += 1;
        }
    }
}

struct SubscribedGuard(Arc<AtomicBool>);

impl Drop for SubscribedGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub(crate) struct MockLifecycle {
    contexts: Mutex<Vec<ContextInfo>>,
    signals: Mutex<Option<ContextSignalSink>>,
    subscribed: Arc<AtomicBool>,
}

impl MockLifecycle {
    pub(crate) fn with_contexts(contexts: Vec<ContextInfo>) -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(contexts),
            ..Default::default()
        })
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Sink handed over by the latest `subscribe` call.
    pub(crate) fn signals(&self) -> Option<ContextSignalSink> {
        self.signals.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_unsubscribe(&self) {
        eventually("unsubscribe", || !self.is_subscribed()).await;
    }
}

#[async_trait::async_trait]
impl ContextLifecycle for MockLifecycle {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        Ok(self.contexts.lock().unwrap().clone())
    }

    async fn subscribe(&self, signals: ContextSignalSink) -> Result<Subscription> {
        *self.signals.lock().unwrap() = Some(signals);
        self.subscribed.store(true, Ordering::Release);

        let guard = SubscribedGuard(self.subscribed.clone());
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        Ok(Subscription::from_task(task))
    }
}

pub(crate) struct MockSource {
    kind: SourceKind,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    liveness: Mutex<Vec<Arc<AtomicBool>>>,
    sinks: Mutex<HashMap<String, EventSink>>,
}

impl MockSource {
    pub(crate) fn new(kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            liveness: Mutex::new(Vec::new()),
            sinks: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Blocks attaching to `id` until the returned gate is notified.
    pub(crate) fn hold(&self, id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), gate.clone());
        gate
    }

    pub(crate) fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::Acquire)
    }

    pub(crate) fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::Acquire)
    }

    /// Marks every handle issued so far as dead.
    pub(crate) fn kill_handles(&self) {
        for alive in self.liveness.lock().unwrap().iter() {
            alive.store(false, Ordering::Release);
        }
    }

    pub(crate) fn sink_for(&self, id: &str) -> Option<EventSink> {
        self.sinks.lock().unwrap().get(id).cloned()
    }

    pub(crate) async fn wait_for_attach(&self, id: &str) -> EventSink {
        eventually("attach", || self.sink_for(id).is_some()).await;
        self.sink_for(id).unwrap()
    }

    pub(crate) async fn wait_for_detaches(&self, n: usize) {
        eventually("detach", || self.detach_count() >= n).await;
    }
}

#[async_trait::async_trait]
impl ObservationSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle> {
        let id = context.id.as_str().to_string();
        self.attaches.fetch_add(1, Ordering::AcqRel);

        let gate = self.gates.lock().unwrap().get(&id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.lock().unwrap().contains(&id) {
            return Err(RecorderError::attachment(&context.id, "mock refused"));
        }

        let handle = SourceHandle::new(ContextId::new(id.clone()), self.kind);
        self.liveness.lock().unwrap().push(handle.liveness());
        self.sinks.lock().unwrap().insert(id, sink);
        Ok(handle)
    }

    async fn detach(&self, handle: SourceHandle) -> Result<()> {
        self.sinks.lock().unwrap().remove(handle.context_id().as_str());
        self.detaches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Keeps delivered files in memory; can be told to reject some of them.
#[derive(Default)]
pub(crate) struct MemoryDelivery {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    reject_prefix: Mutex<Option<String>>,
}

impl MemoryDelivery {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reject(&self, prefix: &str) {
        *self.reject_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    pub(crate) fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().unwrap().clone()
    }

    pub(crate) fn file(&self, prefix: &str) -> Option<String> {
        self.files()
            .into_iter()
            .find(|(name, _)| name.starts_with(prefix))
            .map(|(_, body)| String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait::async_trait]
impl FileDelivery for MemoryDelivery {
    async fn deliver(&self, filename: &str, contents: Vec<u8>) -> Result<DeliveredFile> {
        let rejected = self
            .reject_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|p| filename.starts_with(p));
        if rejected {
            return Err(RecorderError::Export(format!("{filename}: disk full")));
        }

        self.files
            .lock()
            .unwrap()
            .push((filename.to_string(), contents));
        Ok(DeliveredFile {
            filename: filename.to_string(),
            location: PathBuf::from(filename),
        })
    }
}
