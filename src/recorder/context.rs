use super::controller::{AttachOutcome, Message};
use super::source::{EventSink, ObservationSource, SourceHandle, SourceKind};
use crate::timeouts::secs;
use crate::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the host reports about a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub id: ContextId,
    pub url: String,
    pub loading_complete: bool,
}

impl ContextInfo {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: ContextId::new(id),
            url: url.into(),
            loading_complete: true,
        }
    }

    pub fn loading(mut self) -> Self {
        self.loading_complete = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSignal {
    Created(ContextInfo),
    Navigated(ContextInfo),
    Closed(ContextId),
}

/// True when `url` parses and its scheme is on the allow-list.
pub fn is_eligible_url(url: &str, allowed_schemes: &[String]) -> bool {
    match Url::parse(url) {
        Ok(parsed) => allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(parsed.scheme())),
        Err(_) => false,
    }
}

/// Push side for context lifecycle signals.
#[derive(Debug, Clone)]
pub struct ContextSignalSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ContextSignalSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    pub fn send(&self, signal: ContextSignal) -> bool {
        self.tx.send(Message::Context(signal)).is_ok()
    }

    pub fn created(&self, info: ContextInfo) -> bool {
        self.send(ContextSignal::Created(info))
    }

    pub fn navigated(&self, info: ContextInfo) -> bool {
        self.send(ContextSignal::Navigated(info))
    }

    pub fn closed(&self, id: ContextId) -> bool {
        self.send(ContextSignal::Closed(id))
    }
}

/// Live registration with a [`ContextLifecycle`]; cancelled on drop.
#[derive(Debug, Default)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription with nothing to tear down.
    pub fn detached() -> Self {
        Self { task: None }
    }

    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Enumerates tabs and reports their creation, navigation and closing.
#[async_trait::async_trait]
pub trait ContextLifecycle: Send + Sync {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>>;

    async fn subscribe(&self, signals: ContextSignalSink) -> Result<Subscription>;
}

/// Result of listing tabs and subscribing to their lifecycle, produced off the
/// controller task.
#[derive(Debug)]
pub(crate) struct Enumeration {
    pub(crate) generation: u64,
    pub(crate) subscription: Option<Result<Subscription>>,
    pub(crate) contexts: Result<Vec<ContextInfo>>,
}

async fn within_discovery_limit<T>(what: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(secs::TAB_DISCOVERY), work)
        .await
        .unwrap_or_else(|_| {
            Err(RecorderError::Connection(format!(
                "Timed out after {}s while {}",
                secs::TAB_DISCOVERY,
                what
            )))
        })
}

#[derive(Debug)]
pub struct MonitoredContext {
    pub id: ContextId,
    pub url: String,
    handles: HashMap<SourceKind, SourceHandle>,
    pending: HashSet<SourceKind>,
}

impl MonitoredContext {
    fn new(id: ContextId, url: String) -> Self {
        Self {
            id,
            url,
            handles: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn attached(&self) -> bool {
        self.handles.values().any(SourceHandle::is_live)
    }

    pub fn is_attached_to(&self, kind: SourceKind) -> bool {
        self.handles.get(&kind).is_some_and(SourceHandle::is_live)
    }

    pub fn is_pending(&self, kind: SourceKind) -> bool {
        self.pending.contains(&kind)
    }
}

/// Keeps source attachment in line with the recording state.
///
/// Every attach runs in its own task and reports back through the controller
/// queue tagged with the generation it was started in. Results from an older
/// generation, or for a context that is no longer tracked, are detached on
/// arrival.
pub struct ContextTracker {
    lifecycle: Arc<dyn ContextLifecycle>,
    sources: Vec<Arc<dyn ObservationSource>>,
    allowed_schemes: Vec<String>,
    contexts: HashMap<ContextId, MonitoredContext>,
    subscription: Option<Subscription>,
    generation: u64,
    active: bool,
    tx: mpsc::UnboundedSender<Message>,
}

impl ContextTracker {
    pub(crate) fn new(
        lifecycle: Arc<dyn ContextLifecycle>,
        sources: Vec<Arc<dyn ObservationSource>>,
        allowed_schemes: Vec<String>,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            lifecycle,
            sources,
            allowed_schemes,
            contexts: HashMap::new(),
            subscription: None,
            generation: 0,
            active: false,
            tx,
        }
    }

    pub fn is_eligible(&self, url: &str) -> bool {
        is_eligible_url(url, &self.allowed_schemes)
    }

    pub fn is_tracking(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn get(&self, id: &ContextId) -> Option<&MonitoredContext> {
        self.contexts.get(id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &MonitoredContext> {
        self.contexts.values()
    }

    /// Starts tracking. Tabs are listed and the lifecycle subscribed on a
    /// separate task whose outcome comes back through the controller queue.
    pub fn attach_all(&mut self) {
        self.active = true;
        self.generation += 1;

        let lifecycle = self.lifecycle.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        let subscribe = self.subscription.is_none();

        tokio::spawn(async move {
            let subscription = if subscribe {
                let signals = ContextSignalSink::new(tx.clone());
                Some(within_discovery_limit("subscribing to tabs", lifecycle.subscribe(signals)).await)
            } else {
                None
            };
            let contexts = within_discovery_limit("listing tabs", lifecycle.list_contexts()).await;

            tx.send(Message::Enumerated(Enumeration {
                generation,
                subscription,
                contexts,
            }))
            .ok();
        });
    }

    /// Attaches to every eligible tab of a current enumeration and returns
    /// how many there were. Stale enumerations are discarded and their
    /// subscription cancelled.
    pub(crate) fn on_enumerated(&mut self, enumeration: Enumeration) -> Option<usize> {
        let Enumeration {
            generation,
            subscription,
            contexts,
        } = enumeration;

        if !self.active || generation != self.generation {
            tracing::debug!("Discarding tab list from an earlier segment");
            return None;
        }

        match subscription {
            Some(Ok(subscription)) => self.subscription = Some(subscription),
            Some(Err(e)) => tracing::warn!("Failed to subscribe to tab lifecycle: {}", e),
            None => {}
        }

        let contexts = match contexts {
            Ok(contexts) => contexts,
            Err(e) => {
                tracing::warn!("Failed to enumerate tabs: {}", e);
                Vec::new()
            }
        };
        tracing::debug!("Found {} open tabs", contexts.len());

        Some(
            contexts
                .into_iter()
                .filter(|info| self.track(info.clone()))
                .count(),
        )
    }

    pub fn on_signal(&mut self, signal: ContextSignal) {
        match signal {
            ContextSignal::Created(info) => self.on_context_created(info),
            ContextSignal::Navigated(info) => self.on_context_navigated(info),
            ContextSignal::Closed(id) => self.on_context_closed(&id),
        }
    }

    pub fn on_context_created(&mut self, info: ContextInfo) {
        if self.active {
            self.track(info);
        }
    }

    pub fn on_context_navigated(&mut self, info: ContextInfo) {
        if !self.active || !info.loading_complete {
            return;
        }
        if !self.is_eligible(&info.url) {
            tracing::debug!("Tab {} navigated to ineligible {}", info.id, info.url);
            self.forget(&info.id);
            return;
        }
        self.track(info);
    }

    pub fn on_context_closed(&mut self, id: &ContextId) {
        self.forget(id);
    }

    pub(crate) fn on_attach_result(&mut self, outcome: AttachOutcome) {
        let AttachOutcome {
            generation,
            context_id,
            kind,
            result,
        } = outcome;
        let current = self.active && generation == self.generation;

        match result {
            Ok(handle) => {
                if current && let Some(ctx) = self.contexts.get_mut(&context_id) {
                    ctx.pending.remove(&kind);
                    tracing::debug!("Attached {} observer to tab {}", kind, context_id);
                    if let Some(previous) = ctx.handles.insert(kind, handle) {
                        self.spawn_detach(previous);
                    }
                } else {
                    tracing::debug!("Discarding late {} attachment to tab {}", kind, context_id);
                    self.spawn_detach(handle);
                }
            }
            Err(e) => {
                if current && let Some(ctx) = self.contexts.get_mut(&context_id) {
                    ctx.pending.remove(&kind);
                }
                tracing::warn!("Skipping tab {} for {}: {}", context_id, kind, e);
            }
        }
    }

    /// Stops tracking, cancels the lifecycle subscription and detaches every
    /// handle. Detach errors are logged and otherwise ignored.
    ///
    /// Returns the flush tasks of the closed handles; each finishes once its
    /// queued events have been handed to the controller.
    pub fn detach_all(&mut self) -> Vec<JoinHandle<()>> {
        self.active = false;
        self.generation += 1;

        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }

        let contexts = std::mem::take(&mut self.contexts);
        tracing::debug!("Detaching from {} tab(s)", contexts.len());

        let mut flushes = Vec::new();
        for ctx in contexts.into_values() {
            for mut handle in ctx.handles.into_values() {
                flushes.extend(handle.close());
                self.spawn_detach(handle);
            }
        }
        flushes
    }

    fn track(&mut self, info: ContextInfo) -> bool {
        if !self.is_eligible(&info.url) {
            tracing::debug!("Skipping tab {} with URL {}", info.id, info.url);
            return false;
        }

        let ctx = self
            .contexts
            .entry(info.id.clone())
            .or_insert_with(|| MonitoredContext::new(info.id.clone(), info.url.clone()));
        ctx.url = info.url.clone();
        ctx.handles.retain(|_, handle| handle.is_live());

        let missing: Vec<Arc<dyn ObservationSource>> = self
            .sources
            .iter()
            .filter(|source| {
                let kind = source.kind();
                !ctx.handles.contains_key(&kind) && ctx.pending.insert(kind)
            })
            .cloned()
            .collect();

        for source in missing {
            self.spawn_attach(source, info.clone());
        }
        true
    }

    fn forget(&mut self, id: &ContextId) {
        if let Some(ctx) = self.contexts.remove(id) {
            tracing::debug!("No longer tracking tab {}", id);
            for handle in ctx.handles.into_values() {
                self.spawn_detach(handle);
            }
        }
    }

    fn spawn_attach(&self, source: Arc<dyn ObservationSource>, info: ContextInfo) {
        let tx = self.tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let sink = EventSink::new(tx.clone());
            let result = source.attach(&info, sink).await;
            let outcome = AttachOutcome {
                generation,
                context_id: info.id,
                kind: source.kind(),
                result,
            };
            tx.send(Message::Attached(outcome)).ok();
        });
    }

    fn spawn_detach(&self, handle: SourceHandle) {
        let Some(source) = self
            .sources
            .iter()
            .find(|s| s.kind() == handle.kind())
            .cloned()
        else {
            return;
        };

        tokio::spawn(async move {
            let context_id = handle.context_id().clone();
            if let Err(e) = source.detach(handle).await {
                tracing::debug!("Detach from tab {} failed: {}", context_id, e);
            }
        });
    }
}
