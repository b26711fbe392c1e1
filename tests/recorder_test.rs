use devtools_log_recorder::Result;
use devtools_log_recorder::config::ConsoleFormat;
use devtools_log_recorder::recorder::{
    self, ConsoleEvent, ConsoleLevel, ContextId, ContextInfo, ContextLifecycle, ContextSignalSink,
    DeliveredFile, DirectoryDelivery, EventSink, Exporter, FileDelivery, MemorySettingsStore,
    NetworkEvent, Notifier, ObservationSource, PersistedState, RecorderEvent, RecorderHandle,
    RecorderParts, SessionPolicy, SourceHandle, SourceKind, StartOutcome, StopOutcome,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Tabs {
    contexts: Vec<ContextInfo>,
    signals: Mutex<Option<ContextSignalSink>>,
}

impl Tabs {
    fn new(contexts: Vec<ContextInfo>) -> Arc<Self> {
        Arc::new(Self {
            contexts,
            signals: Mutex::new(None),
        })
    }

    fn signals(&self) -> ContextSignalSink {
        self.signals.lock().unwrap().clone().expect("subscribed")
    }
}

/// A browser whose tab list never comes back.
struct StalledTabs;

#[async_trait::async_trait]
impl ContextLifecycle for StalledTabs {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        std::future::pending().await
    }

    async fn subscribe(&self, _signals: ContextSignalSink) -> Result<recorder::Subscription> {
        Ok(recorder::Subscription::detached())
    }
}

/// Console source that queues one line shortly after attaching and only
/// flushes its queue when closed.
struct SlowConsole;

#[async_trait::async_trait]
impl ObservationSource for SlowConsole {
    fn kind(&self) -> SourceKind {
        SourceKind::Console
    }

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle> {
        let (queue, flush) = sink.batched(100, Duration::from_secs(3600));
        let url = context.url.clone();
        let listener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            queue.push(ConsoleEvent::new(ConsoleLevel::Log, "queued line", url));
            std::future::pending::<()>().await;
        });
        Ok(SourceHandle::new(context.id.clone(), SourceKind::Console)
            .with_task(listener)
            .with_flush(flush))
    }

    async fn detach(&self, _handle: SourceHandle) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContextLifecycle for Tabs {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        Ok(self.contexts.clone())
    }

    async fn subscribe(&self, signals: ContextSignalSink) -> Result<recorder::Subscription> {
        *self.signals.lock().unwrap() = Some(signals);
        Ok(recorder::Subscription::from_task(tokio::spawn(
            std::future::pending::<()>(),
        )))
    }
}

struct Probe {
    kind: SourceKind,
    attaches: AtomicUsize,
    sinks: Mutex<HashMap<String, EventSink>>,
}

impl Probe {
    fn new(kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            attaches: AtomicUsize::new(0),
            sinks: Mutex::new(HashMap::new()),
        })
    }

    fn attached_to(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sinks.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn sink(&self, id: &str) -> EventSink {
        for _ in 0..400 {
            if let Some(sink) = self.sinks.lock().unwrap().get(id) {
                return sink.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("never attached to {id}");
    }
}

#[async_trait::async_trait]
impl ObservationSource for Probe {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle> {
        self.attaches.fetch_add(1, Ordering::AcqRel);
        self.sinks
            .lock()
            .unwrap()
            .insert(context.id.as_str().to_string(), sink);
        Ok(SourceHandle::new(context.id.clone(), self.kind))
    }

    async fn detach(&self, handle: SourceHandle) -> Result<()> {
        self.sinks.lock().unwrap().remove(handle.context_id().as_str());
        Ok(())
    }
}

#[derive(Default)]
struct Outbox {
    files: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl FileDelivery for Outbox {
    async fn deliver(&self, filename: &str, contents: Vec<u8>) -> Result<DeliveredFile> {
        let text = String::from_utf8_lossy(&contents).into_owned();
        self.files.lock().unwrap().push((filename.to_string(), text));
        Ok(DeliveredFile {
            filename: filename.to_string(),
            location: PathBuf::from(filename),
        })
    }
}

struct Harness {
    handle: RecorderHandle,
    tabs: Arc<Tabs>,
    network: Arc<Probe>,
    console: Arc<Probe>,
}

fn harness(
    contexts: Vec<ContextInfo>,
    delivery: Arc<dyn FileDelivery>,
    policy: SessionPolicy,
) -> Harness {
    let network = Probe::new(SourceKind::Network);
    let console = Probe::new(SourceKind::Console);
    let tabs = Tabs::new(contexts);
    let (handle, _task) = recorder::spawn(RecorderParts {
        lifecycle: tabs.clone(),
        sources: vec![
            network.clone() as Arc<dyn ObservationSource>,
            console.clone() as Arc<dyn ObservationSource>,
        ],
        allowed_schemes: vec!["http".into(), "https".into(), "file".into()],
        exporter: Exporter::new(delivery, ConsoleFormat::Text, true),
        settings: Arc::new(MemorySettingsStore::default()),
        notifier: Notifier::default(),
        policy,
    });
    Harness {
        handle,
        tabs,
        network,
        console,
    }
}

fn two_tabs() -> Vec<ContextInfo> {
    vec![
        ContextInfo::new("tab-1", "https://shop.test/cart"),
        ContextInfo::new("tab-2", "https://docs.test/"),
    ]
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = harness(two_tabs(), Arc::new(Outbox::default()), SessionPolicy::default());

    assert_eq!(
        h.handle.start_recording().await.unwrap(),
        StartOutcome::Started {
            eligible_contexts: 2
        }
    );
    let started_at = h.handle.state().await.unwrap().recording_start_time;
    assert!(started_at.is_some());
    assert_eq!(
        h.handle.start_recording().await.unwrap(),
        StartOutcome::AlreadyRecording
    );
    assert_eq!(h.handle.state().await.unwrap().recording_start_time, started_at);
    h.network.sink("tab-2").await;
    assert_eq!(h.network.attaches.load(Ordering::Acquire), 2);
    assert!(h.handle.state().await.unwrap().is_recording);

    assert!(matches!(
        h.handle.stop_recording().await.unwrap(),
        StopOutcome::Stopped { export: None }
    ));
    assert!(matches!(
        h.handle.stop_recording().await.unwrap(),
        StopOutcome::AlreadyIdle
    ));
    assert!(!h.handle.state().await.unwrap().is_recording);
}

#[tokio::test]
async fn test_ingest_is_dropped_while_idle() {
    let h = harness(two_tabs(), Arc::new(Outbox::default()), SessionPolicy::default());

    let accepted = h
        .handle
        .ingest(vec![ConsoleEvent::new(ConsoleLevel::Log, "too early", "https://a.test/").into()])
        .await
        .unwrap();
    assert_eq!(accepted, 0);

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.console_count, 0);
    assert_eq!(state.network_count, 0);
}

#[tokio::test]
async fn test_clear_logs_resets_counts() {
    let h = harness(two_tabs(), Arc::new(Outbox::default()), SessionPolicy::default());
    h.handle.start_recording().await.unwrap();

    let sink = h.network.sink("tab-1").await;
    for i in 0..5 {
        sink.emit(NetworkEvent::requested(format!("https://shop.test/api/{i}"), "fetch"));
    }
    h.console
        .sink("tab-1")
        .await
        .emit(ConsoleEvent::new(ConsoleLevel::Warn, "slow", "https://shop.test/cart"));

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.network_count, 5);
    assert_eq!(state.console_count, 1);

    h.handle.clear_logs().await.unwrap();
    let state = h.handle.state().await.unwrap();
    assert_eq!(state.network_count, 0);
    assert_eq!(state.console_count, 0);
    assert!(state.is_recording);
}

#[tokio::test]
async fn test_stop_exports_every_captured_event() {
    let temp = TempDir::new().unwrap();
    let h = harness(
        two_tabs(),
        Arc::new(DirectoryDelivery::new(temp.path().join("out"))),
        SessionPolicy::default(),
    );
    let mut events = h.handle.subscribe();
    h.handle.start_recording().await.unwrap();

    let net = h.network.sink("tab-1").await;
    net.emit(NetworkEvent::requested("https://shop.test/api/cart?id=7", "xhr"));
    net.emit(NetworkEvent::response_received("https://shop.test/api/cart?id=7", "xhr", 200));
    h.network
        .sink("tab-2")
        .await
        .emit(NetworkEvent::requested("https://docs.test/style.css", "stylesheet"));

    let console = h.console.sink("tab-2").await;
    console.emit(ConsoleEvent::new(ConsoleLevel::Info, "ready", "https://docs.test/"));
    console.emit(ConsoleEvent::new(ConsoleLevel::Error, "boom", "https://docs.test/").at(3, 9));

    let StopOutcome::Stopped { export: Some(report) } = h.handle.stop_recording().await.unwrap()
    else {
        panic!("expected an export");
    };
    assert!(report.is_success());
    assert_eq!(report.delivered.len(), 2);

    let har_file = report
        .delivered
        .iter()
        .find(|f| f.filename.starts_with("network_logs_") && f.filename.ends_with(".har"))
        .expect("network document");
    let har: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&har_file.location).unwrap()).unwrap();
    assert_eq!(har["log"]["version"], "1.2");
    assert_eq!(har["log"]["entries"].as_array().unwrap().len(), 3);

    let log_file = report
        .delivered
        .iter()
        .find(|f| f.filename.starts_with("console_logs_") && f.filename.ends_with(".log"))
        .expect("console document");
    let log = std::fs::read_to_string(&log_file.location).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains("[ERROR] boom"));

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.network_count + state.console_count, 0);

    let mut saved = None;
    while let Ok(event) = events.try_recv() {
        if let RecorderEvent::SaveCompleted { files } = event {
            saved = Some(files);
        }
    }
    assert_eq!(saved.map(|f| f.len()), Some(2));
}

#[tokio::test]
async fn test_empty_category_writes_no_file() {
    let outbox = Arc::new(Outbox::default());
    let h = harness(two_tabs(), outbox.clone(), SessionPolicy::default());
    h.handle.start_recording().await.unwrap();

    h.console
        .sink("tab-1")
        .await
        .emit(ConsoleEvent::new(ConsoleLevel::Log, "only console", "https://shop.test/"));
    h.handle.stop_recording().await.unwrap();

    let files = outbox.files.lock().unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].0.starts_with("console_logs_"));
}

#[tokio::test]
async fn test_request_save_keeps_recording() {
    let outbox = Arc::new(Outbox::default());
    let h = harness(two_tabs(), outbox.clone(), SessionPolicy::default());
    h.handle.start_recording().await.unwrap();

    assert!(h.handle.request_save().await.unwrap().is_none());

    h.network
        .sink("tab-2")
        .await
        .emit(NetworkEvent::requested("https://docs.test/", "document"));
    let report = h.handle.request_save().await.unwrap().expect("a snapshot export");
    assert_eq!(report.filenames().len(), 1);

    let state = h.handle.state().await.unwrap();
    assert!(state.is_recording);
    assert_eq!(state.network_count, 1);
}

#[tokio::test]
async fn test_privileged_tabs_are_never_attached() {
    let h = harness(
        vec![
            ContextInfo::new("ext", "chrome-extension://abcdef/popup.html"),
            ContextInfo::new("settings", "chrome://settings"),
            ContextInfo::new("page", "http://localhost:3000/"),
        ],
        Arc::new(Outbox::default()),
        SessionPolicy::default(),
    );

    assert_eq!(
        h.handle.start_recording().await.unwrap(),
        StartOutcome::Started {
            eligible_contexts: 1
        }
    );
    h.network.sink("page").await;
    h.console.sink("page").await;

    assert_eq!(h.network.attached_to(), vec!["page".to_string()]);
    assert_eq!(h.console.attached_to(), vec!["page".to_string()]);
    assert_eq!(h.handle.state().await.unwrap().tracked_contexts, 1);
}

#[tokio::test]
async fn test_extension_tab_opened_during_recording_is_ignored() {
    let h = harness(
        vec![ContextInfo::new("page", "https://shop.test/")],
        Arc::new(Outbox::default()),
        SessionPolicy::default(),
    );
    h.handle.start_recording().await.unwrap();
    h.network.sink("page").await;
    h.console.sink("page").await;

    let signals = h.tabs.signals();
    signals.created(ContextInfo::new("x", "chrome-extension://abc/p.html"));
    signals.navigated(ContextInfo::new("y", "chrome-extension://abc/options.html"));

    let state = h.handle.state().await.unwrap();
    assert_eq!(state.tracked_contexts, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.network.attaches.load(Ordering::Acquire), 1);
    assert_eq!(h.console.attaches.load(Ordering::Acquire), 1);
    assert_eq!(h.network.attached_to(), vec!["page".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_exports_events_still_batched() {
    let outbox = Arc::new(Outbox::default());
    let (handle, _task) = recorder::spawn(RecorderParts {
        lifecycle: Tabs::new(vec![ContextInfo::new("tab-1", "https://shop.test/")]),
        sources: vec![Arc::new(SlowConsole) as Arc<dyn ObservationSource>],
        allowed_schemes: vec!["https".into()],
        exporter: Exporter::new(outbox.clone(), ConsoleFormat::Text, false),
        settings: Arc::new(MemorySettingsStore::default()),
        notifier: Notifier::default(),
        policy: SessionPolicy::default(),
    });
    handle.start_recording().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.state().await.unwrap().console_count, 0);

    let StopOutcome::Stopped { export: Some(report) } = handle.stop_recording().await.unwrap()
    else {
        panic!("expected the queued line to be exported");
    };
    assert_eq!(report.delivered.len(), 1);

    let files = outbox.files.lock().unwrap();
    assert!(files[0].0.starts_with("console_logs_"));
    assert!(files[0].1.contains("queued line"));
}

#[tokio::test]
async fn test_stalled_tab_listing_does_not_block_commands() {
    let (handle, _task) = recorder::spawn(RecorderParts {
        lifecycle: Arc::new(StalledTabs),
        sources: vec![Probe::new(SourceKind::Network) as Arc<dyn ObservationSource>],
        allowed_schemes: vec!["https".into()],
        exporter: Exporter::new(Arc::new(Outbox::default()), ConsoleFormat::Text, false),
        settings: Arc::new(MemorySettingsStore::default()),
        notifier: Notifier::default(),
        policy: SessionPolicy::default(),
    });
    let limit = Duration::from_secs(2);

    let starter = handle.clone();
    let start = tokio::spawn(async move { starter.start_recording().await });

    let recording = tokio::time::timeout(limit, async {
        while !handle.state().await.unwrap().is_recording {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(recording.is_ok(), "getState blocked while tabs were listed");

    let stopped = tokio::time::timeout(limit, handle.stop_recording())
        .await
        .expect("stop blocked while tabs were listed")
        .unwrap();
    assert!(matches!(stopped, StopOutcome::Stopped { export: None }));

    let started = tokio::time::timeout(limit, start)
        .await
        .expect("start answered once stopped")
        .unwrap()
        .unwrap();
    assert_eq!(
        started,
        StartOutcome::Started {
            eligible_contexts: 0
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_auto_restart_keeps_buffer_and_reattaches() {
    let outbox = Arc::new(Outbox::default());
    let policy = SessionPolicy {
        auto_restart_interval: Duration::from_secs(600),
        check_interval: Duration::from_secs(1),
        ..SessionPolicy::default()
    };
    let h = harness(
        vec![ContextInfo::new("tab-1", "https://shop.test/")],
        outbox.clone(),
        policy,
    );
    h.handle.start_recording().await.unwrap();

    h.network
        .sink("tab-1")
        .await
        .emit(NetworkEvent::requested("https://shop.test/a.js", "script"));

    tokio::time::sleep(Duration::from_secs(602)).await;

    for _ in 0..400 {
        if h.network.attaches.load(Ordering::Acquire) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.network.attaches.load(Ordering::Acquire), 2);

    let state = h.handle.state().await.unwrap();
    assert!(state.is_recording);
    assert_eq!(state.network_count, 1);
    assert!(outbox.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_exports_active_recording() {
    let outbox = Arc::new(Outbox::default());
    let h = harness(two_tabs(), outbox.clone(), SessionPolicy::default());
    h.handle.start_recording().await.unwrap();
    h.network
        .sink("tab-1")
        .await
        .emit(NetworkEvent::requested("https://shop.test/", "document"));

    h.handle.shutdown().await.unwrap();
    assert_eq!(outbox.files.lock().unwrap().len(), 1);
    assert!(h.handle.state().await.is_err());
}

#[tokio::test]
async fn test_restore_applies_persisted_auto_restart() {
    let network = Probe::new(SourceKind::Network);
    let settings = Arc::new(MemorySettingsStore::with_state(PersistedState {
        is_recording: true,
        recording_start_time: None,
        auto_restart_enabled: false,
    }));
    let (handle, _task) = recorder::spawn(RecorderParts {
        lifecycle: Tabs::new(two_tabs()),
        sources: vec![network.clone() as Arc<dyn ObservationSource>],
        allowed_schemes: vec!["https".into()],
        exporter: Exporter::new(Arc::new(Outbox::default()), ConsoleFormat::Json, false),
        settings: settings.clone(),
        notifier: Notifier::default(),
        policy: SessionPolicy::default(),
    });

    let state = handle.state().await.unwrap();
    assert!(!state.is_recording);
    assert!(!state.auto_restart_enabled);
    assert_eq!(network.attaches.load(Ordering::Acquire), 0);
    assert!(!settings.current().unwrap().is_recording);
}

#[test]
fn test_context_ids_compare_by_value() {
    assert_eq!(ContextId::new("tab-1"), ContextId::from("tab-1"));
}
