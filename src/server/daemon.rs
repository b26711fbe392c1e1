use crate::Result;
use crate::chrome::{self, CdpLifecycle};
use crate::config::Config;
use crate::recorder::{
    self, DirectoryDelivery, Exporter, FileSettingsStore, MemorySettingsStore, Notifier,
    RecordedEvent, RecorderHandle, RecorderParts, SessionPolicy, SettingsStore, StartOutcome,
    StopOutcome,
};
use crate::server::adapter::{ToResponse, req_bool};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::ipc::{ClientId, IpcServer};
use super::protocol::{IngestParams, Notification, Request, Response, error_codes, methods};

/// Long-running process that owns the browser connection and the recorder,
/// and serves the JSON-RPC surface on a Unix socket.
pub struct Daemon {
    handle: RecorderHandle,
    controller: JoinHandle<()>,
    ipc_server: Arc<IpcServer>,
}

impl Daemon {
    /// Connects to Chrome (launching it when allowed) and starts the
    /// recording controller.
    pub async fn build(config: &Config) -> Result<Self> {
        let browser = chrome::connect_or_launch(&config.browser).await?;
        let lifecycle = Arc::new(CdpLifecycle::new(browser.clone(), config.browser.port));
        let sources = chrome::build_sources(&browser, config);

        let delivery = Arc::new(DirectoryDelivery::new(config.output.directory.clone()));
        let exporter = Exporter::new(
            delivery,
            config.output.console_format,
            config.output.json_pretty,
        );

        let settings: Arc<dyn SettingsStore> = if config.recorder.persist_state {
            Arc::new(FileSettingsStore::default_location()?)
        } else {
            Arc::new(MemorySettingsStore::default())
        };

        let (handle, controller) = recorder::spawn(RecorderParts {
            lifecycle,
            sources,
            allowed_schemes: config.filters.allowed_schemes.clone(),
            exporter,
            settings,
            notifier: Notifier::default(),
            policy: SessionPolicy::from(&config.recorder),
        });

        Ok(Self {
            handle,
            controller,
            ipc_server: Arc::new(IpcServer::new(config.server.socket_path.clone())),
        })
    }

    pub fn handle(&self) -> &RecorderHandle {
        &self.handle
    }

    /// Serves clients until Ctrl-C, then stops the recorder (exporting an
    /// active recording) and removes the socket.
    pub async fn run(self) -> Result<()> {
        let socket_path = self.ipc_server.socket_path().to_path_buf();
        let listener = self.ipc_server.bind()?;
        write_pid_file(&socket_path)?;
        tracing::info!("Recorder daemon listening on {}", socket_path.display());

        let forwarder = spawn_notification_forwarder(&self.handle, self.ipc_server.clone());

        let handle = self.handle.clone();
        let serving = self.ipc_server.accept(&listener, move |client_id, request| {
            let handle = handle.clone();
            async move { handle_request(client_id, request, &handle).await }
        });

        let result = tokio::select! {
            result = serving => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                Ok(())
            }
        };

        self.ipc_server.shutdown();
        if let Err(e) = self.handle.shutdown().await {
            tracing::warn!("Recorder did not shut down cleanly: {}", e);
        }
        self.controller.await.ok();
        forwarder.abort();
        remove_pid_file(&socket_path);

        tracing::info!("Recorder daemon stopped");
        result
    }

    pub fn is_running(socket_path: &Path) -> bool {
        std::fs::read_to_string(pid_file_path(socket_path))
            .ok()
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .is_some_and(process_exists)
    }
}

fn spawn_notification_forwarder(handle: &RecorderHandle, ipc: Arc<IpcServer>) -> JoinHandle<()> {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = ipc.broadcast(&Notification::from(&event)).await {
                        tracing::warn!("Failed to forward {}: {}", event.method(), e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Notification forwarder skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn pid_file_path(socket_path: &Path) -> PathBuf {
    socket_path.with_extension("pid")
}

fn write_pid_file(socket_path: &Path) -> Result<()> {
    std::fs::write(pid_file_path(socket_path), std::process::id().to_string())?;
    Ok(())
}

fn remove_pid_file(socket_path: &Path) {
    std::fs::remove_file(pid_file_path(socket_path)).ok();
}

fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
        || std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

/// Dispatches one JSON-RPC request to the recorder.
pub async fn handle_request(_client_id: ClientId, request: Request, handle: &RecorderHandle) -> Response {
    let id = request.id;
    let params = &request.params;

    match request.method.as_str() {
        methods::START_RECORDING => match handle.start_recording().await {
            Ok(StartOutcome::Started { eligible_contexts: 0 }) => Response::success(
                id,
                json!({
                    "success": true,
                    "error": "No eligible tab to record",
                    "eligibleTabs": 0,
                }),
            ),
            Ok(StartOutcome::Started { eligible_contexts }) => Response::success(
                id,
                json!({ "success": true, "eligibleTabs": eligible_contexts }),
            ),
            Ok(StartOutcome::AlreadyRecording) => {
                Response::success(id, json!({ "success": true, "alreadyRecording": true }))
            }
            Err(e) => Err::<Value, _>(e).to_response(id),
        },

        methods::STOP_RECORDING => match handle.stop_recording().await {
            Ok(StopOutcome::Stopped { export }) => {
                let export = export.unwrap_or_default();
                let mut result = json!({
                    "success": true,
                    "savedFiles": export.filenames(),
                });
                if !export.is_success() {
                    result["error"] = Value::String(export.failures.join("; "));
                }
                Response::success(id, result)
            }
            Ok(StopOutcome::AlreadyIdle) => {
                Response::success(id, json!({ "success": true, "savedFiles": [] }))
            }
            Err(e) => Err::<Value, _>(e).to_response(id),
        },

        methods::GET_STATE => handle.state().await.to_response(id),

        methods::CLEAR_LOGS => handle
            .clear_logs()
            .await
            .map(|_| json!({ "success": true }))
            .to_response(id),

        methods::SET_AUTO_RESTART => {
            let enabled = match req_bool!(params, "enabled") {
                Ok(enabled) => enabled,
                Err(e) => return Err::<Value, _>(e).to_response(id),
            };
            handle
                .set_auto_restart(enabled)
                .await
                .map(|_| json!({ "success": true, "enabled": enabled }))
                .to_response(id)
        }

        methods::REQUEST_SAVE => match handle.request_save().await {
            Ok(report) => {
                let report = report.unwrap_or_default();
                let mut result = json!({
                    "success": report.is_success(),
                    "files": report.filenames(),
                });
                if !report.is_success() {
                    result["error"] = Value::String(report.failures.join("; "));
                }
                Response::success(id, result)
            }
            Err(e) => Err::<Value, _>(e).to_response(id),
        },

        methods::INGEST_CONSOLE_EVENT => {
            let events = match serde_json::from_value::<IngestParams>(params.clone()) {
                Ok(params) => params.into_events(),
                Err(e) => {
                    return Response::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("Invalid console event: {}", e),
                    );
                }
            };
            match events {
                Ok(events) => handle
                    .ingest(events.into_iter().map(RecordedEvent::from).collect())
                    .await
                    .map(|accepted| json!({ "success": true, "accepted": accepted }))
                    .to_response(id),
                Err(e) => Err::<Value, _>(e).to_response(id),
            }
        }

        methods::PING => Response::success(id, json!({ "pong": true })),

        other => Response::method_not_found(id, other),
    }
}
