use crate::server::protocol::{Notification, Request, Response, methods};
use crate::{RecorderError, Result, timeouts::secs};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// JSON-RPC client for a running recorder daemon.
///
/// The daemon interleaves notifications with responses, so lines that do
/// not answer the pending request are skipped by [`DaemonClient::request`].
pub struct DaemonClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl DaemonClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            tracing::debug!("Failed to connect to {}: {}", socket_path.display(), e);
            RecorderError::DaemonNotRunning(socket_path.to_path_buf())
        })?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            timeout: Duration::from_secs(secs::REQUEST),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&Request::new(id, method, params))?;
        self.writer
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| RecorderError::Connection(format!("Write error: {}", e)))?;

        let response = tokio::time::timeout(self.timeout, self.read_response(id))
            .await
            .map_err(|_| RecorderError::Connection(format!("Request '{}' timed out", method)))??;

        if let Some(error) = response.error {
            return Err(RecorderError::General(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn read_response(&mut self, id: u64) -> Result<Response> {
        loop {
            let line = self.next_line().await?;
            let value: Value = serde_json::from_str(&line)?;
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(serde_json::from_value(value)?);
            }
        }
    }

    /// Waits for the next server notification, skipping stray responses.
    pub async fn next_notification(&mut self) -> Result<Notification> {
        loop {
            let line = self.next_line().await?;
            let value: Value = serde_json::from_str(&line)?;
            if value.get("id").is_none() {
                return Ok(serde_json::from_value(value)?);
            }
        }
    }

    async fn next_line(&mut self) -> Result<String> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(RecorderError::ConnectionLost),
            Err(e) => Err(RecorderError::Connection(format!("Read error: {}", e))),
        }
    }

    pub async fn ping(&mut self) -> Result<bool> {
        let result = self.request(methods::PING, Value::Null).await?;
        Ok(result.get("pong").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn start_recording(&mut self) -> Result<Value> {
        self.request(methods::START_RECORDING, Value::Null).await
    }

    pub async fn stop_recording(&mut self) -> Result<Value> {
        self.request(methods::STOP_RECORDING, Value::Null).await
    }

    pub async fn get_state(&mut self) -> Result<Value> {
        self.request(methods::GET_STATE, Value::Null).await
    }

    pub async fn clear_logs(&mut self) -> Result<Value> {
        self.request(methods::CLEAR_LOGS, Value::Null).await
    }

    pub async fn set_auto_restart(&mut self, enabled: bool) -> Result<Value> {
        self.request(methods::SET_AUTO_RESTART, json!({ "enabled": enabled }))
            .await
    }

    pub async fn request_save(&mut self) -> Result<Value> {
        self.request(methods::REQUEST_SAVE, Value::Null).await
    }
}

pub fn is_daemon_running(socket_path: &Path) -> bool {
    socket_path.exists() && std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}
