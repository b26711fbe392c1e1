use crate::{RecorderError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, mpsc, watch};

use super::protocol::{Notification, Request, Response, error_codes};

const CLIENT_QUEUE: usize = 256;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub type ClientId = u64;

type ClientMap = Arc<RwLock<HashMap<ClientId, mpsc::Sender<String>>>>;

/// Newline-delimited JSON-RPC over a Unix socket.
///
/// Every connected client receives broadcast notifications in addition to
/// the responses to its own requests.
pub struct IpcServer {
    socket_path: PathBuf,
    clients: ClientMap,
    shutdown: watch::Sender<bool>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket_path,
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale file left by a previous run.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        UnixListener::bind(&self.socket_path).map_err(|e| {
            RecorderError::General(format!(
                "Failed to bind {}: {}",
                self.socket_path.display(),
                e
            ))
        })
    }

    /// Serves connections until [`IpcServer::shutdown`] is called.
    pub async fn accept<F, Fut>(&self, listener: &UnixListener, on_request: F) -> Result<()>
    where
        F: Fn(ClientId, Request) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Client {} connected", client_id);
                        tokio::spawn(serve_client(
                            stream,
                            client_id,
                            self.clients.clone(),
                            on_request.clone(),
                        ));
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        Ok(())
    }

    pub async fn broadcast(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        for tx in self.clients.read().await.values() {
            if tx.try_send(line.clone()).is_err() {
                tracing::debug!("Dropping notification for a slow or closed client");
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
    }
}

async fn serve_client<F, Fut>(stream: UnixStream, client_id: ClientId, clients: ClientMap, on_request: F)
where
    F: Fn(ClientId, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    clients.write().await.insert(client_id, tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => on_request(client_id, request).await,
            Err(e) => Response::error(0, error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
        };
        match serde_json::to_string(&response) {
            Ok(json) => {
                if tx.send(json).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!("Failed to encode response: {}", e),
        }
    }

    clients.write().await.remove(&client_id);
    drop(tx);
    writer.await.ok();
    tracing::debug!("Client {} disconnected", client_id);
}
