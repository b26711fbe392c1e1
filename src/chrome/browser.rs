use crate::config::BrowserConfig;
use crate::timeouts::{ms, secs};
use crate::{RecorderError, Result};
use chromiumoxide::Browser;
use chromiumoxide::handler::HandlerConfig;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const LAUNCH_CONNECT_ATTEMPTS: u32 = 20;

/// Entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DebugTarget {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type")]
    pub target_type: String,
}

impl DebugTarget {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Attaches to a browser already listening on the debugging port, or starts
/// one when allowed to.
pub async fn connect_or_launch(config: &BrowserConfig) -> Result<Arc<Browser>> {
    match connect_to_existing(config.port).await {
        Ok(browser) => {
            tracing::info!("Connected to browser on port {}", config.port);
            Ok(browser)
        }
        Err(e) if !config.launch_if_missing => Err(e),
        Err(_) => {
            tracing::info!("No browser on port {}, launching one", config.port);
            launch(config).await
        }
    }
}

pub async fn connect_to_existing(port: u16) -> Result<Arc<Browser>> {
    let url = format!("http://127.0.0.1:{}/json/version", port);

    let response: serde_json::Value = devtools_client(Duration::from_secs(secs::DEVTOOLS_HTTP))?
        .get(&url)
        .send()
        .await
        .map_err(|e| RecorderError::Connection(format!("{}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| RecorderError::Connection(format!("{}: {}", url, e)))?;

    let ws_url = response
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RecorderError::Connection("missing webSocketDebuggerUrl".into()))?;

    let handler_config = HandlerConfig {
        request_timeout: Duration::from_secs(secs::REQUEST),
        ..Default::default()
    };

    let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
        .await
        .map_err(|e| RecorderError::Connection(e.to_string()))?;

    tokio::spawn(async move {
        while handler.next().await.is_some() {}
        tracing::warn!("{}", RecorderError::ConnectionLost);
    });

    Ok(Arc::new(browser))
}

fn devtools_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RecorderError::Connection(e.to_string()))
}

/// Lists page targets through the HTTP endpoint.
pub async fn list_targets(port: u16) -> Result<Vec<DebugTarget>> {
    fetch_targets(port, Duration::from_secs(secs::DEVTOOLS_HTTP)).await
}

async fn fetch_targets(port: u16, timeout: Duration) -> Result<Vec<DebugTarget>> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    let targets: Vec<DebugTarget> = devtools_client(timeout)?
        .get(&url)
        .send()
        .await
        .map_err(|_| RecorderError::ConnectionLost)?
        .json()
        .await
        .map_err(|_| RecorderError::ConnectionLost)?;

    Ok(targets.into_iter().filter(DebugTarget::is_page).collect())
}

/// Starts a detached browser process so its tabs outlive the recorder.
async fn launch(config: &BrowserConfig) -> Result<Arc<Browser>> {
    let chrome_path = match &config.chrome_path {
        Some(path) => path.clone(),
        None => crate::utils::find_chrome_executable()?,
    };

    let user_data = config
        .user_data_dir
        .clone()
        .unwrap_or_else(crate::utils::default_profile_dir);
    prepare_profile(&user_data);

    let mut cmd = std::process::Command::new(&chrome_path);
    cmd.arg(format!("--remote-debugging-port={}", config.port))
        .arg(format!("--user-data-dir={}", user_data.display()))
        .args([
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-sync",
        ]);
    if config.headless {
        cmd.arg("--headless");
    }

    tracing::debug!("Launching {}", chrome_path.display());
    cmd.spawn()
        .map_err(|e| RecorderError::LaunchFailed(format!("Failed to spawn browser: {}", e)))?;

    connect_with_retry(config.port, LAUNCH_CONNECT_ATTEMPTS).await
}

fn prepare_profile(user_data: &Path) {
    std::fs::create_dir_all(user_data).ok();

    // Left behind by a crashed browser; blocks a new instance on this profile.
    let lock_file = user_data.join("SingletonLock");
    if lock_file.exists() || lock_file.is_symlink() {
        std::fs::remove_file(&lock_file).ok();
    }
}

async fn connect_with_retry(port: u16, attempts: u32) -> Result<Arc<Browser>> {
    for attempt in 1..=attempts {
        tokio::time::sleep(Duration::from_millis(ms::CONNECT_RETRY_DELAY)).await;

        match connect_to_existing(port).await {
            Ok(browser) => return Ok(browser),
            Err(e) => tracing::debug!("Connection attempt {} failed: {}", attempt, e),
        }
    }

    Err(RecorderError::LaunchFailed(format!(
        "browser did not open debugging port {} in time",
        port
    )))
}
