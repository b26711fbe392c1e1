use crate::{RecorderError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Recording flags kept across daemon restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub is_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_auto_restart")]
    pub auto_restart_enabled: bool,
}

fn default_auto_restart() -> bool {
    true
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedState>>;
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// TOML file next to the user configuration.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Result<Self> {
        Ok(Self::new(crate::config::default_config_dir()?.join("state.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(state)?)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemorySettingsStore {
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    pub fn current(&self) -> Option<PersistedState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|_| RecorderError::Settings("state lock poisoned".into()))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|_| RecorderError::Settings("state lock poisoned".into()))?;
        *current = Some(state.clone());
        Ok(())
    }
}
