use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to attach to context {context_id}: {message}")]
    Attachment { context_id: String, message: String },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("No eligible tab to record")]
    NoEligibleContext,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Chrome connection lost")]
    ConnectionLost,

    #[error("Recorder daemon is not running at {}", .0.display())]
    DaemonNotRunning(PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Settings storage failed: {0}")]
    Settings(String),

    #[error("Recording controller is no longer running")]
    ControllerGone,

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("General error: {0}")]
    General(String),
}

impl RecorderError {
    pub fn attachment(context_id: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        Self::Attachment {
            context_id: context_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Attachment { .. } => vec![
                "The tab may have been closed while attaching".into(),
                "Privileged pages (chrome://, extensions) cannot be recorded".into(),
            ],
            Self::Export(_) => vec![
                "Ensure the output directory exists and is writable".into(),
                "Set a different directory with --output-dir".into(),
            ],
            Self::NoEligibleContext => vec![
                "Open an http://, https:// or file:// page in the browser".into(),
                "New tabs are picked up automatically while recording".into(),
            ],
            Self::LaunchFailed(_) => vec![
                "Ensure Chrome/Chromium is installed".into(),
                "Check if another Chrome instance is using the debugging port".into(),
                "Try specifying Chrome path with --chrome-path".into(),
            ],
            Self::ConnectionLost | Self::Connection(_) => vec![
                "Check if Chrome was closed manually".into(),
                "Start Chrome with --remote-debugging-port=9222".into(),
                "Try restarting the daemon".into(),
            ],
            Self::DaemonNotRunning(_) => vec![
                "Start the recorder with: devtools-log-recorder daemon".into(),
                "Use --socket to point at a different daemon socket".into(),
            ],
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => vec![
                "Check configuration file syntax".into(),
                "Run with --verbose to see detailed error".into(),
                "Use --config to specify a different config file".into(),
            ],
            Self::Settings(_) => vec![
                "Check write permissions for the config directory".into(),
                "Set recorder.persist_state = false to keep state in memory".into(),
            ],
            _ => vec![
                "Run with --verbose for more details".into(),
                "Check the documentation for help".into(),
            ],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LaunchFailed(_)
            | Self::Connection(_)
            | Self::ConnectionLost
            | Self::DaemonNotRunning(_)
            | Self::ControllerGone => 3,
            Self::NoEligibleContext | Self::Attachment { .. } => 4,
            Self::IoError(_) | Self::Export(_) | Self::Settings(_) => 6,
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => 7,
            Self::InvalidCommand(_) => 2,
            _ => 1,
        }
    }
}
