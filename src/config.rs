use crate::timeouts::{ms, secs};
use crate::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user_data_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub launch_if_missing: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: default_headless(),
            port: default_port(),
            user_data_dir: None,
            launch_if_missing: true,
        }
    }
}

/// Recording session policy.
///
/// The auto-restart interval is measured from the most recent start of a
/// recording segment. `max_recording_secs` is measured from the first start
/// of a session and is not reset by auto-restart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default = "default_true")]
    pub auto_restart_enabled: bool,
    #[serde(default = "default_auto_restart_interval")]
    pub auto_restart_interval_secs: u64,
    #[serde(default = "default_auto_restart_check")]
    pub auto_restart_check_ms: u64,
    #[serde(default)]
    pub max_recording_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub capture_network: bool,
    #[serde(default = "default_true")]
    pub capture_console: bool,
    #[serde(default = "default_max_arg_length")]
    pub max_arg_length: usize,
    #[serde(default = "default_batch_max_items")]
    pub batch_max_items: usize,
    #[serde(default = "default_batch_flush")]
    pub batch_flush_ms: u64,
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    #[serde(default)]
    pub resume_on_startup: bool,
    #[serde(default = "default_true")]
    pub persist_state: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            auto_restart_enabled: true,
            auto_restart_interval_secs: default_auto_restart_interval(),
            auto_restart_check_ms: default_auto_restart_check(),
            max_recording_secs: None,
            capture_network: true,
            capture_console: true,
            max_arg_length: default_max_arg_length(),
            batch_max_items: default_batch_max_items(),
            batch_flush_ms: default_batch_flush(),
            max_buffered_events: default_max_buffered_events(),
            resume_on_startup: false,
            persist_state: true,
        }
    }
}

impl RecorderConfig {
    pub fn auto_restart_interval(&self) -> Duration {
        Duration::from_secs(self.auto_restart_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.auto_restart_check_ms)
    }

    pub fn max_recording(&self) -> Option<Duration> {
        self.max_recording_secs.map(Duration::from_secs)
    }

    pub fn batch_flush(&self) -> Duration {
        Duration::from_millis(self.batch_flush_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
    #[serde(default)]
    pub network_exclude_types: Vec<String>,
    #[serde(default)]
    pub network_exclude_domains: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: default_allowed_schemes(),
            network_exclude_types: Vec::new(),
            network_exclude_domains: Vec::new(),
        }
    }
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string(), "file".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// `[ISO-timestamp] [LEVEL] message`, one line per event.
    #[default]
    Text,
    /// JSON array of console events.
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    #[serde(default)]
    pub console_format: ConsoleFormat,
    #[serde(default = "default_true")]
    pub json_pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            console_format: ConsoleFormat::default(),
            json_pretty: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_headless() -> bool {
    false
}
fn default_port() -> u16 {
    9222
}
fn default_auto_restart_interval() -> u64 {
    secs::AUTO_RESTART_INTERVAL
}
fn default_auto_restart_check() -> u64 {
    ms::AUTO_RESTART_CHECK
}
fn default_max_arg_length() -> usize {
    1000
}
fn default_batch_max_items() -> usize {
    100
}
fn default_batch_flush() -> u64 {
    ms::CONSOLE_FLUSH
}
fn default_max_buffered_events() -> usize {
    100_000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}
fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/devtools-log-recorder.sock")
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })
        .map(|p| p.join("devtools-log-recorder"))
        .ok_or_else(|| RecorderError::ConfigError("Could not determine config directory".into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let global_path = default_config_path()?;
        if global_path.exists() {
            let content = std::fs::read_to_string(&global_path)?;
            config = toml::from_str(&content)?;
        }

        let project_path = PathBuf::from(".devtools-log-recorder.toml");
        if project_path.exists() {
            let content = std::fs::read_to_string(&project_path)?;
            let project_config: Config = toml::from_str(&content)?;
            config = config.merge(project_config);
        }

        config.load_from_env();

        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(headless) = cli_overrides.headless {
            config.browser.headless = headless;
        }
        if let Some(port) = cli_overrides.port {
            config.browser.port = port;
        }
        if let Some(chrome_path) = cli_overrides.chrome_path {
            config.browser.chrome_path = Some(chrome_path);
        }
        if let Some(dir) = cli_overrides.output_dir {
            config.output.directory = dir;
        }
        if let Some(socket) = cli_overrides.socket_path {
            config.server.socket_path = socket;
        }

        config
    }

    fn merge(mut self, other: Config) -> Self {
        if other.browser.chrome_path.is_some() {
            self.browser.chrome_path = other.browser.chrome_path;
        }
        if other.browser.user_data_dir.is_some() {
            self.browser.user_data_dir = other.browser.user_data_dir;
        }
        if other.recorder.max_recording_secs.is_some() {
            self.recorder.max_recording_secs = other.recorder.max_recording_secs;
        }
        if other.output.directory != default_output_dir() {
            self.output.directory = other.output.directory;
        }
        if other.output.console_format != ConsoleFormat::default() {
            self.output.console_format = other.output.console_format;
        }
        if !other.filters.network_exclude_domains.is_empty() {
            self.filters.network_exclude_domains = other.filters.network_exclude_domains;
        }
        if !other.filters.network_exclude_types.is_empty() {
            self.filters.network_exclude_types = other.filters.network_exclude_types;
        }
        self
    }

    fn load_from_env(&mut self) {
        if let Ok(port) = std::env::var("RECORDER_CHROME_PORT")
            && let Ok(port) = port.parse()
        {
            self.browser.port = port;
        }
        if let Ok(path) = std::env::var("RECORDER_CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("RECORDER_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(dir);
        }
        if let Ok(enabled) = std::env::var("RECORDER_AUTO_RESTART") {
            self.recorder.auto_restart_enabled = enabled == "true" || enabled == "1";
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.port < 1024 {
            return Err(RecorderError::ConfigError(format!(
                "Port {} is out of valid range (1024-65535)",
                self.browser.port
            )));
        }

        if self.recorder.auto_restart_interval_secs == 0 || self.recorder.auto_restart_check_ms == 0
        {
            return Err(RecorderError::ConfigError(
                "auto-restart interval and check period must be greater than 0".into(),
            ));
        }

        if let Some(max) = self.recorder.max_recording_secs
            && !(1..=secs::MAX_RECORDING_LIMIT).contains(&max)
        {
            return Err(RecorderError::ConfigError(format!(
                "max_recording_secs must be between 1 and {}",
                secs::MAX_RECORDING_LIMIT
            )));
        }

        if self.recorder.batch_max_items == 0 || self.recorder.batch_flush_ms == 0 {
            return Err(RecorderError::ConfigError(
                "batch_max_items and batch_flush_ms must be greater than 0".into(),
            ));
        }

        if self.filters.allowed_schemes.is_empty() {
            return Err(RecorderError::ConfigError(
                "filters.allowed_schemes must not be empty".into(),
            ));
        }

        if let Some(ref path) = self.browser.chrome_path
            && !path.exists()
        {
            return Err(RecorderError::ConfigError(format!(
                "Chrome path does not exist: {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn show_masked(&self) -> String {
        format!(
            r#"Browser:
  Chrome Path: {}
  Headless: {}
  Port: {}
  Launch If Missing: {}

Recorder:
  Auto Restart: {} (every {}s)
  Max Recording: {}
  Capture Network: {}
  Capture Console: {}

Filters:
  Allowed Schemes: {}

Output:
  Directory: {}
  Console Format: {:?}

Server:
  Socket: {}
"#,
            self.browser
                .chrome_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "auto-detect".into()),
            self.browser.headless,
            self.browser.port,
            self.browser.launch_if_missing,
            self.recorder.auto_restart_enabled,
            self.recorder.auto_restart_interval_secs,
            self.recorder
                .max_recording_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "unlimited".into()),
            self.recorder.capture_network,
            self.recorder.capture_console,
            self.filters.allowed_schemes.join(", "),
            self.output.directory.display(),
            self.output.console_format,
            self.server.socket_path.display(),
        )
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub headless: Option<bool>,
    pub port: Option<u16>,
    pub chrome_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.browser.headless);
        assert_eq!(config.browser.port, 9222);
        assert!(config.recorder.auto_restart_enabled);
        assert_eq!(config.recorder.auto_restart_interval_secs, 600);
        assert_eq!(config.recorder.auto_restart_check_ms, 1000);
        assert_eq!(config.recorder.max_arg_length, 1000);
        assert_eq!(config.output.console_format, ConsoleFormat::Text);
    }

    #[test]
    fn test_default_schemes() {
        let filters = FilterConfig::default();
        assert_eq!(filters.allowed_schemes, vec!["http", "https", "file"]);
    }

    #[test]
    fn test_config_validate_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_port() {
        let mut config = Config::default();
        config.browser.port = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_interval() {
        let mut config = Config::default();
        config.recorder.auto_restart_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_max_recording_range() {
        let mut config = Config::default();
        config.recorder.max_recording_secs = Some(0);
        assert!(config.validate().is_err());

        config.recorder.max_recording_secs = Some(86_401);
        assert!(config.validate().is_err());

        config.recorder.max_recording_secs = Some(3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_empty_schemes() {
        let mut config = Config::default();
        config.filters.allowed_schemes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_with_overrides() {
        let config = Config::default();
        let overrides = ConfigOverrides {
            headless: Some(true),
            port: Some(9333),
            chrome_path: None,
            output_dir: Some(PathBuf::from("/tmp/out")),
            socket_path: None,
        };

        let result = config.load_with_overrides(overrides);
        assert!(result.browser.headless);
        assert_eq!(result.browser.port, 9333);
        assert_eq!(result.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(result.server.socket_path, default_socket_path());
    }

    #[test]
    fn test_config_merge() {
        let base = Config::default();
        let mut other = Config::default();
        other.browser.chrome_path = Some(PathBuf::from("/usr/bin/chrome"));
        other.output.console_format = ConsoleFormat::Json;
        other.recorder.max_recording_secs = Some(120);

        let merged = base.merge(other);
        assert_eq!(
            merged.browser.chrome_path,
            Some(PathBuf::from("/usr/bin/chrome"))
        );
        assert_eq!(merged.output.console_format, ConsoleFormat::Json);
        assert_eq!(merged.recorder.max_recording_secs, Some(120));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[browser]"));
        assert!(toml_str.contains("[recorder]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.browser.port, config.browser.port);
        assert_eq!(
            parsed.recorder.auto_restart_interval_secs,
            config.recorder.auto_restart_interval_secs
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [recorder]
            auto_restart_enabled = false

            [output]
            console_format = "json"
            "#,
        )
        .unwrap();
        assert!(!parsed.recorder.auto_restart_enabled);
        assert_eq!(parsed.recorder.auto_restart_interval_secs, 600);
        assert_eq!(parsed.output.console_format, ConsoleFormat::Json);
        assert_eq!(parsed.filters.allowed_schemes.len(), 3);
    }
}
