use crate::recorder::StateSnapshot;
use crate::server::Notification;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

pub trait OutputFormatter {
    fn format_text(&self) -> String;
    fn format_json(&self, pretty: bool) -> crate::Result<String>;
}

pub fn print_output<T: OutputFormatter>(
    data: &T,
    as_json: bool,
    json_pretty: bool,
) -> crate::Result<()> {
    let output = if as_json {
        data.format_json(json_pretty)?
    } else {
        data.format_text()
    };

    println!("{}", output);
    Ok(())
}

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

pub mod text {
    use colored::Colorize;

    pub fn success(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn error(msg: &str) -> String {
        format!("{} {}", "✗".red().bold(), msg)
    }

    pub fn warning(msg: &str) -> String {
        format!("{} {}", "⚠".yellow().bold(), msg)
    }

    pub fn info(msg: &str) -> String {
        format!("{} {}", "ℹ".blue().bold(), msg)
    }

    pub fn bullet(msg: &str) -> String {
        format!("  • {}", msg)
    }

    pub fn section(title: &str) -> String {
        format!("{}\n{}", title.bold(), "─".repeat(title.chars().count()))
    }

    pub fn key_value(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }
}

impl OutputFormatter for StateSnapshot {
    fn format_text(&self) -> String {
        let status = if self.is_recording {
            "recording".green().bold().to_string()
        } else {
            "idle".dimmed().to_string()
        };
        let started = self
            .recording_start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        let auto_restart = if self.auto_restart_enabled { "on" } else { "off" };

        let mut lines = vec![
            text::section("Recorder"),
            text::key_value("Status", &status),
            text::key_value("Started", &started),
            text::key_value("Network events", &self.network_count.to_string()),
            text::key_value("Console events", &self.console_count.to_string()),
            text::key_value("Auto-restart", auto_restart),
            text::key_value("Tracked tabs", &self.tracked_contexts.to_string()),
        ];
        if self.dropped_count > 0 {
            lines.push(text::warning(&format!(
                "{} events dropped (buffer full)",
                self.dropped_count
            )));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

/// Result of a command that changes recorder state.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            files: Vec::new(),
            warning: None,
        }
    }

    /// Builds a result from a daemon reply, collecting file names from
    /// `savedFiles` or `files` and a failure note from `error`.
    pub fn from_reply(message: impl Into<String>, reply: &Value) -> Self {
        let files = ["savedFiles", "files"]
            .iter()
            .find_map(|key| reply.get(*key).and_then(Value::as_array))
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            success: reply.get("success").and_then(Value::as_bool).unwrap_or(true),
            message: message.into(),
            files,
            warning: reply.get("error").and_then(Value::as_str).map(str::to_string),
        }
    }
}

impl OutputFormatter for CommandResult {
    fn format_text(&self) -> String {
        let mut lines = vec![if self.success {
            text::success(&self.message)
        } else {
            text::error(&self.message)
        }];
        lines.extend(self.files.iter().map(|f| text::bullet(f)));
        if let Some(warning) = &self.warning {
            lines.push(text::warning(warning));
        }
        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

impl OutputFormatter for Notification {
    fn format_text(&self) -> String {
        let at = chrono::Local::now().format("%H:%M:%S");
        let p = &self.params;
        let detail = match self.method.as_str() {
            "stateChanged" => {
                if p["isRecording"].as_bool().unwrap_or(false) {
                    "recording started".green().to_string()
                } else {
                    "recording stopped".yellow().to_string()
                }
            }
            "countsChanged" => format!(
                "network {} · console {}",
                p["networkCount"], p["consoleCount"]
            ),
            "saveCompleted" => {
                let files: Vec<&str> = p["files"]
                    .as_array()
                    .map(|f| f.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                format!("saved {}", files.join(", "))
            }
            "saveFailed" => p["message"].as_str().unwrap_or("unknown error").red().to_string(),
            _ => p.to_string(),
        };
        format!("{} {} {}", at.to_string().dimmed(), self.method.bold(), detail)
    }

    fn format_json(&self, _pretty: bool) -> crate::Result<String> {
        to_json(self, false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub path: String,
    #[serde(skip)]
    pub rendered: String,
    pub config: crate::Config,
}

impl OutputFormatter for ConfigView {
    fn format_text(&self) -> String {
        format!("{}\n\n{}", text::info(&format!("Config file: {}", self.path)), self.rendered)
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}
