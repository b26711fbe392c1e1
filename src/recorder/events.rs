use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when an argument cannot be rendered as text.
pub const UNRENDERABLE_ARG: &str = "[Object]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPhase {
    Requested,
    ResponseReceived,
}

/// Whatever the network observer was able to see for one phase.
///
/// Every field is optional: a request phase has no status, and hosts differ
/// in how much they expose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_data_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub request_type: String,
    pub phase: NetworkPhase,
    #[serde(default)]
    pub detail: NetworkDetail,
}

impl NetworkEvent {
    pub fn requested(url: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.into(),
            request_type: request_type.into(),
            phase: NetworkPhase::Requested,
            detail: NetworkDetail::default(),
        }
    }

    pub fn response_received(
        url: impl Into<String>,
        request_type: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.into(),
            request_type: request_type.into(),
            phase: NetworkPhase::ResponseReceived,
            detail: NetworkDetail {
                status: Some(status),
                ..Default::default()
            },
        }
    }

    pub fn with_detail(mut self, detail: NetworkDetail) -> Self {
        self.detail = detail;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl std::fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleLevel::Log => write!(f, "log"),
            ConsoleLevel::Info => write!(f, "info"),
            ConsoleLevel::Warn => write!(f, "warn"),
            ConsoleLevel::Error => write!(f, "error"),
            ConsoleLevel::Debug => write!(f, "debug"),
        }
    }
}

impl std::str::FromStr for ConsoleLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(ConsoleLevel::Log),
            "info" => Ok(ConsoleLevel::Info),
            "warn" | "warning" => Ok(ConsoleLevel::Warn),
            "error" => Ok(ConsoleLevel::Error),
            "debug" | "verbose" => Ok(ConsoleLevel::Debug),
            _ => Err(format!("Unknown console level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEvent {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    pub message: String,
    pub source_context_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

impl ConsoleEvent {
    pub fn new(
        level: ConsoleLevel,
        message: impl Into<String>,
        source_context_url: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source_context_url: source_context_url.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: i64, column: i64) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Caps the message at `max_chars` characters.
    pub fn truncated(mut self, max_chars: usize) -> Self {
        if self.message.chars().count() > max_chars {
            self.message = truncate_chars(&self.message, max_chars);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Network(NetworkEvent),
    Console(ConsoleEvent),
}

impl From<NetworkEvent> for RecordedEvent {
    fn from(event: NetworkEvent) -> Self {
        RecordedEvent::Network(event)
    }
}

impl From<ConsoleEvent> for RecordedEvent {
    fn from(event: ConsoleEvent) -> Self {
        RecordedEvent::Console(event)
    }
}

/// One argument of a console call, as seen by the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleArg {
    Text(String),
    Json(serde_json::Value),
    /// An error object; the description carries `Name: message` and the stack.
    Error(String),
    /// A value with no structural form, e.g. a function or a DOM node.
    Opaque(Option<String>),
}

impl ConsoleArg {
    pub fn render(&self, max_len: usize) -> String {
        let rendered = match self {
            ConsoleArg::Text(text) => text.clone(),
            ConsoleArg::Error(description) => return description.clone(),
            ConsoleArg::Json(value) => match serde_json::to_string_pretty(value) {
                Ok(text) => text,
                Err(_) => return UNRENDERABLE_ARG.to_string(),
            },
            ConsoleArg::Opaque(Some(description)) => description.clone(),
            ConsoleArg::Opaque(None) => return UNRENDERABLE_ARG.to_string(),
        };
        truncate_chars(&rendered, max_len)
    }
}

/// Renders every argument with the per-argument cap and joins them with a space.
pub fn render_console_args(args: &[ConsoleArg], max_len: usize) -> String {
    args.iter()
        .map(|arg| arg.render(max_len))
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
