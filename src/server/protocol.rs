use crate::recorder::{ConsoleEvent, ConsoleLevel, RecorderEvent};
use crate::{RecorderError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names accepted by the daemon.
pub mod methods {
    pub const START_RECORDING: &str = "startRecording";
    pub const STOP_RECORDING: &str = "stopRecording";
    pub const GET_STATE: &str = "getState";
    pub const CLEAR_LOGS: &str = "clearLogs";
    pub const SET_AUTO_RESTART: &str = "setAutoRestart";
    pub const REQUEST_SAVE: &str = "requestSave";
    pub const INGEST_CONSOLE_EVENT: &str = "ingestConsoleEvent";
    pub const PING: &str = "ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated message; carries no id and expects no answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn method_not_found(id: u64, method: &str) -> Self {
        Self::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {}", method),
        )
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

impl From<&RecorderEvent> for Notification {
    fn from(event: &RecorderEvent) -> Self {
        let params = serde_json::to_value(event).unwrap_or(Value::Null);
        Self::new(event.method(), params)
    }
}

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const RECORDER_UNAVAILABLE: i32 = -32000;
    pub const BROWSER_ERROR: i32 = -32001;
    pub const EXPORT_FAILED: i32 = -32002;
}

/// Millisecond epoch or RFC 3339 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl WireTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            WireTimestamp::Text(at) => Some(*at),
        }
    }
}

/// One console event reported by an external observer.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleEventParams {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ConsoleEventParams {
    pub fn into_event(self) -> Result<ConsoleEvent> {
        let level: ConsoleLevel = self.level.parse().map_err(RecorderError::InvalidCommand)?;
        let mut event = ConsoleEvent::new(level, self.message, self.url.unwrap_or_default());
        if let Some(at) = self.timestamp.as_ref().and_then(WireTimestamp::to_utc) {
            event.timestamp = at;
        }
        Ok(event)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IngestParams {
    Batch { batch: Vec<ConsoleEventParams> },
    Single(ConsoleEventParams),
}

impl IngestParams {
    pub fn into_events(self) -> Result<Vec<ConsoleEvent>> {
        match self {
            IngestParams::Single(params) => Ok(vec![params.into_event()?]),
            IngestParams::Batch { batch } => batch
                .into_iter()
                .map(ConsoleEventParams::into_event)
                .collect(),
        }
    }
}
