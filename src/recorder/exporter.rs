use super::buffer::BufferSnapshot;
use super::events::{ConsoleEvent, NetworkEvent, NetworkPhase};
use crate::config::ConsoleFormat;
use crate::{RecorderError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

const HAR_VERSION: &str = "1.2";
const PAGE_ID: &str = "page_1";
const UNKNOWN: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveredFile {
    pub filename: String,
    pub location: PathBuf,
}

/// Where exported documents end up.
#[async_trait::async_trait]
pub trait FileDelivery: Send + Sync {
    async fn deliver(&self, filename: &str, contents: Vec<u8>) -> Result<DeliveredFile>;
}

/// Writes documents into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    directory: PathBuf,
}

impl DirectoryDelivery {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait::async_trait]
impl FileDelivery for DirectoryDelivery {
    async fn deliver(&self, filename: &str, contents: Vec<u8>) -> Result<DeliveredFile> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| RecorderError::Export(format!("{}: {}", self.directory.display(), e)))?;

        let location = self.directory.join(filename);
        tokio::fs::write(&location, contents)
            .await
            .map_err(|e| RecorderError::Export(format!("{}: {}", location.display(), e)))?;

        tracing::info!("Saved {}", location.display());
        Ok(DeliveredFile {
            filename: filename.to_string(),
            location,
        })
    }
}

/// Outcome of one export. The two documents succeed or fail independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub delivered: Vec<DeliveredFile>,
    pub failures: Vec<String>,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.delivered.iter().map(|f| f.filename.clone()).collect()
    }

    fn record(&mut self, result: Result<DeliveredFile>) {
        match result {
            Ok(file) => self.delivered.push(file),
            Err(e) => {
                tracing::error!("{}", e);
                self.failures.push(e.to_string());
            }
        }
    }
}

/// Filesystem-safe form of an RFC 3339 timestamp with millisecond precision.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

pub struct Exporter {
    delivery: Arc<dyn FileDelivery>,
    console_format: ConsoleFormat,
    json_pretty: bool,
}

impl Exporter {
    pub fn new(delivery: Arc<dyn FileDelivery>, console_format: ConsoleFormat, json_pretty: bool) -> Self {
        Self {
            delivery,
            console_format,
            json_pretty,
        }
    }

    /// Serializes and delivers one document per non-empty category.
    pub async fn export(
        &self,
        snapshot: &BufferSnapshot,
        started_at: Option<DateTime<Utc>>,
    ) -> ExportReport {
        let exported_at = Utc::now();
        let stamp = file_timestamp(exported_at);
        let mut report = ExportReport::default();

        if !snapshot.network.is_empty() {
            let filename = format!("network_logs_{stamp}.har");
            let started = started_at.unwrap_or(exported_at);
            let result = match self.network_document(&snapshot.network, started) {
                Ok(body) => self.delivery.deliver(&filename, body).await,
                Err(e) => Err(e),
            };
            report.record(result);
        }

        if !snapshot.console.is_empty() {
            let filename = format!("console_logs_{stamp}.{}", self.console_extension());
            let result = match self.console_document(&snapshot.console) {
                Ok(body) => self.delivery.deliver(&filename, body).await,
                Err(e) => Err(e),
            };
            report.record(result);
        }

        tracing::debug!(
            "Export finished: {} delivered, {} failed",
            report.delivered.len(),
            report.failures.len()
        );
        report
    }

    fn console_extension(&self) -> &'static str {
        match self.console_format {
            ConsoleFormat::Text => "log",
            ConsoleFormat::Json => "json",
        }
    }

    pub fn network_document(&self, events: &[NetworkEvent], started_at: DateTime<Utc>) -> Result<Vec<u8>> {
        let har = HarDocument::from_events(events, started_at);
        let bytes = if self.json_pretty {
            serde_json::to_vec_pretty(&har)?
        } else {
            serde_json::to_vec(&har)?
        };
        Ok(bytes)
    }

    pub fn console_document(&self, events: &[ConsoleEvent]) -> Result<Vec<u8>> {
        match self.console_format {
            ConsoleFormat::Text => {
                let lines: Vec<String> = events.iter().map(console_line).collect();
                Ok(lines.join("\n").into_bytes())
            }
            ConsoleFormat::Json if self.json_pretty => Ok(serde_json::to_vec_pretty(events)?),
            ConsoleFormat::Json => Ok(serde_json::to_vec(events)?),
        }
    }
}

/// `[2024-01-01T00:00:00.000Z] [ERROR] message`
pub fn console_line(event: &ConsoleEvent) -> String {
    format!(
        "[{}] [{}] {}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        event.level.to_string().to_uppercase(),
        event.message
    )
}

#[derive(Debug, Serialize)]
pub struct HarDocument {
    pub log: HarLog,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub pages: Vec<HarPage>,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Serialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPage {
    pub started_date_time: String,
    pub id: String,
    pub title: String,
    pub page_timings: HarPageTimings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPageTimings {
    pub on_content_load: i64,
    pub on_load: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub pageref: String,
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
    #[serde(rename = "serverIPAddress", skip_serializing_if = "Option::is_none")]
    pub server_ip_address: Option<String>,
    #[serde(rename = "_resourceType")]
    pub resource_type: String,
    #[serde(rename = "_phase")]
    pub phase: NetworkPhase,
    #[serde(rename = "_requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarNameValue>,
    pub headers: Vec<HarNameValue>,
    pub query_string: Vec<HarNameValue>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarNameValue>,
    pub headers: Vec<HarNameValue>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Default, Serialize)]
pub struct HarCache {}

#[derive(Debug, Serialize)]
pub struct HarTimings {
    pub blocked: i64,
    pub dns: i64,
    pub connect: i64,
    pub ssl: i64,
    pub send: i64,
    pub wait: i64,
    pub receive: i64,
}

impl Default for HarTimings {
    fn default() -> Self {
        Self {
            blocked: UNKNOWN,
            dns: UNKNOWN,
            connect: UNKNOWN,
            ssl: UNKNOWN,
            send: 0,
            wait: 0,
            receive: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarNameValue {
    pub name: String,
    pub value: String,
}

impl HarDocument {
    /// One entry per captured event, in capture order. Request and response
    /// phases of the same exchange are not merged.
    pub fn from_events(events: &[NetworkEvent], started_at: DateTime<Utc>) -> Self {
        Self {
            log: HarLog {
                version: HAR_VERSION.to_string(),
                creator: HarCreator {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                pages: vec![HarPage {
                    started_date_time: har_time(started_at),
                    id: PAGE_ID.to_string(),
                    title: "Recorded session".to_string(),
                    page_timings: HarPageTimings {
                        on_content_load: UNKNOWN,
                        on_load: UNKNOWN,
                    },
                }],
                entries: events.iter().map(HarEntry::from_event).collect(),
            },
        }
    }
}

impl HarEntry {
    fn from_event(event: &NetworkEvent) -> Self {
        let detail = &event.detail;
        let http_version = http_version(detail.protocol.as_deref());
        let headers = header_list(detail.headers.as_ref());
        let (request_headers, response_headers) = match event.phase {
            NetworkPhase::Requested => (headers, Vec::new()),
            NetworkPhase::ResponseReceived => (Vec::new(), headers),
        };
        let transfer_size = detail.encoded_data_length.map_or(UNKNOWN, |n| n as i64);

        Self {
            pageref: PAGE_ID.to_string(),
            started_date_time: har_time(event.timestamp),
            time: 0.0,
            request: HarRequest {
                method: detail.method.clone().unwrap_or_else(|| "GET".to_string()),
                url: event.url.clone(),
                http_version: http_version.clone(),
                cookies: Vec::new(),
                headers: request_headers,
                query_string: query_string(&event.url),
                headers_size: UNKNOWN,
                body_size: UNKNOWN,
            },
            response: HarResponse {
                status: detail.status.unwrap_or(0),
                status_text: detail.status_text.clone().unwrap_or_default(),
                http_version,
                cookies: Vec::new(),
                headers: response_headers,
                content: HarContent {
                    size: transfer_size,
                    mime_type: detail.mime_type.clone().unwrap_or_default(),
                },
                redirect_url: String::new(),
                headers_size: UNKNOWN,
                body_size: transfer_size,
            },
            cache: HarCache::default(),
            timings: HarTimings::default(),
            server_ip_address: detail.remote_ip.clone(),
            resource_type: event.request_type.clone(),
            phase: event.phase,
            request_id: detail.request_id.clone(),
        }
    }
}

fn har_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn http_version(protocol: Option<&str>) -> String {
    match protocol.map(str::to_ascii_lowercase).as_deref() {
        Some("h2") => "HTTP/2".to_string(),
        Some("h3") | Some("h3-29") => "HTTP/3".to_string(),
        Some(other) if !other.is_empty() => other.to_ascii_uppercase(),
        _ => "HTTP/1.1".to_string(),
    }
}

fn query_string(url: &str) -> Vec<HarNameValue> {
    Url::parse(url)
        .map(|u| {
            u.query_pairs()
                .map(|(name, value)| HarNameValue {
                    name: name.into_owned(),
                    value: value.into_owned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn header_list(headers: Option<&serde_json::Value>) -> Vec<HarNameValue> {
    let Some(serde_json::Value::Object(map)) = headers else {
        return Vec::new();
    };
    map.iter()
        .map(|(name, value)| HarNameValue {
            name: name.clone(),
            value: match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })
        .collect()
}
