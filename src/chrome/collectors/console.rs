use super::AttachedPages;
use crate::config::RecorderConfig;
use crate::recorder::{
    ConsoleArg, ConsoleEvent, ConsoleLevel, ContextInfo, EventSink, ObservationSource,
    SourceHandle, SourceKind, render_console_args,
};
use crate::{RecorderError, Result};
use chromiumoxide::{Browser, Page};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, DisableParams as RuntimeDisableParams,
    EnableParams as RuntimeEnableParams, EventConsoleApiCalled, EventExceptionThrown,
    ExceptionDetails, RemoteObject, RemoteObjectSubtype, StackTrace,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Reports console calls and uncaught exceptions of a tab.
///
/// Events are queued per tab and handed to the controller in batches.
pub struct CdpConsoleSource {
    browser: Arc<Browser>,
    max_arg_length: usize,
    batch_max_items: usize,
    batch_flush: Duration,
    pages: AttachedPages,
}

impl CdpConsoleSource {
    pub fn new(browser: Arc<Browser>, config: &RecorderConfig) -> Self {
        Self {
            browser,
            max_arg_length: config.max_arg_length,
            batch_max_items: config.batch_max_items,
            batch_flush: config.batch_flush(),
            pages: AttachedPages::default(),
        }
    }
}

#[async_trait::async_trait]
impl ObservationSource for CdpConsoleSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Console
    }

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle> {
        let handle = SourceHandle::new(context.id.clone(), SourceKind::Console);
        let token = handle.token();
        let page = self.pages.open(&self.browser, context, token).await?;

        let observed = self.observe(&page, context, sink, handle).await;
        if observed.is_err() {
            self.pages.release(token).await;
        }
        observed
    }

    async fn detach(&self, handle: SourceHandle) -> Result<()> {
        let id = handle.context_id().clone();
        let token = handle.token();
        drop(handle);

        if let Some(page) = self.pages.release(token).await {
            page.execute(RuntimeDisableParams::default())
                .await
                .map_err(|e| RecorderError::attachment(&id, e))?;
        }
        Ok(())
    }
}

impl CdpConsoleSource {
    async fn observe(
        &self,
        page: &Page,
        context: &ContextInfo,
        sink: EventSink,
        handle: SourceHandle,
    ) -> Result<SourceHandle> {
        let fail = |e: chromiumoxide::error::CdpError| RecorderError::attachment(&context.id, e);

        page.execute(RuntimeEnableParams::default())
            .await
            .map_err(fail)?;
        let mut calls = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(fail)?;
        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(fail)?;

        // The flush task ends on its own once both listeners drop their queue.
        let (queue, flush) = sink.batched(self.batch_max_items, self.batch_flush);

        let alive = handle.liveness();
        let max_len = self.max_arg_length;
        let page_url = context.url.clone();
        let call_queue = queue.clone();
        let call_task = tokio::spawn(async move {
            while let Some(event) = calls.next().await {
                let args: Vec<ConsoleArg> = event.args.iter().map(console_arg).collect();
                let mut captured = ConsoleEvent::new(
                    console_level(&event.r#type),
                    render_console_args(&args, max_len),
                    frame_url(event.stack_trace.as_ref()).unwrap_or_else(|| page_url.clone()),
                );
                if let Some(frame) = event.stack_trace.as_ref().and_then(|s| s.call_frames.first()) {
                    captured = captured.at(frame.line_number, frame.column_number);
                }
                if !call_queue.push(captured) {
                    break;
                }
            }
            alive.store(false, Ordering::Release);
        });

        let alive = handle.liveness();
        let page_url = context.url.clone();
        let exception_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let captured = exception_event(&event.exception_details, &page_url);
                if !queue.push(captured) {
                    break;
                }
            }
            alive.store(false, Ordering::Release);
        });

        tracing::debug!("Console observer attached to {}", context.url);
        Ok(handle
            .with_task(call_task)
            .with_task(exception_task)
            .with_flush(flush))
    }
}

pub fn console_level(call: &ConsoleApiCalledType) -> ConsoleLevel {
    match call {
        ConsoleApiCalledType::Warning => ConsoleLevel::Warn,
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleLevel::Error,
        ConsoleApiCalledType::Info => ConsoleLevel::Info,
        ConsoleApiCalledType::Debug => ConsoleLevel::Debug,
        _ => ConsoleLevel::Log,
    }
}

/// Classifies a remote value for rendering.
///
/// Objects arrive by reference, so their structure is rebuilt from the
/// protocol preview when one is attached.
pub fn console_arg(object: &RemoteObject) -> ConsoleArg {
    if matches!(object.subtype, Some(RemoteObjectSubtype::Error)) {
        return ConsoleArg::Error(object.description.clone().unwrap_or_default());
    }

    match &object.value {
        Some(serde_json::Value::String(text)) => return ConsoleArg::Text(text.clone()),
        Some(value) => return ConsoleArg::Json(value.clone()),
        None => {}
    }

    if let Some(value) = &object.unserializable_value {
        return ConsoleArg::Text(value.inner().clone());
    }

    if let Some(preview) = &object.preview
        && !preview.overflow
    {
        let entries = preview
            .properties
            .iter()
            .map(|p| (p.name.clone(), preview_value(p.value.as_deref())));
        let json = if matches!(object.subtype, Some(RemoteObjectSubtype::Array)) {
            serde_json::Value::Array(entries.map(|(_, v)| v).collect())
        } else {
            serde_json::Value::Object(entries.collect())
        };
        return ConsoleArg::Json(json);
    }

    ConsoleArg::Opaque(object.description.clone())
}

fn preview_value(value: Option<&str>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(raw) => serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    }
}

fn frame_url(stack: Option<&StackTrace>) -> Option<String> {
    stack
        .and_then(|s| s.call_frames.first())
        .map(|f| f.url.clone())
        .filter(|url| !url.is_empty())
}

/// Uncaught exceptions are recorded as error-level console events.
fn exception_event(details: &ExceptionDetails, page_url: &str) -> ConsoleEvent {
    let message = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone());
    let url = details
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| page_url.to_string());

    ConsoleEvent::new(ConsoleLevel::Error, message, url)
        .at(details.line_number, details.column_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(json: serde_json::Value) -> RemoteObject {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(console_level(&ConsoleApiCalledType::Warning), ConsoleLevel::Warn);
        assert_eq!(console_level(&ConsoleApiCalledType::Assert), ConsoleLevel::Error);
        assert_eq!(console_level(&ConsoleApiCalledType::Table), ConsoleLevel::Log);
        assert_eq!(console_level(&ConsoleApiCalledType::Debug), ConsoleLevel::Debug);
    }

    #[test]
    fn test_primitive_args() {
        assert_eq!(
            console_arg(&remote(json!({"type": "string", "value": "hi"}))),
            ConsoleArg::Text("hi".into())
        );
        assert_eq!(
            console_arg(&remote(json!({"type": "number", "value": 42}))),
            ConsoleArg::Json(json!(42))
        );
        assert_eq!(
            console_arg(&remote(json!({"type": "number", "unserializableValue": "NaN"}))),
            ConsoleArg::Text("NaN".into())
        );
    }

    #[test]
    fn test_error_arg_keeps_description() {
        let arg = console_arg(&remote(json!({
            "type": "object",
            "subtype": "error",
            "className": "TypeError",
            "description": "TypeError: x is undefined\n    at main (app.js:3:9)"
        })));
        assert_eq!(
            arg,
            ConsoleArg::Error("TypeError: x is undefined\n    at main (app.js:3:9)".into())
        );
    }

    #[test]
    fn test_object_preview_becomes_json() {
        let arg = console_arg(&remote(json!({
            "type": "object",
            "className": "Object",
            "description": "Object",
            "preview": {
                "type": "object",
                "description": "Object",
                "overflow": false,
                "properties": [
                    {"name": "id", "type": "number", "value": "7"},
                    {"name": "name", "type": "string", "value": "ada"}
                ]
            }
        })));
        assert_eq!(arg, ConsoleArg::Json(json!({"id": 7, "name": "ada"})));
    }

    #[test]
    fn test_function_is_opaque() {
        let arg = console_arg(&remote(json!({
            "type": "function",
            "className": "Function",
            "description": "function f() {}"
        })));
        assert_eq!(arg, ConsoleArg::Opaque(Some("function f() {}".into())));
    }

    #[test]
    fn test_exception_event() {
        let details: ExceptionDetails = serde_json::from_value(json!({
            "exceptionId": 1,
            "text": "Uncaught",
            "lineNumber": 10,
            "columnNumber": 4,
            "url": "https://a.test/app.js",
            "exception": {
                "type": "object",
                "subtype": "error",
                "description": "ReferenceError: y is not defined"
            }
        }))
        .unwrap();

        let event = exception_event(&details, "https://a.test/");
        assert_eq!(event.level, ConsoleLevel::Error);
        assert_eq!(event.message, "ReferenceError: y is not defined");
        assert_eq!(event.source_context_url, "https://a.test/app.js");
        assert_eq!(event.line, Some(10));
    }
}
