use super::AttachedPages;
use crate::config::FilterConfig;
use crate::recorder::{
    ContextInfo, EventSink, NetworkDetail, NetworkEvent, ObservationSource, SourceHandle,
    SourceKind,
};
use crate::{RecorderError, Result};
use chromiumoxide::{Browser, Page};
use chromiumoxide::cdp::browser_protocol::network::{
    DisableParams as NetworkDisableParams, EnableParams as NetworkEnableParams,
    EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use url::Url;

/// Reports every request sent and response received by a tab.
pub struct CdpNetworkSource {
    browser: Arc<Browser>,
    filters: FilterConfig,
    pages: AttachedPages,
}

impl CdpNetworkSource {
    pub fn new(browser: Arc<Browser>, filters: FilterConfig) -> Self {
        Self {
            browser,
            filters,
            pages: AttachedPages::default(),
        }
    }
}

#[async_trait::async_trait]
impl ObservationSource for CdpNetworkSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    async fn attach(&self, context: &ContextInfo, sink: EventSink) -> Result<SourceHandle> {
        let handle = SourceHandle::new(context.id.clone(), SourceKind::Network);
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
            page.execute(NetworkDisableParams::default())
                .await
                .map_err(|e| RecorderError::attachment(&id, e))?;
        }
        Ok(())
    }
}

impl CdpNetworkSource {
    async fn observe(
        &self,
        page: &Page,
        context: &ContextInfo,
        sink: EventSink,
        handle: SourceHandle,
    ) -> Result<SourceHandle> {
        let fail = |e: chromiumoxide::error::CdpError| RecorderError::attachment(&context.id, e);

        page.execute(NetworkEnableParams::default())
            .await
            .map_err(fail)?;
        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(fail)?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(fail)?;

        let alive = handle.liveness();
        let filters = self.filters.clone();
        let request_sink = sink.clone();
        let request_task = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let request_type = resource_type_name(event.r#type.as_ref());
                if !should_collect_request(&event.request.url, &request_type, &filters) {
                    continue;
                }

                let captured = NetworkEvent::requested(event.request.url.clone(), request_type)
                    .with_detail(NetworkDetail {
                        request_id: Some(event.request_id.inner().clone()),
                        method: Some(event.request.method.clone()),
                        headers: Some(event.request.headers.inner().clone()),
                        ..Default::default()
                    });
                if !request_sink.emit(captured) {
                    break;
                }
            }
            alive.store(false, Ordering::Release);
        });

        let alive = handle.liveness();
        let filters = self.filters.clone();
        let response_task = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let response = &event.response;
                let request_type = resource_type_name(Some(&event.r#type));
                if !should_collect_request(&response.url, &request_type, &filters) {
                    continue;
                }

                let status = u16::try_from(response.status).unwrap_or_default();
                let captured =
                    NetworkEvent::response_received(response.url.clone(), request_type, status)
                        .with_detail(NetworkDetail {
                            request_id: Some(event.request_id.inner().clone()),
                            status: Some(status),
                            status_text: Some(response.status_text.clone()),
                            mime_type: Some(response.mime_type.clone()),
                            protocol: response.protocol.clone(),
                            headers: Some(response.headers.inner().clone()),
                            encoded_data_length: Some(response.encoded_data_length),
                            remote_ip: response.remote_ip_address.clone(),
                            ..Default::default()
                        });
                if !sink.emit(captured) {
                    break;
                }
            }
            alive.store(false, Ordering::Release);
        });

        tracing::debug!("Network observer attached to {}", context.url);
        Ok(handle.with_task(request_task).with_task(response_task))
    }
}

fn resource_type_name(resource_type: Option<&ResourceType>) -> String {
    resource_type
        .map(|t| t.as_ref().to_ascii_lowercase())
        .unwrap_or_else(|| "other".to_string())
}

/// Extension traffic is never recorded; the rest goes through the
/// configured type and domain exclusions.
pub fn should_collect_request(url: &str, resource_type: &str, filters: &FilterConfig) -> bool {
    if url.starts_with("chrome-extension://") {
        return false;
    }

    if filters
        .network_exclude_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(resource_type))
    {
        return false;
    }

    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
        && filters
            .network_exclude_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(types: &[&str], domains: &[&str]) -> FilterConfig {
        FilterConfig {
            network_exclude_types: types.iter().map(|s| s.to_string()).collect(),
            network_exclude_domains: domains.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_extension_requests_are_skipped() {
        let f = FilterConfig::default();
        assert!(!should_collect_request("chrome-extension://abc/bg.js", "script", &f));
        assert!(should_collect_request("https://a.test/app.js", "script", &f));
    }

    #[test]
    fn test_excluded_types() {
        let f = filters(&["Image", "font"], &[]);
        assert!(!should_collect_request("https://a.test/logo.png", "image", &f));
        assert!(!should_collect_request("https://a.test/x.woff2", "font", &f));
        assert!(should_collect_request("https://a.test/api", "xhr", &f));
    }

    #[test]
    fn test_excluded_domains_match_subdomains_only() {
        let f = filters(&[], &["tracker.test"]);
        assert!(!should_collect_request("https://tracker.test/p", "xhr", &f));
        assert!(!should_collect_request("https://cdn.tracker.test/p", "xhr", &f));
        assert!(should_collect_request("https://nottracker.test/p", "xhr", &f));
    }

    #[test]
    fn test_resource_type_name() {
        assert_eq!(resource_type_name(Some(&ResourceType::Xhr)), "xhr");
        assert_eq!(resource_type_name(Some(&ResourceType::Document)), "document");
        assert_eq!(resource_type_name(None), "other");
    }
}
