pub mod console;
pub mod network;

use crate::config::Config;
use crate::recorder::{ContextId, ContextInfo, ObservationSource};
use crate::{RecorderError, Result};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::{Browser, Page};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use console::{CdpConsoleSource, console_arg, console_level};
pub use network::{CdpNetworkSource, should_collect_request};

/// Builds the observation sources enabled in `config`.
pub fn build_sources(browser: &Arc<Browser>, config: &Config) -> Vec<Arc<dyn ObservationSource>> {
    let mut sources: Vec<Arc<dyn ObservationSource>> = Vec::new();
    if config.recorder.capture_network {
        sources.push(Arc::new(CdpNetworkSource::new(
            browser.clone(),
            config.filters.clone(),
        )));
    }
    if config.recorder.capture_console {
        sources.push(Arc::new(CdpConsoleSource::new(
            browser.clone(),
            &config.recorder,
        )));
    }
    sources
}

/// Pages a source has attached to, keyed by the token of the handle that
/// enabled them.
///
/// Attachments to the same tab share one protocol session, so a domain is
/// only disabled when the last attachment to that tab is released.
struct AttachedPages<P = Page> {
    pages: Mutex<HashMap<u64, (ContextId, Arc<P>)>>,
}

impl<P> Default for AttachedPages<P> {
    fn default() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }
}

impl<P> AttachedPages<P> {
    async fn insert(&self, token: u64, context_id: ContextId, page: Arc<P>) {
        self.pages.lock().await.insert(token, (context_id, page));
    }

    /// Forgets the attachment made under `token`. Returns its page only when
    /// no newer attachment to the same tab is still registered.
    async fn release(&self, token: u64) -> Option<Arc<P>> {
        let mut pages = self.pages.lock().await;
        let (context_id, page) = pages.remove(&token)?;
        if pages.values().any(|(other, _)| *other == context_id) {
            tracing::debug!("Tab {} is still observed, keeping domain enabled", context_id);
            return None;
        }
        Some(page)
    }
}

impl AttachedPages<Page> {
    async fn open(&self, browser: &Browser, context: &ContextInfo, token: u64) -> Result<Arc<Page>> {
        let page = browser
            .get_page(TargetId::from(context.id.as_str().to_string()))
            .await
            .map_err(|e| RecorderError::attachment(&context.id, e))?;
        let page = Arc::new(page);
        self.insert(token, context.id.clone(), page.clone()).await;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_old_detach_keeps_newer_attachment_enabled() {
        let pages: AttachedPages<&str> = AttachedPages::default();
        pages.insert(1, ContextId::from("tab-1"), Arc::new("old")).await;
        pages.insert(2, ContextId::from("tab-1"), Arc::new("new")).await;

        assert!(pages.release(1).await.is_none());
        assert_eq!(pages.release(2).await.as_deref(), Some(&"new"));
        assert!(pages.release(2).await.is_none());
    }

    #[tokio::test]
    async fn test_release_is_per_tab() {
        let pages: AttachedPages<&str> = AttachedPages::default();
        pages.insert(1, ContextId::from("tab-1"), Arc::new("a")).await;
        pages.insert(2, ContextId::from("tab-2"), Arc::new("b")).await;

        assert_eq!(pages.release(1).await.as_deref(), Some(&"a"));
        assert_eq!(pages.pages.lock().await.len(), 1);
    }
}
