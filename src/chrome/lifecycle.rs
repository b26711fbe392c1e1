use super::browser;
use crate::recorder::{ContextId, ContextInfo, ContextLifecycle, ContextSignalSink, Subscription};
use crate::{RecorderError, Result};
use chromiumoxide::Browser;
use chromiumoxide::cdp::browser_protocol::target::{
    EventTargetCreated, EventTargetDestroyed, EventTargetInfoChanged, TargetInfo,
};
use futures::StreamExt;
use std::sync::Arc;

const PAGE_TARGET: &str = "page";

/// Tab lifecycle of a browser reached over the DevTools protocol.
///
/// Target info changes are reported once the new URL is committed, so every
/// navigation signal is treated as loading-complete.
pub struct CdpLifecycle {
    browser: Arc<Browser>,
    port: u16,
}

impl CdpLifecycle {
    pub fn new(browser: Arc<Browser>, port: u16) -> Self {
        Self { browser, port }
    }
}

fn page_info(info: &TargetInfo) -> Option<ContextInfo> {
    (info.r#type == PAGE_TARGET)
        .then(|| ContextInfo::new(info.target_id.inner().clone(), info.url.clone()))
}

#[async_trait::async_trait]
impl ContextLifecycle for CdpLifecycle {
    async fn list_contexts(&self) -> Result<Vec<ContextInfo>> {
        let targets = browser::list_targets(self.port).await?;
        Ok(targets
            .into_iter()
            .map(|t| ContextInfo::new(t.id, t.url))
            .collect())
    }

    async fn subscribe(&self, signals: ContextSignalSink) -> Result<Subscription> {
        let listen_err = |e: chromiumoxide::error::CdpError| {
            RecorderError::Connection(format!("Failed to listen for tab events: {}", e))
        };

        let mut created = self
            .browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(listen_err)?;
        let mut changed = self
            .browser
            .event_listener::<EventTargetInfoChanged>()
            .await
            .map_err(listen_err)?;
        let mut destroyed = self
            .browser
            .event_listener::<EventTargetDestroyed>()
            .await
            .map_err(listen_err)?;

        let task = tokio::spawn(async move {
            loop {
                let delivered = tokio::select! {
                    Some(event) = created.next() => match page_info(&event.target_info) {
                        Some(info) => signals.created(info),
                        None => true,
                    },
                    Some(event) = changed.next() => match page_info(&event.target_info) {
                        Some(info) => signals.navigated(info),
                        None => true,
                    },
                    Some(event) = destroyed.next() => {
                        signals.closed(ContextId::new(event.target_id.inner().clone()))
                    }
                    else => break,
                };
                if !delivered {
                    break;
                }
            }
            tracing::debug!("Tab lifecycle listener finished");
        });

        Ok(Subscription::from_task(task))
    }
}
