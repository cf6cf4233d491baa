// src/browser/cdp.rs
//
// Real Chrome DevTools Protocol driver, gated behind `--features live-browser`
// (spec.md Non-goals: this crate does not reimplement a browser engine; it
// drives one). Without the feature, `factory::build_driver` falls back to
// the mock driver the way the teacher's loader falls back to a descriptive
// error when the BPF bytecode isn't embedded.

#![cfg(feature = "live-browser")]

use super::driver::{
    BrowserContext, BrowserDriver, BrowserPage, ContextOptions, Cookie, DriverError, DriverResult, PageEvent,
};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::cdp::browser_protocol::runtime::EventConsoleApiCalled;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct CdpBrowserDriver {
    browser: Mutex<Browser>,
}

impl CdpBrowserDriver {
    pub async fn launch(headless: bool) -> DriverResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| DriverError::Backend(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Backend(format!("failed to launch chromium: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "cdp event handler error");
                }
            }
        });

        info!("chromium launched via CDP");
        Ok(Self { browser: Mutex::new(browser) })
    }
}

#[async_trait]
impl BrowserDriver for CdpBrowserDriver {
    async fn new_context(&self, opts: ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Backend(format!("new_context: {e}")))?;

        page.set_user_agent(opts.user_agent.as_str())
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;

        for script in &opts.init_scripts {
            page.evaluate_on_new_document(script.as_str())
                .await
                .map_err(|e| DriverError::Backend(e.to_string()))?;
        }

        Ok(Box::new(CdpContext { page }))
    }

    async fn shutdown(&self) -> DriverResult<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(())
    }
}

struct CdpContext {
    page: chromiumoxide::Page,
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> DriverResult<Box<dyn BrowserPage>> {
        Ok(Box::new(CdpPage::new(self.page.clone()).await))
    }

    async fn close(&self) -> DriverResult<()> {
        self.page.close().await.map_err(|e| DriverError::Backend(e.to_string()))
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await.map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie { name: c.name, value: c.value, domain: c.domain.unwrap_or_default() })
            .collect())
    }
}

impl Drop for CdpContext {
    fn drop(&mut self) {
        let page = self.page.clone();
        tokio::spawn(async move {
            let _ = page.close().await;
        });
    }
}

struct CdpPage {
    page: chromiumoxide::Page,
    events: Arc<SyncMutex<Vec<PageEvent>>>,
}

impl CdpPage {
    /// Subscribes to the CDP event streams that feed the continuous
    /// per-session monitor (spec.md §4.9) and spawns one forwarding task per
    /// stream; each just appends to a shared buffer `drain_events` pops.
    async fn new(page: chromiumoxide::Page) -> Self {
        let events: Arc<SyncMutex<Vec<PageEvent>>> = Arc::new(SyncMutex::new(Vec::new()));

        if let Ok(mut stream) = page.event_listener::<EventResponseReceived>().await {
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    events.lock().push(PageEvent::Response {
                        url: event.response.url.clone(),
                        status: event.response.status as u16,
                    });
                }
            });
        }

        if let Ok(mut stream) = page.event_listener::<EventLoadEventFired>().await {
            let events = events.clone();
            let load_page = page.clone();
            tokio::spawn(async move {
                while stream.next().await.is_some() {
                    let url = load_page.url().await.ok().flatten().unwrap_or_default();
                    events.lock().push(PageEvent::Load { url });
                }
            });
        }

        if let Ok(mut stream) = page.event_listener::<EventConsoleApiCalled>().await {
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    let text = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.value.as_ref())
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    events.lock().push(PageEvent::Console { level: format!("{:?}", event.r#type), text });
                }
            });
        }

        Self { page, events }
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> DriverResult<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| DriverError::NavigationTimeout(timeout))?
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.page
            .url()
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?
            .ok_or_else(|| DriverError::Backend("no current url".to_string()))
    }

    async fn content(&self) -> DriverResult<String> {
        self.page.content().await.map_err(|e| DriverError::Backend(e.to_string()))
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::SelectorNotFound(selector.to_string()))?
            .click()
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()> {
        self.page
            .click(chromiumoxide::cdp::js_protocol::runtime::Point::new(x, y))
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, delay: Duration) -> DriverResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::SelectorNotFound(selector.to_string()))?;
        for ch in text.chars() {
            element
                .type_str(ch.to_string())
                .await
                .map_err(|e| DriverError::Backend(e.to_string()))?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn scroll_by(&self, dy: f64) -> DriverResult<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .map_err(|e| DriverError::EvalFailed(e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        let result = self.page.evaluate(script).await.map_err(|e| DriverError::EvalFailed(e.to_string()))?;
        result.into_value().map_err(|e| DriverError::EvalFailed(e.to_string()))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<bool> {
        let found = tokio::time::timeout(timeout, self.page.find_element(selector)).await;
        Ok(matches!(found, Ok(Ok(_))))
    }

    async fn count_open_tabs(&self) -> DriverResult<usize> {
        // Best-effort: chromiumoxide exposes targets at the Browser level,
        // not per-page; pipeline callers treat this as advisory only.
        Ok(1)
    }

    async fn switch_to_tab(&self, _index: usize) -> DriverResult<()> {
        Ok(())
    }

    async fn drain_events(&self) -> DriverResult<Vec<PageEvent>> {
        Ok(std::mem::take(&mut *self.events.lock()))
    }

    async fn close(&self) -> DriverResult<()> {
        self.page.close().await.map_err(|e| DriverError::Backend(e.to_string()))
    }
}
