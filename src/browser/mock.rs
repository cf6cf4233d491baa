// src/browser/mock.rs
//
// In-memory BrowserDriver used by default and by every test in this crate
// (spec.md Non-goals: no real browser engine ships here). A `MockScript` is
// shared across contexts/pages so a test can pre-seed navigation responses,
// selector presence, and `evaluate()` results, then assert on the recorded
// navigation/click/type logs afterward.

use super::driver::{
    BrowserContext, BrowserDriver, BrowserPage, ContextOptions, Cookie, DriverError, DriverResult, PageEvent,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockScript {
    pub page_content: RwLock<HashMap<String, String>>,
    pub eval_results: RwLock<HashMap<String, serde_json::Value>>,
    /// Per-key queue of values to hand out one at a time, oldest first,
    /// before falling back to `eval_results`. Lets a test express a
    /// dashboard counter that decreases across successive `evaluate()`
    /// calls instead of a single static value.
    pub eval_sequence: RwLock<HashMap<String, VecDeque<serde_json::Value>>>,
    pub selectors_present: RwLock<std::collections::HashSet<String>>,
    pub redirects: RwLock<HashMap<String, String>>,
    /// HTTP status a `goto()` to a matching URL reports via `drain_events`;
    /// 200 when unset.
    pub response_status: RwLock<HashMap<String, u16>>,
    /// Console messages queued for the next `goto()` to emit, oldest first.
    pub console_queue: RwLock<VecDeque<(String, String)>>,
    pub nav_log: RwLock<Vec<String>>,
    pub click_log: RwLock<Vec<String>>,
    pub type_log: RwLock<Vec<(String, String)>>,
    pub scroll_log: RwLock<Vec<f64>>,
    pub open_tabs: RwLock<usize>,
}

impl MockScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { open_tabs: RwLock::new(1), ..Default::default() })
    }

    pub fn set_page(&self, url_contains: &str, html: &str) {
        self.page_content.write().insert(url_contains.to_string(), html.to_string());
    }

    /// Registers a server-side redirect: any `goto()` whose requested URL
    /// contains `from_contains` lands on `to_url` instead, the same way an
    /// unauthenticated hit on the dashboard bounces to the sign-in page.
    pub fn set_redirect(&self, from_contains: &str, to_url: &str) {
        self.redirects.write().insert(from_contains.to_string(), to_url.to_string());
    }

    fn redirect_for(&self, url: &str) -> Option<String> {
        for (k, v) in self.redirects.read().iter() {
            if url.contains(k.as_str()) {
                return Some(v.clone());
            }
        }
        None
    }

    pub fn set_eval(&self, script_contains: &str, value: serde_json::Value) {
        self.eval_results.write().insert(script_contains.to_string(), value);
    }

    /// Queues a sequence of values for a key; each matching `evaluate()`
    /// call pops the next one. Once the queue is drained, lookups fall
    /// back to whatever `set_eval` (if any) registered for the same key.
    pub fn set_eval_sequence(&self, script_contains: &str, values: Vec<serde_json::Value>) {
        self.eval_sequence.write().insert(script_contains.to_string(), VecDeque::from(values));
    }

    /// Makes the next (and every later) `goto()` whose URL contains
    /// `url_contains` report `status` instead of the default 200.
    pub fn set_response_status(&self, url_contains: &str, status: u16) {
        self.response_status.write().insert(url_contains.to_string(), status);
    }

    fn status_for(&self, url: &str) -> u16 {
        for (k, v) in self.response_status.read().iter() {
            if url.contains(k.as_str()) {
                return *v;
            }
        }
        200
    }

    /// Queues a console message the next `goto()` will surface via
    /// `drain_events`.
    pub fn queue_console(&self, level: &str, text: &str) {
        self.console_queue.write().push_back((level.to_string(), text.to_string()));
    }

    pub fn set_selector_present(&self, selector: &str, present: bool) {
        let mut set = self.selectors_present.write();
        if present {
            set.insert(selector.to_string());
        } else {
            set.remove(selector);
        }
    }

    fn content_for(&self, url: &str) -> String {
        for (k, v) in self.page_content.read().iter() {
            if url.contains(k.as_str()) {
                return v.clone();
            }
        }
        String::new()
    }

    fn eval_for(&self, script: &str) -> serde_json::Value {
        {
            let mut sequences = self.eval_sequence.write();
            for (k, queue) in sequences.iter_mut() {
                if script.contains(k.as_str()) {
                    if let Some(v) = queue.pop_front() {
                        return v;
                    }
                    break;
                }
            }
        }
        for (k, v) in self.eval_results.read().iter() {
            if script.contains(k.as_str()) {
                return v.clone();
            }
        }
        serde_json::Value::Null
    }
}

pub struct MockBrowserDriver {
    script: Arc<MockScript>,
    contexts_open: Arc<AtomicUsize>,
    shut_down: AtomicBool,
}

impl MockBrowserDriver {
    pub fn new(script: Arc<MockScript>) -> Self {
        Self { script, contexts_open: Arc::new(AtomicUsize::new(0)), shut_down: AtomicBool::new(false) }
    }

    pub fn open_context_count(&self) -> usize {
        self.contexts_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn new_context(&self, _opts: ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("driver already shut down".to_string()));
        }
        self.contexts_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            script: self.script.clone(),
            contexts_open: self.contexts_open.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) -> DriverResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockContext {
    script: Arc<MockScript>,
    contexts_open: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> DriverResult<Box<dyn BrowserPage>> {
        Ok(Box::new(MockPage {
            script: self.script.clone(),
            url: RwLock::new(String::new()),
            events: RwLock::new(Vec::new()),
        }))
    }

    async fn close(&self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.contexts_open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        Ok(Vec::new())
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.contexts_open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MockPage {
    script: Arc<MockScript>,
    url: RwLock<String>,
    events: RwLock<Vec<PageEvent>>,
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> DriverResult<()> {
        let landed = self.script.redirect_for(url).unwrap_or_else(|| url.to_string());
        *self.url.write() = landed.clone();
        self.script.nav_log.write().push(landed.clone());

        let status = self.script.status_for(&landed);
        let mut events = self.events.write();
        events.push(PageEvent::Response { url: landed.clone(), status });
        events.push(PageEvent::Load { url: landed });
        while let Some((level, text)) = self.script.console_queue.write().pop_front() {
            events.push(PageEvent::Console { level, text });
        }
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.url.read().clone())
    }

    async fn content(&self) -> DriverResult<String> {
        Ok(self.script.content_for(&self.url.read()))
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        self.script.click_log.write().push(selector.to_string());
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()> {
        self.script.click_log.write().push(format!("({x},{y})"));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, _delay: Duration) -> DriverResult<()> {
        self.script.type_log.write().push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn scroll_by(&self, dy: f64) -> DriverResult<()> {
        self.script.scroll_log.write().push(dy);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        Ok(self.script.eval_for(script))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> DriverResult<bool> {
        Ok(self.script.selectors_present.read().contains(selector))
    }

    async fn count_open_tabs(&self) -> DriverResult<usize> {
        Ok(*self.script.open_tabs.read())
    }

    async fn switch_to_tab(&self, _index: usize) -> DriverResult<()> {
        Ok(())
    }

    async fn drain_events(&self) -> DriverResult<Vec<PageEvent>> {
        Ok(std::mem::take(&mut *self.events.write()))
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::Viewport;

    fn opts() -> ContextOptions {
        ContextOptions {
            user_agent: "test-agent".into(),
            viewport: Viewport { width: 1280, height: 800 },
            locale: "en-US".into(),
            timezone: "UTC".into(),
            proxy_server: None,
            init_scripts: vec![],
        }
    }

    #[tokio::test]
    async fn context_close_decrements_open_count() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script);
        let ctx = driver.new_context(opts()).await.unwrap();
        assert_eq!(driver.open_context_count(), 1);
        ctx.close().await.unwrap();
        assert_eq!(driver.open_context_count(), 0);
    }

    #[tokio::test]
    async fn context_drop_without_explicit_close_still_decrements() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script);
        {
            let _ctx = driver.new_context(opts()).await.unwrap();
            assert_eq!(driver.open_context_count(), 1);
        }
        assert_eq!(driver.open_context_count(), 0);
    }

    #[tokio::test]
    async fn scripted_content_returned_by_url_substring() {
        let script = MockScript::new();
        script.set_page("rewards.microsoft.com", "<html>dashboard</html>");
        let driver = MockBrowserDriver::new(script);
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        page.goto("https://rewards.microsoft.com/dashboard", Duration::from_secs(5)).await.unwrap();
        assert_eq!(page.content().await.unwrap(), "<html>dashboard</html>");
    }

    #[tokio::test]
    async fn drain_events_reports_response_status_and_queued_console() {
        let script = MockScript::new();
        script.set_response_status("rewards.microsoft.com", 403);
        script.queue_console("error", "blocked by policy");
        let driver = MockBrowserDriver::new(script);
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        page.goto("https://rewards.microsoft.com/", Duration::from_secs(5)).await.unwrap();

        let events = page.drain_events().await.unwrap();
        assert!(matches!(
            events.iter().find(|e| matches!(e, PageEvent::Response { .. })),
            Some(PageEvent::Response { status: 403, .. })
        ));
        assert!(events.iter().any(|e| matches!(e, PageEvent::Console { level, text } if level == "error" && text == "blocked by policy")));
        assert!(events.iter().any(|e| matches!(e, PageEvent::Load { .. })));

        // a second drain without an intervening goto() is empty.
        assert!(page.drain_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn goto_follows_registered_redirect() {
        let script = MockScript::new();
        script.set_redirect("rewards.microsoft.com", "https://login.live.com/");
        script.set_page("login.live.com", "<title>sign in</title>");
        let driver = MockBrowserDriver::new(script.clone());
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        page.goto("https://rewards.microsoft.com/", Duration::from_secs(5)).await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://login.live.com/");
        assert_eq!(script.nav_log.read().as_slice(), ["https://login.live.com/"]);
    }
}
