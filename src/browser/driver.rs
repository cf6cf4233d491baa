// src/browser/driver.rs
//
// Browser driver interface (spec.md §4.6, Non-goals: the actual browser is
// an external collaborator, not something this crate re-implements). Every
// upstream module — login, search, activities — talks to this trait, never
// to a concrete engine, so the whole pipeline runs against `mock.rs` without
// a real browser and swaps to `cdp.rs` only behind the `live-browser` feature.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("page or context closed: {0}")]
    TargetClosed(String),
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("script evaluation failed: {0}")]
    EvalFailed(String),
    #[error("driver backend error: {0}")]
    Backend(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    pub proxy_server: Option<String>,
    pub init_scripts: Vec<String>,
}

/// A browser-level handle capable of spawning isolated contexts. One
/// `BrowserDriver` per worker slot; many `BrowserContext`s over its lifetime
/// as accounts rotate through.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(&self, opts: ContextOptions) -> DriverResult<Box<dyn BrowserContext>>;
    async fn shutdown(&self) -> DriverResult<()>;
}

/// An isolated, cookie-separated session within a browser. Dropped contexts
/// must close themselves on every exit path, including panics unwinding
/// through a held guard — see `factory::SessionGuard`.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> DriverResult<Box<dyn BrowserPage>>;
    async fn close(&self) -> DriverResult<()>;
    async fn cookies(&self) -> DriverResult<Vec<Cookie>>;
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> DriverResult<()>;
    async fn current_url(&self) -> DriverResult<String>;
    async fn content(&self) -> DriverResult<String>;
    async fn click(&self, selector: &str) -> DriverResult<()>;
    async fn click_at(&self, x: f64, y: f64) -> DriverResult<()>;
    async fn type_text(&self, selector: &str, text: &str, delay: Duration) -> DriverResult<()>;
    async fn scroll_by(&self, dy: f64) -> DriverResult<()>;
    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<bool>;
    async fn count_open_tabs(&self) -> DriverResult<usize>;
    async fn switch_to_tab(&self, index: usize) -> DriverResult<()>;
    /// Drains monitor events accumulated since the last call. Implementors
    /// collect continuously (response/console/load listeners), so callers
    /// can poll at whatever cadence the pipeline needs without losing events
    /// between polls.
    async fn drain_events(&self) -> DriverResult<Vec<PageEvent>>;
    async fn close(&self) -> DriverResult<()>;
}

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Continuous per-session monitor signal (spec.md §4.9): response status
/// codes, console messages, and load completions observed since the page
/// was opened, rather than a single post-login text/url snapshot.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Response { url: String, status: u16 },
    Console { level: String, text: String },
    Load { url: String },
}
