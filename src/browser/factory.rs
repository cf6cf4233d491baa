// src/browser/factory.rs
//
// Builds driver instances and per-account contexts (spec.md §4.6, Testable
// Property 2: a context is closed on every exit path, including a panic
// unwinding through a held guard). `SessionGuard` wraps a `BrowserContext`
// and closes it from `Drop`, the same RAII shape the teacher uses for its
// perf-event-array readers in `loader.rs`.

use super::driver::{BrowserContext, BrowserDriver, BrowserPage, ContextOptions, DriverResult, Viewport};
use super::fingerprint::{self, Fingerprint};
use super::mock::{MockBrowserDriver, MockScript};
use super::{init_script, DriverError};
use crate::events::{Persona, ProxyConfig};
use crate::rng::SecureRng;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(feature = "live-browser")]
use super::cdp::CdpBrowserDriver;

/// Builds the driver this process will use for its lifetime: the real CDP
/// driver when compiled with `live-browser`, otherwise the in-memory mock —
/// mirroring the teacher's BPF-bytecode-or-descriptive-error fallback.
pub async fn build_driver(headless: bool) -> DriverResult<Arc<dyn BrowserDriver>> {
    #[cfg(feature = "live-browser")]
    {
        let driver = CdpBrowserDriver::launch(headless).await?;
        return Ok(Arc::new(driver));
    }
    #[cfg(not(feature = "live-browser"))]
    {
        let _ = headless;
        warn!("live-browser feature not enabled; running against the in-memory mock driver");
        Ok(Arc::new(MockBrowserDriver::new(MockScript::new())))
    }
}

/// Builds the `ContextOptions` a new session opens with. `use_medium_antidetect`
/// layers spec.md §4.6's lighter anti-debugger patch set on top of the base
/// fourteen vectors, for personas/pages known to host anti-debugger scripts;
/// both current call sites pass `false` today (neither the desktop nor
/// mobile rewards surface is known to run one), but the seam exists so a
/// future caller can flip it per-page without touching this function.
pub fn build_context_options(
    account_email: &str,
    persona: Persona,
    proxy: Option<&ProxyConfig>,
    use_medium_antidetect: bool,
    rng: &mut SecureRng,
) -> (ContextOptions, Fingerprint) {
    let fp = fingerprint::derive(account_email, persona);
    let proxy_server = proxy.map(|p| format!("{}://{}:{}", p.scheme, p.host, p.port));
    let init_scripts = if use_medium_antidetect {
        init_script::build_medium(&fp, rng)
    } else {
        init_script::build(&fp, rng)
    };
    let opts = ContextOptions {
        user_agent: fp.user_agent.clone(),
        viewport: Viewport { width: fp.viewport_width, height: fp.viewport_height },
        locale: fp.locale.clone(),
        timezone: fp.timezone.clone(),
        proxy_server,
        init_scripts,
    };
    (opts, fp)
}

/// RAII guard over a `BrowserContext`. Holding this across `?`-propagating
/// calls, timeouts, or a panic in a handler still runs `close()` on drop, so
/// a crashed activity handler never leaks an open browser context.
pub struct SessionGuard {
    context: Option<Box<dyn BrowserContext>>,
    account_email: String,
}

impl SessionGuard {
    pub async fn open(
        driver: &dyn BrowserDriver,
        account_email: impl Into<String>,
        opts: ContextOptions,
    ) -> DriverResult<Self> {
        let account_email = account_email.into();
        let context = driver.new_context(opts).await?;
        info!(account = %account_email, "browser context opened");
        Ok(Self { context: Some(context), account_email })
    }

    pub async fn new_page(&self) -> DriverResult<Box<dyn BrowserPage>> {
        self.context().await?.new_page().await
    }

    /// Borrows the underlying context for callers that need to pass it on
    /// (e.g. `activities::dispatch`, which takes `&dyn BrowserContext`).
    pub async fn context(&self) -> DriverResult<&dyn BrowserContext> {
        self.context
            .as_deref()
            .ok_or_else(|| DriverError::Backend("session already closed".to_string()))
    }

    /// Explicit close; safe to call before drop, in which case drop is a no-op.
    pub async fn close(&mut self) -> DriverResult<()> {
        if let Some(context) = self.context.take() {
            context.close().await?;
            info!(account = %self.account_email, "browser context closed");
        }
        Ok(())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            let account_email = self.account_email.clone();
            // Contexts implement Drop themselves (see mock::MockContext /
            // cdp::CdpContext), so dropping the box alone guarantees the
            // underlying resource releases even if an async close() was
            // never awaited on this path.
            drop(context);
            warn!(account = %account_email, "session guard dropped without explicit close; relying on context Drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::Viewport as V;

    fn opts() -> ContextOptions {
        ContextOptions {
            user_agent: "test".into(),
            viewport: V { width: 1280, height: 800 },
            locale: "en-US".into(),
            timezone: "UTC".into(),
            proxy_server: None,
            init_scripts: vec![],
        }
    }

    #[tokio::test]
    async fn explicit_close_releases_context() {
        let driver = MockBrowserDriver::new(MockScript::new());
        let mut guard = SessionGuard::open(&driver, "a@example.com", opts()).await.unwrap();
        assert_eq!(driver.open_context_count(), 1);
        guard.close().await.unwrap();
        assert_eq!(driver.open_context_count(), 0);
    }

    #[tokio::test]
    async fn guard_dropped_without_close_still_releases_context() {
        let driver = MockBrowserDriver::new(MockScript::new());
        {
            let _guard = SessionGuard::open(&driver, "a@example.com", opts()).await.unwrap();
            assert_eq!(driver.open_context_count(), 1);
        }
        assert_eq!(driver.open_context_count(), 0);
    }

    #[tokio::test]
    async fn context_options_vary_by_persona() {
        let mut rng = SecureRng::new();
        let (desktop_opts, _) = build_context_options("a@example.com", Persona::Desktop, None, false, &mut rng);
        let (mobile_opts, _) = build_context_options("a@example.com", Persona::Mobile, None, false, &mut rng);
        assert_ne!(desktop_opts.user_agent, mobile_opts.user_agent);
    }
}
