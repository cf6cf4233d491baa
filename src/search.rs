// src/search.rs
//
// Search engine (spec.md §4.10). `QuerySource` mirrors the teacher's
// pattern of composing small, independently swappable providers; three
// implementors are tried in order and deduplicated as queries accumulate.

use crate::browser::{BrowserPage, DriverError};
use crate::events::Persona;
use crate::rng::SecureRng;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STALL_LIMIT: u32 = 5;
const REFETCH_EVERY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBucketOutcome {
    /// Target point progress reached (or was already ≤ 0 on entry).
    Complete,
    /// Progress stalled for `STALL_LIMIT` consecutive queries; caller may retry.
    Stalled,
}

/// Runs the search execution loop for one persona (spec.md §4.10): issues
/// queries against the rewards-bearing search endpoint until the bucket's
/// point target is met or progress stalls. `fetch_progress` re-reads the
/// live point-progress counter (via a dashboard re-fetch, hence async); it
/// is injected rather than hard-coded so this stays testable against the
/// mock driver.
pub async fn run_search_bucket<F, Fut>(
    page: &dyn BrowserPage,
    persona: Persona,
    target_remaining: i64,
    queries: &[String],
    per_session_max: u32,
    rng: &mut SecureRng,
    mut fetch_progress: F,
) -> Result<SearchBucketOutcome, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = i64>,
{
    if target_remaining <= 0 {
        return Ok(SearchBucketOutcome::Complete);
    }

    let mut remaining = target_remaining;
    let mut stalled_queries = 0u32;
    let mut issued = 0u32;

    for query in queries {
        if remaining <= 0 {
            return Ok(SearchBucketOutcome::Complete);
        }
        if per_session_max > 0 && issued >= per_session_max {
            warn!(persona = %persona, per_session_max, remaining, "per-session query cap reached; caller should rotate context");
            return Ok(SearchBucketOutcome::Stalled);
        }

        let endpoint = search_endpoint_url(persona, query);
        page.goto(&endpoint, Duration::from_secs(15)).await?;
        page.wait_for_selector("#b_results", Duration::from_secs(5)).await?;

        let dwell_ms = rng.human_variance(4000.0, 0.3, 0.05);
        tokio::time::sleep(Duration::from_millis(dwell_ms as u64)).await;

        issued += 1;
        if issued % REFETCH_EVERY == 0 {
            let new_remaining = fetch_progress().await;
            if new_remaining == remaining {
                stalled_queries += 1;
            } else {
                stalled_queries = 0;
            }
            remaining = new_remaining;
            if stalled_queries >= STALL_LIMIT && remaining > 0 {
                warn!(persona = %persona, remaining, "search progress stalled; aborting bucket");
                return Ok(SearchBucketOutcome::Stalled);
            }
        }
    }

    let final_remaining = fetch_progress().await;
    if final_remaining <= 0 {
        info!(persona = %persona, "search bucket complete");
        Ok(SearchBucketOutcome::Complete)
    } else {
        warn!(persona = %persona, remaining = final_remaining, "exhausted query list before target reached");
        Ok(SearchBucketOutcome::Stalled)
    }
}

fn search_endpoint_url(persona: Persona, query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    let form = match persona {
        Persona::Desktop => "PCSRC1",
        Persona::Mobile => "MOZSRC1",
    };
    format!("https://www.bing.com/search?q={encoded}&form={form}")
}

#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn fetch(&self, count: usize) -> Vec<String>;
}

const FALLBACK_LEXICON: &[&str] = &[
    "weather today",
    "top news headlines",
    "local restaurants near me",
    "movie showtimes",
    "sports scores today",
    "stock market update",
    "recipe ideas for dinner",
    "flight status tracker",
    "currency exchange rate",
    "tech news this week",
    "best hiking trails nearby",
    "upcoming holidays calendar",
    "how to fix a flat tire",
    "new music releases",
    "home improvement tips",
];

pub struct LocalLexiconSource;

#[async_trait]
impl QuerySource for LocalLexiconSource {
    async fn fetch(&self, count: usize) -> Vec<String> {
        FALLBACK_LEXICON.iter().take(count).map(|s| s.to_string()).collect()
    }
}

pub struct HeadlinePhraseSource {
    pub headlines: Vec<String>,
}

#[async_trait]
impl QuerySource for HeadlinePhraseSource {
    async fn fetch(&self, count: usize) -> Vec<String> {
        let mut out = Vec::new();
        for headline in self.headlines.iter().take(count.div_ceil(2).max(1)) {
            out.push(format!("what is {headline}"));
            if headline.contains(' ') {
                let mut parts = headline.splitn(2, ' ');
                let a = parts.next().unwrap_or_default();
                let b = parts.next().unwrap_or_default();
                if !b.is_empty() {
                    out.push(format!("{a} vs {b}"));
                }
            }
            if out.len() >= count {
                break;
            }
        }
        out.truncate(count);
        out
    }
}

struct TrendsCacheEntry {
    fetched_at: Instant,
    topics: Vec<String>,
}

/// Locale-appropriate trending topics, refreshed at most once an hour and
/// served stale (rather than failing) when the upstream source errors.
pub struct TrendingTopicsSource {
    client: reqwest::Client,
    endpoint: String,
    cache: Mutex<Option<TrendsCacheEntry>>,
}

static TRENDS_TTL: Lazy<Duration> = Lazy::new(|| Duration::from_secs(3600));

impl TrendingTopicsSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(8))
                .build()
                .expect("reqwest client always builds with static config"),
            endpoint: endpoint.into(),
            cache: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Option<Vec<String>> {
        let response = self.client.get(&self.endpoint).send().await.ok()?;
        let topics: Vec<String> = response.json().await.ok()?;
        Some(topics)
    }
}

#[async_trait]
impl QuerySource for TrendingTopicsSource {
    async fn fetch(&self, count: usize) -> Vec<String> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < *TRENDS_TTL {
                    return entry.topics.iter().take(count).cloned().collect();
                }
            }
        }

        match self.refresh().await {
            Some(topics) => {
                let result = topics.iter().take(count).cloned().collect();
                *self.cache.lock() = Some(TrendsCacheEntry { fetched_at: Instant::now(), topics });
                result
            }
            None => {
                warn!("trending topics fetch failed; serving stale cache or empty");
                self.cache
                    .lock()
                    .as_ref()
                    .map(|e| e.topics.iter().take(count).cloned().collect())
                    .unwrap_or_default()
            }
        }
    }
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Case-insensitive, whitespace-collapsed dedup that also drops a query
/// whose normalized leading-token sequence matches a prior query's.
pub struct QueryDeduper {
    seen_exact: HashSet<String>,
    seen_prefixes: Vec<Vec<String>>,
}

impl Default for QueryDeduper {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryDeduper {
    pub fn new() -> Self {
        Self { seen_exact: HashSet::new(), seen_prefixes: Vec::new() }
    }

    pub fn accept(&mut self, query: &str) -> Option<String> {
        let normalized = normalize(query);
        if normalized.is_empty() || self.seen_exact.contains(&normalized) {
            return None;
        }
        let tokens: Vec<String> = normalized.split(' ').map(str::to_string).collect();
        let leading_len = tokens.len().min(3);
        let leading = &tokens[..leading_len];
        if self.seen_prefixes.iter().any(|p| p.len() >= leading_len && p[..leading_len] == *leading) {
            return None;
        }
        self.seen_exact.insert(normalized);
        self.seen_prefixes.push(tokens);
        Some(query.to_string())
    }
}

/// Produces up to `n` distinct queries, trying sources in priority order and
/// filling any shortfall from the next source.
pub async fn gather_queries(sources: &[&dyn QuerySource], n: usize) -> Vec<String> {
    let mut deduper = QueryDeduper::new();
    let mut out = Vec::new();
    for source in sources {
        if out.len() >= n {
            break;
        }
        let need = n - out.len();
        for candidate in source.fetch(need * 2).await {
            if out.len() >= n {
                break;
            }
            if let Some(accepted) = deduper.accept(&candidate) {
                out.push(accepted);
            }
        }
    }
    debug!(count = out.len(), requested = n, "gathered search queries");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{ContextOptions, Viewport};
    use crate::browser::mock::{MockBrowserDriver, MockScript};
    use crate::browser::BrowserDriver;

    fn opts() -> ContextOptions {
        ContextOptions {
            user_agent: "t".into(),
            viewport: Viewport { width: 1280, height: 800 },
            locale: "en-US".into(),
            timezone: "UTC".into(),
            proxy_server: None,
            init_scripts: vec![],
        }
    }

    #[tokio::test]
    async fn zero_target_completes_without_any_navigation() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script.clone());
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        let mut rng = SecureRng::new();

        let outcome = run_search_bucket(
            page.as_ref(),
            Persona::Desktop,
            0,
            &["weather".to_string()],
            0,
            &mut rng,
            || async { 0 },
        )
        .await
        .unwrap();
        assert_eq!(outcome, SearchBucketOutcome::Complete);
        assert!(script.nav_log.read().is_empty());
    }

    #[tokio::test]
    async fn reaching_target_marks_complete() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script.clone());
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        let mut rng = SecureRng::new();
        let queries: Vec<String> = (0..3).map(|i| format!("query {i}")).collect();

        let outcome = run_search_bucket(page.as_ref(), Persona::Desktop, 30, &queries, 0, &mut rng, || async { 0 })
            .await
            .unwrap();
        assert_eq!(outcome, SearchBucketOutcome::Complete);
        assert_eq!(script.nav_log.read().len(), 3);
    }

    #[tokio::test]
    async fn stalled_progress_returns_stalled() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script.clone());
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        let mut rng = SecureRng::new();
        let queries: Vec<String> = (0..20).map(|i| format!("query {i}")).collect();

        let outcome = run_search_bucket(page.as_ref(), Persona::Mobile, 50, &queries, 0, &mut rng, || async { 50 })
            .await
            .unwrap();
        assert_eq!(outcome, SearchBucketOutcome::Stalled);
    }

    #[tokio::test]
    async fn per_session_cap_stalls_before_exhausting_queries() {
        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script.clone());
        let ctx = driver.new_context(opts()).await.unwrap();
        let page = ctx.new_page().await.unwrap();
        let mut rng = SecureRng::new();
        let queries: Vec<String> = (0..10).map(|i| format!("query {i}")).collect();

        let outcome = run_search_bucket(page.as_ref(), Persona::Mobile, 100, &queries, 2, &mut rng, || async { 100 })
            .await
            .unwrap();
        assert_eq!(outcome, SearchBucketOutcome::Stalled);
        assert_eq!(script.nav_log.read().len(), 2);
    }

    #[tokio::test]
    async fn local_lexicon_returns_requested_count() {
        let source = LocalLexiconSource;
        let queries = source.fetch(5).await;
        assert_eq!(queries.len(), 5);
    }

    #[tokio::test]
    async fn headline_source_generates_what_is_and_vs_variants() {
        let source = HeadlinePhraseSource { headlines: vec!["apple event".to_string()] };
        let queries = source.fetch(4).await;
        assert!(queries.iter().any(|q| q.starts_with("what is")));
        assert!(queries.iter().any(|q| q.contains(" vs ")));
    }

    #[test]
    fn deduper_rejects_case_and_whitespace_variants() {
        let mut deduper = QueryDeduper::new();
        assert!(deduper.accept("Weather Today").is_some());
        assert!(deduper.accept("weather   today").is_none());
    }

    #[test]
    fn deduper_rejects_shared_leading_tokens() {
        let mut deduper = QueryDeduper::new();
        assert!(deduper.accept("best hiking trails nearby").is_some());
        assert!(deduper.accept("best hiking trails this weekend").is_none());
    }

    #[tokio::test]
    async fn gather_queries_fills_shortfall_from_fallback() {
        let headline = HeadlinePhraseSource { headlines: vec![] };
        let local = LocalLexiconSource;
        let sources: Vec<&dyn QuerySource> = vec![&headline, &local];
        let queries = gather_queries(&sources, 5).await;
        assert_eq!(queries.len(), 5);
    }
}
