// src/dashboard.rs
//
// Read-mostly HTTP surface (spec.md §4.14/§6). `axum` + `tower-http` aren't
// part of the teacher's own dependency tree — no example repo in it ships a
// server crate — so this is pulled from the wider pack: dropbox-dTOOL's
// `dashflow-registry` carries `axum::Router` + `tower_http` for exactly this
// "status/metrics/control surface" role, and that is the shape followed
// here (state struct, `nest`ed route modules merged into one router, one
// handler per resource). The ring-buffered log is the same bounded,
// overwrite-oldest shape the teacher's `StateStore` windows use
// (`expire_old`/cap rather than grow unbounded), just capturing `tracing`
// events instead of API events.

use crate::accounts::AccountStore;
use crate::config::Config;
use crate::events::AccountHistoryEntry;
use crate::history::AccountHistoryStore;
use crate::jobstate::JobStateStore;
use crate::orchestrator::Orchestrator;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const DEFAULT_LOG_LIMIT: usize = 200;
const FIXED_CONFIG_WRITE_MESSAGE: &str = "edit file manually";

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Capacity-bounded, overwrite-oldest log buffer fed by a `tracing_subscriber`
/// layer so the dashboard can show recent activity without tailing a file.
pub struct LogRing {
    lines: RwLock<VecDeque<LogLine>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { lines: RwLock::new(VecDeque::with_capacity(capacity)), capacity })
    }

    fn push(&self, line: LogLine) {
        let mut lines = self.lines.write();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self, limit: usize) -> Vec<LogLine> {
        let lines = self.lines.read();
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.write().clear();
    }
}

/// `tracing_subscriber::Layer` that mirrors every event into a `LogRing`.
/// Install with `.with(LogRingLayer::new(ring))` alongside the normal
/// `fmt` layer in `main.rs`.
pub struct LogRingLayer {
    ring: Arc<LogRing>,
}

impl LogRingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if self.message.is_empty() {
            self.message = format!("{}={:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.ring.push(LogLine {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

#[derive(Clone)]
pub struct DashboardState {
    orchestrator: Arc<Orchestrator>,
    config: Arc<Config>,
    accounts: Arc<AccountStore>,
    job_state: Arc<JobStateStore>,
    history: Arc<AccountHistoryStore>,
    log_ring: Arc<LogRing>,
    started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        config: Arc<Config>,
        accounts: Arc<AccountStore>,
        job_state: Arc<JobStateStore>,
        history: Arc<AccountHistoryStore>,
        log_ring: Arc<LogRing>,
    ) -> Self {
        Self { orchestrator, config, accounts, job_state, history, log_ring, started_at: Utc::now() }
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/accounts", get(get_accounts))
        .route("/api/logs", get(get_logs).delete(delete_logs))
        .route("/api/history", get(get_history))
        .route("/api/metrics", get(get_metrics))
        .route("/api/memory", get(get_memory))
        .route("/api/account-history", get(get_history))
        .route("/api/account-history/:email", get(get_account_history))
        .route("/api/account-stats/:email", get(get_account_stats))
        .route("/api/stats/historical", get(get_stats_historical))
        .route("/api/stats/activity-breakdown", get(get_stats_activity_breakdown))
        .route("/api/stats/global", get(get_stats_global))
        .route("/api/start", post(post_start))
        .route("/api/stop", post(post_stop))
        .route("/api/restart", post(post_restart))
        .route("/api/run-single", post(post_run_single))
        .route("/api/account/:email/reset", post(post_account_reset))
        .route("/api/reset-state", post(post_reset_state))
        .route("/api/config", post(reject_config_write).put(reject_config_write))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── reads ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusResponse {
    uptime_seconds: i64,
    global_standby: bool,
    stop_requested: bool,
    dashboard_enabled: bool,
}

async fn get_status(State(state): State<DashboardState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        global_standby: state.orchestrator.global_standby(),
        stop_requested: state.orchestrator.stop_requested(),
        dashboard_enabled: state.config.dashboard.enabled,
    })
}

async fn get_accounts(State(state): State<DashboardState>) -> Response {
    match state.accounts.load() {
        Ok(accounts) => Json(accounts).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn get_logs(State(state): State<DashboardState>, Query(q): Query<LogQuery>) -> Json<Vec<LogLine>> {
    Json(state.log_ring.snapshot(q.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

async fn delete_logs(State(state): State<DashboardState>) -> StatusCode {
    state.log_ring.clear();
    StatusCode::NO_CONTENT
}

async fn get_history(State(state): State<DashboardState>) -> Response {
    match recent_history_across_accounts(&state, 20) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_account_history(State(state): State<DashboardState>, Path(email): Path<String>) -> Response {
    match state.history.read_recent(&email, 50) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Serialize)]
struct AccountStats {
    email: String,
    units_completed_today: usize,
}

async fn get_account_stats(State(state): State<DashboardState>, Path(email): Path<String>) -> Response {
    match state.job_state.units_completed_today(&email) {
        Ok(units_completed_today) => Json(AccountStats { email, units_completed_today }).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct DaysQuery {
    days: Option<i64>,
}

async fn get_stats_historical(State(state): State<DashboardState>, Query(q): Query<DaysQuery>) -> Response {
    let days = q.days.unwrap_or(7).max(1);
    match recent_history_across_accounts(&state, 500) {
        Ok(entries) => {
            let cutoff = Utc::now() - chrono::Duration::days(days);
            let kept: Vec<_> = entries.into_iter().filter(|e| e.timestamp >= cutoff).collect();
            Json(kept).into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Serialize, Default)]
struct ActivityBreakdown {
    completed: u32,
    failed: u32,
    total_points: u64,
}

async fn get_stats_activity_breakdown(
    State(state): State<DashboardState>,
    Query(q): Query<DaysQuery>,
) -> Response {
    let days = q.days.unwrap_or(7).max(1);
    match recent_history_across_accounts(&state, 500) {
        Ok(entries) => {
            let cutoff = Utc::now() - chrono::Duration::days(days);
            let breakdown = entries.into_iter().filter(|e| e.timestamp >= cutoff).fold(
                ActivityBreakdown::default(),
                |mut acc, e| {
                    acc.completed += e.completed;
                    acc.failed += e.failed;
                    acc.total_points += e.total_points;
                    acc
                },
            );
            Json(breakdown).into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Serialize)]
struct GlobalStats {
    accounts_enabled: usize,
    lifetime_completed: u32,
    lifetime_failed: u32,
    lifetime_points: u64,
}

async fn get_stats_global(State(state): State<DashboardState>) -> Response {
    match recent_history_across_accounts(&state, 5000) {
        Ok(entries) => {
            let accounts_enabled = state.accounts.load().map(|a| a.len()).unwrap_or(0);
            let (lifetime_completed, lifetime_failed, lifetime_points) =
                entries.iter().fold((0u32, 0u32, 0u64), |(c, f, p), e| {
                    (c + e.completed, f + e.failed, p + e.total_points)
                });
            Json(GlobalStats { accounts_enabled, lifetime_completed, lifetime_failed, lifetime_points })
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Serialize)]
struct MemoryStats {
    resident_kb: Option<u64>,
}

async fn get_memory() -> Json<MemoryStats> {
    Json(MemoryStats { resident_kb: read_resident_memory_kb() })
}

#[cfg(target_os = "linux")]
fn read_resident_memory_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4)
}

#[cfg(not(target_os = "linux"))]
fn read_resident_memory_kb() -> Option<u64> {
    None
}

fn recent_history_across_accounts(
    state: &DashboardState,
    per_account_limit: usize,
) -> anyhow::Result<Vec<AccountHistoryEntry>> {
    let accounts = state.accounts.load()?;
    let mut entries = Vec::new();
    for account in accounts {
        entries.extend(state.history.read_recent(&account.email, per_account_limit)?);
    }
    entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
    Ok(entries)
}

// ── writes ────────────────────────────────────────────────────────────────

async fn post_start(State(state): State<DashboardState>) -> StatusCode {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run().await {
            tracing::error!(error = %e, "dashboard-triggered run failed");
        }
    });
    StatusCode::ACCEPTED
}

async fn post_stop(State(state): State<DashboardState>) -> StatusCode {
    state.orchestrator.request_stop();
    StatusCode::OK
}

async fn post_restart(State(state): State<DashboardState>) -> StatusCode {
    state.orchestrator.reset();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run().await {
            tracing::error!(error = %e, "dashboard-triggered restart failed");
        }
    });
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
struct RunSingleRequest {
    email: String,
}

async fn post_run_single(
    State(state): State<DashboardState>,
    Json(req): Json<RunSingleRequest>,
) -> StatusCode {
    let orchestrator = state.orchestrator.clone();
    let email = req.email;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_single(&email).await {
            tracing::error!(account = %email, error = %e, "dashboard-triggered single run failed");
        }
    });
    StatusCode::ACCEPTED
}

async fn post_account_reset(State(state): State<DashboardState>, Path(email): Path<String>) -> Response {
    match state.job_state.reset_today(&email) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn post_reset_state(State(state): State<DashboardState>) -> Response {
    match state.job_state.reset_all_today() {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// Config is edited by hand on disk, never through the API (spec.md §6).
async fn reject_config_write() -> Response {
    (StatusCode::FORBIDDEN, Json(serde_json::json!({ "error": FIXED_CONFIG_WRITE_MESSAGE }))).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban::BanDetector;
    use crate::browser::mock::{MockBrowserDriver, MockScript};
    use crate::browser::BrowserDriver;
    use crate::notify::{LoggedTransport, NotificationSink};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> DashboardState {
        std::fs::write(
            dir.join("accounts.jsonc"),
            r#"{"accounts":[{"email":"a@example.com","password":"pw","enabled":true}]}"#,
        )
        .unwrap();
        let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(MockScript::new()));
        let accounts = Arc::new(AccountStore::new(dir.join("accounts.jsonc")));
        let job_state = Arc::new(JobStateStore::new(dir.join("jobs")));
        let history = Arc::new(AccountHistoryStore::new(dir.join("history")));
        let config = Arc::new(Config::default());
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            accounts.clone(),
            job_state.clone(),
            history.clone(),
            Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
            Arc::new(BanDetector::new(AccountStore::new(dir.join("accounts.jsonc")))),
            driver,
        ));
        DashboardState::new(orchestrator, config, accounts, job_state, history, LogRing::new(64))
    }

    #[tokio::test]
    async fn status_reports_uptime_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn config_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stop_then_status_reports_stop_requested() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let stop = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/api/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(stop.status(), StatusCode::OK);

        let status = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
    }

    #[test]
    fn log_ring_drops_oldest_past_capacity() {
        let ring = LogRing::new(2);
        for i in 0..5 {
            ring.push(LogLine { timestamp: Utc::now(), level: "INFO".into(), target: "t".into(), message: i.to_string() });
        }
        let snapshot = ring.snapshot(10);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].message, "3");
        assert_eq!(snapshot[1].message, "4");
    }
}
