// tests/pipeline_scenarios.rs
//
// Cross-module scenarios driving the full per-account pipeline and the
// orchestrator's account-spawn loop against a scripted browser driver, the
// same way the teacher's replay mode drives its own pipeline from canned
// input instead of a live source. Each test scripts a `MockScript`, runs the
// real collaborator stack, and asserts on the externally observable state:
// pipeline outcome, job-state claims, account-history entries, the account
// file's `enabled` flag, and the process-wide standby switch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rewards_orchestrator::accounts::AccountStore;
use rewards_orchestrator::ban::{self, BanDetector, Signal};
use rewards_orchestrator::browser::mock::{MockBrowserDriver, MockScript};
use rewards_orchestrator::browser::BrowserDriver;
use rewards_orchestrator::config::Config;
use rewards_orchestrator::events::{Account, BanSeverity};
use rewards_orchestrator::history::AccountHistoryStore;
use rewards_orchestrator::jobstate::JobStateStore;
use rewards_orchestrator::notify::{LoggedTransport, NotificationSink};
use rewards_orchestrator::orchestrator::Orchestrator;
use rewards_orchestrator::pipeline::{self, PipelineContext, PipelineOutcome};
use rewards_orchestrator::rng::SecureRng;

fn account(email: &str) -> Account {
    Account {
        email: email.to_string(),
        password: "pw".to_string(),
        totp_seed: None,
        proxy: None,
        recovery_email: Some(format!("recovery-{email}")),
        phone_number: None,
        enabled: true,
    }
}

fn account_file(dir: &std::path::Path, emails: &[&str]) -> std::path::PathBuf {
    let path = dir.join("accounts.jsonc");
    let entries: Vec<String> = emails
        .iter()
        .map(|email| format!(r#"{{"email":"{email}","password":"pw","enabled":true}}"#))
        .collect();
    std::fs::write(&path, format!(r#"{{"accounts":[{}]}}"#, entries.join(","))).unwrap();
    path
}

fn dashboard_json(pc_remaining: i64, mobile_remaining: i64) -> serde_json::Value {
    let pc_progress = (150 - pc_remaining).max(0);
    let mobile_progress = (100 - mobile_remaining).max(0);
    serde_json::json!({
        "user_status": {"available_points": 0},
        "counters": {
            "mobileSearch": [{"point_progress": mobile_progress, "point_progress_max": 100}],
            "pcSearch": [{"point_progress": pc_progress, "point_progress_max": 150}]
        },
        "more_promotions": [],
        "daily_set": {},
        "punch_cards": []
    })
}

fn pipeline_context(dir: &std::path::Path, script: Arc<MockScript>) -> PipelineContext {
    let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(script));
    PipelineContext {
        config: Arc::new(Config::default()),
        accounts: Arc::new(AccountStore::new(dir.join("accounts.jsonc"))),
        job_state: Arc::new(JobStateStore::new(dir.join("jobs"))),
        history: Arc::new(AccountHistoryStore::new(dir.join("history"))),
        notifier: Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
        ban_detector: Arc::new(BanDetector::new(AccountStore::new(dir.join("accounts.jsonc")))),
        driver,
        rng: SecureRng::new(),
    }
}

/// Happy path: an account with outstanding desktop and mobile search point
/// targets finishes both buckets and lands at `Completed` with every point
/// accounted for in the resulting history entry.
#[tokio::test]
async fn happy_path_completes_desktop_and_mobile_search() {
    let script = MockScript::new();
    script.set_selector_present("[data-testid=rewards-portal]", true);
    script.set_eval("window.__rewardsOAuthToken", serde_json::json!("token-abc"));
    script.set_eval_sequence(
        "__rewardsDashboardData",
        vec![
            dashboard_json(150, 100), // initial fetch at step 4
            dashboard_json(0, 100),   // desktop bucket's only refetch: target reached
            dashboard_json(0, 0),     // mobile bucket's only refetch: target reached
        ],
    );

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com"]);
    let mut ctx = pipeline_context(dir.path(), script.clone());
    // Pre-claim the check-in unit: it drives a real HTTP POST with no mock
    // seam, so it must never fire in a test.
    ctx.job_state.try_claim("a@example.com", "daily_checkin", 0).unwrap();
    let standby = AtomicBool::new(false);

    let outcome = pipeline::run_account(&mut ctx, &account("a@example.com"), 1, &standby).await;
    assert_eq!(outcome, PipelineOutcome::Completed);

    let entries = ctx.history.read_recent("a@example.com", 1).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.desktop_points, 150);
    assert_eq!(entry.mobile_points, 100);
    assert_eq!(entry.total_points, 250);
    assert_eq!(entry.completed, 2);
    assert_eq!(entry.failed, 0);
    assert!(entry.success);

    assert!(ctx.job_state.is_claimed("a@example.com", "search:desktop").unwrap());
    assert!(ctx.job_state.is_claimed("a@example.com", "search:mobile").unwrap());
}

/// Once both search buckets (and the daily check-in) are already claimed
/// today and the dashboard itself reports nothing left to earn, the pipeline
/// returns `AlreadyDone` without ever opening a search page.
#[tokio::test]
async fn already_done_skips_search_entirely() {
    let script = MockScript::new();
    script.set_selector_present("[data-testid=rewards-portal]", true);
    script.set_eval("__rewardsDashboardData", dashboard_json(0, 0));
    let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(script.clone()));

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com"]);
    let job_state = Arc::new(JobStateStore::new(dir.path().join("jobs")));
    job_state.try_claim("a@example.com", "search:desktop", 150).unwrap();
    job_state.try_claim("a@example.com", "search:mobile", 100).unwrap();
    job_state.try_claim("a@example.com", "daily_checkin", 0).unwrap();

    let mut ctx = PipelineContext {
        config: Arc::new(Config::default()),
        accounts: Arc::new(AccountStore::new(dir.path().join("accounts.jsonc"))),
        job_state: job_state.clone(),
        history: Arc::new(AccountHistoryStore::new(dir.path().join("history"))),
        notifier: Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
        ban_detector: Arc::new(BanDetector::new(AccountStore::new(dir.path().join("accounts.jsonc")))),
        driver,
        rng: SecureRng::new(),
    };
    let standby = AtomicBool::new(false);

    let started = std::time::Instant::now();
    let outcome = pipeline::run_account(&mut ctx, &account("a@example.com"), 1, &standby).await;
    assert_eq!(outcome, PipelineOutcome::AlreadyDone);
    assert!(started.elapsed() < std::time::Duration::from_secs(30));

    // login probe + one dashboard re-fetch, never a search-results page.
    assert_eq!(script.nav_log.read().len(), 2);
    assert_eq!(job_state.units_completed_today("a@example.com").unwrap(), 3);
}

/// A recovery-address mismatch during login is a fatal, non-recoverable
/// signal: it engages global standby for the whole run, and the orchestrator
/// must not start any account queued behind the one that tripped it.
#[tokio::test]
async fn recovery_mismatch_halts_the_whole_run() {
    let script = MockScript::new();
    script.set_redirect("rewards.microsoft.com", "https://login.live.com/");
    script.set_page(
        "login.live.com",
        "<title>sign in</title>Confirm your recovery email zz******@example.com",
    );
    let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(script.clone()));

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com", "b@example.com"]);

    let mut config = Config::default();
    config.concurrency.max_concurrent_accounts = 1;
    config.concurrency.account_delay_seconds = 0;
    config.concurrency.passes = 1;
    config.concurrency.inter_pass_delay_seconds = 0;

    let orch = Orchestrator::new(
        Arc::new(config),
        Arc::new(AccountStore::new(dir.path().join("accounts.jsonc"))),
        Arc::new(JobStateStore::new(dir.path().join("jobs"))),
        Arc::new(AccountHistoryStore::new(dir.path().join("history"))),
        Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
        Arc::new(BanDetector::new(AccountStore::new(dir.path().join("accounts.jsonc")))),
        driver,
    );

    let summary = orch.run().await.unwrap();
    assert!(orch.global_standby());
    assert_eq!(summary.standby, 1);
    // the second account never started: only one account's worth of passes
    // shows up in the results at all.
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].email, "a@example.com");
}

/// A hard-ban signal (an HTTP 403 classified by the ban detector the same
/// way a page-text signal would be) disables the account in place, exactly
/// once, and the resulting verdict is non-recoverable.
#[tokio::test]
async fn hard_ban_signal_disables_account_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = account_file(dir.path(), &["a@example.com"]);
    let detector = BanDetector::new(AccountStore::new(&path));

    let severity = ban::classify_http_status(403, false, false);
    assert_eq!(severity, BanSeverity::HardBan);

    let signal = Signal { source: "daily-checkin-api", severity, details: vec!["403".to_string()] };
    let first = detector.evaluate("a@example.com", &[signal.clone()]);
    assert_eq!(first.severity, BanSeverity::HardBan);
    assert!(!first.recoverable);

    let incident = detector.build_incident("a@example.com", &first.reason);
    assert_eq!(incident.account, "a@example.com");

    let raw_after_first = std::fs::read_to_string(&path).unwrap();
    assert!(raw_after_first.contains("BANNED"));

    // a second hard-ban verdict for the same account must not touch the
    // file again.
    detector.evaluate("a@example.com", &[signal]);
    let raw_after_second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw_after_first, raw_after_second);

    let remaining = AccountStore::new(&path).load().unwrap();
    assert!(remaining.is_empty());
}

/// A mobile search bucket that stalls out against the fallback query list is
/// retried once against a freshly rebuilt mobile session; the retry's fresh
/// dashboard read shows the target already met, so the pass still finishes
/// `Completed`.
#[tokio::test]
async fn mobile_search_stall_is_retried_once_and_then_succeeds() {
    let script = MockScript::new();
    script.set_selector_present("[data-testid=rewards-portal]", true);
    script.set_eval("window.__rewardsOAuthToken", serde_json::json!("token-abc"));

    let mut sequence = vec![dashboard_json(0, 80)]; // initial fetch: desktop already done, mobile has 80 left
    for _ in 0..5 {
        sequence.push(dashboard_json(0, 80)); // five unchanged refetches: stalls the first attempt
    }
    sequence.push(dashboard_json(0, 0)); // retry's first refetch: target met
    script.set_eval_sequence("__rewardsDashboardData", sequence);

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com"]);
    let mut ctx = pipeline_context(dir.path(), script.clone());
    ctx.job_state.try_claim("a@example.com", "search:desktop", 0).unwrap();
    ctx.job_state.try_claim("a@example.com", "daily_checkin", 0).unwrap();
    let standby = AtomicBool::new(false);

    let outcome = pipeline::run_account(&mut ctx, &account("a@example.com"), 1, &standby).await;
    assert_eq!(outcome, PipelineOutcome::Completed);

    let entries = ctx.history.read_recent("a@example.com", 1).unwrap();
    assert_eq!(entries[0].mobile_points, 80);
    assert!(ctx.job_state.is_claimed("a@example.com", "search:mobile").unwrap());
}

/// History entries older than the retention window are pruned as a side
/// effect of a normal pass, not just from a manually invoked maintenance
/// task.
#[tokio::test]
async fn stale_history_entries_are_pruned_after_a_pass() {
    let script = MockScript::new();
    script.set_selector_present("[data-testid=rewards-portal]", true);
    script.set_eval("__rewardsDashboardData", dashboard_json(0, 0));

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com"]);
    let mut ctx = pipeline_context(dir.path(), script.clone());
    ctx.job_state.try_claim("a@example.com", "search:desktop", 150).unwrap();
    ctx.job_state.try_claim("a@example.com", "search:mobile", 100).unwrap();
    ctx.job_state.try_claim("a@example.com", "daily_checkin", 0).unwrap();

    let stale = rewards_orchestrator::events::AccountHistoryEntry {
        timestamp: chrono::Utc::now() - chrono::Duration::days(120),
        date: chrono::Utc::now().date_naive(),
        desktop_points: 10,
        mobile_points: 10,
        total_points: 20,
        completed: 1,
        failed: 0,
        errors: vec![],
        duration_ms: 1000,
        success: true,
    };
    ctx.history.append("a@example.com", &stale).unwrap();

    let standby = AtomicBool::new(false);
    let outcome = pipeline::run_account(&mut ctx, &account("a@example.com"), 1, &standby).await;
    assert_eq!(outcome, PipelineOutcome::AlreadyDone);

    let entries = ctx.history.read_all("a@example.com").unwrap();
    assert_eq!(entries.len(), 1);
    assert_ne!(entries[0].desktop_points, 10);
}

/// A passkey prompt encountered mid-login is dismissed via the ordered
/// fallback-selector chain rather than blocking the pass.
#[tokio::test]
async fn passkey_prompt_is_dismissed_before_login_completes() {
    let script = MockScript::new();
    script.set_redirect("rewards.microsoft.com", "https://login.live.com/");
    script.set_page("login.live.com", "<title>Use Windows Hello to continue</title>");
    script.set_selector_present("button.secondary", true);
    let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(script.clone()));

    let dir = tempfile::tempdir().unwrap();
    account_file(dir.path(), &["a@example.com"]);
    let mut ctx = PipelineContext {
        config: Arc::new(Config::default()),
        accounts: Arc::new(AccountStore::new(dir.path().join("accounts.jsonc"))),
        job_state: Arc::new(JobStateStore::new(dir.path().join("jobs"))),
        history: Arc::new(AccountHistoryStore::new(dir.path().join("history"))),
        notifier: Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
        ban_detector: Arc::new(BanDetector::new(AccountStore::new(dir.path().join("accounts.jsonc")))),
        driver,
        rng: SecureRng::new(),
    };
    let standby = AtomicBool::new(false);

    // Login never leaves the passkey-prompt page in this script (it always
    // classifies as PasskeyPrompt since the URL stays on login.live.com with
    // the Windows Hello title), so the state machine's transition cap is
    // what ends the attempt — exercising the dismissal path itself rather
    // than a full successful login.
    let _ = pipeline::run_account(&mut ctx, &account("a@example.com"), 1, &standby).await;
    assert!(script.click_log.read().contains(&"button.secondary".to_string()));
}
