// src/pipeline.rs
//
// Per-account pipeline (spec.md §4.12): the ten-step sequence that runs one
// pass for one account. `PipelineContext` bundles every collaborator the
// pipeline needs and is owned per account-task rather than shared back to
// the orchestrator (spec.md §9 redesign note on breaking the `bot` cycle).
// Scoped browser-context acquisition leans entirely on `SessionGuard`'s
// `Drop` impl, the same way the teacher's `Dispatcher` always writes its
// audit line regardless of which match arm fired.

use crate::accounts::AccountStore;
use crate::activities::{self, ActivityOutcome};
use crate::activities::{daily_checkin, free_rewards, read_to_earn};
use crate::ban::{BanDetector, Signal};
use crate::browser::factory::{self, SessionGuard};
use crate::browser::{BrowserDriver, BrowserPage, DriverError, PageEvent};
use crate::config::Config;
use crate::errors::{LoginFatalError, TransientBrowserError};
use crate::events::{
    work_unit_search, Account, ActivityKind, BanSeverity, DashboardData, Persona, WORK_UNIT_DAILY_CHECKIN,
    WORK_UNIT_FREE_REWARDS,
};
use crate::history::AccountHistoryStore;
use crate::jobstate::JobStateStore;
use crate::login::LoginStateMachine;
use crate::notify::{NotificationEvent, NotificationSink, Severity};
use crate::rng::SecureRng;
use crate::search::{self, LocalLexiconSource, QuerySource, SearchBucketOutcome};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const OAUTH_AUTHORIZE_URL: &str = "https://login.live.com/oauth20_authorize.srf?\
client_id=0000000040170455&response_type=token&\
scope=service%3A%3Aprod.rewardsplatform.microsoft.com%3A%3AMBI_SSL&\
redirect_uri=https%3A%2F%2Faccount.microsoft.com%2Frewards%2F";

const DASHBOARD_URL: &str = "https://rewards.microsoft.com/";
const FREE_REWARDS_CATALOG_URL: &str = "https://rewards.microsoft.com/redeem";
const PER_UNIT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    AlreadyDone,
    Standby,
    Disabled,
    Failed,
}

/// Collaborators one account-task needs for the lifetime of its passes.
/// Owned by the task that calls [`run_account`]; never stored alongside a
/// handle back to the orchestrator that spawned it.
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub accounts: Arc<AccountStore>,
    pub job_state: Arc<JobStateStore>,
    pub history: Arc<AccountHistoryStore>,
    pub notifier: Arc<NotificationSink>,
    pub ban_detector: Arc<BanDetector>,
    pub driver: Arc<dyn BrowserDriver>,
    pub rng: SecureRng,
}

/// Runs one pass for one account (spec.md §4.12's ten steps). `global_standby`
/// is shared process-wide and is only ever set here — clearing it is an
/// operator action via the dashboard, never something the pipeline does.
pub async fn run_account(
    ctx: &mut PipelineContext,
    account: &Account,
    pass: u32,
    global_standby: &AtomicBool,
) -> PipelineOutcome {
    let started = Instant::now();
    let masked = account.masked_email();
    info!(account = %masked, pass, "starting pipeline pass");

    let mut errors: Vec<String> = Vec::new();
    let mut completed_units = 0u32;
    let mut failed_units = 0u32;
    let mut desktop_points = 0u64;
    let mut mobile_points = 0u64;

    // Step 1: build desktop session.
    let (desktop_opts, _) = factory::build_context_options(
        &account.email,
        Persona::Desktop,
        account.proxy.as_ref(),
        false,
        &mut ctx.rng,
    );
    let mut desktop = match SessionGuard::open(ctx.driver.as_ref(), &account.email, desktop_opts).await {
        Ok(guard) => guard,
        Err(e) => {
            error!(account = %masked, error = %e, error_id = crate::errors::error_id(&e.to_string()), "failed to open desktop session");
            return PipelineOutcome::Failed;
        }
    };
    let desktop_page = match desktop.new_page().await {
        Ok(page) => page,
        Err(e) => {
            error!(account = %masked, error = %e, error_id = crate::errors::error_id(&e.to_string()), "failed to open desktop page");
            return PipelineOutcome::Failed;
        }
    };

    // Step 2 + 3: navigate to the rewards dashboard (a valid session stays
    // put; an unauthenticated one is bounced to the sign-in host) and drive
    // the login state machine from there. A recovery mismatch engages
    // standby, a blocked sign-in disables the account.
    if let Err(e) = desktop_page.goto(DASHBOARD_URL, Duration::from_secs(20)).await {
        error!(account = %masked, error = %e, error_id = crate::errors::error_id(&e.to_string()), "failed to navigate to dashboard");
        return PipelineOutcome::Failed;
    }
    {
        let mut machine = LoginStateMachine::new(account, &mut ctx.rng);
        if let Err(e) = machine.drive(desktop_page.as_ref()).await {
            return handle_login_failure(ctx, account, &masked, e, global_standby).await;
        }
    }
    info!(account = %masked, "login complete");

    if let Some(outcome) = check_ban_signals(ctx, account, &masked, desktop_page.as_ref()).await {
        return outcome;
    }

    // Step 4: fetch dashboard, compute earnable.
    let dashboard_data = match fetch_dashboard(desktop_page.as_ref()).await {
        Ok(data) => data,
        Err(e) => {
            error!(account = %masked, error = %e, error_id = crate::errors::error_id(&e.to_string()), "failed to fetch dashboard");
            return PipelineOutcome::Failed;
        }
    };

    let earnable = dashboard_data.earnable(Persona::Desktop) + dashboard_data.earnable(Persona::Mobile);
    if earnable <= 0 && !ctx.config.activities.run_on_zero_points {
        info!(account = %masked, "nothing earnable this pass");
        return PipelineOutcome::AlreadyDone;
    }

    // Step 5: daily set / more-promotions / punch-cards via dispatcher,
    // skipping units already claimed (checked inside `activities::dispatch`).
    {
        let desktop_context = match desktop.context().await {
            Ok(c) => c,
            Err(e) => {
                error!(account = %masked, error = %e, error_id = crate::errors::error_id(&e.to_string()), "desktop context unavailable for activity dispatch");
                return PipelineOutcome::Failed;
            }
        };

        let mut batches: Vec<(&str, &[crate::events::Activity])> = Vec::new();
        if ctx.config.activities.complete_daily_set {
            for activities in dashboard_data.daily_set.values() {
                batches.push(("daily-set", activities.as_slice()));
            }
        }
        if ctx.config.activities.complete_more_promotions {
            batches.push(("more-promotions", dashboard_data.more_promotions.as_slice()));
        }
        if ctx.config.activities.complete_punch_cards {
            batches.push(("punch-cards", dashboard_data.punch_cards.as_slice()));
        }

        for (bucket, activities_in_bucket) in batches {
            for activity in activities_in_bucket {
                if activity.complete {
                    continue;
                }
                let dispatched = tokio::time::timeout(
                    PER_UNIT_TIMEOUT,
                    activities::dispatch(
                        desktop_context,
                        activity,
                        &ctx.config,
                        &ctx.job_state,
                        &account.email,
                        &mut ctx.rng,
                    ),
                )
                .await;

                match dispatched {
                    Ok(Ok(ActivityOutcome::Completed)) => {
                        completed_units += 1;
                        desktop_points += activity.point_progress_max.saturating_sub(activity.point_progress);
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        failed_units += 1;
                        warn!(account = %masked, bucket, offer_id = %activity.offer_id, error = %e, "activity failed");
                        errors.push(e.to_string());
                        let _ = ctx.job_state.record_attempt_failed(&account.email, &activities::work_unit_id(activity));
                    }
                    Err(_) => {
                        failed_units += 1;
                        warn!(account = %masked, bucket, offer_id = %activity.offer_id, "activity timed out");
                        errors.push(format!("{bucket}:{} timed out", activity.offer_id));
                    }
                }
            }
        }
    }

    // Step 6: desktop search.
    run_search_step(ctx, account, &masked, &mut desktop, Persona::Desktop, &dashboard_data, &mut errors)
        .await
        .map(|gained| {
            completed_units += 1;
            desktop_points += gained;
        })
        .unwrap_or_else(|skipped| {
            if skipped {
                failed_units += 1;
            }
        });

    // Step 7: close the desktop session before opening the mobile one — at
    // most one browser context alive per persona at a time.
    if let Err(e) = desktop.close().await {
        warn!(account = %masked, error = %e, "error closing desktop session");
    }
    drop(desktop_page);

    // Step 8: build mobile session, login, acquire an OAuth token for the
    // mobile API (retrying once with a fresh context on "target closed").
    let (desktop_points, mobile_points, completed_units, failed_units, errors) = run_mobile_phase(
        ctx,
        account,
        &masked,
        &dashboard_data,
        desktop_points,
        mobile_points,
        completed_units,
        failed_units,
        errors,
    )
    .await;

    // Step 10: update account history, emit notification.
    let duration_ms = started.elapsed().as_millis() as u64;
    let success = failed_units == 0;
    let entry = crate::events::AccountHistoryEntry {
        timestamp: Utc::now(),
        date: Utc::now().date_naive(),
        desktop_points,
        mobile_points,
        total_points: desktop_points + mobile_points,
        completed: completed_units,
        failed: failed_units,
        errors: errors.clone(),
        duration_ms,
        success,
    };
    if let Err(e) = ctx.history.append(&account.email, &entry) {
        error!(account = %masked, error = %e, "failed to append account history");
    }
    if let Err(e) = ctx.history.prune(&account.email) {
        warn!(account = %masked, error = %e, "failed to prune account history");
    }

    ctx.notifier
        .notify(NotificationEvent::new(
            "run-complete",
            if success { Severity::Info } else { Severity::Warning },
            serde_json::json!({
                "account": masked,
                "completed": completed_units,
                "failed": failed_units,
                "totalPoints": desktop_points + mobile_points,
            }),
        ))
        .await;

    info!(account = %masked, completed_units, failed_units, duration_ms, "pipeline pass finished");
    if success {
        PipelineOutcome::Completed
    } else {
        PipelineOutcome::Failed
    }
}

/// Runs the desktop-or-mobile search bucket for one persona against an
/// already-open session, skipping it if today's unit is already claimed.
/// Returns `Ok(points_gained)` on success, or `Err(skipped)` where `skipped`
/// is true only if the bucket ran and failed/stalled (false if it was
/// skipped outright — nothing earnable, or already claimed).
async fn run_search_step(
    ctx: &mut PipelineContext,
    account: &Account,
    masked: &str,
    session: &mut SessionGuard,
    persona: Persona,
    dashboard_data: &DashboardData,
    errors: &mut Vec<String>,
) -> Result<u64, bool> {
    let unit_id = work_unit_search(persona);
    if ctx.job_state.is_claimed(&account.email, &unit_id).unwrap_or(false) {
        return Err(false);
    }

    let target = match persona {
        Persona::Desktop => dashboard_data.counters.pc_search.first().map(|p| p.remaining()).unwrap_or(0),
        Persona::Mobile => dashboard_data.counters.mobile_search.first().map(|p| p.remaining()).unwrap_or(0),
    };
    if target <= 0 {
        return Err(false);
    }

    let page = match session.new_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!(account = %masked, persona = %persona, error = %e, "failed to open search page");
            errors.push(e.to_string());
            return Err(true);
        }
    };

    let queries = gather_search_queries(&ctx.config, (target as usize).max(3)).await;
    let per_session_max = ctx.config.search.per_session_max;
    let outcome =
        search::run_search_bucket(page.as_ref(), persona, target, &queries, per_session_max, &mut ctx.rng, || {
            refetch_remaining(page.as_ref(), persona)
        })
        .await;
    let _ = page.close().await;

    match outcome {
        Ok(SearchBucketOutcome::Complete) => {
            let _ = ctx.job_state.try_claim(&account.email, &unit_id, target as u64);
            Ok(target as u64)
        }
        Ok(SearchBucketOutcome::Stalled) => {
            warn!(account = %masked, persona = %persona, "search bucket stalled");
            Err(true)
        }
        Err(e) => {
            warn!(account = %masked, persona = %persona, error = %e, "search bucket failed");
            errors.push(e.to_string());
            Err(true)
        }
    }
}

async fn refetch_remaining(page: &dyn BrowserPage, persona: Persona) -> i64 {
    match fetch_dashboard(page).await {
        Ok(data) => match persona {
            Persona::Desktop => data.counters.pc_search.first().map(|p| p.remaining()).unwrap_or(0),
            Persona::Mobile => data.counters.mobile_search.first().map(|p| p.remaining()).unwrap_or(0),
        },
        Err(_) => 0,
    }
}

async fn gather_search_queries(config: &Config, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let local = LocalLexiconSource;
    if let Some(region) = &config.search.trends_region {
        let endpoint = format!("https://www.bing.com/trending?region={region}");
        let trends = search::TrendingTopicsSource::new(endpoint);
        let sources: Vec<&dyn QuerySource> = vec![&trends, &local];
        return search::gather_queries(&sources, n.max(3)).await;
    }
    let sources: Vec<&dyn QuerySource> = vec![&local];
    search::gather_queries(&sources, n.max(3)).await
}

#[allow(clippy::too_many_arguments)]
async fn run_mobile_phase(
    ctx: &mut PipelineContext,
    account: &Account,
    masked: &str,
    dashboard_data: &DashboardData,
    mut desktop_points: u64,
    mut mobile_points: u64,
    mut completed_units: u32,
    mut failed_units: u32,
    mut errors: Vec<String>,
) -> (u64, u64, u32, u32, Vec<String>) {
    let (mobile_opts, _) = factory::build_context_options(
        &account.email,
        Persona::Mobile,
        account.proxy.as_ref(),
        false,
        &mut ctx.rng,
    );

    let mut mobile = match SessionGuard::open(ctx.driver.as_ref(), &account.email, mobile_opts).await {
        Ok(guard) => guard,
        Err(e) => {
            error!(account = %masked, error = %e, "failed to open mobile session");
            errors.push(e.to_string());
            failed_units += 1;
            return (desktop_points, mobile_points, completed_units, failed_units, errors);
        }
    };

    let mobile_page = match mobile.new_page().await {
        Ok(page) => page,
        Err(e) => {
            error!(account = %masked, error = %e, "failed to open mobile page");
            errors.push(e.to_string());
            failed_units += 1;
            return (desktop_points, mobile_points, completed_units, failed_units, errors);
        }
    };

    if let Err(e) = mobile_page.goto(DASHBOARD_URL, Duration::from_secs(20)).await {
        warn!(account = %masked, error = %e, "failed to navigate mobile session to dashboard");
        errors.push(e.to_string());
        failed_units += 1;
        return (desktop_points, mobile_points, completed_units, failed_units, errors);
    }
    {
        let mut machine = LoginStateMachine::new(account, &mut ctx.rng);
        if let Err(e) = machine.drive(mobile_page.as_ref()).await {
            warn!(account = %masked, error = %e, "mobile login failed");
            errors.push(e.to_string());
            failed_units += 1;
            return (desktop_points, mobile_points, completed_units, failed_units, errors);
        }
    }
    drop(mobile_page);

    let oauth_token = match acquire_oauth_token(&mobile).await {
        Ok(token) => token,
        Err(e) => {
            warn!(account = %masked, error = %e, "failed to acquire mobile oauth token");
            errors.push(e.to_string());
            failed_units += 1;
            return (desktop_points, mobile_points, completed_units, failed_units, errors);
        }
    };

    let client = reqwest::Client::new();

    // Daily check-in.
    let checkin_unit = WORK_UNIT_DAILY_CHECKIN;
    if !ctx.job_state.is_claimed(&account.email, checkin_unit).unwrap_or(false) {
        match daily_checkin::run(&client, &oauth_token, dashboard_data.user_status.available_points).await {
            Ok(ActivityOutcome::Completed) => {
                let _ = ctx.job_state.try_claim(&account.email, checkin_unit, 0);
                completed_units += 1;
            }
            Ok(_) => {
                let _ = ctx.job_state.try_claim(&account.email, checkin_unit, 0);
            }
            Err(crate::activities::ActivityError::HttpStatus { status, .. }) => {
                let severity = crate::ban::classify_http_status(status, false, false);
                let result = ctx.ban_detector.evaluate(
                    &account.email,
                    &[Signal { source: "daily-checkin-api", severity, details: vec![status.to_string()] }],
                );
                warn!(account = %masked, status, severity = %result.severity, "daily check-in returned non-2xx status");
                errors.push(format!("daily-checkin: http status {status}"));
                failed_units += 1;
            }
            Err(e) => {
                warn!(account = %masked, error = %e, "daily check-in failed");
                errors.push(e.to_string());
                failed_units += 1;
            }
        }
    }

    // Free rewards, if enabled and the account is phone-verified: redeems
    // zero-point catalog cards through the already-open mobile context
    // rather than the HTTP-only daily-checkin path, since it drives real UI.
    if free_rewards::is_eligible(&ctx.config, account)
        && !ctx.job_state.is_claimed(&account.email, WORK_UNIT_FREE_REWARDS).unwrap_or(false)
    {
        match mobile.context().await {
            Ok(context) => match free_rewards::run(context, FREE_REWARDS_CATALOG_URL, &mut ctx.rng).await {
                Ok(_) => {
                    let _ = ctx.job_state.try_claim(&account.email, WORK_UNIT_FREE_REWARDS, 0);
                    completed_units += 1;
                }
                Err(e) => {
                    warn!(account = %masked, kind = %ActivityKind::FreeRewards, error = %e, "free rewards redemption failed");
                    errors.push(e.to_string());
                    failed_units += 1;
                }
            },
            Err(e) => {
                warn!(account = %masked, error = %e, "mobile context unavailable for free rewards");
                errors.push(e.to_string());
                failed_units += 1;
            }
        }
    }

    // Read-to-earn, if enabled: article ids come from promotions the
    // desktop dashboard already tagged with the readtoearn offer naming.
    if ctx.config.activities.do_read_to_earn {
        let article_ids: Vec<String> = dashboard_data
            .more_promotions
            .iter()
            .filter(|a| a.name.to_lowercase().contains("readtoearn"))
            .map(|a| a.offer_id.clone())
            .collect();
        if !article_ids.is_empty() {
            match read_to_earn::run(&client, &oauth_token, &article_ids, &ctx.config, &mut ctx.rng).await {
                Ok(summary) => {
                    completed_units += summary.claimed as u32;
                }
                Err(e) => {
                    warn!(account = %masked, error = %e, "read-to-earn failed");
                    errors.push(e.to_string());
                    failed_units += 1;
                }
            }
        }
    }

    // Mobile search, retrying a stalled/failed bucket against a freshly
    // rebuilt browser context rather than the one that just stalled.
    let mut attempts = 0u32;
    let max_retries = ctx.config.search.retry_mobile_search_amount;
    loop {
        match run_search_step(ctx, account, masked, &mut mobile, Persona::Mobile, dashboard_data, &mut errors).await {
            Ok(gained) => {
                completed_units += 1;
                mobile_points += gained;
                break;
            }
            Err(false) => break,
            Err(true) => {
                attempts += 1;
                if attempts > max_retries {
                    failed_units += 1;
                    break;
                }
                warn!(account = %masked, attempt = attempts, "retrying mobile search bucket with a fresh browser context");
                if let Err(e) = mobile.close().await {
                    warn!(account = %masked, error = %e, "error closing stalled mobile session");
                }
                let (retry_opts, _) = factory::build_context_options(
                    &account.email,
                    Persona::Mobile,
                    account.proxy.as_ref(),
                    false,
                    &mut ctx.rng,
                );
                mobile = match SessionGuard::open(ctx.driver.as_ref(), &account.email, retry_opts).await {
                    Ok(guard) => guard,
                    Err(e) => {
                        error!(account = %masked, error = %e, "failed to reopen mobile session for retry");
                        errors.push(e.to_string());
                        failed_units += 1;
                        break;
                    }
                };
            }
        }
    }

    if let Err(e) = mobile.close().await {
        warn!(account = %masked, error = %e, "error closing mobile session");
    }

    (desktop_points, mobile_points, completed_units, failed_units, errors)
}

/// Navigates the OAuth authorize flow on the already-open mobile session and
/// extracts the access token it deposits on `window`. Retries once on a
/// fresh page if the first attempt's target closed mid-flow.
async fn acquire_oauth_token(session: &SessionGuard) -> Result<String, TransientBrowserError> {
    match try_acquire_token(session).await {
        Ok(token) => Ok(token),
        Err(TransientBrowserError::TargetClosed(reason)) => {
            warn!(reason = %reason, "oauth flow target closed; retrying once");
            try_acquire_token(session).await
        }
        Err(e) => Err(e),
    }
}

async fn try_acquire_token(session: &SessionGuard) -> Result<String, TransientBrowserError> {
    let page = session.new_page().await.map_err(|e| TransientBrowserError::TargetClosed(e.to_string()))?;
    try_acquire_token_on_page(page.as_ref()).await
}

async fn try_acquire_token_on_page(page: &dyn BrowserPage) -> Result<String, TransientBrowserError> {
    page.goto(OAUTH_AUTHORIZE_URL, Duration::from_secs(20))
        .await
        .map_err(|e| TransientBrowserError::TargetClosed(e.to_string()))?;
    let value = page
        .evaluate("window.__rewardsOAuthToken")
        .await
        .map_err(|e| TransientBrowserError::TargetClosed(e.to_string()))?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TransientBrowserError::TargetClosed("oauth token not present on page".to_string()))
}

async fn fetch_dashboard(page: &dyn BrowserPage) -> Result<DashboardData, DriverError> {
    page.goto(DASHBOARD_URL, Duration::from_secs(20)).await?;
    page.wait_for_selector("[data-testid=rewards-portal]", Duration::from_secs(10)).await?;
    let value = page.evaluate("window.__rewardsDashboardData").await?;
    serde_json::from_value(value).map_err(|e| DriverError::EvalFailed(format!("dashboard payload malformed: {e}")))
}

async fn handle_login_failure(
    ctx: &mut PipelineContext,
    account: &Account,
    masked: &str,
    error: LoginFatalError,
    global_standby: &AtomicBool,
) -> PipelineOutcome {
    match error {
        LoginFatalError::RecoveryMismatch => {
            warn!(account = %masked, "recovery address mismatch; engaging global standby");
            global_standby.store(true, Ordering::SeqCst);
            ctx.notifier
                .notify(NotificationEvent::new(
                    "recovery-mismatch",
                    Severity::Critical,
                    serde_json::json!({ "account": masked }),
                ))
                .await;
            PipelineOutcome::Standby
        }
        LoginFatalError::Blocked { phrase } => {
            warn!(account = %masked, phrase, "sign-in blocked; disabling account");
            if let Err(e) = ctx.accounts.disable_account_with_reason(&account.email, "sign-in-blocked") {
                error!(account = %masked, error = %e, "failed to disable blocked account");
            }
            ctx.notifier
                .notify(NotificationEvent::new(
                    "sign-in-blocked",
                    Severity::Critical,
                    serde_json::json!({ "account": masked, "phrase": phrase }),
                ))
                .await;
            PipelineOutcome::Disabled
        }
        // spec.md §4.12 step 3: a compromised flag raised during login
        // engages global standby rather than disabling the account outright
        // — the account itself isn't necessarily at fault, so it stays
        // usable once an operator clears standby.
        LoginFatalError::CompromisedDetected { phrase } => {
            warn!(account = %masked, phrase, "account flagged compromised during login; engaging global standby");
            global_standby.store(true, Ordering::SeqCst);
            let incident = crate::events::SecurityIncident {
                kind: crate::events::IncidentKind::CompromisedDetected,
                account: masked.to_string(),
                details: vec![phrase.clone()],
                next: vec!["global standby engaged; clear via operator action once reviewed".to_string()],
                docs_url: "https://support.microsoft.com/account/unusual-activity".to_string(),
            };
            ctx.notifier
                .notify(NotificationEvent::new(
                    "compromised-detected",
                    Severity::Critical,
                    serde_json::json!({ "account": masked, "phrase": phrase, "incident": incident }),
                ))
                .await;
            PipelineOutcome::Standby
        }
        other => {
            let id = crate::errors::error_id(&other.to_string());
            error!(account = %masked, error = %other, error_id = id, "login failed");
            ctx.notifier
                .notify(NotificationEvent::new(
                    "login-failed",
                    Severity::Warning,
                    serde_json::json!({ "account": masked, "reason": other.to_string(), "error_id": id }),
                ))
                .await;
            PipelineOutcome::Failed
        }
    }
}

async fn check_ban_signals(
    ctx: &mut PipelineContext,
    account: &Account,
    masked: &str,
    page: &dyn BrowserPage,
) -> Option<PipelineOutcome> {
    let url = page.current_url().await.unwrap_or_default();
    let text = page.content().await.unwrap_or_default();
    let mut signals = Vec::new();

    let (text_severity, details) = crate::ban::classify_text(&text);
    if text_severity != BanSeverity::None {
        signals.push(Signal { source: "page-text", severity: text_severity, details });
    }
    let url_severity = crate::ban::classify_url(&url);
    if url_severity != BanSeverity::None {
        signals.push(Signal { source: "url", severity: url_severity, details: vec![url.clone()] });
    }

    if let Ok(events) = page.drain_events().await {
        for event in events {
            match event {
                PageEvent::Response { url, status } => {
                    let severity = crate::ban::classify_http_status(status, false, false);
                    if severity != BanSeverity::None {
                        signals.push(Signal {
                            source: "response-monitor",
                            severity,
                            details: vec![url, status.to_string()],
                        });
                    }
                }
                PageEvent::Console { text, .. } => {
                    let (severity, details) = crate::ban::classify_text(&text);
                    if severity != BanSeverity::None {
                        signals.push(Signal { source: "console-monitor", severity, details });
                    }
                }
                PageEvent::Load { .. } => {}
            }
        }
    }

    if signals.is_empty() {
        return None;
    }

    let result = ctx.ban_detector.evaluate(&account.email, &signals);
    if result.severity == BanSeverity::HardBan {
        ctx.notifier
            .notify(NotificationEvent::new(
                "account-suspended",
                Severity::Critical,
                serde_json::json!({ "account": masked, "reason": result.reason }),
            ))
            .await;
        return Some(PipelineOutcome::Disabled);
    }
    if result.detected {
        warn!(account = %masked, severity = %result.severity, reason = %result.reason, "ban signal observed");
    }
    None
}
