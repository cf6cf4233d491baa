// src/orchestrator.rs
//
// Drives every enabled account through its configured number of passes
// (spec.md §4.13 / §5). Bounded by a semaphore so at most
// `concurrency.maxConcurrentAccounts` browser sessions run at once, the same
// shape the teacher uses to spawn one task per inbound event and let a
// channel/semaphore hold the rest back rather than queueing unbounded work
// in memory. One task owns one account end to end: it runs that account's
// passes back to back, sleeping `interPassDelaySeconds` between them, and
// checks the two process-wide kill switches (`global_standby`,
// `stop_requested`) before starting each pass.

use crate::accounts::AccountStore;
use crate::ban::BanDetector;
use crate::browser::BrowserDriver;
use crate::config::Config;
use crate::events::{Account, AccountHistoryEntry};
use crate::history::AccountHistoryStore;
use crate::jobstate::JobStateStore;
use crate::notify::NotificationSink;
use crate::pipeline::{self, PipelineContext, PipelineOutcome};
use crate::rng::SecureRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Outcome of one (account, pass) run, as seen by the orchestrator rather
/// than the pipeline — `duration_ms` and `pass` get folded into the summary
/// report.
#[derive(Debug)]
pub struct AccountPassResult {
    pub email: String,
    pub pass: u32,
    pub outcome: PipelineOutcome,
    pub duration_ms: u64,
}

/// Aggregate result of one run invocation across every account and pass.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: u32,
    pub already_done: u32,
    pub standby: u32,
    pub disabled: u32,
    pub failed: u32,
    pub results: Vec<AccountPassResult>,
}

impl RunSummary {
    fn record(&mut self, result: AccountPassResult) {
        match result.outcome {
            PipelineOutcome::Completed => self.completed += 1,
            PipelineOutcome::AlreadyDone => self.already_done += 1,
            PipelineOutcome::Standby => self.standby += 1,
            PipelineOutcome::Disabled => self.disabled += 1,
            PipelineOutcome::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    fn extend(&mut self, results: Vec<AccountPassResult>) {
        for result in results {
            self.record(result);
        }
    }
}

/// Shared collaborators every account's pipeline run needs, assembled once
/// at startup and handed to every spawned task as cheap `Arc` clones.
pub struct Orchestrator {
    config: Arc<Config>,
    accounts: Arc<AccountStore>,
    job_state: Arc<JobStateStore>,
    history: Arc<AccountHistoryStore>,
    notifier: Arc<NotificationSink>,
    ban_detector: Arc<BanDetector>,
    driver: Arc<dyn BrowserDriver>,
    stop_requested: Arc<AtomicBool>,
    global_standby: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountStore>,
        job_state: Arc<JobStateStore>,
        history: Arc<AccountHistoryStore>,
        notifier: Arc<NotificationSink>,
        ban_detector: Arc<BanDetector>,
        driver: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            config,
            accounts,
            job_state,
            history,
            notifier,
            ban_detector,
            driver,
            stop_requested: Arc::new(AtomicBool::new(false)),
            global_standby: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals every in-flight and not-yet-started account task to abandon
    /// its remaining passes after finishing the current work unit (spec.md
    /// §5 cancellation semantics) — never aborts an activity mid-flight.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Clears `stop_requested` and `global_standby` so a subsequent `run`
    /// call starts clean (dashboard `POST /api/restart`).
    pub fn reset(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.global_standby.store(false, Ordering::SeqCst);
    }

    pub fn global_standby(&self) -> bool {
        self.global_standby.load(Ordering::SeqCst)
    }

    /// Runs every enabled account through `concurrency.passes` passes, up to
    /// `concurrency.maxConcurrentAccounts` accounts at a time. Returns once
    /// every spawned task has finished or the stop flag cut the queue short.
    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        let accounts = self.accounts.load()?;
        self.run_accounts(accounts).await
    }

    /// Runs a single named account through its configured passes, ignoring
    /// every other account in the file (dashboard `POST /api/run-single`).
    pub async fn run_single(&self, email: &str) -> anyhow::Result<RunSummary> {
        let accounts: Vec<Account> =
            self.accounts.load()?.into_iter().filter(|a| a.email == email).collect();
        if accounts.is_empty() {
            warn!(account = email, "run-single requested for an unknown or disabled account");
        }
        self.run_accounts(accounts).await
    }

    async fn run_accounts(&self, accounts: Vec<Account>) -> anyhow::Result<RunSummary> {
        if accounts.is_empty() {
            warn!("no enabled accounts, nothing to do");
            return Ok(RunSummary::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_concurrent_accounts));
        let mut handles = Vec::with_capacity(accounts.len());

        for (index, account) in accounts.into_iter().enumerate() {
            if self.stop_requested() {
                info!("stop requested; not starting remaining accounts");
                break;
            }
            if self.global_standby() {
                info!("global standby engaged; not starting remaining accounts");
                break;
            }
            if index > 0 {
                tokio::time::sleep(self.config.concurrency.account_delay()).await;
            }

            let permit = semaphore.clone().acquire_owned().await?;
            let config = self.config.clone();
            let accounts_store = self.accounts.clone();
            let job_state = self.job_state.clone();
            let history = self.history.clone();
            let notifier = self.notifier.clone();
            let ban_detector = self.ban_detector.clone();
            let driver = self.driver.clone();
            let global_standby = self.global_standby.clone();
            let stop_requested = self.stop_requested.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_account_passes(
                    config,
                    accounts_store,
                    job_state,
                    history,
                    notifier,
                    ban_detector,
                    driver,
                    account,
                    global_standby,
                    stop_requested,
                )
                .await
            }));
        }

        let mut summary = RunSummary::default();
        for handle in handles {
            match handle.await {
                Ok(results) => summary.extend(results),
                Err(join_err) => {
                    warn!(error = %join_err, "account task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            completed = summary.completed,
            already_done = summary.already_done,
            standby = summary.standby,
            disabled = summary.disabled,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_account_passes(
    config: Arc<Config>,
    accounts: Arc<AccountStore>,
    job_state: Arc<JobStateStore>,
    history: Arc<AccountHistoryStore>,
    notifier: Arc<NotificationSink>,
    ban_detector: Arc<BanDetector>,
    driver: Arc<dyn BrowserDriver>,
    account: Account,
    global_standby: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
) -> Vec<AccountPassResult> {
    let email = account.email.clone();
    let total_passes = config.concurrency.passes;
    let inter_pass_delay = config.concurrency.inter_pass_delay();
    let mut results = Vec::with_capacity(total_passes as usize);

    let mut ctx = PipelineContext {
        config,
        accounts,
        job_state,
        history,
        notifier,
        ban_detector,
        driver,
        rng: SecureRng::new(),
    };

    for pass in 1..=total_passes {
        if stop_requested.load(Ordering::SeqCst) {
            info!(account = %email, pass, "stop requested; account finishing early");
            break;
        }
        if global_standby.load(Ordering::SeqCst) {
            info!(account = %email, pass, "global standby engaged; account finishing early");
            break;
        }

        let started = Instant::now();
        let outcome = pipeline::run_account(&mut ctx, &account, pass, &global_standby).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(account = %email, pass, outcome = ?outcome, duration_ms, "account pass finished");

        let is_final_outcome = matches!(outcome, PipelineOutcome::Standby | PipelineOutcome::Disabled);
        results.push(AccountPassResult { email: email.clone(), pass, outcome, duration_ms });

        if is_final_outcome {
            break;
        }
        if pass < total_passes {
            tokio::time::sleep(inter_pass_delay).await;
        }
    }

    results
}

/// Folds a run summary into the single cross-account rollup used by the
/// run-complete notification and the summary report writer. Per-account
/// history entries are already written by `pipeline::run_account` itself.
pub fn rollup_entry(run_started: chrono::DateTime<chrono::Utc>, summary: &RunSummary) -> AccountHistoryEntry {
    let total_duration_ms: u64 = summary.results.iter().map(|r| r.duration_ms).sum();
    AccountHistoryEntry {
        timestamp: run_started,
        date: run_started.date_naive(),
        desktop_points: 0,
        mobile_points: 0,
        total_points: 0,
        completed: summary.completed,
        failed: summary.failed + summary.disabled,
        errors: Vec::new(),
        duration_ms: total_duration_ms,
        success: summary.failed == 0,
    }
}
