// src/main.rs
//
// Entry point: loads config, builds the collaborator stack, then either
// runs one shot (`--once` / `--run-account`) or starts the always-on
// scheduler + dashboard (spec.md §6). CLI shape mirrors the teacher's own
// `clap::Parser` with a run-mode enum.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rewards_orchestrator::accounts::AccountStore;
use rewards_orchestrator::ban::BanDetector;
use rewards_orchestrator::browser::factory;
use rewards_orchestrator::config::Config;
use rewards_orchestrator::dashboard::{self, DashboardState, LogRing, LogRingLayer};
use rewards_orchestrator::history::AccountHistoryStore;
use rewards_orchestrator::jobstate::JobStateStore;
use rewards_orchestrator::notify::{LoggedTransport, NotificationSink, Transport, WebhookTransport};
use rewards_orchestrator::orchestrator::{rollup_entry, Orchestrator};
use rewards_orchestrator::reports::ReportWriter;
use rewards_orchestrator::scheduler::Scheduler;

const DEFAULT_LOG_RING_CAPACITY: usize = 2000;

#[derive(Parser)]
#[command(
    name = "rewards-orchestrator",
    about = "Multi-account browser automation orchestrator for daily rewards-program point farming",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, default_value = "config.jsonc", help = "Path to the JSONC config file")]
    config: PathBuf,

    /// Run every enabled account once (all configured passes), then exit
    /// instead of starting the scheduler loop.
    #[arg(long)]
    once: bool,

    /// Run a single account (all configured passes), then exit.
    #[arg(long, value_name = "EMAIL")]
    run_account: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(
        Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?,
    );

    let log_ring = LogRing::new(DEFAULT_LOG_RING_CAPACITY);
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("rewards_orchestrator=info".parse()?))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(LogRingLayer::new(log_ring.clone()))
        .init();

    let accounts = Arc::new(AccountStore::new(&config.accounts_path));
    let job_state = Arc::new(JobStateStore::new(&config.job_state_dir));
    let history = Arc::new(AccountHistoryStore::new(&config.history_dir));
    let reports = Arc::new(ReportWriter::new(&config.reports_dir));
    let ban_detector = Arc::new(BanDetector::new(AccountStore::new(&config.accounts_path)));

    let mut transports: Vec<Box<dyn Transport>> = Vec::new();
    if let Some(url) = &config.notifications.webhook_url {
        transports.push(Box::new(WebhookTransport::new(url.clone())));
    }
    transports.push(Box::new(LoggedTransport));
    let notifier = Arc::new(NotificationSink::new(transports));

    let driver = factory::build_driver(config.headless).await.context("building browser driver")?;

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        accounts.clone(),
        job_state.clone(),
        history.clone(),
        notifier.clone(),
        ban_detector,
        driver,
    ));

    if let Some(email) = cli.run_account {
        run_once_and_report(&orchestrator, &notifier, &reports, Some(&email)).await?;
        return Ok(());
    }
    if cli.once {
        run_once_and_report(&orchestrator, &notifier, &reports, None).await?;
        return Ok(());
    }

    let dashboard_state =
        DashboardState::new(orchestrator.clone(), config.clone(), accounts, job_state, history, log_ring);

    let mut tasks = Vec::new();

    if config.dashboard.enabled {
        let addr = format!("0.0.0.0:{}", config.dashboard.port);
        let router = dashboard::router(dashboard_state);
        let listener = tokio::net::TcpListener::bind(addr.as_str())
            .await
            .with_context(|| format!("binding dashboard on {addr}"))?;
        tracing::info!(addr, "dashboard listening");
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "dashboard server exited");
            }
        }));
    }

    let scheduler_config = config.schedule.clone();
    let scheduler_orchestrator = orchestrator.clone();
    let scheduler_reports = reports.clone();
    tasks.push(tokio::spawn(async move {
        let scheduler = Scheduler::new(&scheduler_config).with_reports(scheduler_reports);
        scheduler.run_forever(scheduler_orchestrator).await;
    }));

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

async fn run_once_and_report(
    orchestrator: &Orchestrator,
    notifier: &NotificationSink,
    reports: &ReportWriter,
    email: Option<&str>,
) -> Result<()> {
    let run_started = chrono::Utc::now();
    let summary = match email {
        Some(email) => orchestrator.run_single(email).await?,
        None => orchestrator.run().await?,
    };
    let run_finished = chrono::Utc::now();

    let entry = rollup_entry(run_started, &summary);
    tracing::info!(
        completed = entry.completed,
        failed = entry.failed,
        duration_ms = entry.duration_ms,
        "run finished"
    );

    notifier
        .notify(rewards_orchestrator::notify::NotificationEvent::new(
            "run_summary",
            if entry.success { rewards_orchestrator::notify::Severity::Info } else { rewards_orchestrator::notify::Severity::Warning },
            serde_json::json!({
                "completed": entry.completed,
                "failed": entry.failed,
                "durationMs": entry.duration_ms,
            }),
        ))
        .await;

    reports.write(run_started, run_finished, &summary).context("writing run report")?;
    Ok(())
}
