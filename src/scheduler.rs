// src/scheduler.rs
//
// Fires the orchestrator at configured local wall-clock times with jitter
// and a vacation-day die roll (spec.md §4.1). Grounded on the teacher's
// `print_stats_loop`: a `tokio::spawn`ed `loop { sleep(...).await; ... }`
// that never returns and never lets one iteration's error escape the loop.

use crate::config::ScheduleConfig;
use crate::orchestrator::Orchestrator;
use crate::reports::ReportWriter;
use crate::rng::SecureRng;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Scheduler {
    fire_times: Vec<NaiveTime>,
    jitter_minutes: u32,
    vacation_probability: f64,
    run_on_start: bool,
    reports: Option<Arc<ReportWriter>>,
}

impl Scheduler {
    pub fn new(config: &ScheduleConfig) -> Self {
        let fire_times: Vec<NaiveTime> = config.run_at.iter().filter_map(|raw| parse_naive_time(raw)).collect();
        Self {
            fire_times,
            jitter_minutes: config.jitter_minutes,
            vacation_probability: config.vacation_probability,
            run_on_start: config.run_on_start,
            reports: None,
        }
    }

    /// Attaches a report writer so every completed (non-vacation-skipped)
    /// fire also produces a `reports/YYYY-MM-DD/summary_*.json` file.
    pub fn with_reports(mut self, reports: Arc<ReportWriter>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Runs forever, invoking `orchestrator.run()` at each jittered fire
    /// time. Never returns; a failed run is logged and the loop continues
    /// to the next scheduled fire. With no configured fire times, runs once
    /// if `runOnStart` is set and then returns, leaving all further
    /// invocations to the dashboard.
    pub async fn run_forever(&self, orchestrator: Arc<Orchestrator>) {
        let mut rng = SecureRng::new();

        if self.run_on_start {
            self.fire(&orchestrator, &mut rng).await;
        }

        if self.fire_times.is_empty() {
            warn!("scheduler has no configured fire times; only runOnStart/dashboard-triggered runs will execute");
            return;
        }

        loop {
            let sleep_for = self.duration_until_next_fire(&mut rng);
            info!(sleep_secs = sleep_for.as_secs(), "scheduler sleeping until next fire");
            tokio::time::sleep(sleep_for).await;
            self.fire(&orchestrator, &mut rng).await;
        }
    }

    async fn fire(&self, orchestrator: &Orchestrator, rng: &mut SecureRng) {
        if self.vacation_probability > 0.0 && rng.bool(self.vacation_probability) {
            info!("vacation day rolled; skipping this fire");
            return;
        }
        let run_started = chrono::Utc::now();
        match orchestrator.run().await {
            Ok(summary) => {
                info!(completed = summary.completed, failed = summary.failed, "scheduled run finished");
                if let Some(reports) = &self.reports {
                    let run_finished = chrono::Utc::now();
                    if let Err(e) = reports.write(run_started, run_finished, &summary) {
                        warn!(error = %e, "failed to write run report");
                    }
                }
            }
            Err(e) => error!(error = %e, "scheduled run failed"),
        }
    }

    /// Computes the jittered delay until the next fire time strictly after
    /// now, wrapping to tomorrow's earliest fire time once every slot today
    /// has already passed. Panics never: any arithmetic failure degrades to
    /// an immediate fire rather than stalling the loop forever.
    fn duration_until_next_fire(&self, rng: &mut SecureRng) -> Duration {
        let now = Local::now().naive_local();
        let today = now.date();

        let mut candidates: Vec<NaiveDateTime> = self.fire_times.iter().map(|t| today.and_time(*t)).collect();
        candidates.sort();

        let next = candidates.into_iter().find(|dt| *dt > now).unwrap_or_else(|| {
            let earliest = *self.fire_times.iter().min().expect("non-empty, checked by caller");
            match today.succ_opt() {
                Some(tomorrow) => tomorrow.and_time(earliest),
                None => now,
            }
        });

        let jitter_secs = if self.jitter_minutes > 0 { rng.int_in(0, self.jitter_minutes as i64 * 60) } else { 0 };
        let target = next + chrono::Duration::seconds(jitter_secs);

        (target - now).to_std().unwrap_or(Duration::from_secs(0))
    }
}

fn parse_naive_time(raw: &str) -> Option<NaiveTime> {
    let (hour, minute) = crate::config::parse_clock_time(raw).ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountStore;
    use crate::ban::BanDetector;
    use crate::browser::mock::{MockBrowserDriver, MockScript};
    use crate::browser::BrowserDriver;
    use crate::config::Config;
    use crate::history::AccountHistoryStore;
    use crate::jobstate::JobStateStore;
    use crate::notify::{LoggedTransport, NotificationSink};
    use std::sync::Arc;

    fn schedule(run_at: &[&str], jitter_minutes: u32, vacation_probability: f64) -> ScheduleConfig {
        ScheduleConfig {
            run_at: run_at.iter().map(|s| s.to_string()).collect(),
            jitter_minutes,
            run_on_start: false,
            vacation_probability,
        }
    }

    #[test]
    fn empty_run_at_produces_no_fire_times() {
        let scheduler = Scheduler::new(&schedule(&[], 0, 0.0));
        assert!(scheduler.fire_times.is_empty());
    }

    #[test]
    fn invalid_entries_are_skipped_not_fatal() {
        let scheduler = Scheduler::new(&schedule(&["09:00", "not-a-time", "18:30"], 0, 0.0));
        assert_eq!(scheduler.fire_times.len(), 2);
    }

    #[test]
    fn duration_until_next_fire_is_never_negative() {
        let scheduler = Scheduler::new(&schedule(&["00:00", "12:00", "23:59"], 10, 0.0));
        let mut rng = SecureRng::new();
        let delay = scheduler.duration_until_next_fire(&mut rng);
        assert!(delay <= Duration::from_secs(24 * 3600 + 10 * 60));
    }

    #[tokio::test]
    async fn vacation_probability_one_never_claims_any_job_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("accounts.jsonc"),
            r#"{"accounts":[{"email":"a@example.com","password":"pw","enabled":true}]}"#,
        )
        .unwrap();

        let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new(MockScript::new()));
        let job_state = Arc::new(JobStateStore::new(dir.path().join("jobs")));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(Config::default()),
            Arc::new(AccountStore::new(dir.path().join("accounts.jsonc"))),
            job_state.clone(),
            Arc::new(AccountHistoryStore::new(dir.path().join("history"))),
            Arc::new(NotificationSink::new(vec![Box::new(LoggedTransport)])),
            Arc::new(BanDetector::new(AccountStore::new(dir.path().join("accounts.jsonc")))),
            driver,
        ));

        let scheduler = Scheduler::new(&schedule(&["09:00"], 0, 1.0));
        let mut rng = SecureRng::new();
        scheduler.fire(&orchestrator, &mut rng).await;

        assert_eq!(job_state.units_completed_today("a@example.com").unwrap(), 0);
    }
}
