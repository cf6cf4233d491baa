// src/activities/mod.rs
//
// Activity dispatcher (spec.md §4.11). `classify` is a pure first-match-wins
// function, directly grounded in the teacher's own dispatch shape: classify
// the input into an action tag, look up the handler for that tag, execute
// it, record the outcome — generalized here from security-enforcement
// actions to reward-activity handlers. Each handler lives in its own file
// and takes explicit collaborator parameters rather than a shared bot
// singleton (spec.md §9 redesign note).

pub mod abc;
pub mod daily_checkin;
pub mod free_rewards;
pub mod poll;
pub mod quiz;
pub mod read_to_earn;
pub mod search_on_bing;
pub mod this_or_that;
pub mod url_reward;

use crate::config::Config;
use crate::events::{Activity, ActivityKind};
use crate::jobstate::JobStateStore;
use crate::rng::SecureRng;
use tracing::{info, warn};

use crate::browser::BrowserContext;

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("handler failed for offer {offer_id}: {reason}")]
    HandlerFailed { offer_id: String, reason: String },
    #[error("activity timed out")]
    TimedOut,
    #[error("http call for offer {offer_id} returned status {status}")]
    HttpStatus { offer_id: String, status: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    Completed,
    AlreadyDone,
    Skipped,
}

/// Exact, first-match-wins classification (spec.md §4.11).
pub fn classify(activity: &Activity) -> ActivityKind {
    if activity.promotion_type == "quiz" && activity.point_progress_max == 10 && activity.destination_url.contains("pollscenarioid") {
        return ActivityKind::Poll;
    }
    if activity.promotion_type == "quiz" && activity.point_progress_max == 10 {
        return ActivityKind::Abc;
    }
    if activity.promotion_type == "quiz" && activity.point_progress_max == 50 {
        return ActivityKind::ThisOrThat;
    }
    if activity.promotion_type == "quiz" {
        return ActivityKind::Quiz;
    }
    if activity.promotion_type == "urlreward" && activity.name.to_lowercase().contains("exploreonbing") {
        return ActivityKind::SearchOnBing;
    }
    if activity.promotion_type == "urlreward" {
        return ActivityKind::UrlReward;
    }
    ActivityKind::Unsupported
}

/// Work-unit id an activity maps to in the job-state store.
pub fn work_unit_id(activity: &Activity) -> String {
    format!("activity:{}", activity.offer_id)
}

/// Dispatches one activity to its handler. Idempotent at the job-state
/// level: already-claimed units are skipped before any browser interaction.
pub async fn dispatch(
    context: &dyn BrowserContext,
    activity: &Activity,
    config: &Config,
    job_state: &JobStateStore,
    account_email: &str,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let unit_id = work_unit_id(activity);
    let kind = classify(activity);

    if job_state.is_claimed(account_email, &unit_id).unwrap_or(false) {
        info!(offer_id = %activity.offer_id, kind = %kind, "unit already claimed, skipping");
        return Ok(ActivityOutcome::AlreadyDone);
    }
    info!(offer_id = %activity.offer_id, kind = %kind, "dispatching activity");

    let result = match kind {
        ActivityKind::Poll => poll::run(context, activity, rng).await,
        ActivityKind::Abc => abc::run(context, activity, rng).await,
        ActivityKind::ThisOrThat => this_or_that::run(context, activity, rng).await,
        ActivityKind::Quiz => quiz::run(context, activity, rng).await,
        ActivityKind::SearchOnBing => search_on_bing::run(context, activity, config, rng).await,
        ActivityKind::UrlReward => url_reward::run(context, activity, rng).await,
        ActivityKind::Unsupported => {
            warn!(offer_id = %activity.offer_id, promotion_type = %activity.promotion_type, "unsupported activity kind");
            return Ok(ActivityOutcome::Skipped);
        }
    };

    match result {
        Ok(outcome) => {
            if outcome == ActivityOutcome::Completed {
                let _ = job_state.try_claim(account_email, &unit_id, activity.point_progress_max);
            }
            Ok(outcome)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(promotion_type: &str, max: u64, name: &str, url: &str) -> Activity {
        Activity {
            name: name.to_string(),
            title: "t".to_string(),
            promotion_type: promotion_type.to_string(),
            destination_url: url.to_string(),
            point_progress: 0,
            point_progress_max: max,
            complete: false,
            offer_id: "offer-1".to_string(),
        }
    }

    #[test]
    fn classifies_poll() {
        let a = activity("quiz", 10, "x", "https://example.com/?pollscenarioid=1");
        assert_eq!(classify(&a), ActivityKind::Poll);
    }

    #[test]
    fn classifies_abc() {
        let a = activity("quiz", 10, "x", "https://example.com/quiz");
        assert_eq!(classify(&a), ActivityKind::Abc);
    }

    #[test]
    fn classifies_this_or_that() {
        let a = activity("quiz", 50, "x", "https://example.com/quiz");
        assert_eq!(classify(&a), ActivityKind::ThisOrThat);
    }

    #[test]
    fn classifies_generic_quiz() {
        let a = activity("quiz", 30, "x", "https://example.com/quiz");
        assert_eq!(classify(&a), ActivityKind::Quiz);
    }

    #[test]
    fn classifies_search_on_bing() {
        let a = activity("urlreward", 20, "exploreonbing_offer", "https://example.com/");
        assert_eq!(classify(&a), ActivityKind::SearchOnBing);
    }

    #[test]
    fn classifies_url_reward() {
        let a = activity("urlreward", 20, "generic_offer", "https://example.com/");
        assert_eq!(classify(&a), ActivityKind::UrlReward);
    }

    #[test]
    fn classifies_unsupported_for_unknown_promotion_type() {
        let a = activity("other", 20, "x", "https://example.com/");
        assert_eq!(classify(&a), ActivityKind::Unsupported);
    }

    #[tokio::test]
    async fn already_claimed_unit_is_skipped_without_opening_a_page() {
        use crate::browser::driver::{ContextOptions, Viewport};
        use crate::browser::mock::{MockBrowserDriver, MockScript};
        use crate::browser::BrowserDriver;

        let dir = tempfile::tempdir().unwrap();
        let job_state = JobStateStore::new(dir.path());
        let a = activity("urlreward", 20, "generic_offer", "https://example.com/");
        job_state.try_claim("a@example.com", &work_unit_id(&a), a.point_progress_max).unwrap();

        let script = MockScript::new();
        let driver = MockBrowserDriver::new(script);
        let ctx = driver
            .new_context(ContextOptions {
                user_agent: "t".into(),
                viewport: Viewport { width: 1280, height: 800 },
                locale: "en-US".into(),
                timezone: "UTC".into(),
                proxy_server: None,
                init_scripts: vec![],
            })
            .await
            .unwrap();

        let config = Config::default();
        let mut rng = SecureRng::new();
        let outcome = dispatch(ctx.as_ref(), &a, &config, &job_state, "a@example.com", &mut rng)
            .await
            .unwrap();
        assert_eq!(outcome, ActivityOutcome::AlreadyDone);
    }
}
