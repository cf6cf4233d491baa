// src/activities/poll.rs
//
// Poll handler (spec.md §4.11): pick one of two options at random, click,
// wait for settlement, close. Opens its own tab and closes it on every
// exit path.

use super::{ActivityError, ActivityOutcome};
use crate::browser::BrowserContext;
use crate::events::Activity;
use crate::rng::SecureRng;
use std::time::Duration;

pub async fn run(
    context: &dyn BrowserContext,
    activity: &Activity,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(|e| ActivityError::HandlerFailed {
        offer_id: activity.offer_id.clone(),
        reason: e.to_string(),
    })?;

    let result = async {
        page.goto(&activity.destination_url, Duration::from_secs(20)).await?;
        let option_index = rng.int_in(0, 2);
        let selector = format!("#btoption{option_index}");
        page.click(&selector).await?;
        page.wait_for_selector("[data-testid=poll-settled]", Duration::from_secs(5)).await?;
        Ok(())
    }
    .await;

    let _ = page.close().await;

    result.map_err(|e: crate::browser::DriverError| ActivityError::HandlerFailed {
        offer_id: activity.offer_id.clone(),
        reason: e.to_string(),
    })?;

    Ok(ActivityOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{ContextOptions, Viewport};
    use crate::browser::mock::{MockBrowserDriver, MockScript};
    use crate::browser::BrowserDriver;

    fn activity() -> Activity {
        Activity {
            name: "poll1".into(),
            title: "t".into(),
            promotion_type: "quiz".into(),
            destination_url: "https://rewards.microsoft.com/poll?pollscenarioid=1".into(),
            point_progress: 0,
            point_progress_max: 10,
            complete: false,
            offer_id: "offer-poll".into(),
        }
    }

    #[tokio::test]
    async fn poll_clicks_one_option_and_closes() {
        let script = MockScript::new();
        script.set_selector_present("[data-testid=poll-settled]", true);
        let driver = MockBrowserDriver::new(script.clone());
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

        let mut rng = SecureRng::new();
        let outcome = run(ctx.as_ref(), &activity(), &mut rng).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Completed);
        assert_eq!(script.click_log.read().len(), 1);
    }
}
