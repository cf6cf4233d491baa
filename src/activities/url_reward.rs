// src/activities/url_reward.rs
//
// UrlReward handler (spec.md §4.11): the page load itself grants the
// points, so the handler just waits a short humanised interval and closes.

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
    let page = context.new_page().await.map_err(to_handler_err(activity))?;

    let result = async {
        page.goto(&activity.destination_url, Duration::from_secs(20)).await?;
        let dwell = rng.human_variance(4000.0, 0.25, 0.05);
        tokio::time::sleep(Duration::from_millis(dwell as u64)).await;
        Ok(())
    }
    .await;

    let _ = page.close().await;
    result.map_err(to_handler_err(activity))?;
    Ok(ActivityOutcome::Completed)
}

fn to_handler_err(activity: &Activity) -> impl Fn(crate::browser::DriverError) -> ActivityError + '_ {
    move |e| ActivityError::HandlerFailed { offer_id: activity.offer_id.clone(), reason: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{ContextOptions, Viewport};
    use crate::browser::mock::{MockBrowserDriver, MockScript};
    use crate::browser::BrowserDriver;

    fn activity() -> Activity {
        Activity {
            name: "generic_offer".into(),
            title: "t".into(),
            promotion_type: "urlreward".into(),
            destination_url: "https://rewards.microsoft.com/offer".into(),
            point_progress: 0,
            point_progress_max: 10,
            complete: false,
            offer_id: "offer-url".into(),
        }
    }

    #[tokio::test]
    async fn navigates_and_completes() {
        let script = MockScript::new();
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
        assert_eq!(script.nav_log.read().len(), 1);
    }
}
