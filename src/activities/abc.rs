// src/activities/abc.rs
//
// ABC quiz handler (spec.md §4.11): iterate up to a bounded number of
// questions, picking a random visible option each round, until a
// "completed" icon appears or the bound is hit.

use super::{ActivityError, ActivityOutcome};
use crate::browser::BrowserContext;
use crate::events::Activity;
use crate::rng::SecureRng;
use std::time::Duration;

const MAX_QUESTIONS: u32 = 10;

pub async fn run(
    context: &dyn BrowserContext,
    activity: &Activity,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(to_handler_err(activity))?;

    let result = async {
        page.goto(&activity.destination_url, Duration::from_secs(20)).await?;

        for _ in 0..MAX_QUESTIONS {
            if page.wait_for_selector("[data-testid=quiz-completed]", Duration::from_millis(300)).await? {
                break;
            }
            let option_count = 4;
            let option_index = rng.int_in(0, option_count);
            let option_selector = format!("[data-option='{option_index}']");
            page.click(&option_selector).await?;
            page.wait_for_selector("#btnNext", Duration::from_secs(3)).await?;
            page.click("#btnNext").await?;
        }
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
            name: "abc1".into(),
            title: "t".into(),
            promotion_type: "quiz".into(),
            destination_url: "https://rewards.microsoft.com/abc".into(),
            point_progress: 0,
            point_progress_max: 10,
            complete: false,
            offer_id: "offer-abc".into(),
        }
    }

    #[tokio::test]
    async fn abc_stops_when_completed_icon_appears() {
        let script = MockScript::new();
        script.set_selector_present("[data-testid=quiz-completed]", true);
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
        assert!(script.click_log.read().is_empty());
    }

    #[tokio::test]
    async fn abc_clicks_next_each_round_until_bound() {
        let script = MockScript::new();
        script.set_selector_present("#btnNext", true);
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
        assert_eq!(script.click_log.read().len() as u32, MAX_QUESTIONS * 2);
    }
}
