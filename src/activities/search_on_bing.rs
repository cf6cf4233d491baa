// src/activities/search_on_bing.rs
//
// SearchOnBing handler (spec.md §4.11): execute locale-appropriate search
// queries against the rewards-bearing endpoint until the activity's own
// point_progress reaches max.

use super::{ActivityError, ActivityOutcome};
use crate::browser::BrowserContext;
use crate::config::Config;
use crate::events::Activity;
use crate::rng::SecureRng;
use crate::search::{gather_queries, LocalLexiconSource, QuerySource};
use std::time::Duration;

pub async fn run(
    context: &dyn BrowserContext,
    activity: &Activity,
    config: &Config,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(to_handler_err(activity))?;

    let local = LocalLexiconSource;
    let sources: Vec<&dyn QuerySource> = vec![&local];
    let queries = gather_queries(&sources, 3).await;

    let result = async {
        for query in &queries {
            let url = format!("https://www.bing.com/search?q={}&form=RW", urlencoding(query));
            page.goto(&url, Duration::from_secs(20)).await?;
            page.wait_for_selector("#b_results", Duration::from_secs(5)).await?;

            let progress = page.evaluate("window.rewardsActivityProgress").await?;
            if progress.as_u64().unwrap_or(0) >= activity.point_progress_max {
                break;
            }

            let dwell = rng.human_variance(
                ((config.search.delay_min_seconds + config.search.delay_max_seconds) / 2 * 1000) as f64,
                0.3,
                0.05,
            );
            tokio::time::sleep(Duration::from_millis(dwell as u64)).await;
        }
        Ok(())
    }
    .await;

    let _ = page.close().await;
    result.map_err(to_handler_err(activity))?;
    Ok(ActivityOutcome::Completed)
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
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
            name: "exploreonbing_offer".into(),
            title: "t".into(),
            promotion_type: "urlreward".into(),
            destination_url: "https://rewards.microsoft.com/search".into(),
            point_progress: 0,
            point_progress_max: 20,
            complete: false,
            offer_id: "offer-bing".into(),
        }
    }

    #[tokio::test]
    async fn stops_once_progress_reaches_max() {
        let script = MockScript::new();
        script.set_selector_present("#b_results", true);
        script.set_eval("rewardsActivityProgress", serde_json::json!(20));
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
        let config = Config::default();
        let outcome = run(ctx.as_ref(), &activity(), &config, &mut rng).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Completed);
        assert_eq!(script.nav_log.read().len(), 1);
    }
}
