// src/activities/quiz.rs
//
// Quiz handler (spec.md §4.11). Reads quiz-state data exposed by the page:
// 8-option variants pre-scan each option's `iscorrectoption` attribute and
// click all truthy ones in sequence; 2-4-option variants read the
// correct-answer index and click the matching `data-option`. Aborts on
// refresh failure after a click.

use super::{ActivityError, ActivityOutcome};
use crate::browser::BrowserContext;
use crate::events::Activity;
use crate::rng::SecureRng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct QuizOption {
    #[serde(rename = "isCorrect")]
    is_correct: bool,
}

#[derive(Debug, Deserialize)]
struct QuizState {
    #[serde(rename = "optionCount")]
    option_count: u32,
    #[serde(default)]
    options: Vec<QuizOption>,
    #[serde(rename = "correctAnswer", default)]
    correct_answer: Option<u32>,
}

pub async fn run(
    context: &dyn BrowserContext,
    activity: &Activity,
    _rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(to_handler_err(activity))?;

    let result = async {
        page.goto(&activity.destination_url, Duration::from_secs(20)).await?;
        let raw = page.evaluate("window.rewardsQuizQuestionsState").await?;
        let state: QuizState = serde_json::from_value(raw).unwrap_or(QuizState {
            option_count: 0,
            options: vec![],
            correct_answer: None,
        });

        if state.option_count == 8 {
            for (i, option) in state.options.iter().enumerate() {
                if option.is_correct {
                    page.click(&format!("[data-option='{i}']")).await?;
                    if !wait_for_refresh(page.as_ref()).await? {
                        return Err(crate::browser::DriverError::Backend("refresh failed".to_string()));
                    }
                }
            }
        } else if let Some(correct) = state.correct_answer {
            page.click(&format!("[data-option='{correct}']")).await?;
            if !wait_for_refresh(page.as_ref()).await? {
                return Err(crate::browser::DriverError::Backend("refresh failed".to_string()));
            }
        }
        Ok(())
    }
    .await;

    let _ = page.close().await;
    result.map_err(to_handler_err(activity))?;
    Ok(ActivityOutcome::Completed)
}

async fn wait_for_refresh(page: &dyn crate::browser::BrowserPage) -> Result<bool, crate::browser::DriverError> {
    page.wait_for_selector("[data-testid=quiz-refreshed]", Duration::from_secs(5)).await
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
            name: "quiz1".into(),
            title: "t".into(),
            promotion_type: "quiz".into(),
            destination_url: "https://rewards.microsoft.com/quiz".into(),
            point_progress: 0,
            point_progress_max: 30,
            complete: false,
            offer_id: "offer-quiz".into(),
        }
    }

    #[tokio::test]
    async fn eight_option_variant_clicks_all_correct_options() {
        let script = MockScript::new();
        script.set_selector_present("[data-testid=quiz-refreshed]", true);
        script.set_eval(
            "rewardsQuizQuestionsState",
            serde_json::json!({
                "optionCount": 8,
                "options": [
                    {"isCorrect": false}, {"isCorrect": true}, {"isCorrect": false},
                    {"isCorrect": true}, {"isCorrect": false}, {"isCorrect": false},
                    {"isCorrect": false}, {"isCorrect": false}
                ]
            }),
        );
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
        assert_eq!(script.click_log.read().len(), 2);
    }

    #[tokio::test]
    async fn four_option_variant_clicks_correct_answer() {
        let script = MockScript::new();
        script.set_selector_present("[data-testid=quiz-refreshed]", true);
        script.set_eval("rewardsQuizQuestionsState", serde_json::json!({ "optionCount": 4, "correctAnswer": 2 }));
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
        assert_eq!(script.click_log.read()[0], "[data-option='2']");
    }
}
