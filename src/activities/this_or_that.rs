// src/activities/this_or_that.rs
//
// ThisOrThat handler (spec.md §4.11): click start if present, then run
// `maxQuestions - currentQuestionNumber + 1` rounds, clicking one of the
// two options at random and waiting for the question number to change.

use super::{ActivityError, ActivityOutcome};
use crate::browser::BrowserContext;
use crate::events::Activity;
use crate::rng::SecureRng;
use std::time::Duration;

const MAX_QUESTIONS: i64 = 6;

pub async fn run(
    context: &dyn BrowserContext,
    activity: &Activity,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(to_handler_err(activity))?;

    let result = async {
        page.goto(&activity.destination_url, Duration::from_secs(20)).await?;

        if page.wait_for_selector("#rewardsQuizStart", Duration::from_millis(500)).await? {
            page.click("#rewardsQuizStart").await?;
        }

        let mut current_question = current_question_number(&page).await?;
        let rounds = (MAX_QUESTIONS - current_question + 1).max(0);

        for _ in 0..rounds {
            let option_index = rng.int_in(0, 2);
            page.click(&format!("#btoption{option_index}")).await?;

            let previous = current_question;
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(250)).await;
                current_question = current_question_number(&page).await?;
                if current_question != previous {
                    break;
                }
            }
        }
        Ok(())
    }
    .await;

    let _ = page.close().await;
    result.map_err(to_handler_err(activity))?;
    Ok(ActivityOutcome::Completed)
}

async fn current_question_number(page: &dyn crate::browser::BrowserPage) -> Result<i64, crate::browser::DriverError> {
    let value = page.evaluate("window.rewardsQuizRenderInfo.currentQuestionNumber").await?;
    Ok(value.as_i64().unwrap_or(1))
}

fn to_handler_err(activity: &Activity) -> impl Fn(crate::browser::DriverError) -> ActivityError + '_ {
    move |e| ActivityError::HandlerFailed { offer_id: activity.offer_id.clone(), reason: e.to_string() }
}
