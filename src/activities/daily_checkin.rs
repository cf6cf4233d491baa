// src/activities/daily_checkin.rs
//
// DailyCheckIn handler (spec.md §4.11): calls the rewards API directly with
// a fresh OAuth token rather than driving the browser UI. An unchanged
// post-claim balance is treated as "already done" rather than a failure.

use super::{ActivityError, ActivityOutcome};
use serde::Deserialize;

const CHECKIN_ENDPOINT: &str = "https://prod.rewardsplatform.microsoft.com/dapi/me/activities/dailycheckin";

#[derive(Debug, Deserialize)]
struct CheckinResponse {
    #[serde(rename = "pointProgress", default)]
    point_progress: u64,
}

pub async fn run(client: &reqwest::Client, oauth_token: &str, prior_balance: u64) -> Result<ActivityOutcome, ActivityError> {
    let response = client
        .post(CHECKIN_ENDPOINT)
        .bearer_auth(oauth_token)
        .send()
        .await
        .map_err(|e| to_err(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ActivityError::HttpStatus { offer_id: "daily-checkin".to_string(), status: response.status().as_u16() });
    }

    let body: CheckinResponse = response.json().await.map_err(|e| to_err(e.to_string()))?;

    if body.point_progress == prior_balance {
        Ok(ActivityOutcome::AlreadyDone)
    } else {
        Ok(ActivityOutcome::Completed)
    }
}

fn to_err(reason: String) -> ActivityError {
    ActivityError::HandlerFailed { offer_id: "daily-checkin".to_string(), reason }
}
