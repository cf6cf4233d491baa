// src/activities/read_to_earn.rs
//
// ReadToEarn handler (spec.md §4.11): calls the rewards API per article,
// bounded at 10 articles per session, with an inter-claim delay drawn from
// the configured search-delay range. An unchanged balance after a claim is
// "already done", not a failure.

use super::ActivityError;
use crate::config::Config;
use crate::rng::SecureRng;
use serde::Deserialize;
use std::time::Duration;

const MAX_ARTICLES_PER_SESSION: usize = 10;
const READ_TO_EARN_ENDPOINT: &str = "https://prod.rewardsplatform.microsoft.com/dapi/me/activities/readtoearn";

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    #[serde(rename = "pointProgress", default)]
    point_progress: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadToEarnSummary {
    pub claimed: usize,
    pub already_done: usize,
}

pub async fn run(
    client: &reqwest::Client,
    oauth_token: &str,
    article_ids: &[String],
    config: &Config,
    rng: &mut SecureRng,
) -> Result<ReadToEarnSummary, ActivityError> {
    let mut summary = ReadToEarnSummary::default();
    let mut last_balance: Option<u64> = None;

    for article_id in article_ids.iter().take(MAX_ARTICLES_PER_SESSION) {
        let response = client
            .post(READ_TO_EARN_ENDPOINT)
            .bearer_auth(oauth_token)
            .json(&serde_json::json!({ "articleId": article_id }))
            .send()
            .await
            .map_err(|e| to_err(article_id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(to_err(article_id, format!("status {}", response.status())));
        }

        let body: ClaimResponse = response.json().await.map_err(|e| to_err(article_id, e.to_string()))?;

        if last_balance == Some(body.point_progress) {
            summary.already_done += 1;
        } else {
            summary.claimed += 1;
        }
        last_balance = Some(body.point_progress);

        let delay_ms = rng.human_variance(
            ((config.search.delay_min_seconds + config.search.delay_max_seconds) / 2 * 1000) as f64,
            0.2,
            0.05,
        );
        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
    }

    Ok(summary)
}

fn to_err(article_id: &str, reason: String) -> ActivityError {
    ActivityError::HandlerFailed { offer_id: format!("read-to-earn:{article_id}"), reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_is_ten_articles_per_session() {
        assert_eq!(MAX_ARTICLES_PER_SESSION, 10);
    }
}
