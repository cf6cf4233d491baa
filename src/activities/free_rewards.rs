// src/activities/free_rewards.rs
//
// FreeRewards handler (spec.md §4.11), optional: gated on `do_free_rewards`
// and on the account having a phone number. Enumerates zero-point cards,
// redeems each, waits out an optional Cloudflare Turnstile challenge with
// humanised idle motion, and confirms success by URL or a success-classed
// element.

use super::{ActivityError, ActivityOutcome};
use crate::browser::{BrowserContext, BrowserPage};
use crate::config::Config;
use crate::events::Account;
use crate::rng::SecureRng;
use std::time::{Duration, Instant};
use tracing::warn;

const TURNSTILE_MAX_WAIT: Duration = Duration::from_secs(60);

pub fn is_eligible(config: &Config, account: &Account) -> bool {
    config.activities.do_free_rewards && account.phone_number.is_some()
}

pub async fn run(
    context: &dyn BrowserContext,
    catalog_url: &str,
    rng: &mut SecureRng,
) -> Result<ActivityOutcome, ActivityError> {
    let page = context.new_page().await.map_err(to_err)?;

    let result = async {
        page.goto(catalog_url, Duration::from_secs(20)).await?;
        let cards = page.evaluate("window.rewardsFreeRewardCards").await?;
        let card_ids: Vec<String> = cards
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        for card_id in card_ids {
            page.click(&format!("[data-card-id='{card_id}']")).await?;
            page.click("[data-testid=redeem-primary]").await?;
            wait_for_turnstile(page.as_ref(), rng).await?;
            page.click("[data-testid=checkout-confirm]").await?;

            let url = page.current_url().await?;
            let success_by_url = url.contains("orderconfirmation") || url.contains("success") || url.contains("confirmed");
            let success_by_element = page.wait_for_selector(".success", Duration::from_secs(5)).await?;
            if !success_by_url && !success_by_element {
                // No explicit success indicator. Treated as success per the
                // account's own risk tolerance for this ambiguous case, but
                // logged distinctly so an operator can grep for it.
                warn!(card_id = %card_id, outcome = "unconfirmed", "free reward redemption had no explicit success indicator");
            }
        }
        Ok(())
    }
    .await;

    let _ = page.close().await;
    result.map_err(to_err)?;
    Ok(ActivityOutcome::Completed)
}

async fn wait_for_turnstile(
    page: &dyn BrowserPage,
    rng: &mut SecureRng,
) -> Result<(), crate::browser::DriverError> {
    let start = Instant::now();
    if !page.wait_for_selector("[data-testid=turnstile-widget]", Duration::from_millis(500)).await? {
        return Ok(());
    }
    while start.elapsed() < TURNSTILE_MAX_WAIT {
        if page.wait_for_selector("[data-testid=turnstile-solved]", Duration::from_millis(500)).await? {
            return Ok(());
        }
        let dy = rng.scroll_path(rng.float_in(-80.0, 80.0));
        for segment in dy {
            page.scroll_by(segment).await?;
        }
    }
    Ok(())
}

fn to_err(e: crate::browser::DriverError) -> ActivityError {
    ActivityError::HandlerFailed { offer_id: "free-rewards".to_string(), reason: e.to_string() }
}
