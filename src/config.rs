// src/config.rs
//
// Typed configuration (spec.md §4.1). Loaded from JSONC via jsonc::parse,
// validated eagerly at startup so a bad config fails fast with a named
// field rather than surfacing as a confusing runtime error hours later.

use crate::errors::ConfigError;
use crate::jsonc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_accounts_path")]
    pub accounts_path: String,

    #[serde(default = "default_job_state_dir")]
    pub job_state_dir: String,

    #[serde(default = "default_history_dir")]
    pub history_dir: String,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub activities: ActivitiesConfig,

    #[serde(default)]
    pub ban_detection: BanDetectionConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub headless: bool,
}

fn default_accounts_path() -> String {
    "accounts.jsonc".to_string()
}
fn default_job_state_dir() -> String {
    "state/jobs".to_string()
}
fn default_history_dir() -> String {
    "state/history".to_string()
}
fn default_reports_dir() -> String {
    "reports".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Zero or more local wall-clock `HH:MM` fire times (spec.md §4.1).
    /// Empty means the scheduler never fires on its own — only
    /// `runOnStart` or a dashboard-triggered run executes the pipeline.
    #[serde(default = "default_run_times", rename = "runAt")]
    pub run_at: Vec<String>,
    #[serde(default = "default_jitter", rename = "jitterMinutes")]
    pub jitter_minutes: u32,
    #[serde(default, rename = "runOnStart")]
    pub run_on_start: bool,
    /// Probability in `[0, 1]` that a given fire is skipped as a "vacation
    /// day" (spec.md §4.1).
    #[serde(default = "default_vacation_probability", rename = "vacationProbability")]
    pub vacation_probability: f64,
}

fn default_run_times() -> Vec<String> {
    vec!["09:00".to_string()]
}
fn default_jitter() -> u32 {
    30
}
fn default_vacation_probability() -> f64 {
    0.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_times(),
            jitter_minutes: default_jitter(),
            run_on_start: false,
            vacation_probability: default_vacation_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_concurrent", rename = "maxConcurrentAccounts")]
    pub max_concurrent_accounts: usize,
    #[serde(default = "default_account_delay", rename = "accountDelaySeconds")]
    pub account_delay_seconds: u64,
    /// Number of times each account's pipeline runs per invocation
    /// (spec.md §4.13 `execution.passes`).
    #[serde(default = "default_passes", rename = "passes")]
    pub passes: u32,
    /// Sleep between an account's own passes, not between accounts.
    #[serde(default = "default_inter_pass_delay", rename = "interPassDelaySeconds")]
    pub inter_pass_delay_seconds: u64,
}

fn default_max_concurrent() -> usize {
    2
}
fn default_account_delay() -> u64 {
    15
}
fn default_passes() -> u32 {
    1
}
fn default_inter_pass_delay() -> u64 {
    300
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_accounts: default_max_concurrent(),
            account_delay_seconds: default_account_delay(),
            passes: default_passes(),
            inter_pass_delay_seconds: default_inter_pass_delay(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn account_delay(&self) -> Duration {
        Duration::from_secs(self.account_delay_seconds)
    }

    pub fn inter_pass_delay(&self) -> Duration {
        Duration::from_secs(self.inter_pass_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default = "default_true", rename = "useLocalQueries")]
    pub use_local_queries: bool,
    #[serde(default, rename = "trendsRegion")]
    pub trends_region: Option<String>,
    #[serde(default = "default_search_delay_min", rename = "delayMinSeconds")]
    pub delay_min_seconds: u64,
    #[serde(default = "default_search_delay_max", rename = "delayMaxSeconds")]
    pub delay_max_seconds: u64,
    /// Retries for a stalled/failed mobile search bucket, each against a
    /// freshly rebuilt browser context rather than the one that stalled.
    #[serde(default = "default_retry_mobile_search_amount", rename = "retryMobileSearchAmount")]
    pub retry_mobile_search_amount: u32,
    /// Caps queries issued against one browser session before the bucket
    /// reports `Stalled` and lets the caller rotate to a fresh context.
    #[serde(default = "default_per_session_max", rename = "perSessionMax")]
    pub per_session_max: u32,
}

fn default_true() -> bool {
    true
}
fn default_search_delay_min() -> u64 {
    18
}
fn default_search_delay_max() -> u64 {
    60
}
fn default_retry_mobile_search_amount() -> u32 {
    1
}
fn default_per_session_max() -> u32 {
    40
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_local_queries: true,
            trends_region: None,
            delay_min_seconds: default_search_delay_min(),
            delay_max_seconds: default_search_delay_max(),
            retry_mobile_search_amount: default_retry_mobile_search_amount(),
            per_session_max: default_per_session_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivitiesConfig {
    #[serde(default = "default_true", rename = "completeDailySet")]
    pub complete_daily_set: bool,
    #[serde(default = "default_true", rename = "completePunchCards")]
    pub complete_punch_cards: bool,
    #[serde(default = "default_true", rename = "completeMorePromotions")]
    pub complete_more_promotions: bool,
    #[serde(default, rename = "doFreeRewards")]
    pub do_free_rewards: bool,
    #[serde(default, rename = "doReadToEarn")]
    pub do_read_to_earn: bool,
    /// When false (the default), a pass with nothing earnable skips the
    /// browser entirely rather than running a no-op login (spec.md §4.12
    /// step 4).
    #[serde(default, rename = "runOnZeroPoints")]
    pub run_on_zero_points: bool,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self {
            complete_daily_set: true,
            complete_punch_cards: true,
            complete_more_promotions: true,
            do_free_rewards: false,
            do_read_to_earn: false,
            run_on_zero_points: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BanDetectionConfig {
    #[serde(default = "default_true", rename = "disableOnHardBan")]
    pub disable_on_hard_ban: bool,
    #[serde(default = "default_cooldown_hours", rename = "softBanCooldownHours")]
    pub soft_ban_cooldown_hours: u64,
}

fn default_cooldown_hours() -> u64 {
    24
}

impl Default for BanDetectionConfig {
    fn default() -> Self {
        Self {
            disable_on_hard_ban: true,
            soft_ban_cooldown_hours: default_cooldown_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_dashboard_port() -> u16 {
    8787
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: false, port: default_dashboard_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default, rename = "webhookUrl")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_true", rename = "notifyOnError")]
    pub notify_on_error: bool,
    #[serde(default, rename = "notifyOnBan")]
    pub notify_on_ban: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { webhook_url: None, notify_on_error: true, notify_on_ban: false }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts_path: default_accounts_path(),
            job_state_dir: default_job_state_dir(),
            history_dir: default_history_dir(),
            reports_dir: default_reports_dir(),
            schedule: ScheduleConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            search: SearchConfig::default(),
            activities: ActivitiesConfig::default(),
            ban_detection: BanDetectionConfig::default(),
            dashboard: DashboardConfig::default(),
            notifications: NotificationsConfig::default(),
            headless: true,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let stripped = jsonc::strip_comments(raw);
        let config: Config = serde_json::from_str(&stripped).map_err(classify_parse_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for raw in &self.schedule.run_at {
            parse_clock_time(raw)?;
        }
        if !(0.0..=1.0).contains(&self.schedule.vacation_probability) {
            return Err(ConfigError::InvalidDuration {
                raw: self.schedule.vacation_probability.to_string(),
                reason: "vacationProbability must be between 0 and 1".to_string(),
            });
        }

        if self.concurrency.max_concurrent_accounts == 0 {
            return Err(ConfigError::InvalidDuration {
                raw: "0".to_string(),
                reason: "maxConcurrentAccounts must be at least 1".to_string(),
            });
        }
        if self.concurrency.passes == 0 {
            return Err(ConfigError::InvalidDuration {
                raw: "0".to_string(),
                reason: "passes must be at least 1".to_string(),
            });
        }
        if self.search.delay_min_seconds > self.search.delay_max_seconds {
            return Err(ConfigError::InvalidDuration {
                raw: format!("{}..{}", self.search.delay_min_seconds, self.search.delay_max_seconds),
                reason: "delayMinSeconds must not exceed delayMaxSeconds".to_string(),
            });
        }
        if let Some(url) = &self.notifications.webhook_url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidDuration {
                raw: url.clone(),
                reason: format!("invalid webhook URL: {e}"),
            })?;
        }
        Ok(())
    }
}

/// `deny_unknown_fields` surfaces an unrecognized key as
/// `"unknown field \`x\`, expected one of ..."` inside serde_json's error
/// message; pull that out into its own variant so a typo'd config key fails
/// fast with a named field instead of a generic parse error.
fn classify_parse_error(err: serde_json::Error) -> ConfigError {
    match extract_unknown_field(&err.to_string()) {
        Some(field) => ConfigError::UnknownKey(field),
        None => ConfigError::Malformed(err.to_string()),
    }
}

fn extract_unknown_field(message: &str) -> Option<String> {
    static UNKNOWN_FIELD_RE: OnceLock<Regex> = OnceLock::new();
    let re = UNKNOWN_FIELD_RE.get_or_init(|| Regex::new(r"unknown field `([^`]+)`").unwrap());
    re.captures(message).map(|c| c[1].to_string())
}

/// Parses an `HH:MM` 24-hour clock string into (hour, minute).
pub fn parse_clock_time(raw: &str) -> Result<(u32, u32), ConfigError> {
    let (h, m) = raw.split_once(':').ok_or_else(|| ConfigError::InvalidDuration {
        raw: raw.to_string(),
        reason: "expected HH:MM".to_string(),
    })?;
    let hour: u32 = h.parse().map_err(|_| ConfigError::InvalidDuration {
        raw: raw.to_string(),
        reason: "hour is not a number".to_string(),
    })?;
    let minute: u32 = m.parse().map_err(|_| ConfigError::InvalidDuration {
        raw: raw.to_string(),
        reason: "minute is not a number".to_string(),
    })?;
    if hour > 23 || minute > 59 {
        return Err(ConfigError::InvalidDuration {
            raw: raw.to_string(),
            reason: "hour/minute out of range".to_string(),
        });
    }
    Ok((hour, minute))
}
