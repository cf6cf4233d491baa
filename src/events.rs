// src/events.rs
//
// Shared domain types flowing between every module: accounts, activities,
// dashboard snapshots, job-state records, login state, security incidents.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ── Account ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub password: String,
    #[serde(default, rename = "totp")]
    pub totp_seed: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default, rename = "recoveryEmail")]
    pub recovery_email: Option<String>,
    #[serde(default, rename = "phoneNumber")]
    pub phone_number: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Account {
    /// Masked form safe to surface on the dashboard / in logs.
    pub fn masked_email(&self) -> String {
        mask_email(&self.email)
    }
}

pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((user, domain)) => {
            let visible: String = user.chars().take(2).collect();
            format!("{visible}***@{domain}")
        }
        None => "***".to_string(),
    }
}

// ── Persona / RunContext ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persona {
    Desktop,
    Mobile,
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desktop => write!(f, "desktop"),
            Self::Mobile => write!(f, "mobile"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub account_email: String,
    pub is_mobile: bool,
    pub started_at: DateTime<Utc>,
    pub run_id: String,
    pub pass: u32,
}

impl RunContext {
    pub fn new(account_email: impl Into<String>, is_mobile: bool, run_id: String, pass: u32) -> Self {
        Self {
            account_email: account_email.into(),
            is_mobile,
            started_at: Utc::now(),
            run_id,
            pass,
        }
    }

    pub fn persona(&self) -> Persona {
        if self.is_mobile {
            Persona::Mobile
        } else {
            Persona::Desktop
        }
    }
}

// ── Dashboard-scraped data ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStatus {
    pub available_points: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointProgress {
    pub point_progress: u64,
    pub point_progress_max: u64,
}

impl PointProgress {
    pub fn remaining(&self) -> i64 {
        self.point_progress_max as i64 - self.point_progress as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default, rename = "mobileSearch")]
    pub mobile_search: Vec<PointProgress>,
    #[serde(default, rename = "pcSearch")]
    pub pc_search: Vec<PointProgress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardData {
    pub user_status: UserStatus,
    pub counters: Counters,
    pub more_promotions: Vec<Activity>,
    pub daily_set: HashMap<String, Vec<Activity>>,
    pub punch_cards: Vec<Activity>,
}

impl DashboardData {
    /// Sum of point-progress-remaining across the buckets a persona can touch.
    pub fn earnable(&self, persona: Persona) -> i64 {
        let search_remaining = match persona {
            Persona::Desktop => self.counters.pc_search.first().map(|p| p.remaining()).unwrap_or(0),
            Persona::Mobile => self.counters.mobile_search.first().map(|p| p.remaining()).unwrap_or(0),
        }
        .max(0);

        let activities_remaining: i64 = self
            .daily_set
            .values()
            .flatten()
            .chain(self.more_promotions.iter())
            .chain(self.punch_cards.iter())
            .filter(|a| !a.complete)
            .map(|a| (a.point_progress_max as i64 - a.point_progress as i64).max(0))
            .sum();

        search_remaining + activities_remaining
    }
}

// ── Activity ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub title: String,
    pub promotion_type: String,
    pub destination_url: String,
    pub point_progress: u64,
    pub point_progress_max: u64,
    pub complete: bool,
    pub offer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Poll,
    Abc,
    ThisOrThat,
    Quiz,
    SearchOnBing,
    UrlReward,
    FreeRewards,
    Unsupported,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Poll => "poll",
            Self::Abc => "abc",
            Self::ThisOrThat => "thisOrThat",
            Self::Quiz => "quiz",
            Self::SearchOnBing => "searchOnBing",
            Self::UrlReward => "urlReward",
            Self::FreeRewards => "freeRewards",
            Self::Unsupported => "unsupported",
        };
        write!(f, "{s}")
    }
}

// ── Job-state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUnitRecord {
    pub completed_at: DateTime<Utc>,
    pub points_claimed: u64,
    pub attempts: u32,
}

/// `{date: {work_unit_id: record}}`, the on-disk shape of one account's job-state file.
pub type JobStateFile = HashMap<String, HashMap<String, JobUnitRecord>>;

pub fn work_unit_search(persona: Persona) -> String {
    format!("search:{persona}")
}

pub fn work_unit_read_to_earn(article_index: usize) -> String {
    format!("r2e:{article_index}")
}

pub const WORK_UNIT_DAILY_CHECKIN: &str = "daily_checkin";
pub const WORK_UNIT_FREE_REWARDS: &str = "free_rewards";

// ── Account history ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub desktop_points: u64,
    pub mobile_points: u64,
    pub total_points: u64,
    pub completed: u32,
    pub failed: u32,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub success: bool,
}

// ── Ban / risk detection ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BanSeverity {
    None,
    Warning,
    SoftBan,
    HardBan,
}

impl fmt::Display for BanSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::SoftBan => "soft-ban",
            Self::HardBan => "hard-ban",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanDetectionResult {
    pub detected: bool,
    pub severity: BanSeverity,
    pub reason: String,
    pub details: Vec<String>,
    pub recoverable: bool,
}

impl BanDetectionResult {
    pub fn none() -> Self {
        Self {
            detected: false,
            severity: BanSeverity::None,
            reason: String::new(),
            details: Vec::new(),
            recoverable: true,
        }
    }
}

// ── Login state machine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginState {
    Unknown,
    InitialLoad,
    EmailPage,
    EmailSubmitted,
    PasswordPage,
    PasswordSubmitted,
    TwoFactorRequired,
    TwoFactorSubmitted,
    PasskeyPrompt,
    RecoveryCheck,
    Compromised,
    LoggedIn,
    Blocked,
    Error,
}

impl LoginState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedIn | Self::Blocked | Self::Error | Self::Compromised)
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── Security incidents ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentKind {
    RecoveryMismatch,
    SignInBlocked,
    AccountSuspended,
    CompromisedDetected,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RecoveryMismatch => "recovery-mismatch",
            Self::SignInBlocked => "sign-in-blocked",
            Self::AccountSuspended => "account-suspended",
            Self::CompromisedDetected => "compromised-detected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub kind: IncidentKind,
    pub account: String,
    pub details: Vec<String>,
    pub next: Vec<String>,
    pub docs_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earnable_sums_search_and_activities() {
        let mut daily_set = HashMap::new();
        daily_set.insert(
            "2026-07-28".to_string(),
            vec![Activity {
                name: "a".into(),
                title: "t".into(),
                promotion_type: "quiz".into(),
                destination_url: "https://example.test".into(),
                point_progress: 0,
                point_progress_max: 10,
                complete: false,
                offer_id: "o1".into(),
            }],
        );
        let data = DashboardData {
            user_status: UserStatus { available_points: 0 },
            counters: Counters {
                mobile_search: vec![],
                pc_search: vec![PointProgress { point_progress: 50, point_progress_max: 150 }],
            },
            more_promotions: vec![],
            daily_set,
            punch_cards: vec![],
        };
        assert_eq!(data.earnable(Persona::Desktop), 100 + 10);
    }

    #[test]
    fn masked_email_never_shows_full_local_part() {
        let acc = Account {
            email: "someone@example.com".into(),
            password: "pw".into(),
            totp_seed: None,
            proxy: None,
            recovery_email: None,
            phone_number: None,
            enabled: true,
        };
        assert!(!acc.masked_email().contains("someone"));
    }
}
