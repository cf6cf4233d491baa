// src/ban.rs
//
// Ban / risk detector (spec.md §4.9). Three independent signal checks are
// fused into one worst-wins verdict: URL shape via `regex::RegexSet` (these
// are genuine regexes, not fixed phrases), page/API text via
// `aho_corasick::AhoCorasick` built once per process and cached in a
// `OnceLock` — the same "compile once, classify many" shape the pattern
// classifier uses for its own labelled phrase table. Warning escalation and
// hard-ban terminal handling are grounded in the weighted/tiered composite
// scoring pattern, generalized to account bans instead of traffic risk.

use crate::accounts::AccountStore;
use crate::events::{BanDetectionResult, BanSeverity, IncidentKind, SecurityIncident};
use aho_corasick::{AhoCorasick, MatchKind};
use chrono::Utc;
use dashmap::DashMap;
use regex::RegexSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use tracing::{error, warn};

const URL_PATTERNS: &[&str] = &[
    r"(?i)/suspended/",
    r"(?i)/blocked/",
    r"(?i)error.*unusual",
    r"(?i)security.*verify",
    r"(?i)account.*issue",
];

const HARD_BAN_PHRASES: &[&str] = &["order-blocked", "account-suspended", "access-denied"];
const SOFT_BAN_PHRASES: &[&str] = &["unusual-activity"];
const WARNING_PHRASES: &[&str] =
    &["verification-required", "security-challenge", "rate-limited", "captcha-required", "session-expired"];

fn url_pattern_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(URL_PATTERNS).expect("static url pattern set always compiles"))
}

fn text_classifier() -> &'static (AhoCorasick, Vec<BanSeverity>) {
    static CLASSIFIER: OnceLock<(AhoCorasick, Vec<BanSeverity>)> = OnceLock::new();
    CLASSIFIER.get_or_init(|| {
        let mut patterns = Vec::new();
        let mut severities = Vec::new();
        for p in HARD_BAN_PHRASES {
            patterns.push(*p);
            severities.push(BanSeverity::HardBan);
        }
        for p in SOFT_BAN_PHRASES {
            patterns.push(*p);
            severities.push(BanSeverity::SoftBan);
        }
        for p in WARNING_PHRASES {
            patterns.push(*p);
            severities.push(BanSeverity::Warning);
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(&patterns)
            .expect("static phrase table always compiles");
        (automaton, severities)
    })
}

pub fn classify_url(url: &str) -> BanSeverity {
    if url_pattern_set().is_match(url) {
        BanSeverity::SoftBan
    } else {
        BanSeverity::None
    }
}

pub fn classify_text(text: &str) -> (BanSeverity, Vec<String>) {
    let (automaton, severities) = text_classifier();
    let mut worst = BanSeverity::None;
    let mut matched_labels = Vec::new();
    for m in automaton.find_iter(text) {
        let severity = severities[m.pattern().as_usize()];
        if severity > worst {
            worst = severity;
        }
        matched_labels.push(text[m.start()..m.end()].to_string());
    }
    (worst, matched_labels)
}

pub fn classify_http_status(status: u16, retry_after_present: bool, rate_limit_remaining_zero: bool) -> BanSeverity {
    match status {
        403 => BanSeverity::HardBan,
        429 | 451 => BanSeverity::Warning,
        _ if retry_after_present || rate_limit_remaining_zero => BanSeverity::Warning,
        _ => BanSeverity::None,
    }
}

/// One independent input into the fusion, tagged with its source for
/// logging/reporting.
#[derive(Debug, Clone)]
pub struct Signal {
    pub source: &'static str,
    pub severity: BanSeverity,
    pub details: Vec<String>,
}

pub struct BanDetector {
    accounts: AccountStore,
    warning_counts: DashMap<String, AtomicU32>,
    disabled: DashMap<String, ()>,
}

impl BanDetector {
    pub fn new(accounts: AccountStore) -> Self {
        Self { accounts, warning_counts: DashMap::new(), disabled: DashMap::new() }
    }

    /// Fuses the given signals for one account/session into a single
    /// verdict, applying the three-warning-escalates-to-soft-ban rule and
    /// (for hard-ban) disabling the account in place.
    pub fn evaluate(&self, account_email: &str, signals: &[Signal]) -> BanDetectionResult {
        let mut worst = BanSeverity::None;
        let mut reason = String::new();
        let mut details = Vec::new();

        for signal in signals {
            details.extend(signal.details.iter().cloned());
            if signal.severity > worst {
                worst = signal.severity;
                reason = format!("{}: {}", signal.source, signal.details.join(", "));
            }
        }

        if worst == BanSeverity::Warning {
            let counter = self
                .warning_counts
                .entry(account_email.to_string())
                .or_insert_with(|| AtomicU32::new(0));
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= 3 {
                worst = BanSeverity::SoftBan;
                reason = format!("escalated after {count} warnings");
                counter.store(0, Ordering::SeqCst);
            }
        } else if worst == BanSeverity::None {
            if let Some(counter) = self.warning_counts.get(account_email) {
                counter.store(0, Ordering::SeqCst);
            }
        }

        if worst == BanSeverity::HardBan {
            self.disable_account(account_email, &reason);
        }

        BanDetectionResult {
            detected: worst != BanSeverity::None,
            severity: worst,
            reason,
            details,
            recoverable: worst != BanSeverity::HardBan,
        }
    }

    /// Disables the account exactly once per process (Testable Property 4:
    /// a hard-ban verdict disables the account and emits its incident
    /// exactly once). Subsequent hard-ban verdicts for an already-disabled
    /// account are logged but do not touch the file again.
    fn disable_account(&self, account_email: &str, reason: &str) {
        if self.disabled.insert(account_email.to_string(), ()).is_some() {
            return;
        }
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if let Err(e) = self.accounts.disable_account_with_reason(account_email, reason) {
            error!(account = account_email, error = %e, "failed to disable banned account");
            self.disabled.remove(account_email);
        } else {
            warn!(account = account_email, reason, date = %today, "account disabled after hard-ban");
        }
    }

    pub fn build_incident(&self, account_email: &str, reason: &str) -> SecurityIncident {
        SecurityIncident {
            kind: IncidentKind::AccountSuspended,
            account: account_email.to_string(),
            details: vec![reason.to_string()],
            next: vec!["account disabled in accounts file".to_string()],
            docs_url: "https://support.microsoft.com/account/unusual-activity".to_string(),
        }
    }
}
