// src/recovery.rs
//
// Masked recovery-email consistency check (spec.md §4.8). A masked address
// like `k******@domain.tld` is compared against the account's configured
// `email`/`recoveryEmail`; a mismatch means the session belongs to someone
// else's account and is always treated as a critical security incident.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

static MASKED_RECOVERY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9])\*{2,}([A-Za-z0-9])?@([A-Za-z0-9.\-]+\.[A-Za-z]{2,})").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedAddress {
    pub visible_prefix: String,
    pub domain: String,
}

/// Which matching rule decided a `Consistent` verdict — kept as a distinct
/// value on the result, rather than folded away, so every comparison's log
/// line states which mode matched (spec.md §9 open-question decision).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMatchMode {
    /// Both visible characters of a 2-char mask matched the known local part.
    Strict,
    /// Only the first character of a 1-char mask was compared.
    Lenient,
}

/// Extracts the first masked-recovery-address-shaped string found in `text`,
/// if any.
pub fn extract_masked_address(text: &str) -> Option<MaskedAddress> {
    let caps = MASKED_RECOVERY_RE.captures(text)?;
    let mut prefix = caps.get(1)?.as_str().to_string();
    if let Some(second) = caps.get(2) {
        prefix.push_str(second.as_str());
    }
    let domain = caps.get(3)?.as_str().to_string();
    Some(MaskedAddress { visible_prefix: prefix, domain })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyResult {
    Consistent(RecoveryMatchMode),
    Mismatch,
    NoCandidate,
}

/// Compares a masked candidate against the account's known addresses.
/// Domain must match exactly; prefix match is strict (both visible
/// characters) when 2 are visible, lenient (first character only) when
/// only 1 is visible.
pub fn check_consistency(
    candidate: &MaskedAddress,
    account_email: &str,
    recovery_email: Option<&str>,
) -> ConsistencyResult {
    let known: Vec<&str> = [Some(account_email), recovery_email].into_iter().flatten().collect();

    for addr in known {
        let Some((local, domain)) = addr.split_once('@') else { continue };
        if !domain.eq_ignore_ascii_case(&candidate.domain) {
            continue;
        }
        let local_lower = local.to_lowercase();
        let prefix_lower = candidate.visible_prefix.to_lowercase();

        let mode = if prefix_lower.len() >= 2 { RecoveryMatchMode::Strict } else { RecoveryMatchMode::Lenient };
        let matches = match mode {
            RecoveryMatchMode::Strict => local_lower.starts_with(&prefix_lower),
            RecoveryMatchMode::Lenient => local_lower
                .chars()
                .next()
                .map(|c| prefix_lower.starts_with(c))
                .unwrap_or(false),
        };

        if matches {
            info!(mode = ?mode, domain = %candidate.domain, "recovery address consistency check matched");
            return ConsistencyResult::Consistent(mode);
        }
    }
    ConsistencyResult::Mismatch
}

/// Runs the full check over a page's visible text; `NoCandidate` means the
/// page did not expose a masked address at all (not a mismatch).
pub fn check_page_text(text: &str, account_email: &str, recovery_email: Option<&str>) -> ConsistencyResult {
    match extract_masked_address(text) {
        Some(candidate) => check_consistency(&candidate, account_email, recovery_email),
        None => ConsistencyResult::NoCandidate,
    }
}
