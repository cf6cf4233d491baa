// src/errors.rs
//
// Error taxonomy (spec.md §7). Typed errors at the seams that need to
// branch on error kind (config, login, ban); everything else propagates as
// anyhow::Result and gets a stable error ID at the pipeline boundary.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid duration `{raw}`: {reason}")]
    InvalidDuration { raw: String, reason: String },
    #[error("malformed JSONC: {0}")]
    Malformed(String),
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransientBrowserError {
    #[error("page or context closed: {0}")]
    TargetClosed(String),
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(std::time::Duration),
    #[error("live browser driver unavailable: {0}")]
    DriverUnavailable(String),
}

#[derive(Debug, Error)]
pub enum LoginRecoverableError {
    #[error("prompt dismissal failed: {0}")]
    PromptDismissFailed(String),
    #[error("keep-me-signed-in control not found")]
    KmsiMissing,
}

#[derive(Debug, Error)]
pub enum LoginFatalError {
    #[error("sign-in blocked (matched phrase: \"{phrase}\")")]
    Blocked { phrase: String },
    #[error("recovery email mismatch")]
    RecoveryMismatch,
    #[error("account flagged compromised during login (matched phrase: \"{phrase}\")")]
    CompromisedDetected { phrase: String },
    #[error("two-factor required but no totp secret configured")]
    TwoFactorNoSecret,
    #[error("totp generation failed: {0}")]
    TotpGenerationFailed(String),
    #[error("exceeded maximum login transitions ({0})")]
    TooManyTransitions(u32),
    #[error("login reached an unexpected terminal state")]
    Unexpected,
    #[error(transparent)]
    Transient(#[from] TransientBrowserError),
}

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("handler failed for offer {offer_id}: {reason}")]
    HandlerFailed { offer_id: String, reason: String },
    #[error("activity timed out")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum SecurityIncidentError {
    #[error("security incident {kind}: {reason}")]
    Raised { kind: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Login(#[from] LoginFatalError),
    #[error(transparent)]
    Security(#[from] SecurityIncidentError),
    #[error(transparent)]
    Browser(#[from] TransientBrowserError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// A stable 12-character SHA-256-prefix ID computed from normalized error
/// text, so recurring failures aggregate in the dashboard/logs regardless of
/// embedded timestamps, paths, line numbers, or hex addresses.
pub fn error_id(raw: &str) -> String {
    let normalized = normalize_error_text(raw);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

fn normalize_error_text(raw: &str) -> String {
    static TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
    static PATH_RE: OnceLock<Regex> = OnceLock::new();
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    static HEX_RE: OnceLock<Regex> = OnceLock::new();

    let timestamp_re = TIMESTAMP_RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?").unwrap()
    });
    let path_re = PATH_RE.get_or_init(|| Regex::new(r"(/[\w.\-]+)+\.rs").unwrap());
    let line_re = LINE_RE.get_or_init(|| Regex::new(r":\d+:\d+\b").unwrap());
    let hex_re = HEX_RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());

    let s = timestamp_re.replace_all(raw, "<ts>");
    let s = path_re.replace_all(&s, "<path>");
    let s = line_re.replace_all(&s, "");
    let s = hex_re.replace_all(&s, "<hex>");
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_id_stable_across_timestamp_and_path_variance() {
        let a = "TransientBrowserError at src/browser/factory.rs:42:7 on 2026-07-28T10:00:00Z";
        let b = "TransientBrowserError at src/browser/factory.rs:99:3 on 2026-07-29T22:11:05Z";
        assert_eq!(error_id(a), error_id(b));
    }

    #[test]
    fn error_id_differs_for_different_errors() {
        assert_ne!(error_id("login blocked"), error_id("navigation timeout"));
    }

    #[test]
    fn error_id_is_twelve_hex_chars() {
        assert_eq!(error_id("anything").len(), 12);
    }
}
