// src/login.rs
//
// Login state machine (spec.md §4.7). `classify` is a pure function over an
// `Observation` snapshot so the 13-state transition table can be unit tested
// without a browser; `LoginStateMachine::drive` is the async loop that
// gathers observations from a live page and feeds them through it.

use crate::errors::{LoginFatalError, LoginRecoverableError, TransientBrowserError};
use crate::events::{Account, LoginState};
use crate::recovery::{self, ConsistencyResult};
use crate::rng::SecureRng;
use crate::totp;
use aho_corasick::{AhoCorasick, MatchKind};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::BrowserPage;

pub const REWARDS_HOST: &str = "rewards.microsoft.com";
pub const LOGIN_HOST: &str = "login.live.com";
pub const OAUTH_HOSTS: &[&str] = &["login.live.com", "account.live.com"];

const MAX_TRANSITIONS: u32 = 25;

#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub portal_presence_selector_visible: bool,
    pub email_input_visible: bool,
    pub password_input_visible: bool,
    pub otp_input_visible: bool,
    pub target_closed: bool,
}

const PASSKEY_PHRASES: &[&str] = &["windows hello", "passkey", "biometric", "use your fingerprint", "face recognition"];
const BLOCKED_PHRASES: &[&str] = &["can't sign you in", "blocked", "locked"];
const COMPROMISED_PHRASES: &[&str] =
    &["account may be compromised", "unusual activity", "suspicious sign-in activity", "confirm this was you"];
const SECONDARY_BUTTON_PHRASES: &[&str] = &["skip for now", "use your password instead", "try another way", "not now"];

fn passkey_patterns() -> &'static AhoCorasick {
    static PATTERNS: OnceLock<AhoCorasick> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(PASSKEY_PHRASES)
            .unwrap()
    })
}

fn blocked_patterns() -> &'static AhoCorasick {
    static PATTERNS: OnceLock<AhoCorasick> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(BLOCKED_PHRASES)
            .unwrap()
    })
}

fn compromised_patterns() -> &'static AhoCorasick {
    static PATTERNS: OnceLock<AhoCorasick> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(COMPROMISED_PHRASES)
            .unwrap()
    })
}

fn secondary_phrase_patterns() -> &'static AhoCorasick {
    static PATTERNS: OnceLock<AhoCorasick> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(SECONDARY_BUTTON_PHRASES)
            .unwrap()
    })
}

/// Returns the literal phrase text that matched, not just whether one did,
/// so callers can carry the matched phrase into an error/incident instead of
/// a generic fixed label.
fn matched_phrase(patterns: &AhoCorasick, phrases: &[&str], haystack: &str) -> Option<String> {
    patterns.find(haystack).map(|m| phrases[m.pattern().as_usize()].to_string())
}

/// First-match-wins classification (spec.md §4.7).
pub fn classify(obs: &Observation) -> LoginState {
    let url_host = host_of(&obs.url);

    if url_host.ends_with(REWARDS_HOST) && obs.portal_presence_selector_visible {
        return LoginState::LoggedIn;
    }

    if url_host.ends_with(LOGIN_HOST) {
        if obs.email_input_visible {
            return LoginState::EmailPage;
        }
        if obs.password_input_visible {
            return LoginState::PasswordPage;
        }
        if obs.otp_input_visible {
            return LoginState::TwoFactorRequired;
        }
        if compromised_patterns().is_match(&obs.title) || compromised_patterns().is_match(&obs.body_text) {
            return LoginState::Compromised;
        }
        if passkey_patterns().is_match(&obs.title) {
            return LoginState::PasskeyPrompt;
        }
        if blocked_patterns().is_match(&obs.title) {
            return LoginState::Blocked;
        }
        if recovery::extract_masked_address(&obs.body_text).is_some() {
            return LoginState::RecoveryCheck;
        }
    }

    if OAUTH_HOSTS.iter().any(|h| url_host.ends_with(h)) && (obs.url.contains("oauth") || obs.url.contains("authorize")) {
        return LoginState::EmailSubmitted;
    }

    LoginState::Unknown
}

fn host_of(url: &str) -> String {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default()
}

pub struct LoginStateMachine<'a> {
    pub account: &'a Account,
    pub rng: &'a mut SecureRng,
}

impl<'a> LoginStateMachine<'a> {
    pub fn new(account: &'a Account, rng: &'a mut SecureRng) -> Self {
        Self { account, rng }
    }

    pub async fn drive(&mut self, page: &dyn BrowserPage) -> Result<(), LoginFatalError> {
        let mut transitions = 0u32;
        loop {
            if transitions >= MAX_TRANSITIONS {
                return Err(LoginFatalError::TooManyTransitions(MAX_TRANSITIONS));
            }
            transitions += 1;

            let obs = match self.observe(page).await {
                Ok(obs) => obs,
                Err(TransientBrowserError::TargetClosed(msg)) if transitions == 1 => {
                    warn!(reason = %msg, "context closed mid-login, continuing with fresh observation");
                    continue;
                }
                Err(e) => return Err(LoginFatalError::Transient(e)),
            };

            let state = classify(&obs);
            info!(state = %state, url = %obs.url, "login state observed");

            if state.is_terminal() {
                match state {
                    LoginState::LoggedIn => return Ok(()),
                    LoginState::Blocked => {
                        let phrase = matched_phrase(blocked_patterns(), BLOCKED_PHRASES, &obs.title)
                            .or_else(|| matched_phrase(blocked_patterns(), BLOCKED_PHRASES, &obs.body_text))
                            .unwrap_or_else(|| "unknown".to_string());
                        return Err(LoginFatalError::Blocked { phrase });
                    }
                    LoginState::Compromised => {
                        let phrase = matched_phrase(compromised_patterns(), COMPROMISED_PHRASES, &obs.title)
                            .or_else(|| matched_phrase(compromised_patterns(), COMPROMISED_PHRASES, &obs.body_text))
                            .unwrap_or_else(|| "unknown".to_string());
                        return Err(LoginFatalError::CompromisedDetected { phrase });
                    }
                    _ => return Err(LoginFatalError::Unexpected),
                }
            }

            self.act(page, state, &obs).await?;
        }
    }

    async fn observe(&self, page: &dyn BrowserPage) -> Result<Observation, TransientBrowserError> {
        let url = page
            .current_url()
            .await
            .map_err(|e| TransientBrowserError::TargetClosed(e.to_string()))?;
        let body_text = page.content().await.unwrap_or_default();
        let title = extract_title(&body_text);

        let short_wait = Duration::from_millis(300);
        let long_wait = Duration::from_millis(3500);

        let email_input = page.wait_for_selector("input[type=email]", short_wait).await.unwrap_or(false)
            || page.wait_for_selector("input[type=email]", long_wait).await.unwrap_or(false);
        let password_input = page.wait_for_selector("input[type=password]", short_wait).await.unwrap_or(false)
            || page.wait_for_selector("input[type=password]", long_wait).await.unwrap_or(false);
        let otp_input = page.wait_for_selector("input[name=otc]", short_wait).await.unwrap_or(false)
            || page.wait_for_selector("input[name=otc]", long_wait).await.unwrap_or(false);
        let portal_presence = page.wait_for_selector("[data-testid=rewards-portal]", short_wait).await.unwrap_or(false);

        Ok(Observation {
            url,
            title,
            body_text,
            portal_presence_selector_visible: portal_presence,
            email_input_visible: email_input,
            password_input_visible: password_input,
            otp_input_visible: otp_input,
            target_closed: false,
        })
    }

    async fn act(
        &mut self,
        page: &dyn BrowserPage,
        state: LoginState,
        obs: &Observation,
    ) -> Result<(), LoginFatalError> {
        match state {
            LoginState::EmailPage => {
                self.type_humanlike(page, "input[type=email]", &self.account.email.clone(), 1.0).await;
                page.click("button[type=submit]").await.ok();
            }
            LoginState::PasswordPage => {
                self.type_humanlike(page, "input[type=password]", &self.account.password.clone(), 0.5)
                    .await;
                page.click("button[type=submit]").await.ok();
            }
            LoginState::TwoFactorRequired => {
                let Some(seed) = &self.account.totp_seed else {
                    return Err(LoginFatalError::TwoFactorNoSecret);
                };
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                let code = totp::generate(seed, now)
                    .map_err(|e| LoginFatalError::TotpGenerationFailed(e.to_string()))?;
                self.type_humanlike(page, "input[name=otc]", &code, 0.33).await;
                page.click("button[type=submit]").await.ok();
            }
            LoginState::PasskeyPrompt => {
                self.dismiss_passkey_prompt(page).await;
            }
            LoginState::RecoveryCheck => {
                let result = recovery::check_page_text(
                    &obs.body_text,
                    &self.account.email,
                    self.account.recovery_email.as_deref(),
                );
                if result == ConsistencyResult::Mismatch {
                    return Err(LoginFatalError::RecoveryMismatch);
                }
            }
            LoginState::EmailSubmitted | LoginState::PasswordSubmitted | LoginState::Unknown => {
                let delay = self.rng.human_variance(1200.0, 0.3, 0.05);
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            LoginState::TwoFactorSubmitted | LoginState::InitialLoad => {}
            LoginState::LoggedIn | LoginState::Blocked | LoginState::Error | LoginState::Compromised => {
                unreachable!()
            }
        }
        Ok(())
    }

    async fn type_humanlike(&mut self, page: &dyn BrowserPage, selector: &str, text: &str, speed_factor: f64) {
        for ch in text.chars() {
            let base_ms = 90.0 * speed_factor;
            let delay = self.rng.typing_delay(base_ms);
            let _ = page.type_text(selector, &ch.to_string(), delay).await;
        }
    }

    /// Attempts dismissal in an ordered fallback chain, each tier a
    /// cheaper/more-certain signal than the next: secondary-button phrase,
    /// biometric-video heuristic, title heuristic, XPath text match,
    /// Windows-Hello-specific selectors, a generic close button, the Escape
    /// key, and finally a DOM-level `role=dialog` removal. Fails open after
    /// a bounded number of polls, logging the dismissal reason on success or
    /// a one-line "no-prompt" status on exhaustion.
    async fn dismiss_passkey_prompt(&mut self, page: &dyn BrowserPage) {
        const MAX_POLLS: u32 = 5;
        for _ in 0..MAX_POLLS {
            if let Some(reason) = self.try_dismiss_passkey_once(page).await {
                info!(reason, "passkey prompt dismissed");
                return;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        if self.try_escape(page).await {
            info!(reason = "escape key", "passkey prompt dismissed");
            return;
        }
        if self.remove_dialog_from_dom(page).await {
            info!(reason = "dom role=dialog removal", "passkey prompt dismissed");
            return;
        }
        info!("passkey prompt dismissal exhausted candidates; continuing (no-prompt)");
    }

    async fn try_dismiss_passkey_once(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        if let Some(reason) = self.try_secondary_button_phrase(page).await {
            return Some(reason);
        }
        if let Some(reason) = self.try_biometric_video_heuristic(page).await {
            return Some(reason);
        }
        if let Some(reason) = self.try_title_heuristic(page).await {
            return Some(reason);
        }
        if let Some(reason) = self.try_xpath_text_match(page).await {
            return Some(reason);
        }
        if let Some(reason) = self.try_windows_hello_selectors(page).await {
            return Some(reason);
        }
        self.try_close_button(page).await
    }

    async fn try_secondary_button_phrase(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        let text = page.content().await.unwrap_or_default();
        if secondary_phrase_patterns().is_match(&text)
            && page
                .wait_for_selector("[data-testid=secondaryButton]", Duration::from_millis(200))
                .await
                .unwrap_or(false)
        {
            let _ = page.click("[data-testid=secondaryButton]").await;
            return Some("secondary button text");
        }
        None
    }

    async fn try_biometric_video_heuristic(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        if page
            .wait_for_selector("video[data-testid=biometricVideo]", Duration::from_millis(200))
            .await
            .unwrap_or(false)
        {
            let _ = page.click("#biometricVideoCloseButton").await;
            return Some("biometric video present");
        }
        None
    }

    async fn try_title_heuristic(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        let text = page.content().await.unwrap_or_default();
        let title = extract_title(&text);
        if passkey_patterns().is_match(&title)
            && page.wait_for_selector("button.secondary", Duration::from_millis(200)).await.unwrap_or(false)
        {
            let _ = page.click("button.secondary").await;
            return Some("title heuristic");
        }
        None
    }

    async fn try_xpath_text_match(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        const SCRIPT: &str = r#"(function() {
            const xpath = "//button[contains(translate(., 'NOTSKI', 'notski'), 'not now') or contains(translate(., 'NOTSKI', 'notski'), 'skip')]";
            const result = document.evaluate(xpath, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
            const node = result.singleNodeValue;
            if (node) { node.click(); return true; }
            return false;
        })()"#;
        let matched = page.evaluate(SCRIPT).await.ok().and_then(|v| v.as_bool()).unwrap_or(false);
        if matched {
            return Some("xpath text match");
        }
        None
    }

    async fn try_windows_hello_selectors(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        const SELECTORS: &[&str] = &["#WindowsHelloDismiss", "button[data-testid=whfb-cancel]"];
        for selector in SELECTORS {
            if page.wait_for_selector(selector, Duration::from_millis(200)).await.unwrap_or(false) {
                let _ = page.click(selector).await;
                return Some("windows hello selector");
            }
        }
        None
    }

    async fn try_close_button(&mut self, page: &dyn BrowserPage) -> Option<&'static str> {
        if page.wait_for_selector("#closeButton", Duration::from_millis(200)).await.unwrap_or(false) {
            let _ = page.click("#closeButton").await;
            return Some("close button");
        }
        None
    }

    async fn try_escape(&mut self, page: &dyn BrowserPage) -> bool {
        page.evaluate("document.dispatchEvent(new KeyboardEvent('keydown', {key: 'Escape'}))").await.is_ok()
    }

    async fn remove_dialog_from_dom(&mut self, page: &dyn BrowserPage) -> bool {
        const SCRIPT: &str =
            "(function(){const d=document.querySelector('[role=dialog]'); if(d){d.remove(); return true;} return false;})()";
        page.evaluate(SCRIPT).await.ok().and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

fn extract_title(html: &str) -> String {
    let lower = html.to_lowercase();
    if let Some(start) = lower.find("<title>") {
        if let Some(end) = lower[start..].find("</title>") {
            return html[start + 7..start + end].to_string();
        }
    }
    String::new()
}
