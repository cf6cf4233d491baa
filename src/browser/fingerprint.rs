// src/browser/fingerprint.rs
//
// Per-account browser fingerprint (spec.md §4.6). Derived deterministically
// from a seed so the same account presents the same fingerprint across runs
// (a real user's machine does not change night to night) while different
// accounts diverge, which is what makes a fleet of accounts look unrelated.

use crate::events::Persona;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory_gb: u32,
    pub device_pixel_ratio: f64,
}

const DESKTOP_VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];
const MOBILE_VIEWPORTS: &[(u32, u32)] = &[(390, 844), (412, 915), (393, 852)];
const LOCALES: &[&str] = &["en-US", "en-GB", "en-CA"];
const TIMEZONES: &[&str] = &["America/New_York", "America/Chicago", "America/Los_Angeles", "Europe/London"];
const CHROME_VERSIONS: &[&str] = &["124.0.6367.119", "125.0.6422.77", "126.0.6478.63"];
const DESKTOP_DPRS: &[f64] = &[1.0, 1.25];
const MOBILE_DPRS: &[f64] = &[2.0, 3.0];

/// Builds a stable fingerprint for `(account_email, persona)`, choosing from
/// a pool of plausible real-device values rather than synthesizing
/// implausible combinations (e.g. a mobile user agent with a desktop
/// viewport), which is a common and easily-flagged anti-detection mistake.
pub fn derive(account_email: &str, persona: Persona) -> Fingerprint {
    let seed = seed_bytes(account_email, persona);
    let idx = |modulus: usize, offset: usize| -> usize {
        if modulus == 0 {
            0
        } else {
            (seed[offset] as usize) % modulus
        }
    };

    let chrome_version = CHROME_VERSIONS[idx(CHROME_VERSIONS.len(), 0)];
    let locale = LOCALES[idx(LOCALES.len(), 1)];
    let timezone = TIMEZONES[idx(TIMEZONES.len(), 2)];

    match persona {
        Persona::Desktop => {
            let (w, h) = DESKTOP_VIEWPORTS[idx(DESKTOP_VIEWPORTS.len(), 3)];
            Fingerprint {
                user_agent: format!(
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/{chrome_version} Safari/537.36 Edg/{chrome_version}"
                ),
                viewport_width: w,
                viewport_height: h,
                locale: locale.to_string(),
                timezone: timezone.to_string(),
                platform: "Win32".to_string(),
                hardware_concurrency: [4, 8, 12, 16][idx(4, 4)],
                device_memory_gb: [8, 16][idx(2, 5)],
                device_pixel_ratio: DESKTOP_DPRS[idx(DESKTOP_DPRS.len(), 6)],
            }
        }
        Persona::Mobile => {
            let (w, h) = MOBILE_VIEWPORTS[idx(MOBILE_VIEWPORTS.len(), 3)];
            Fingerprint {
                user_agent: format!(
                    "Mozilla/5.0 (Linux; Android 14; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/{chrome_version} Mobile Safari/537.36 EdgA/{chrome_version}"
                ),
                viewport_width: w,
                viewport_height: h,
                locale: locale.to_string(),
                timezone: timezone.to_string(),
                platform: "Linux armv8l".to_string(),
                hardware_concurrency: [4, 8][idx(2, 4)],
                device_memory_gb: [4, 6][idx(2, 5)],
                device_pixel_ratio: MOBILE_DPRS[idx(MOBILE_DPRS.len(), 6)],
            }
        }
    }
}

fn seed_bytes(account_email: &str, persona: Persona) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(account_email.as_bytes());
    hasher.update([persona as u8]);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_account_and_persona_yields_same_fingerprint() {
        let a = derive("user@example.com", Persona::Desktop);
        let b = derive("user@example.com", Persona::Desktop);
        assert_eq!(a.user_agent, b.user_agent);
        assert_eq!(a.viewport_width, b.viewport_width);
    }

    #[test]
    fn desktop_and_mobile_persona_diverge() {
        let desktop = derive("user@example.com", Persona::Desktop);
        let mobile = derive("user@example.com", Persona::Mobile);
        assert_ne!(desktop.user_agent, mobile.user_agent);
        assert_ne!(desktop.platform, mobile.platform);
    }

    #[test]
    fn different_accounts_tend_to_diverge() {
        let a = derive("alice@example.com", Persona::Desktop);
        let b = derive("bob@example.com", Persona::Desktop);
        // Not a strict guarantee with a small pool, but user agent versions
        // or viewport should differ for most pairs; assert the fields exist
        // and are internally consistent instead of over-asserting divergence.
        assert!(!a.user_agent.is_empty());
        assert!(!b.user_agent.is_empty());
    }
}
