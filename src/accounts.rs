// src/accounts.rs
//
// Account loading and in-place disabling (spec.md §4.1). Disabling a banned
// account rewrites only its `enabled` flag in the original JSONC text via
// jsonc::set_account_enabled, so operator comments and formatting survive.

use crate::errors::ConfigError;
use crate::events::Account;
use crate::jsonc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Accepts both the object-wrapped `{"accounts": [...]}` shape and a bare
/// top-level JSON array (spec.md §6); serde's untagged matching picks
/// whichever variant parses against the JSON's actual top-level type.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
enum AccountsFile {
    Wrapped { accounts: Vec<Account> },
    Bare(Vec<Account>),
}

impl AccountsFile {
    fn into_accounts(self) -> Vec<Account> {
        match self {
            Self::Wrapped { accounts } => accounts,
            Self::Bare(accounts) => accounts,
        }
    }
}

pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<Account>, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let stripped = jsonc::strip_comments(&raw);
        let file: AccountsFile =
            serde_json::from_str(&stripped).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let enabled: Vec<Account> = file.into_accounts().into_iter().filter(|a| a.enabled).collect();
        if enabled.is_empty() {
            warn!("no enabled accounts found in {}", self.path.display());
        } else {
            info!(count = enabled.len(), "loaded enabled accounts");
        }
        Ok(enabled)
    }

    /// Flips `enabled: false` for the named account in the on-disk file,
    /// preserving comments and formatting for every other entry.
    pub fn disable_account(&self, email: &str) -> Result<(), ConfigError> {
        self.patch_enabled(email, false, None)
    }

    /// Disables the account and leaves a `// BANNED <date>: <reason>` note
    /// directly above it (spec.md §4.9/§6), for ban-detector hard-bans.
    pub fn disable_account_with_reason(&self, email: &str, reason: &str) -> Result<(), ConfigError> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.patch_enabled(email, false, Some(format!("BANNED {today}: {reason}")))
    }

    pub fn enable_account(&self, email: &str) -> Result<(), ConfigError> {
        self.patch_enabled(email, true, None)
    }

    fn patch_enabled(&self, email: &str, enabled: bool, ban_comment: Option<String>) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let patched = jsonc::set_account_enabled_with_comment(&raw, email, enabled, ban_comment.as_deref())
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        atomic_write(&self.path, &patched).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        info!(account = email, enabled, "account enable flag updated");
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample() -> &'static str {
        r#"{
  "accounts": [
    {
      // keep this comment
      "email": "alice@example.com",
      "password": "pw1",
      "enabled": true
    },
    {
      "email": "bob@example.com",
      "password": "pw2",
      "enabled": false
    }
  ]
}"#
    }

    #[test]
    fn load_filters_disabled_accounts() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), sample()).unwrap();
        let store = AccountStore::new(file.path());
        let accounts = store.load().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email, "alice@example.com");
    }

    #[test]
    fn load_accepts_a_bare_top_level_array() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[
  {"email": "alice@example.com", "password": "pw1", "enabled": true},
  {"email": "bob@example.com", "password": "pw2", "enabled": false}
]"#,
        )
        .unwrap();
        let store = AccountStore::new(file.path());
        let accounts = store.load().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email, "alice@example.com");
    }

    #[test]
    fn disable_account_preserves_comment_and_other_entries() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), sample()).unwrap();
        let store = AccountStore::new(file.path());
        store.disable_account("alice@example.com").unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("// keep this comment"));

        let accounts = store.load().unwrap();
        assert!(accounts.is_empty());
    }
}
