// src/history.rs
//
// Per-account run history (spec.md §4.3/§6). Appended as JSONL so a crash
// mid-write never corrupts earlier entries, with an in-place rewrite to
// drop entries older than the rolling window once the file is large enough
// to matter.

use crate::events::AccountHistoryEntry;
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct AccountHistoryStore {
    dir: PathBuf,
    retention_days: i64,
}

impl AccountHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), retention_days: 90 }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    fn path_for(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", account_file_stem(email)))
    }

    pub fn append(&self, email: &str, entry: &AccountHistoryEntry) -> Result<(), HistoryError> {
        let path = self.path_for(email);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HistoryError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let line = serde_json::to_string(entry).expect("AccountHistoryEntry always serializes");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HistoryError::Io { path: path.display().to_string(), source: e })?;
        writeln!(file, "{line}").map_err(|e| HistoryError::Io { path: path.display().to_string(), source: e })?;
        Ok(())
    }

    pub fn read_all(&self, email: &str) -> Result<Vec<AccountHistoryEntry>, HistoryError> {
        read_entries(&self.path_for(email))
    }

    pub fn read_recent(&self, email: &str, last_n: usize) -> Result<Vec<AccountHistoryEntry>, HistoryError> {
        let mut entries = self.read_all(email)?;
        if entries.len() > last_n {
            entries.drain(0..entries.len() - last_n);
        }
        Ok(entries)
    }

    /// Drops entries older than the retention window, rewriting the file
    /// atomically. Cheap no-op when nothing is stale.
    pub fn prune(&self, email: &str) -> Result<(), HistoryError> {
        let path = self.path_for(email);
        let entries = read_entries(&path)?;
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let kept: Vec<&AccountHistoryEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).collect();
        if kept.len() == entries.len() {
            return Ok(());
        }
        let mut buf = String::new();
        for entry in &kept {
            buf.push_str(&serde_json::to_string(entry).expect("serializes"));
            buf.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, buf).map_err(|e| HistoryError::Io { path: tmp.display().to_string(), source: e })?;
        std::fs::rename(&tmp, &path).map_err(|e| HistoryError::Io { path: path.display().to_string(), source: e })?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<AccountHistoryEntry>, HistoryError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(HistoryError::Io { path: path.display().to_string(), source: e }),
    }
}

fn account_file_stem(email: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_entry(days_ago: i64) -> AccountHistoryEntry {
        AccountHistoryEntry {
            timestamp: Utc::now() - ChronoDuration::days(days_ago),
            date: NaiveDate::from_ymd_opt(2026, 7, 28).unwrap(),
            desktop_points: 90,
            mobile_points: 50,
            total_points: 140,
            completed: 5,
            failed: 0,
            errors: vec![],
            duration_ms: 12000,
            success: true,
        }
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = AccountHistoryStore::new(dir.path());
        store.append("a@example.com", &sample_entry(0)).unwrap();
        store.append("a@example.com", &sample_entry(1)).unwrap();
        let entries = store.read_all("a@example.com").unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn prune_drops_entries_older_than_retention() {
        let dir = tempdir().unwrap();
        let store = AccountHistoryStore::new(dir.path()).with_retention_days(30);
        store.append("a@example.com", &sample_entry(5)).unwrap();
        store.append("a@example.com", &sample_entry(100)).unwrap();
        store.prune("a@example.com").unwrap();
        let entries = store.read_all("a@example.com").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn read_recent_limits_count() {
        let dir = tempdir().unwrap();
        let store = AccountHistoryStore::new(dir.path());
        for i in 0..5 {
            store.append("a@example.com", &sample_entry(i)).unwrap();
        }
        let recent = store.read_recent("a@example.com", 2).unwrap();
        assert_eq!(recent.len(), 2);
    }
}
