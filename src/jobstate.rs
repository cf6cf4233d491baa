// src/jobstate.rs
//
// Per-account job-state store (spec.md §4.3), grounded on the sharded
// map-of-locks pattern from the account-level state tracker: a DashMap
// keyed by account email, each entry guarded by its own parking_lot Mutex,
// so accounts never contend on each other's disk I/O or in-memory state.

use crate::events::{JobStateFile, JobUnitRecord};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed job-state file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

struct AccountSlot {
    lock: Mutex<()>,
    path: PathBuf,
}

/// Concurrent job-state store. One file per account under `dir`, keyed by
/// a filesystem-safe hash of the account email so emails with unusual
/// characters never collide with path separators.
pub struct JobStateStore {
    dir: PathBuf,
    slots: DashMap<String, Arc<AccountSlot>>,
}

impl JobStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), slots: DashMap::new() }
    }

    fn slot_for(&self, email: &str) -> Arc<AccountSlot> {
        self.slots
            .entry(email.to_string())
            .or_insert_with(|| {
                Arc::new(AccountSlot {
                    lock: Mutex::new(()),
                    path: self.dir.join(format!("{}.json", account_file_stem(email))),
                })
            })
            .clone()
    }

    /// Returns true and records the unit as claimed if `work_unit_id` has not
    /// already been completed today for this account; false if it was.
    /// The check-then-record happens under the account's own lock, so two
    /// concurrent passes over the same account can never double-claim a unit.
    pub fn try_claim(
        &self,
        email: &str,
        work_unit_id: &str,
        points: u64,
    ) -> Result<bool, JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();

        let mut file = self.read_locked(&slot.path)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let day_entries = file.entry(today.clone()).or_default();

        if let Some(existing) = day_entries.get(work_unit_id) {
            debug!(account = email, work_unit_id, attempts = existing.attempts, "unit already claimed today");
            return Ok(false);
        }

        day_entries.insert(
            work_unit_id.to_string(),
            JobUnitRecord { completed_at: Utc::now(), points_claimed: points, attempts: 1 },
        );
        prune_old_days(&mut file, &today);
        self.write_locked(&slot.path, &file)?;
        Ok(true)
    }

    /// Non-destructive peek: true if `work_unit_id` was already completed
    /// today for this account. Used to skip a unit before it ever touches
    /// the browser, rather than relying on `try_claim`'s check-and-set.
    pub fn is_claimed(&self, email: &str, work_unit_id: &str) -> Result<bool, JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();
        let file = self.read_locked(&slot.path)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Ok(file.get(&today).map(|m| m.contains_key(work_unit_id)).unwrap_or(false))
    }

    pub fn record_attempt_failed(&self, email: &str, work_unit_id: &str) -> Result<(), JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();
        let mut file = self.read_locked(&slot.path)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let day_entries = file.entry(today).or_default();
        day_entries
            .entry(work_unit_id.to_string())
            .and_modify(|r| r.attempts += 1)
            .or_insert(JobUnitRecord { completed_at: Utc::now(), points_claimed: 0, attempts: 1 });
        self.write_locked(&slot.path, &file)
    }

    /// Returns the set of work-unit IDs completed for `email` on `date`
    /// (`YYYY-MM-DD`), for dashboard/account-stats reads.
    pub fn get(&self, email: &str, date: &str) -> Result<std::collections::HashSet<String>, JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();
        let file = self.read_locked(&slot.path)?;
        Ok(file.get(date).map(|m| m.keys().cloned().collect()).unwrap_or_default())
    }

    /// Drops every claim recorded for `email` on `date` (dashboard
    /// `POST /api/account/:email/reset`).
    pub fn reset(&self, email: &str, date: &str) -> Result<(), JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();
        let mut file = self.read_locked(&slot.path)?;
        file.remove(date);
        self.write_locked(&slot.path, &file)
    }

    /// Drops today's claims for `email` (`reset(account, today)`).
    pub fn reset_today(&self, email: &str) -> Result<(), JobStateError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.reset(email, &today)
    }

    pub fn units_completed_today(&self, email: &str) -> Result<usize, JobStateError> {
        let slot = self.slot_for(email);
        let _guard = slot.lock.lock();
        let file = self.read_locked(&slot.path)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Ok(file.get(&today).map(|m| m.len()).unwrap_or(0))
    }

    /// Drops today's claims for every account with an on-disk job-state
    /// file (dashboard `POST /api/reset-state`). Bypasses the per-account
    /// slot lock since this is an administrative, infrequent operation;
    /// a claim racing a reset loses at most one unit of work for one day.
    pub fn reset_all_today(&self) -> Result<(), JobStateError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(JobStateError::Io { path: self.dir.display().to_string(), source: e }),
        };
        for entry in entries {
            let entry = entry.map_err(|e| JobStateError::Io { path: self.dir.display().to_string(), source: e })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mut file = self.read_locked(&path)?;
            file.remove(&today);
            self.write_locked(&path, &file)?;
        }
        Ok(())
    }

    fn read_locked(&self, path: &Path) -> Result<JobStateFile, JobStateError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| JobStateError::Malformed {
                path: path.display().to_string(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JobStateFile::default()),
            Err(e) => Err(JobStateError::Io { path: path.display().to_string(), source: e }),
        }
    }

    fn write_locked(&self, path: &Path, file: &JobStateFile) -> Result<(), JobStateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JobStateError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let serialized = serde_json::to_string_pretty(file).map_err(|e| JobStateError::Malformed {
            path: path.display().to_string(),
            source: e,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized).map_err(|e| JobStateError::Io {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| JobStateError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}

fn account_file_stem(email: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Keeps only the last 7 days of entries plus today, bounding file growth.
fn prune_old_days(file: &mut JobStateFile, today: &str) {
    if file.len() <= 8 {
        return;
    }
    let mut keys: Vec<String> = file.keys().cloned().collect();
    keys.sort();
    keys.retain(|k| k != today);
    while file.len() > 8 {
        if let Some(oldest) = keys.first().cloned() {
            file.remove(&oldest);
            keys.remove(0);
        } else {
            break;
        }
    }
}
