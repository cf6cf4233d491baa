// src/reports.rs
//
// Per-run summary reports (spec.md §6, restored in SPEC_FULL.md's
// SUPPLEMENT section). Grounded on the teacher's `Dispatcher`: append-only
// JSONL written to a fixed output directory, one file per category. Here
// each run gets its own dated directory and a timestamped file rather than
// one shared JSONL, since the dashboard's `GET /api/history` reads back
// individual run summaries rather than tailing a single growing log.

use crate::orchestrator::RunSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct AccountPassReport {
    email: String,
    pass: u32,
    outcome: String,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct RunReport {
    run_started: DateTime<Utc>,
    run_finished: DateTime<Utc>,
    completed: u32,
    already_done: u32,
    standby: u32,
    disabled: u32,
    failed: u32,
    accounts: Vec<AccountPassReport>,
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `reports/YYYY-MM-DD/summary_<unix-ms>.json` for a finished
    /// run. One file per run, so the dashboard can list and page through
    /// them without replaying a growing log.
    pub fn write(
        &self,
        run_started: DateTime<Utc>,
        run_finished: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Result<PathBuf, ReportError> {
        let day_dir = self.dir.join(run_started.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&day_dir)
            .map_err(|e| ReportError::Io { path: day_dir.display().to_string(), source: e })?;

        let report = RunReport {
            run_started,
            run_finished,
            completed: summary.completed,
            already_done: summary.already_done,
            standby: summary.standby,
            disabled: summary.disabled,
            failed: summary.failed,
            accounts: summary
                .results
                .iter()
                .map(|r| AccountPassReport {
                    email: r.email.clone(),
                    pass: r.pass,
                    outcome: format!("{:?}", r.outcome),
                    duration_ms: r.duration_ms,
                })
                .collect(),
        };

        let file_name = format!("summary_{}.json", run_started.timestamp_millis());
        let path = day_dir.join(file_name);
        let serialized = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, serialized).map_err(|e| ReportError::Io { path: path.display().to_string(), source: e })?;

        info!(path = %path.display(), completed = summary.completed, failed = summary.failed, "wrote run report");
        Ok(path)
    }

    /// Lists report file paths across every dated subdirectory, most
    /// recent first, for the dashboard's history views.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<PathBuf>, ReportError> {
        let mut paths = Vec::new();
        let day_dirs = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(ReportError::Io { path: self.dir.display().to_string(), source: e }),
        };
        for day_entry in day_dirs {
            let day_entry = day_entry.map_err(|e| ReportError::Io { path: self.dir.display().to_string(), source: e })?;
            if !day_entry.path().is_dir() {
                continue;
            }
            collect_json_files(&day_entry.path(), &mut paths)?;
        }
        paths.sort();
        paths.reverse();
        paths.truncate(limit);
        Ok(paths)
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ReportError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ReportError::Io { path: dir.display().to_string(), source: e })?;
    for entry in entries {
        let entry = entry.map_err(|e| ReportError::Io { path: dir.display().to_string(), source: e })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::AccountPassResult;
    use crate::pipeline::PipelineOutcome;
    use tempfile::tempdir;

    fn sample_summary() -> RunSummary {
        let mut summary = RunSummary::default();
        summary.completed = 1;
        summary.results.push(AccountPassResult {
            email: "a@example.com".to_string(),
            pass: 1,
            outcome: PipelineOutcome::Completed,
            duration_ms: 120,
        });
        summary
    }

    #[test]
    fn write_creates_dated_subdirectory_and_file() {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let now = Utc::now();
        let path = writer.write(now, now, &sample_summary()).unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().contains(&now.format("%Y-%m-%d").to_string()));
    }

    #[test]
    fn list_recent_returns_newest_first() {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let first = Utc::now() - chrono::Duration::seconds(5);
        let second = Utc::now();
        writer.write(first, first, &sample_summary()).unwrap();
        writer.write(second, second, &sample_summary()).unwrap();

        let listed = writer.list_recent(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0] > listed[1]);
    }

    #[test]
    fn list_recent_on_missing_directory_returns_empty() {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("does-not-exist"));
        assert!(writer.list_recent(10).unwrap().is_empty());
    }
}
