//! History/error log.
//!
//! A bounded list of job summaries and file errors, newest last. Entries past
//! the cap are evicted oldest first. When the log has a backing file it is
//! stored there as JSON.

use crate::error::{EngineError, FileError, FileErrorKind, JobErrorKind};
use crate::model::{JobResult, Mode, TransferJob};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub mode: Mode,
    pub dry_run: bool,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub files_transferred: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub outcome: JobOutcome,
    /// Job-level error for `Failed` and `Cancelled`
    pub failure: Option<JobErrorKind>,
    /// Path the job-level error names, if any
    pub failure_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub kind: FileErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    Job(JobSummary),
    Error(ErrorRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub record: LogRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    entries: Vec<LogEntry>,
}

#[derive(Debug)]
pub struct HistoryLog {
    enabled: bool,
    cap: usize,
    entries: VecDeque<LogEntry>,
    path: Option<PathBuf>,
}

impl HistoryLog {
    /// In-memory log holding at most `cap` entries.
    pub fn new(enabled: bool, cap: usize) -> Self {
        HistoryLog {
            enabled,
            cap: cap.max(1),
            entries: VecDeque::new(),
            path: None,
        }
    }

    /// Log backed by `path`; existing entries are read from it.
    ///
    /// A missing file starts an empty log.
    pub fn load(path: &Path, enabled: bool, cap: usize) -> Result<Self, EngineError> {
        let mut log = Self::new(enabled, cap);
        log.path = Some(path.to_path_buf());

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(log),
            Err(e) => return Err(history_error(path, e)),
        };
        let file: HistoryFile =
            serde_json::from_str(&content).map_err(|e| history_error(path, e))?;
        log.entries = file.entries.into();
        log.truncate();
        tracing::debug!(entries = log.entries.len(), "history loaded");
        Ok(log)
    }

    /// Write entries to the backing file. No-op for an in-memory log.
    pub fn save(&self) -> Result<(), EngineError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| history_error(path, e))?;
            }
        }
        let file = HistoryFile {
            entries: self.entries.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| history_error(path, e))?;
        fs::write(path, json).map_err(|e| history_error(path, e))?;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a record. Ignored while the log is disabled.
    pub fn append(&mut self, record: LogRecord) {
        if !self.enabled {
            return;
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            record,
        });
        self.truncate();
    }

    /// Record one finished job: its summary, then each file error.
    ///
    /// `result` covers the files handled so far; a job stopped by `error`
    /// before any file was handled has none.
    pub fn record_job(
        &mut self,
        job: &TransferJob,
        result: Option<&JobResult>,
        error: Option<&EngineError>,
    ) {
        if !self.enabled {
            return;
        }
        let outcome = match (error, result) {
            (Some(EngineError::Cancelled), _) => JobOutcome::Cancelled,
            (Some(_), _) => JobOutcome::Failed,
            (None, Some(result)) if !result.is_clean() => JobOutcome::CompletedWithErrors,
            (None, _) => JobOutcome::Completed,
        };
        let duration = match result {
            Some(result) => result.elapsed,
            None => job
                .start_time
                .and_then(|start| start.elapsed().ok())
                .unwrap_or_default(),
        };
        let summary = JobSummary {
            job_id: job.id,
            sources: job.sources.clone(),
            destination: job.destination.clone(),
            mode: job.mode,
            dry_run: job.options.dry_run,
            bytes_transferred: result.map_or(0, |r| r.bytes_transferred),
            duration_ms: duration.as_millis() as u64,
            files_transferred: result.map_or(0, JobResult::files_transferred),
            files_skipped: result.map_or(0, JobResult::files_skipped),
            files_failed: result.map_or(0, JobResult::files_failed),
            outcome,
            failure: error.map(EngineError::kind),
            failure_path: error.and_then(|e| e.path()).map(Path::to_path_buf),
        };
        self.append(LogRecord::Job(summary));

        for file_error in result.iter().flat_map(|r| &r.errors) {
            self.append(LogRecord::Error(ErrorRecord::from_file_error(job.id, file_error)));
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn truncate(&mut self) {
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }
}

impl ErrorRecord {
    pub fn from_file_error(job_id: Uuid, error: &FileError) -> Self {
        ErrorRecord {
            job_id,
            path: error.path.clone(),
            kind: error.kind,
            message: error.message.clone(),
        }
    }
}

fn history_error(path: &Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::History {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
