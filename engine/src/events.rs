//! Events delivered from the transfer thread to the caller.
//!
//! Payloads are structured data only; formatting and wording are left to the
//! presentation layer.

use crate::conflict::ConflictRequest;
use crate::error::{EngineError, FileError};
use crate::model::JobResult;
use crate::progress::ProgressSnapshot;
use std::path::PathBuf;

/// Coarse phase of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Writing the placeholder file of a dry run
    DryRunGenerating,
    Scanning,
    CheckingSpace,
    Copying,
    /// Finalising the digest of the bytes read from the source
    Hashing,
    /// Re-reading the written destination
    Verifying,
    RemovingEmptyFolders,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::DryRunGenerating => "generating dry-run file",
            Phase::Scanning => "scanning",
            Phase::CheckingSpace => "checking space",
            Phase::Copying => "copying",
            Phase::Hashing => "hashing",
            Phase::Verifying => "verifying",
            Phase::RemovingEmptyFolders => "removing empty folders",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Progress of the whole job plus the file in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub snapshot: ProgressSnapshot,
    pub bytes_completed: u64,
    pub bytes_planned: u64,
    /// Ordinal of the file in flight (1-based)
    pub file_index: usize,
    pub files_total: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    PhaseChanged(Phase),
    /// A destination exists; answer with `JobHandle::resolve`
    ConflictRequested(ConflictRequest),
    Progress(ProgressUpdate),
    FileCompleted {
        source: PathBuf,
        destination: PathBuf,
        bytes: u64,
    },
    FileSkipped {
        source: PathBuf,
        destination: PathBuf,
    },
    FileFailed(FileError),
    /// Terminal: the job ran to the end (some files may have failed)
    Completed(JobResult),
    /// Terminal: the job stopped on a job-level error or cancellation.
    /// `partial` covers the files handled before it stopped; it is `None`
    /// when the job stopped before transferring began.
    JobFailed {
        error: EngineError,
        partial: Option<JobResult>,
    },
}

impl TransferEvent {
    /// True for the last event a job sends.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEvent::Completed(_) | TransferEvent::JobFailed { .. })
    }
}
