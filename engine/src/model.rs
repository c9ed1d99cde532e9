//! Core data model for transfer jobs.
//!
//! This module defines the main data structures for representing transfer operations:
//! - TransferJob: the entire copy/move operation, owned by the orchestrator
//! - FileTask / DirTask: planned source→destination pairs (immutable once planned)
//! - FileRecord / JobResult: what actually happened to each file
//! - Mode, FileState, JobState: enums controlling behavior

use crate::checksums::{ChecksumAlgorithm, ChecksumResult};
use crate::conflict::ConflictDecision;
use crate::error::FileError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Default chunk size for reads and writes
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Represents a single transfer job (one copy or move request).
#[derive(Debug)]
pub struct TransferJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Operation mode: Copy or Move
    pub mode: Mode,

    /// Source entries in the order the caller gave them
    pub sources: Vec<PathBuf>,

    /// Destination directory; each source lands inside it
    pub destination: PathBuf,

    /// Per-job behavior switches
    pub options: JobOptions,

    /// Files to transfer, in transfer order
    pub tasks: Vec<FileTask>,

    /// Directories to recreate at the destination, parents before children
    pub directories: Vec<DirTask>,

    /// True once `plan_job` has run
    pub planned: bool,

    /// Sum of all planned file sizes
    pub total_bytes_planned: u64,

    /// Current job state
    pub state: JobState,

    /// When job was created
    pub created_at: SystemTime,

    /// When job execution started
    pub start_time: Option<SystemTime>,

    /// When job execution ended
    pub end_time: Option<SystemTime>,
}

/// Behavior switches for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Hash source and destination and compare after each file
    pub verify_checksum: bool,

    /// Algorithm used when `verify_checksum` is set
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Write one placeholder file of the planned size instead of transferring
    pub dry_run: bool,

    /// Decision applied to every conflict without asking
    pub conflict_policy: Option<ConflictDecision>,

    /// Maximum throughput in bytes per second
    pub throttle_rate: Option<u64>,

    /// Chunk size for reads and writes
    pub buffer_size: usize,

    /// Copy source modification times onto the destination
    pub preserve_modification_time: bool,

    /// Extra bytes that must be free beyond the planned size
    pub space_safety_margin: u64,

    /// Minimum gap between progress events
    pub progress_interval: Duration,

    /// Rewrite destination names the destination volume cannot store
    pub sanitize_filenames: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            verify_checksum: false,
            checksum_algorithm: ChecksumAlgorithm::default(),
            dry_run: false,
            conflict_policy: None,
            throttle_rate: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_modification_time: true,
            space_safety_margin: 0,
            progress_interval: Duration::from_millis(50),
            sanitize_filenames: true,
        }
    }
}

/// What a planned file entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Symlink,
}

/// One concrete source→destination file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Size at scan time (0 for symlinks)
    pub size: u64,
    pub kind: EntryKind,
    /// Source modification time at scan time
    pub modified: Option<SystemTime>,
    /// When the scan found this entry
    pub discovered_at: SystemTime,
}

/// A directory to recreate at the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DirTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub modified: Option<SystemTime>,
}

/// The operation mode for a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Copy files; source remains unchanged
    Copy,
    /// Move files; source deleted after a successful copy
    Move,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Copy => write!(f, "copy"),
            Mode::Move => write!(f, "move"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(Mode::Copy),
            "move" => Ok(Mode::Move),
            other => Err(format!("invalid mode '{}' (expected copy or move)", other)),
        }
    }
}

/// The state of an individual file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Not yet processed
    Pending,
    /// Destination exists; waiting for a conflict decision
    AwaitingDecision,
    /// Currently transferring
    Copying,
    /// Copied (and verified, if enabled)
    Done,
    /// Not copied because of a conflict decision
    Skipped,
    /// Error occurred; see the record's error
    Failed,
    /// Interrupted by cancellation; the partial destination was removed
    Cancelled,
}

impl FileState {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Done | FileState::Skipped | FileState::Failed | FileState::Cancelled
        )
    }
}

/// The state of an entire transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet started
    Pending,
    /// Currently executing
    Running,
    /// All files processed (some may have failed)
    Completed,
    /// Stopped by the caller
    Cancelled,
    /// Stopped by a job-level error
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to one planned file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub source: PathBuf,
    /// Final destination (differs from the planned one after a rename)
    pub destination: PathBuf,
    pub size: u64,
    pub bytes_copied: u64,
    pub state: FileState,
    pub checksum: Option<ChecksumResult>,
    pub error: Option<FileError>,
}

impl FileRecord {
    pub fn pending(task: &FileTask) -> Self {
        FileRecord {
            source: task.source.clone(),
            destination: task.destination.clone(),
            size: task.size,
            bytes_copied: 0,
            state: FileState::Pending,
            checksum: None,
            error: None,
        }
    }
}

/// Aggregate result of a job.
///
/// A job stopped by a job-level error still yields one, covering the files
/// handled before it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub mode: Mode,
    pub dry_run: bool,
    /// One record per planned file, in plan order
    pub files: Vec<FileRecord>,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    /// Every file-scoped error, in the order they occurred
    pub errors: Vec<FileError>,
}

impl JobResult {
    pub fn files_transferred(&self) -> usize {
        self.count(FileState::Done)
    }

    pub fn files_skipped(&self) -> usize {
        self.count(FileState::Skipped)
    }

    pub fn files_failed(&self) -> usize {
        self.count(FileState::Failed)
    }

    pub fn checksum_mismatches(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(&f.checksum, Some(c) if !c.matches))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn count(&self, state: FileState) -> usize {
        self.files.iter().filter(|f| f.state == state).count()
    }
}
