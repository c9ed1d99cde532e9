//! # Ferry Engine - File Transfer Library
//!
//! A headless engine for copying and moving files and directory trees, built to
//! sit underneath any front end (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine features:
//! - Recursive planning of mixed file/directory sources with free-space checks
//! - Chunked transfers with pause, resume, cancel and optional throttling
//! - Streaming checksum verification (CRC32, MD5, SHA-256, BLAKE3)
//! - Interactive conflict resolution (skip, replace, rename, apply to all)
//! - Smoothed speed, ETA and a speed-graph history
//! - Per-file error isolation and a persistent history/error log
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{create_job, spawn_job, JobOptions, JobSession, Mode, TransferEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let job = create_job(
//!     &["/data/photos", "/data/notes.txt"],
//!     "/mnt/backup",
//!     Mode::Copy,
//!     JobOptions::default(),
//! )?;
//!
//! let handle = spawn_job(job, JobSession::default())?;
//! for event in handle.events().iter() {
//!     match event {
//!         TransferEvent::Progress(p) => println!("{:.1}%", p.snapshot.percent),
//!         TransferEvent::ConflictRequested(_) => {
//!             handle.resolve(engine::ConflictResolution::once(engine::ConflictDecision::Skip))
//!         }
//!         event if event.is_terminal() => break,
//!         _ => {}
//!     }
//! }
//! let result = handle.join()?;
//! println!("{} files transferred", result.files_transferred());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (TransferJob, FileTask, JobResult, enums)
//! - **error**: Job-level and file-level error types
//! - **config**: TOML engine configuration
//! - **plan**: Source scanning, destination name rules and the free-space check
//! - **conflict**: Conflict detection and resolution
//! - **fs_ops**: Chunked copy, hashing and filesystem helpers
//! - **checksums**: Checksum algorithms and checksum manifests
//! - **control**: Pause/resume/cancel signalling
//! - **progress**: Speed, ETA and speed-graph history
//! - **state**: Transfer state shared with observers
//! - **events**: Events sent from the transfer thread
//! - **history**: History and error log
//! - **job**: Job orchestration (create, plan, run, spawn)

pub mod checksums;
pub mod config;
pub mod conflict;
pub mod control;
pub mod error;
pub mod events;
pub mod fs_ops;
pub mod history;
pub mod job;
pub mod model;
pub mod plan;
pub mod progress;
pub mod state;

// Re-export main types and functions
pub use checksums::{
    compute_file_checksum, generate_checksum_file, verify_checksum_file, ChecksumAlgorithm,
    ChecksumResult, ChecksumValue, ManifestCheck,
};
pub use config::EngineConfig;
pub use conflict::{
    suggest_rename, ConflictDecision, ConflictRequest, ConflictResolution, RenameRejection,
};
pub use control::{RunState, TransferControl};
pub use error::{EngineError, FileError, FileErrorKind, JobErrorKind};
pub use events::{Phase, ProgressUpdate, TransferEvent};
pub use fs_ops::{DestinationFile, DestinationFs, LocalFs};
pub use history::{HistoryLog, JobOutcome, LogEntry, LogRecord};
pub use job::{
    check_space, create_job, plan_job, run_job, spawn_job, JobHandle, JobSession,
    DRY_RUN_FILE_NAME,
};
pub use model::{
    FileRecord, FileState, FileTask, JobOptions, JobResult, JobState, Mode, TransferJob,
};
pub use plan::{sanitize_component, FixedSpace, NamingRules, SpaceProbe, SystemSpace};
pub use progress::{ProgressSample, ProgressSnapshot, SpeedHistory};
pub use state::TransferState;
