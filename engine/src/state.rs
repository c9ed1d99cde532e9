//! Shared state of the active transfer.
//!
//! One `TransferState` exists per running job, shared by `Arc` between the
//! transfer thread and the caller. Byte counters are written only by the
//! transfer thread; the caller reads them and drives the pause/cancel flags
//! through `control`.

use crate::conflict::ConflictResolution;
use crate::control::{RunState, TransferControl};
use crate::error::FileError;
use crate::model::JobState;
use crate::progress::{ProgressSample, SpeedHistory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Default graph ceiling floor: 10 MiB/s
pub const DEFAULT_GRAPH_FLOOR: f64 = 10.0 * 1024.0 * 1024.0;

#[derive(Debug)]
pub struct TransferState {
    bytes_planned: AtomicU64,
    bytes_completed: AtomicU64,
    bytes_verified: AtomicU64,
    files_total: AtomicUsize,
    // Number of files taken up so far; the position of the file in flight.
    current_file: AtomicUsize,
    pending_conflicts: AtomicUsize,
    job_state: Mutex<JobState>,
    cached_decision: Mutex<Option<ConflictResolution>>,
    errors: Mutex<Vec<FileError>>,
    history: Mutex<SpeedHistory>,
    control: TransferControl,
}

impl TransferState {
    /// `graph_history_size` bounds the speed graph; `graph_floor` is its
    /// minimum ceiling in bytes per second.
    pub fn new(graph_history_size: usize, graph_floor: f64) -> Self {
        TransferState {
            bytes_planned: AtomicU64::new(0),
            bytes_completed: AtomicU64::new(0),
            bytes_verified: AtomicU64::new(0),
            files_total: AtomicUsize::new(0),
            current_file: AtomicUsize::new(0),
            pending_conflicts: AtomicUsize::new(0),
            job_state: Mutex::new(JobState::Pending),
            cached_decision: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            history: Mutex::new(SpeedHistory::new(graph_history_size, graph_floor)),
            control: TransferControl::new(),
        }
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn run_state(&self) -> RunState {
        self.control.state()
    }

    pub fn bytes_planned(&self) -> u64 {
        self.bytes_planned.load(Ordering::Acquire)
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    /// Bytes re-read from the destination during verification
    pub fn bytes_verified(&self) -> u64 {
        self.bytes_verified.load(Ordering::Acquire)
    }

    pub fn files_total(&self) -> usize {
        self.files_total.load(Ordering::Acquire)
    }

    /// Ordinal of the file in flight (1-based; 0 before the first file)
    pub fn current_file(&self) -> usize {
        self.current_file.load(Ordering::Acquire)
    }

    /// Conflicts raised or queued but not yet decided
    pub fn pending_conflicts(&self) -> usize {
        self.pending_conflicts.load(Ordering::Acquire)
    }

    pub fn job_state(&self) -> JobState {
        *self.job_state.lock()
    }

    /// The apply-to-all decision in force, if any
    pub fn cached_decision(&self) -> Option<ConflictResolution> {
        self.cached_decision.lock().clone()
    }

    pub fn errors(&self) -> Vec<FileError> {
        self.errors.lock().clone()
    }

    pub fn speed_history(&self) -> Vec<ProgressSample> {
        self.history.lock().samples()
    }

    /// Speed graph points scaled into `[0, 1]`, plus the ceiling they were scaled by.
    pub fn speed_graph(&self) -> (Vec<f64>, f64) {
        let history = self.history.lock();
        (history.normalized(), history.scale())
    }

    // Writers below are crate-private: only the transfer loop calls them.

    pub(crate) fn begin(&self, files_total: usize, bytes_planned: u64) {
        self.files_total.store(files_total, Ordering::Release);
        self.bytes_planned.store(bytes_planned, Ordering::Release);
        self.bytes_completed.store(0, Ordering::Release);
        self.bytes_verified.store(0, Ordering::Release);
        self.current_file.store(0, Ordering::Release);
        self.history.lock().clear();
        self.errors.lock().clear();
        self.cached_decision.lock().take();
        self.set_job_state(JobState::Running);
    }

    pub(crate) fn add_completed(&self, bytes: u64) {
        let planned = self.bytes_planned();
        let completed = self.bytes_completed();
        let next = completed.saturating_add(bytes).min(planned);
        self.bytes_completed.store(next, Ordering::Release);
    }

    pub(crate) fn add_verified(&self, bytes: u64) {
        self.bytes_verified.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Add bytes found after planning (a source grew since the scan).
    pub(crate) fn extend_plan(&self, bytes: u64) {
        let planned = self.bytes_planned();
        self.bytes_planned
            .store(planned.saturating_add(bytes), Ordering::Release);
    }

    /// Remove bytes that will never be transferred (skipped or failed files).
    pub(crate) fn unplan(&self, bytes: u64) {
        let completed = self.bytes_completed();
        let planned = self.bytes_planned();
        let next = planned.saturating_sub(bytes).max(completed);
        self.bytes_planned.store(next, Ordering::Release);
    }

    pub(crate) fn advance_file(&self) -> usize {
        self.current_file.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn set_pending_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::Release);
    }

    pub(crate) fn set_job_state(&self, state: JobState) {
        *self.job_state.lock() = state;
    }

    pub(crate) fn cache_decision(&self, resolution: ConflictResolution) {
        *self.cached_decision.lock() = Some(resolution);
    }

    pub(crate) fn record_error(&self, error: FileError) {
        self.errors.lock().push(error);
    }

    pub(crate) fn push_sample(&self, sample: ProgressSample) {
        self.history.lock().push(sample);
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new(200, DEFAULT_GRAPH_FLOOR)
    }
}
