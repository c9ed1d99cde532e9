//! Job orchestration module.
//!
//! This module provides the main job lifecycle functions:
//! - Creating a job from source paths and a destination directory
//! - Planning a job (enumerating the source trees)
//! - Running a job (space check, transfer, verification, cleanup)
//! - Spawning a job on its own thread and steering it through a `JobHandle`
//!
//! A running job reports through `TransferEvent`s on the session's event
//! channel and takes conflict decisions from its decision channel. File-scoped
//! errors are recorded and the job moves on; only job-level errors end it early.

use crate::checksums;
use crate::config::EngineConfig;
use crate::conflict::{
    ConflictDecision, ConflictRequest, ConflictResolution, ConflictResolver, Detection, Resolved,
    Submission,
};
use crate::control::RunState;
use crate::error::{EngineError, FileError, FileErrorKind};
use crate::events::{Phase, ProgressUpdate, TransferEvent};
use crate::fs_ops::{self, ChunkControl, CopyError, CopySpec, DestinationFs, LocalFs, Throttle};
use crate::history::HistoryLog;
use crate::model::{
    DirTask, EntryKind, FileRecord, FileState, FileTask, JobOptions, JobResult, JobState, Mode,
    TransferJob,
};
use crate::plan::{self, SpaceProbe, SystemSpace};
use crate::progress::{ProgressSample, ProgressSnapshot, ProgressTelemetry};
use crate::state::TransferState;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// Name of the file a dry run writes inside the destination.
pub const DRY_RUN_FILE_NAME: &str = "DRY_RUN.dat";

/// Channels, shared state and collaborators for one job run.
pub struct JobSession {
    state: Arc<TransferState>,
    events_tx: Sender<TransferEvent>,
    events_rx: Receiver<TransferEvent>,
    decisions_tx: Sender<ConflictResolution>,
    decisions_rx: Receiver<ConflictResolution>,
    history: Option<Arc<Mutex<HistoryLog>>>,
    space_probe: Arc<dyn SpaceProbe + Send + Sync>,
    destination_fs: Arc<dyn DestinationFs>,
}

impl JobSession {
    pub fn new(state: TransferState) -> Self {
        let (events_tx, events_rx) = unbounded();
        let (decisions_tx, decisions_rx) = unbounded();
        JobSession {
            state: Arc::new(state),
            events_tx,
            events_rx,
            decisions_tx,
            decisions_rx,
            history: None,
            space_probe: Arc::new(SystemSpace),
            destination_fs: Arc::new(LocalFs),
        }
    }

    /// Session whose speed graph follows `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(TransferState::new(
            config.graph_history_size,
            config.graph_floor(),
        ))
    }

    /// Append a summary of the finished job to `history`.
    pub fn with_history(mut self, history: Arc<Mutex<HistoryLog>>) -> Self {
        self.history = Some(history);
        self
    }

    /// Use `probe` instead of the operating system for free space and naming rules.
    pub fn with_space_probe<P>(mut self, probe: P) -> Self
    where
        P: SpaceProbe + Send + Sync + 'static,
    {
        self.space_probe = Arc::new(probe);
        self
    }

    /// Write destination files through `fs` instead of the local filesystem.
    pub fn with_destination_fs<F>(mut self, fs: F) -> Self
    where
        F: DestinationFs + 'static,
    {
        self.destination_fs = Arc::new(fs);
        self
    }

    pub fn transfer_state(&self) -> &Arc<TransferState> {
        &self.state
    }

    /// Receiver for the job's events.
    pub fn events(&self) -> Receiver<TransferEvent> {
        self.events_rx.clone()
    }

    /// Sender for conflict decisions.
    pub fn decisions(&self) -> Sender<ConflictResolution> {
        self.decisions_tx.clone()
    }

    fn emit(&self, event: TransferEvent) {
        // The session holds a receiver, so the channel never disconnects
        let _ = self.events_tx.send(event);
    }
}

impl Default for JobSession {
    fn default() -> Self {
        Self::new(TransferState::default())
    }
}

/// Create a new transfer job.
///
/// Every source must exist (it may be a file, a directory or a symlink) and
/// must have a file name. The destination directory may not exist yet; it is
/// created during execution.
///
/// # Errors
/// Returns EngineError if a source is missing or unreadable, if the
/// destination is unusable, or if the destination lies inside a source
/// directory.
pub fn create_job<P: AsRef<Path>>(
    sources: &[P],
    destination: impl AsRef<Path>,
    mode: Mode,
    options: JobOptions,
) -> Result<TransferJob, EngineError> {
    let destination = destination.as_ref();

    if sources.is_empty() {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: "no sources given".to_string(),
        });
    }

    let mut validated = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.as_ref();
        match fs::symlink_metadata(source) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::SourceNotFound {
                    path: source.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(EngineError::SourceAccessDenied {
                    path: source.to_path_buf(),
                    source: Arc::new(e),
                });
            }
        }
        if source.file_name().is_none() {
            return Err(EngineError::InvalidPath {
                path: source.to_path_buf(),
                reason: "source has no file name".to_string(),
            });
        }
        validated.push(source.to_path_buf());
    }

    if destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: destination.to_path_buf(),
            reason: "Destination path is empty".to_string(),
        });
    }
    if let Ok(metadata) = fs::metadata(destination) {
        if !metadata.is_dir() {
            return Err(EngineError::InvalidPath {
                path: destination.to_path_buf(),
                reason: "Destination is not a directory".to_string(),
            });
        }
    }
    plan::validate_destination_not_inside_source(&validated, destination)?;

    Ok(TransferJob {
        id: Uuid::new_v4(),
        mode,
        sources: validated,
        destination: destination.to_path_buf(),
        options,
        tasks: Vec::new(),
        directories: Vec::new(),
        planned: false,
        total_bytes_planned: 0,
        state: JobState::Pending,
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
    })
}

/// Plan a job by enumerating the source trees.
///
/// Populates `job.tasks` and `job.directories` and calculates
/// `job.total_bytes_planned`. Planning again replaces the previous plan.
/// Destination names follow the naming rules of the destination volume when
/// `sanitize_filenames` is set.
///
/// # Errors
/// Returns EngineError if the job is not pending or enumeration fails.
pub fn plan_job(job: &mut TransferJob) -> Result<(), EngineError> {
    require_pending(job)?;
    apply_plan(job, &SystemSpace)
}

/// Fail unless `margin` bytes on top of the planned size fit at the destination.
pub fn check_space(
    job: &TransferJob,
    probe: &dyn SpaceProbe,
    margin: u64,
) -> Result<(), EngineError> {
    plan::check_space(&job.destination, job.total_bytes_planned, probe, margin)
}

/// Run a job on the calling thread.
///
/// Transitions job state from Pending to Running and then to Completed,
/// Cancelled or Failed. Plans the job first if `plan_job` was not called.
/// Individual file errors are recorded in the result but do NOT stop the job.
///
/// A conflict with no `conflict_policy` blocks the run until a decision
/// arrives on the session's decision channel, so interactive jobs belong on
/// their own thread (see `spawn_job`).
///
/// # Errors
/// Returns EngineError for job-level failures: the job was not pending, the
/// sources could not be scanned, there is not enough free space, or the job
/// was cancelled. The same error is sent as `TransferEvent::JobFailed`,
/// together with the result for the files handled before the job stopped.
pub fn run_job(job: &mut TransferJob, session: &JobSession) -> Result<JobResult, EngineError> {
    require_pending(job)?;

    job.state = JobState::Running;
    job.start_time = Some(SystemTime::now());
    session.state.set_job_state(JobState::Running);
    tracing::info!(job_id = %job.id, mode = %job.mode, dry_run = job.options.dry_run, "job started");

    let (outcome, partial) = match prepare(job, session) {
        Err(err) => (Err(err), None),
        Ok(()) => match execute(job, session) {
            Ok(result) => (Ok(result), None),
            Err(Interrupted { error, partial }) => (Err(error), Some(partial)),
        },
    };

    job.end_time = Some(SystemTime::now());
    job.state = match &outcome {
        Ok(_) => JobState::Completed,
        Err(EngineError::Cancelled) => JobState::Cancelled,
        Err(_) => JobState::Failed,
    };
    session.state.set_job_state(job.state);

    match &outcome {
        Ok(result) => {
            tracing::info!(
                job_id = %job.id,
                transferred = result.files_transferred(),
                skipped = result.files_skipped(),
                failed = result.files_failed(),
                bytes = result.bytes_transferred,
                "job completed"
            );
            session.emit(TransferEvent::PhaseChanged(Phase::Done));
            session.emit(TransferEvent::Completed(result.clone()));
        }
        Err(err) => {
            tracing::warn!(
                job_id = %job.id,
                error = %err,
                transferred = partial.as_ref().map_or(0, JobResult::files_transferred),
                "job stopped"
            );
            session.emit(TransferEvent::JobFailed {
                error: err.clone(),
                partial: partial.clone(),
            });
        }
    }
    record_history(
        job,
        session,
        outcome.as_ref().ok().or(partial.as_ref()),
        outcome.as_ref().err(),
    );
    outcome
}

/// Run `job` on a new thread.
pub fn spawn_job(mut job: TransferJob, session: JobSession) -> Result<JobHandle, EngineError> {
    let state = Arc::clone(&session.state);
    let events = session.events();
    let decisions = session.decisions();
    let thread = thread::Builder::new()
        .name("ferry-transfer".to_string())
        .spawn(move || run_job(&mut job, &session))?;
    Ok(JobHandle {
        state,
        events,
        decisions,
        thread,
    })
}

/// Caller's side of a job running on its own thread.
#[derive(Debug)]
pub struct JobHandle {
    state: Arc<TransferState>,
    events: Receiver<TransferEvent>,
    decisions: Sender<ConflictResolution>,
    thread: JoinHandle<Result<JobResult, EngineError>>,
}

impl JobHandle {
    pub fn pause(&self) {
        self.state.control().pause();
    }

    pub fn resume(&self) {
        self.state.control().resume();
    }

    pub fn cancel(&self) {
        self.state.control().cancel();
    }

    pub fn state(&self) -> RunState {
        self.state.run_state()
    }

    pub fn job_state(&self) -> JobState {
        self.state.job_state()
    }

    /// Answer the conflict most recently raised.
    pub fn resolve(&self, resolution: ConflictResolution) {
        if self.decisions.send(resolution).is_err() {
            tracing::debug!("decision sent after the job ended");
        }
    }

    pub fn events(&self) -> &Receiver<TransferEvent> {
        &self.events
    }

    pub fn transfer_state(&self) -> &Arc<TransferState> {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job thread and return its outcome.
    pub fn join(self) -> Result<JobResult, EngineError> {
        self.thread.join().unwrap_or_else(|_| {
            Err(EngineError::Unknown {
                message: "transfer thread panicked".to_string(),
            })
        })
    }
}

fn require_pending(job: &TransferJob) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            expected: "pending",
            actual: job.state.to_string(),
        });
    }
    Ok(())
}

fn apply_plan(job: &mut TransferJob, probe: &dyn SpaceProbe) -> Result<(), EngineError> {
    let naming = job
        .options
        .sanitize_filenames
        .then(|| probe.naming_rules(&job.destination));
    let plan = plan::scan_sources(&job.sources, &job.destination, naming)?;
    job.tasks = plan.tasks;
    job.directories = plan.directories;
    job.total_bytes_planned = plan.total_bytes;
    job.planned = true;
    Ok(())
}

fn prepare(job: &mut TransferJob, session: &JobSession) -> Result<(), EngineError> {
    if !job.planned {
        session.emit(TransferEvent::PhaseChanged(Phase::Scanning));
        apply_plan(job, session.space_probe.as_ref())?;
    }
    if session.state.control().is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    session.emit(TransferEvent::PhaseChanged(Phase::CheckingSpace));
    check_space(
        job,
        session.space_probe.as_ref(),
        job.options.space_safety_margin,
    )
}

/// A job-level error raised after transferring began, with what was done by then.
struct Interrupted {
    error: EngineError,
    partial: JobResult,
}

fn execute(job: &TransferJob, session: &JobSession) -> Result<JobResult, Interrupted> {
    // A dry run is one synthetic task: zeros of the planned size, no source
    let dry_tasks;
    let tasks: &[FileTask] = if job.options.dry_run {
        dry_tasks = vec![FileTask {
            source: PathBuf::new(),
            destination: job.destination.join(DRY_RUN_FILE_NAME),
            size: job.total_bytes_planned,
            kind: EntryKind::File,
            modified: None,
            discovered_at: SystemTime::now(),
        }];
        &dry_tasks
    } else {
        &job.tasks
    };
    Transfer::new(job, tasks, session).run()
}

fn record_history(
    job: &TransferJob,
    session: &JobSession,
    result: Option<&JobResult>,
    error: Option<&EngineError>,
) {
    let Some(history) = &session.history else {
        return;
    };
    let mut log = history.lock();
    if !log.is_enabled() {
        return;
    }
    log.record_job(job, result, error);
    if let Err(e) = log.save() {
        tracing::warn!(error = %e, "failed to save history");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Copy,
    Verify,
}

/// Counts chunk bytes, paces the stream and answers pause/cancel.
struct Meter<'a> {
    session: &'a JobSession,
    telemetry: ProgressTelemetry,
    throttle: Option<Throttle>,
    verify: bool,
    /// Bytes still expected to be re-read for verification
    verify_planned: u64,
    file_copied: u64,
    file_verified: u64,
}

impl<'a> Meter<'a> {
    fn work(&self) -> (u64, u64) {
        let state = &self.session.state;
        let verify_total = if self.verify { self.verify_planned } else { 0 };
        (
            state.bytes_completed() + state.bytes_verified(),
            state.bytes_planned() + verify_total,
        )
    }

    fn start_file(&mut self) {
        self.file_copied = 0;
        self.file_verified = 0;
    }

    fn chunk(&mut self, stage: Stage, bytes: u64, source: &Path, destination: &Path) -> ChunkControl {
        let state = &self.session.state;
        match stage {
            Stage::Copy => {
                state.add_completed(bytes);
                self.file_copied += bytes;
            }
            Stage::Verify => {
                state.add_verified(bytes);
                self.file_verified += bytes;
            }
        }

        let now = Instant::now();
        let (done, total) = self.work();
        if let Some(snapshot) = self.telemetry.record(now, done, total) {
            state.push_sample(ProgressSample {
                elapsed: snapshot.elapsed,
                speed: snapshot.instantaneous,
                percent: snapshot.percent,
            });
            self.emit_progress(snapshot, source, destination);
        }

        if let Some(throttle) = self.throttle.as_mut() {
            if let Some(delay) = throttle.delay_after(bytes, now) {
                // Returns early once the job is cancelled
                let _ = state.control().cancellation().recv_timeout(delay);
            }
        }
        self.checkpoint()
    }

    /// Report progress at a file boundary, outside the interval schedule.
    fn flush(&self, source: &Path, destination: &Path) {
        let (done, total) = self.work();
        let snapshot = self.telemetry.snapshot(Instant::now(), done, total);
        self.emit_progress(snapshot, source, destination);
    }

    fn emit_progress(&self, snapshot: ProgressSnapshot, source: &Path, destination: &Path) {
        let state = &self.session.state;
        self.session.emit(TransferEvent::Progress(ProgressUpdate {
            snapshot,
            bytes_completed: state.bytes_completed(),
            bytes_planned: state.bytes_planned(),
            file_index: state.current_file(),
            files_total: state.files_total(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        }));
    }

    /// Block while paused. `Stop` once the job is cancelled.
    fn checkpoint(&mut self) -> ChunkControl {
        let control = self.session.state.control();
        match control.state() {
            RunState::Running => ChunkControl::Continue,
            RunState::Cancelled => ChunkControl::Stop,
            RunState::Paused => {
                tracing::debug!("transfer paused");
                self.telemetry.on_pause(Instant::now());
                let resumed = control.wait_while_paused();
                let now = Instant::now();
                self.telemetry.on_resume(now);
                if let Some(throttle) = self.throttle.as_mut() {
                    throttle.reset(now);
                }
                if resumed == RunState::Cancelled {
                    ChunkControl::Stop
                } else {
                    tracing::debug!("transfer resumed");
                    ChunkControl::Continue
                }
            }
        }
    }

    fn drop_verify(&mut self, bytes: u64) {
        self.verify_planned = self.verify_planned.saturating_sub(bytes);
    }
}

struct Transfer<'a> {
    job: &'a TransferJob,
    tasks: &'a [FileTask],
    session: &'a JobSession,
    resolver: ConflictResolver,
    records: Vec<FileRecord>,
    /// Conflicts found while another one was waiting for its decision
    deferred: VecDeque<usize>,
    buffer: Vec<u8>,
    meter: Meter<'a>,
    phase: Option<Phase>,
    bytes_transferred: u64,
    started: Instant,
}

impl<'a> Transfer<'a> {
    fn new(job: &'a TransferJob, tasks: &'a [FileTask], session: &'a JobSession) -> Self {
        let now = Instant::now();
        let options = &job.options;
        let total: u64 = tasks.iter().map(|t| t.size).sum();
        Transfer {
            job,
            tasks,
            session,
            resolver: ConflictResolver::with_policy(options.conflict_policy.clone()),
            records: tasks.iter().map(FileRecord::pending).collect(),
            deferred: VecDeque::new(),
            buffer: vec![0u8; options.buffer_size.max(1)],
            meter: Meter {
                session,
                telemetry: ProgressTelemetry::new(options.progress_interval, now),
                throttle: options.throttle_rate.map(|rate| Throttle::new(rate, now)),
                verify: options.verify_checksum,
                verify_planned: total,
                file_copied: 0,
                file_verified: 0,
            },
            phase: None,
            bytes_transferred: 0,
            started: now,
        }
    }

    fn state(&self) -> &'a TransferState {
        &self.session.state
    }

    fn run(mut self) -> Result<JobResult, Interrupted> {
        let job = self.job;
        let total: u64 = self.tasks.iter().map(|t| t.size).sum();
        self.state().begin(self.tasks.len(), total);
        if let Some(decision) = self.resolver.cached() {
            self.state()
                .cache_decision(ConflictResolution::for_all(decision.clone()));
        }

        if job.options.dry_run {
            self.set_phase(Phase::DryRunGenerating);
        } else {
            self.create_directories();
            self.set_phase(Phase::Copying);
        }
        let outcome = self.run_tasks();

        if outcome.is_ok() && !job.options.dry_run {
            self.finish_directories();
        }

        let result = JobResult {
            job_id: job.id,
            mode: job.mode,
            dry_run: job.options.dry_run,
            files: self.records,
            bytes_transferred: self.bytes_transferred,
            elapsed: self.started.elapsed(),
            errors: self.session.state.errors(),
        };
        match outcome {
            Ok(()) => Ok(result),
            Err(error) => Err(Interrupted {
                error,
                partial: result,
            }),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != Some(phase) {
            self.phase = Some(phase);
            tracing::debug!(%phase, "phase changed");
            self.session.emit(TransferEvent::PhaseChanged(phase));
        }
    }

    /// Work through the tasks in plan order.
    ///
    /// A conflicting task waits for its decision while the tasks behind it
    /// keep transferring. Only one conflict is put to the caller at a time.
    fn run_tasks(&mut self) -> Result<(), EngineError> {
        let session = self.session;
        let mut queue: VecDeque<usize> = (0..self.tasks.len()).collect();

        loop {
            if self.meter.checkpoint() == ChunkControl::Stop {
                return Err(EngineError::Cancelled);
            }

            if self.resolver.awaiting().is_some() {
                if let Ok(resolution) = session.decisions_rx.try_recv() {
                    self.on_decision(resolution)?;
                    continue;
                }
            } else if let Some(index) = self.deferred.pop_front() {
                self.process(index)?;
                continue;
            }

            if let Some(index) = queue.pop_front() {
                self.process(index)?;
                continue;
            }

            if self.resolver.awaiting().is_none() {
                break;
            }

            // Nothing left to transfer until the open conflict is answered
            let control = session.state.control();
            select! {
                recv(session.decisions_rx) -> msg => match msg {
                    Ok(resolution) => self.on_decision(resolution)?,
                    Err(_) => {
                        return Err(EngineError::Unknown {
                            message: "decision channel closed".to_string(),
                        })
                    }
                },
                recv(control.cancellation()) -> _ => return Err(EngineError::Cancelled),
            }
        }
        Ok(())
    }

    fn process(&mut self, index: usize) -> Result<(), EngineError> {
        let task = &self.tasks[index];
        match self.resolver.detect(index, task) {
            Detection::Clear => self.transfer(index, task.destination.clone()),
            Detection::Cached(resolved) => {
                tracing::debug!(
                    destination = %task.destination.display(),
                    decision = ?resolved.decision,
                    "conflict resolved by standing decision"
                );
                self.apply(resolved)
            }
            Detection::Conflict(request) => {
                self.records[index].state = FileState::AwaitingDecision;
                if self.resolver.awaiting().is_some() {
                    self.deferred.push_back(index);
                } else {
                    self.raise(request);
                }
                self.sync_pending();
                Ok(())
            }
        }
    }

    fn raise(&mut self, request: ConflictRequest) {
        self.resolver.raise(request.clone());
        self.session.emit(TransferEvent::ConflictRequested(request));
    }

    fn sync_pending(&self) {
        let open = usize::from(self.resolver.awaiting().is_some());
        self.state().set_pending_conflicts(self.deferred.len() + open);
    }

    fn on_decision(&mut self, resolution: ConflictResolution) -> Result<(), EngineError> {
        let outcome = match self.resolver.submit(resolution) {
            Submission::Accepted(resolved) => {
                if let Some(decision) = self.resolver.cached() {
                    self.state()
                        .cache_decision(ConflictResolution::for_all(decision.clone()));
                }
                self.sync_pending();
                self.apply(resolved)
            }
            Submission::Rejected(request) => {
                self.session.emit(TransferEvent::ConflictRequested(request));
                Ok(())
            }
            Submission::Unexpected => {
                tracing::warn!("decision received with no open conflict");
                Ok(())
            }
        };
        self.sync_pending();
        outcome
    }

    fn apply(&mut self, resolved: Resolved) -> Result<(), EngineError> {
        match resolved.decision {
            ConflictDecision::Skip => {
                self.skip(resolved.task_index);
                Ok(())
            }
            ConflictDecision::Replace | ConflictDecision::Rename(_) => {
                self.transfer(resolved.task_index, resolved.destination)
            }
        }
    }

    fn skip(&mut self, index: usize) {
        let task = &self.tasks[index];
        self.state().advance_file();
        self.state().unplan(task.size);
        self.meter.drop_verify(task.size);
        self.records[index].state = FileState::Skipped;
        tracing::debug!(destination = %task.destination.display(), "file skipped");
        self.session.emit(TransferEvent::FileSkipped {
            source: task.source.clone(),
            destination: task.destination.clone(),
        });
    }

    fn transfer(&mut self, index: usize, destination: PathBuf) -> Result<(), EngineError> {
        let task = &self.tasks[index];
        let size = if task.kind == EntryKind::File && !self.job.options.dry_run {
            let size = self.refresh_size(index);
            self.ensure_room(task, size)?;
            size
        } else {
            task.size
        };

        let ordinal = self.state().advance_file();
        self.meter.start_file();
        {
            let record = &mut self.records[index];
            record.state = FileState::Copying;
            record.destination = destination.clone();
        }
        tracing::debug!(
            ordinal,
            source = %task.source.display(),
            destination = %destination.display(),
            "transferring"
        );

        let outcome = match task.kind {
            EntryKind::Symlink => fs_ops::copy_symlink(&task.source, &destination)
                .map(|()| 0)
                .map_err(CopyError::Failed),
            EntryKind::File => self.copy_and_verify(index, &destination, size),
        };
        match outcome {
            Ok(bytes) => {
                self.finish_file(index, &destination, bytes);
                Ok(())
            }
            Err(CopyError::Cancelled) => {
                self.records[index].state = FileState::Cancelled;
                Err(EngineError::Cancelled)
            }
            Err(CopyError::Failed(err)) => {
                self.fail_file(index, err);
                Ok(())
            }
        }
    }

    fn copy_and_verify(
        &mut self,
        index: usize,
        destination: &Path,
        size: u64,
    ) -> Result<u64, CopyError> {
        let job = self.job;
        let task = &self.tasks[index];
        let options = &job.options;

        if !options.dry_run {
            self.set_phase(Phase::Copying);
        }
        let mut hasher = options
            .verify_checksum
            .then(|| checksums::begin(options.checksum_algorithm));

        let meter = &mut self.meter;
        let on_chunk = |n| meter.chunk(Stage::Copy, n, &task.source, destination);
        let copied = if options.dry_run {
            fs_ops::write_placeholder(destination, size, &mut self.buffer, hasher.as_mut(), on_chunk)?
        } else {
            let spec = CopySpec {
                source: &task.source,
                destination,
                expected: size,
                sync: options.verify_checksum || job.mode == Mode::Move,
                modified: task.modified.filter(|_| options.preserve_modification_time),
                fs: self.session.destination_fs.as_ref(),
            };
            fs_ops::copy_file(spec, &mut self.buffer, hasher.as_mut(), on_chunk)?
        };
        self.records[index].bytes_copied = copied;

        let Some(hasher) = hasher else {
            return Ok(copied);
        };

        self.set_phase(Phase::Hashing);
        let source_digest = hasher.finish();

        self.set_phase(Phase::Verifying);
        let meter = &mut self.meter;
        let verified = fs_ops::hash_file(
            destination,
            options.checksum_algorithm,
            &mut self.buffer,
            |n| meter.chunk(Stage::Verify, n, &task.source, destination),
        );
        let destination_digest = match verified {
            Ok(digest) => digest,
            Err(err) => {
                // An unverified copy is not kept
                fs_ops::remove_partial(destination);
                return Err(err);
            }
        };

        let result = checksums::compare(source_digest, destination_digest);
        let matches = result.matches;
        let message = format!(
            "source {} destination {}",
            result.source.hex(),
            result.destination.hex()
        );
        self.records[index].checksum = Some(result);
        if !matches {
            tracing::warn!(destination = %destination.display(), %message, "checksum mismatch");
            fs_ops::remove_partial(destination);
            return Err(CopyError::Failed(
                FileError::new(FileErrorKind::ChecksumMismatch, destination).with_message(message),
            ));
        }
        Ok(copied)
    }

    /// Stop the job when the next file no longer fits at the destination.
    ///
    /// A failed query is not fatal here; the write itself reports a full disk.
    fn ensure_room(&self, task: &FileTask, size: u64) -> Result<(), EngineError> {
        let margin = self.job.options.space_safety_margin;
        match self.session.space_probe.available_space(&self.job.destination) {
            Ok(available) if available < size.saturating_add(margin) => {
                tracing::warn!(
                    source = %task.source.display(),
                    size,
                    available,
                    margin,
                    "destination full"
                );
                Err(EngineError::DiskFull {
                    path: task.source.clone(),
                    required: size,
                    available,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "free space recheck failed");
                Ok(())
            }
        }
    }

    /// Current source size; the plan follows it if the file changed since the scan.
    fn refresh_size(&mut self, index: usize) -> u64 {
        let planned = self.records[index].size;
        let Ok(current) = fs::metadata(&self.tasks[index].source).map(|m| m.len()) else {
            return planned;
        };
        if current != planned {
            tracing::debug!(
                source = %self.tasks[index].source.display(),
                planned,
                current,
                "source size changed since scan"
            );
            if current > planned {
                self.state().extend_plan(current - planned);
                self.meter.verify_planned += current - planned;
            } else {
                self.state().unplan(planned - current);
                self.meter.drop_verify(planned - current);
            }
            self.records[index].size = current;
        }
        current
    }

    fn finish_file(&mut self, index: usize, destination: &Path, bytes: u64) {
        let job = self.job;
        let task = &self.tasks[index];

        if job.mode == Mode::Move && !job.options.dry_run {
            if let Err(e) = fs::remove_file(&task.source) {
                let err = FileError::from_io(FileErrorKind::Unknown, &task.source, &e)
                    .with_message(format!("copied but source not removed: {}", e));
                tracing::warn!(source = %task.source.display(), error = %e, "source not removed");
                self.records[index].error = Some(err.clone());
                self.state().record_error(err.clone());
                self.session.emit(TransferEvent::FileFailed(err));
            }
        }

        let record = &mut self.records[index];
        record.state = FileState::Done;
        record.bytes_copied = bytes;
        self.bytes_transferred += bytes;
        self.meter.flush(&task.source, destination);
        self.session.emit(TransferEvent::FileCompleted {
            source: task.source.clone(),
            destination: destination.to_path_buf(),
            bytes,
        });
    }

    fn fail_file(&mut self, index: usize, err: FileError) {
        let size = self.records[index].size;
        // Bytes already counted stay counted; only the remainder leaves the plan
        self.state()
            .unplan(size.saturating_sub(self.meter.file_copied));
        self.meter
            .drop_verify(size.saturating_sub(self.meter.file_verified));

        tracing::warn!(path = %err.path.display(), kind = %err.kind, message = %err.message, "file failed");
        let record = &mut self.records[index];
        record.state = FileState::Failed;
        record.error = Some(err.clone());
        self.state().record_error(err.clone());
        self.session.emit(TransferEvent::FileFailed(err));
    }

    fn create_directories(&mut self) {
        let directories: &'a [DirTask] = &self.job.directories;
        for dir in directories {
            if let Err(e) = fs_ops::ensure_dir_exists(&dir.destination) {
                let mut err = FileError::new(FileErrorKind::DestOpenFailed, &dir.destination)
                    .with_message(e.to_string());
                err.os_code = e.raw_os_error();
                tracing::warn!(path = %dir.destination.display(), error = %e, "directory not created");
                self.state().record_error(err.clone());
                self.session.emit(TransferEvent::FileFailed(err));
            }
        }
    }

    fn finish_directories(&mut self) {
        let job = self.job;
        if job.options.preserve_modification_time {
            // Children first; writing into a directory moves its mtime
            for dir in job.directories.iter().rev() {
                if let Some(modified) = dir.modified {
                    if dir.destination.is_dir() {
                        fs_ops::set_modified(&dir.destination, modified);
                    }
                }
            }
        }

        if job.mode == Mode::Move {
            self.set_phase(Phase::RemovingEmptyFolders);
            let sources: Vec<PathBuf> = job.directories.iter().map(|d| d.source.clone()).collect();
            let removed = fs_ops::remove_empty_dirs(&sources);
            tracing::info!(removed, "empty source folders removed");
        }
    }
}
