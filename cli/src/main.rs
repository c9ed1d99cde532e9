//! Ferry - Command-line interface for the file transfer engine.
//!
//! Runs one copy or move job, drawing progress on stderr and asking on stdin
//! when a destination already exists.
//!
//! Exit codes: 0 when every file transferred, 1 when some files failed,
//! 2 for usage errors and job-level failures.

use clap::Parser;
use engine::{
    checksums, create_job, generate_checksum_file, spawn_job, suggest_rename,
    verify_checksum_file, ChecksumAlgorithm, ChecksumValue, ConflictDecision, ConflictRequest,
    ConflictResolution, EngineConfig, FileState, HistoryLog, JobResult, JobSession, Mode,
    ProgressUpdate, RenameRejection, TransferEvent, TransferState,
};
use parking_lot::Mutex;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Ferry - copy or move files and folders
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version)]
#[command(about = "Copy or move files and folders with verification and progress")]
struct Args {
    /// Files or directories to transfer
    #[arg(value_name = "SOURCE")]
    sources: Vec<PathBuf>,

    /// Destination directory
    #[arg(long, value_name = "PATH")]
    dst: Option<PathBuf>,

    /// Operation mode: copy or move
    #[arg(long, value_name = "MODE", default_value = "copy")]
    mode: String,

    /// What to do when a destination exists: ask, skip, replace, or rename
    #[arg(long, value_name = "POLICY", default_value = "ask")]
    conflict: String,

    /// Verify each file with a checksum after copying
    #[arg(long, conflicts_with = "no_verify")]
    verify: bool,

    /// Do not verify, even if the configuration says so
    #[arg(long)]
    no_verify: bool,

    /// Checksum algorithm: crc32, md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM")]
    hash: Option<String>,

    /// Write one placeholder file of the planned size instead of transferring
    #[arg(long)]
    dry_run: bool,

    /// Maximum throughput in bytes per second
    #[arg(long, value_name = "BYTES_PER_SEC")]
    throttle: Option<u64>,

    /// Configuration file (defaults to the per-user config file)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// History file to append the job summary to
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Empty the history file before running
    #[arg(long)]
    clear_history: bool,

    /// Write a checksum manifest of the transferred files
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Check the files under --dst against a manifest instead of transferring
    #[arg(long, value_name = "FILE", conflicts_with = "manifest")]
    check_manifest: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Clean,
    FilesFailed,
}

/// Parse and validate command-line arguments, then run the job
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let interrupt = Interrupt::default();
    interrupt.install();

    let stdin = std::io::stdin();
    let exit_code = match run_cli(&args, &mut stdin.lock(), &interrupt) {
        Ok(Status::Clean) => 0,
        Ok(Status::FilesFailed) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Cancels the watched job when Ctrl-C arrives.
#[derive(Clone, Default)]
struct Interrupt(Arc<Mutex<Option<Arc<TransferState>>>>);

impl Interrupt {
    fn install(&self) {
        let interrupt = self.clone();
        if let Err(e) = ctrlc::set_handler(move || interrupt.fire()) {
            tracing::warn!(error = %e, "Ctrl-C handler not installed");
        }
    }

    fn watch(&self, state: Arc<TransferState>) {
        *self.0.lock() = Some(state);
    }

    fn fire(&self) {
        if let Some(state) = self.0.lock().as_ref() {
            tracing::info!("interrupted, cancelling job");
            state.control().cancel();
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, input: &mut dyn BufRead, interrupt: &Interrupt) -> Result<Status, String> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(EngineConfig::default_path);
    let config = EngineConfig::load(&config_path).map_err(|e| e.to_string())?;

    let history_path = args.history.clone().or_else(|| config.history_file.clone());
    let history = match &history_path {
        Some(path) => HistoryLog::load(path, config.log_history_enabled, config.history_cap)
            .map_err(|e| e.to_string())?,
        None => HistoryLog::new(config.log_history_enabled, config.history_cap),
    };
    let history = Arc::new(Mutex::new(history));

    if args.clear_history {
        let mut log = history.lock();
        log.clear();
        log.save().map_err(|e| e.to_string())?;
        match log.path() {
            Some(path) => eprintln!("History cleared: {}", path.display()),
            None => eprintln!("History cleared"),
        }
        if args.sources.is_empty() && args.check_manifest.is_none() {
            return Ok(Status::Clean);
        }
    }

    let algorithm = match &args.hash {
        Some(name) => name.parse::<ChecksumAlgorithm>()?,
        None => config.checksum_algorithm,
    };

    let dst = args
        .dst
        .as_deref()
        .ok_or_else(|| "--dst is required".to_string())?;

    if let Some(manifest) = &args.check_manifest {
        return check_manifest(manifest, dst, algorithm);
    }

    if args.sources.is_empty() {
        return Err("at least one source is required".to_string());
    }

    let mode: Mode = args.mode.parse()?;
    let ask = match args.conflict.to_lowercase().as_str() {
        "ask" | "rename" => None,
        "skip" => Some(ConflictDecision::Skip),
        "replace" => Some(ConflictDecision::Replace),
        _ => {
            return Err(format!(
                "Invalid conflict policy '{}'. Must be 'ask', 'skip', 'replace', or 'rename'",
                args.conflict
            ))
        }
    };
    let auto_rename = args.conflict.eq_ignore_ascii_case("rename");

    let mut options = config.job_options_with_policy(ask);
    options.checksum_algorithm = algorithm;
    if args.verify {
        options.verify_checksum = true;
    }
    if args.no_verify {
        options.verify_checksum = false;
    }
    if args.dry_run {
        options.dry_run = true;
    }
    if let Some(rate) = args.throttle {
        options.throttle_rate = (rate > 0).then_some(rate);
    }

    let job = create_job(&args.sources[..], dst, mode, options)
        .map_err(|e| format!("Job creation failed: {}", e))?;

    eprintln!("Preparing transfer...");
    for source in &job.sources {
        eprintln!("  Source: {}", source.display());
    }
    eprintln!("  Destination: {}", job.destination.display());
    eprintln!("  Mode: {}", job.mode);
    eprintln!();

    let session = JobSession::from_config(&config).with_history(Arc::clone(&history));
    let handle = spawn_job(job, session).map_err(|e| e.to_string())?;
    let state = Arc::clone(handle.transfer_state());
    interrupt.watch(Arc::clone(&state));
    let mut progress = CliProgress::new(args.verbose);
    let mut partial = None;

    for event in handle.events().iter() {
        match event {
            TransferEvent::PhaseChanged(phase) => progress.on_phase(phase),
            TransferEvent::Progress(update) => progress.on_progress(&update),
            TransferEvent::ConflictRequested(request) => {
                progress.clear_line();
                let resolution = if auto_rename {
                    ConflictResolution::once(ConflictDecision::Rename(suggested_name(
                        &request.destination,
                    )))
                } else {
                    ask_conflict(&request, input)
                };
                handle.resolve(resolution);
            }
            TransferEvent::FileCompleted { destination, .. } => {
                progress.note(&format!("Done: {}", destination.display()));
            }
            TransferEvent::FileSkipped { destination, .. } => {
                progress.note(&format!("Skipped: {}", destination.display()));
            }
            TransferEvent::FileFailed(err) => {
                progress.clear_line();
                eprintln!("Failed: {}: {} {}", err.path.display(), err.kind, err.message);
            }
            TransferEvent::Completed(_) => break,
            TransferEvent::JobFailed { partial: done, .. } => {
                partial = done;
                break;
            }
        }
    }

    let result = match handle.join() {
        Ok(result) => result,
        Err(e) => {
            if let Some(done) = &partial {
                progress.print_summary("Transfer stopped.", done, &state);
            }
            return Err(format!("Job execution failed: {}", e));
        }
    };
    let title = if result.dry_run {
        "Dry run complete!"
    } else {
        "Transfer complete!"
    };
    progress.print_summary(title, &result, &state);

    if let Some(manifest) = &args.manifest {
        write_manifest(manifest, dst, &result, algorithm)?;
    }

    if result.files_failed() > 0 || !result.is_clean() {
        Ok(Status::FilesFailed)
    } else {
        Ok(Status::Clean)
    }
}

fn suggested_name(destination: &Path) -> String {
    suggest_rename(destination)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_answer(input: &mut dyn BufRead) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Prompt on stderr and read the decision from `input`. End of input means skip.
fn ask_conflict(request: &ConflictRequest, input: &mut dyn BufRead) -> ConflictResolution {
    match &request.rejected {
        Some(RenameRejection::InvalidName(name)) => {
            eprintln!("'{}' is not a valid file name", name)
        }
        Some(RenameRejection::AlreadyExists(name)) => eprintln!("'{}' already exists", name),
        None => {}
    }
    eprintln!("Conflict: {} already exists", request.destination.display());
    eprintln!(
        "  source:      {}",
        CliProgress::format_bytes(request.source_meta.size)
    );
    eprintln!(
        "  destination: {}",
        CliProgress::format_bytes(request.destination_meta.size)
    );

    loop {
        eprint!("[s]kip, [r]eplace, re[n]ame, skip [a]ll, replace a[l]l: ");
        let _ = std::io::stderr().flush();
        let Some(answer) = read_answer(input) else {
            return ConflictResolution::once(ConflictDecision::Skip);
        };
        match answer.to_lowercase().as_str() {
            "s" | "skip" => return ConflictResolution::once(ConflictDecision::Skip),
            "r" | "replace" => return ConflictResolution::once(ConflictDecision::Replace),
            "a" => return ConflictResolution::for_all(ConflictDecision::Skip),
            "l" => return ConflictResolution::for_all(ConflictDecision::Replace),
            "n" | "rename" => {
                let suggestion = suggested_name(&request.destination);
                eprint!("New name [{}]: ", suggestion);
                let _ = std::io::stderr().flush();
                let name = read_answer(input)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(suggestion);
                return ConflictResolution::once(ConflictDecision::Rename(name));
            }
            _ => continue,
        }
    }
}

fn write_manifest(
    path: &Path,
    root: &Path,
    result: &JobResult,
    algorithm: ChecksumAlgorithm,
) -> Result<(), String> {
    let mut entries: Vec<(String, ChecksumValue)> = Vec::new();
    for file in result.files.iter().filter(|f| f.state == FileState::Done) {
        let relative = file
            .destination
            .strip_prefix(root)
            .unwrap_or(&file.destination)
            .to_string_lossy()
            .replace('\\', "/");
        let checksum = match &file.checksum {
            Some(c) if c.algorithm == algorithm => c.destination.clone(),
            _ => checksums::compute_file_checksum(&file.destination, algorithm)
                .map_err(|e| format!("Failed to hash {}: {}", e.path.display(), e.message))?,
        };
        entries.push((relative, checksum));
    }
    fs::write(path, generate_checksum_file(&entries, algorithm))
        .map_err(|e| format!("Failed to write manifest {}: {}", path.display(), e))?;
    eprintln!("Manifest written: {} ({} files)", path.display(), entries.len());
    Ok(())
}

fn check_manifest(
    manifest: &Path,
    root: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<Status, String> {
    let content = fs::read_to_string(manifest)
        .map_err(|e| format!("Failed to read manifest {}: {}", manifest.display(), e))?;
    let checks = verify_checksum_file(&content, root, algorithm);

    let mut failed = 0;
    for check in &checks {
        if check.matches() {
            continue;
        }
        failed += 1;
        match &check.actual {
            Ok(actual) => eprintln!(
                "MISMATCH {}: expected {}, got {}",
                check.relative_path,
                check.expected,
                actual.hex()
            ),
            Err(e) => eprintln!("UNREADABLE {}: {}", check.relative_path, e.message),
        }
    }
    eprintln!("Checked {} files, {} failed", checks.len(), failed);

    if failed > 0 {
        Ok(Status::FilesFailed)
    } else {
        Ok(Status::Clean)
    }
}

/// Renders progress and per-file notes on stderr.
struct CliProgress {
    verbose: bool,
    line_active: bool,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            line_active: false,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: f64) -> String {
        let filled = ((percent / 5.0) as usize).min(20);
        format!("[{}{}]", "=".repeat(filled), " ".repeat(20 - filled))
    }

    fn clear_line(&mut self) {
        if self.line_active {
            eprintln!();
            self.line_active = false;
        }
    }

    fn note(&mut self, message: &str) {
        if self.verbose {
            self.clear_line();
            eprintln!("{}", message);
        }
    }

    fn on_phase(&mut self, phase: engine::Phase) {
        if self.verbose {
            self.clear_line();
            eprintln!("Phase: {}", phase);
        }
    }

    fn on_progress(&mut self, update: &ProgressUpdate) {
        let snapshot = &update.snapshot;
        let eta = snapshot
            .eta
            .map(Self::format_duration)
            .unwrap_or_else(|| "--".to_string());
        eprint!(
            "\r{} {:5.1}% | {}/{} | {}/s | ETA {} | file {}/{}   ",
            Self::progress_bar(snapshot.percent),
            snapshot.percent,
            Self::format_bytes(update.bytes_completed),
            Self::format_bytes(update.bytes_planned),
            Self::format_bytes(snapshot.speed as u64),
            eta,
            update.file_index,
            update.files_total
        );
        let _ = std::io::stderr().flush();
        self.line_active = true;
    }

    /// One block character per graph point, lowest to highest.
    fn sparkline(points: &[f64]) -> String {
        const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        points
            .iter()
            .map(|p| BARS[((p.clamp(0.0, 1.0) * 7.0).round()) as usize])
            .collect()
    }

    fn print_summary(&mut self, title: &str, result: &JobResult, state: &TransferState) {
        self.clear_line();
        eprintln!();
        eprintln!("{}", title);
        eprintln!(
            "Summary: {} done, {} skipped, {} failed",
            result.files_transferred(),
            result.files_skipped(),
            result.files_failed()
        );
        let verified = result.files.iter().filter(|f| f.checksum.is_some()).count();
        if verified > 0 {
            eprintln!(
                "Verification: {} OK, {} mismatch",
                verified - result.checksum_mismatches(),
                result.checksum_mismatches()
            );
        }
        eprintln!("Bytes copied: {}", Self::format_bytes(result.bytes_transferred));
        eprintln!("Elapsed: {}", Self::format_duration(result.elapsed));
        let (points, ceiling) = state.speed_graph();
        if !points.is_empty() {
            eprintln!(
                "Speed: {} (scale {}/s)",
                Self::sparkline(&points),
                Self::format_bytes(ceiling as u64)
            );
        }

        if !result.errors.is_empty() {
            eprintln!();
            eprintln!("Errors:");
            for error in &result.errors {
                eprintln!("  {}: {} {}", error.path.display(), error.kind, error.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Arguments for copying `sources` into `dst`, isolated from the user's config.
    fn test_args(temp: &TempDir, sources: Vec<PathBuf>, dst: PathBuf) -> Args {
        Args {
            sources,
            dst: Some(dst),
            mode: "copy".to_string(),
            conflict: "skip".to_string(),
            verify: false,
            no_verify: false,
            hash: None,
            dry_run: false,
            throttle: None,
            config: Some(temp.path().join("config.toml")),
            history: None,
            clear_history: false,
            manifest: None,
            check_manifest: None,
            verbose: false,
        }
    }

    fn no_input() -> &'static [u8] {
        b""
    }

    #[test]
    fn test_cli_with_valid_directories() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        let dst = temp.path().join("dst");

        let args = test_args(&temp, vec![src], dst.clone());
        let result = run_cli(&args, &mut no_input(), &Interrupt::default());
        assert_eq!(result, Ok(Status::Clean));
        assert!(dst.join("src").join("test.txt").exists());
    }

    #[test]
    fn test_cli_with_verification_and_manifest() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("sub")).expect("Failed to create src dir");
        fs::write(src.join("a.txt"), "hello").expect("Failed to write file");
        fs::write(src.join("sub").join("b.txt"), "world").expect("Failed to write file");
        let dst = temp.path().join("dst");
        let manifest = temp.path().join("manifest.txt");

        let mut args = test_args(&temp, vec![src], dst.clone());
        args.verify = true;
        args.hash = Some("sha256".to_string());
        args.manifest = Some(manifest.clone());
        assert_eq!(run_cli(&args, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));

        let content = fs::read_to_string(&manifest).expect("Failed to read manifest");
        assert!(content.contains("src/sub/b.txt"));

        let mut check = test_args(&temp, Vec::new(), dst.clone());
        check.hash = Some("sha256".to_string());
        check.check_manifest = Some(manifest.clone());
        assert_eq!(run_cli(&check, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));

        fs::write(dst.join("src").join("a.txt"), "tampered").expect("Failed to write file");
        assert_eq!(run_cli(&check, &mut no_input(), &Interrupt::default()), Ok(Status::FilesFailed));
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let args = test_args(
            &temp,
            vec![PathBuf::from("/nonexistent/path")],
            temp.path().join("dst"),
        );
        assert!(run_cli(&args, &mut no_input(), &Interrupt::default()).is_err());
    }

    #[test]
    fn test_cli_rejects_invalid_mode() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut args = test_args(&temp, vec![temp.path().to_path_buf()], temp.path().join("d"));
        args.mode = "invalid".to_string();
        assert!(run_cli(&args, &mut no_input(), &Interrupt::default()).is_err());
    }

    #[test]
    fn test_cli_rejects_invalid_policy() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut args = test_args(&temp, vec![temp.path().to_path_buf()], temp.path().join("d"));
        args.conflict = "overwrite-maybe".to_string();
        assert!(run_cli(&args, &mut no_input(), &Interrupt::default()).is_err());
    }

    #[test]
    fn test_cli_rejects_invalid_hash_algorithm() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut args = test_args(&temp, vec![temp.path().to_path_buf()], temp.path().join("d"));
        args.verify = true;
        args.hash = Some("invalid_algo".to_string());
        assert!(run_cli(&args, &mut no_input(), &Interrupt::default()).is_err());
    }

    #[test]
    fn test_cli_requires_destination() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut args = test_args(&temp, vec![temp.path().to_path_buf()], temp.path().join("d"));
        args.dst = None;
        assert!(run_cli(&args, &mut no_input(), &Interrupt::default()).is_err());
    }

    #[test]
    fn test_cli_ask_renames_with_suggestion() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("a.txt");
        fs::write(&src, "incoming").expect("Failed to write file");
        let dst = temp.path().join("dst");
        fs::create_dir(&dst).expect("Failed to create dst dir");
        fs::write(dst.join("a.txt"), "existing").expect("Failed to write file");

        let mut args = test_args(&temp, vec![src], dst.clone());
        args.conflict = "ask".to_string();
        // Unknown answer, then rename accepting the suggested name
        let mut input: &[u8] = b"what\nn\n\n";
        assert_eq!(run_cli(&args, &mut input, &Interrupt::default()), Ok(Status::Clean));

        assert_eq!(
            fs::read_to_string(dst.join("a.txt")).expect("Failed to read file"),
            "existing"
        );
        assert_eq!(
            fs::read_to_string(dst.join("a (1).txt")).expect("Failed to read file"),
            "incoming"
        );
    }

    #[test]
    fn test_cli_ask_replace_all() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(dst.join("src")).expect("Failed to create dst dir");
        fs::create_dir(&src).expect("Failed to create src dir");
        for name in ["a.txt", "b.txt"] {
            fs::write(src.join(name), "new").expect("Failed to write file");
            fs::write(dst.join("src").join(name), "old").expect("Failed to write file");
        }

        let mut args = test_args(&temp, vec![src], dst.clone());
        args.conflict = "ask".to_string();
        let mut input: &[u8] = b"l\n";
        assert_eq!(run_cli(&args, &mut input, &Interrupt::default()), Ok(Status::Clean));
        for name in ["a.txt", "b.txt"] {
            assert_eq!(
                fs::read_to_string(dst.join("src").join(name)).expect("Failed to read file"),
                "new"
            );
        }
    }

    #[test]
    fn test_cli_rename_policy() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("report.txt");
        fs::write(&src, "v2").expect("Failed to write file");
        let dst = temp.path().join("dst");
        fs::create_dir(&dst).expect("Failed to create dst dir");
        fs::write(dst.join("report.txt"), "v1").expect("Failed to write file");
        fs::write(dst.join("report (1).txt"), "v1 copy").expect("Failed to write file");

        let mut args = test_args(&temp, vec![src], dst.clone());
        args.conflict = "rename".to_string();
        assert_eq!(run_cli(&args, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));
        assert_eq!(
            fs::read_to_string(dst.join("report (2).txt")).expect("Failed to read file"),
            "v2"
        );
    }

    #[test]
    fn test_cli_reports_failed_files() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("sub")).expect("Failed to create src dir");
        fs::write(src.join("a.txt"), "a").expect("Failed to write file");
        fs::write(src.join("sub").join("b.txt"), "b").expect("Failed to write file");
        let dst = temp.path().join("dst");
        fs::create_dir_all(dst.join("src")).expect("Failed to create dst dir");
        fs::write(dst.join("src").join("sub"), "blocker").expect("Failed to write file");

        let args = test_args(&temp, vec![src], dst.clone());
        assert_eq!(run_cli(&args, &mut no_input(), &Interrupt::default()), Ok(Status::FilesFailed));
        assert!(dst.join("src").join("a.txt").exists());
    }

    #[test]
    fn test_cli_dry_run_from_config() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        fs::write(src.join("a.bin"), vec![1u8; 1234]).expect("Failed to write file");
        let dst = temp.path().join("dst");
        fs::write(temp.path().join("config.toml"), "dry_run = true\nverify_checksum = false\n")
            .expect("Failed to write config");

        let args = test_args(&temp, vec![src], dst.clone());
        assert_eq!(run_cli(&args, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));
        assert_eq!(
            fs::metadata(dst.join(engine::DRY_RUN_FILE_NAME))
                .expect("Failed to stat placeholder")
                .len(),
            1234
        );
        assert!(!dst.join("src").exists());
    }

    #[test]
    fn test_cli_history_written_and_cleared() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("a.txt");
        fs::write(&src, "a").expect("Failed to write file");
        let history = temp.path().join("history.json");

        let mut args = test_args(&temp, vec![src], temp.path().join("dst"));
        args.history = Some(history.clone());
        assert_eq!(run_cli(&args, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));
        let log = HistoryLog::load(&history, true, 100).expect("Failed to load history");
        assert_eq!(log.len(), 1);

        let mut clear = test_args(&temp, Vec::new(), temp.path().join("dst"));
        clear.history = Some(history.clone());
        clear.clear_history = true;
        assert_eq!(run_cli(&clear, &mut no_input(), &Interrupt::default()), Ok(Status::Clean));
        let log = HistoryLog::load(&history, true, 100).expect("Failed to load history");
        assert!(log.is_empty());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::progress_bar(50.0), format!("[{}{}]", "=".repeat(10), " ".repeat(10)));
        assert_eq!(CliProgress::sparkline(&[0.0, 0.5, 1.0, 2.0]), "▁▅██");
    }

    #[test]
    fn test_interrupt_cancels_watched_job() {
        let interrupt = Interrupt::default();
        // Nothing watched yet
        interrupt.fire();

        let state = Arc::new(TransferState::new(4, 1024.0));
        interrupt.watch(Arc::clone(&state));
        assert!(!state.control().is_cancelled());
        interrupt.fire();
        assert!(state.control().is_cancelled());
    }

    #[test]
    fn test_cli_interrupt_cancels_job() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let temp = TempDir::new().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        fs::write(src.join("big.bin"), vec![3u8; 1024 * 1024]).expect("Failed to write file");
        let dst = temp.path().join("dst");
        let history = temp.path().join("history.json");

        let mut args = test_args(&temp, vec![src], dst.clone());
        args.throttle = Some(100 * 1024);
        args.history = Some(history.clone());

        // Keep pressing Ctrl-C until the run returns
        let interrupt = Interrupt::default();
        let done = Arc::new(AtomicBool::new(false));
        let presser = {
            let interrupt = interrupt.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                    interrupt.fire();
                }
            })
        };
        let result = run_cli(&args, &mut no_input(), &interrupt);
        done.store(true, Ordering::SeqCst);
        presser.join().expect("Failed to join interrupt thread");

        assert!(result.is_err());
        assert!(!dst.join("src").join("big.bin").exists());
        let log = HistoryLog::load(&history, true, 100).expect("Failed to load history");
        match log.entries().next().map(|e| &e.record) {
            Some(engine::LogRecord::Job(summary)) => {
                assert_eq!(summary.outcome, engine::JobOutcome::Cancelled)
            }
            other => panic!("Expected job summary, got {:?}", other),
        };
    }
}
