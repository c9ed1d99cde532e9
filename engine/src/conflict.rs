//! Conflict resolution for destination paths that already exist.
//!
//! One `ConflictResolver` lives for the duration of a job and moves through
//! `Idle → Awaiting → Resolved` for each conflict it raises. Decisions come
//! from outside the engine; the resolver only checks them. An apply-to-all
//! decision is cached and applied to later conflicts without asking again.
//! It never applies to conflicts already decided.

use crate::model::FileTask;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// How to handle one conflicting destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// Leave the existing destination alone
    Skip,
    /// Overwrite the existing destination
    Replace,
    /// Write to a new file name in the same directory
    Rename(String),
}

/// A decision plus its "apply to all remaining conflicts" flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub decision: ConflictDecision,
    pub apply_to_all: bool,
}

impl ConflictResolution {
    pub fn once(decision: ConflictDecision) -> Self {
        ConflictResolution {
            decision,
            apply_to_all: false,
        }
    }

    pub fn for_all(decision: ConflictDecision) -> Self {
        ConflictResolution {
            decision,
            apply_to_all: true,
        }
    }
}

/// Size and modification time of one side of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl EntryMeta {
    fn read(path: &Path) -> Option<Self> {
        fs::symlink_metadata(path).ok().map(|m| EntryMeta {
            size: m.len(),
            modified: m.modified().ok(),
        })
    }
}

/// Why a proposed rename was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "name")]
pub enum RenameRejection {
    /// The name is empty or is not a single plain file name
    InvalidName(String),
    /// A file with that name already exists
    AlreadyExists(String),
}

/// Sent to the caller when a destination already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRequest {
    /// Index of the task in the job plan
    pub task_index: usize,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub source_meta: EntryMeta,
    pub destination_meta: EntryMeta,
    /// Set when this request re-raises a conflict after a bad rename
    pub rejected: Option<RenameRejection>,
}

/// Where a task's bytes go once its conflict is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub task_index: usize,
    pub decision: ConflictDecision,
    /// Final destination path (differs from the planned one after a rename)
    pub destination: PathBuf,
}

/// Result of checking a task's destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Destination is free
    Clear,
    /// Destination exists and a cached decision settles it
    Cached(Resolved),
    /// Destination exists and the caller must decide
    Conflict(ConflictRequest),
}

/// Result of handing a decision to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted(Resolved),
    /// Rename collided or was malformed; the conflict is raised again
    Rejected(ConflictRequest),
    /// No conflict was awaiting a decision
    Unexpected,
}

/// Where the resolver is in its per-conflict cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Idle,
    Awaiting,
    Resolved,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    awaiting: Option<ConflictRequest>,
    resolved: bool,
    cached: Option<ConflictDecision>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that answers every conflict with `policy` without asking.
    pub fn with_policy(policy: Option<ConflictDecision>) -> Self {
        ConflictResolver {
            cached: policy.filter(|d| !matches!(d, ConflictDecision::Rename(_))),
            ..Self::default()
        }
    }

    pub fn state(&self) -> ResolverState {
        if self.awaiting.is_some() {
            ResolverState::Awaiting
        } else if self.resolved {
            ResolverState::Resolved
        } else {
            ResolverState::Idle
        }
    }

    /// The apply-to-all decision in force, if any.
    pub fn cached(&self) -> Option<&ConflictDecision> {
        self.cached.as_ref()
    }

    /// The request currently waiting for a decision.
    pub fn awaiting(&self) -> Option<&ConflictRequest> {
        self.awaiting.as_ref()
    }

    /// Check whether `task`'s destination is occupied.
    ///
    /// Does not change state; a `Conflict` must be handed to `raise`
    /// before a decision can be submitted for it.
    pub fn detect(&self, task_index: usize, task: &FileTask) -> Detection {
        let Some(destination_meta) = EntryMeta::read(&task.destination) else {
            return Detection::Clear;
        };

        if let Some(decision) = &self.cached {
            return Detection::Cached(Resolved {
                task_index,
                decision: decision.clone(),
                destination: task.destination.clone(),
            });
        }

        let source_meta = EntryMeta::read(&task.source).unwrap_or(EntryMeta {
            size: task.size,
            modified: task.modified,
        });
        Detection::Conflict(ConflictRequest {
            task_index,
            source: task.source.clone(),
            destination: task.destination.clone(),
            source_meta,
            destination_meta,
            rejected: None,
        })
    }

    /// Start waiting on `request`. Only one conflict is raised at a time.
    pub fn raise(&mut self, request: ConflictRequest) {
        if let Some(previous) = &self.awaiting {
            tracing::warn!(
                task_index = previous.task_index,
                "conflict superseded before a decision arrived"
            );
        }
        tracing::debug!(destination = %request.destination.display(), "conflict raised");
        self.awaiting = Some(request);
        self.resolved = false;
    }

    /// Apply the caller's decision to the awaiting conflict.
    pub fn submit(&mut self, resolution: ConflictResolution) -> Submission {
        let Some(request) = self.awaiting.take() else {
            return Submission::Unexpected;
        };

        let destination = match &resolution.decision {
            ConflictDecision::Rename(name) => match validate_rename(&request.destination, name) {
                Ok(path) => path,
                Err(rejection) => {
                    tracing::debug!(?rejection, "rename rejected");
                    let request = ConflictRequest {
                        rejected: Some(rejection),
                        ..request
                    };
                    self.awaiting = Some(request.clone());
                    return Submission::Rejected(request);
                }
            },
            _ => request.destination.clone(),
        };

        if resolution.apply_to_all {
            match &resolution.decision {
                ConflictDecision::Rename(_) => {
                    tracing::warn!("apply-to-all ignored for rename decisions");
                }
                decision => self.cached = Some(decision.clone()),
            }
        }

        self.resolved = true;
        Submission::Accepted(Resolved {
            task_index: request.task_index,
            decision: resolution.decision,
            destination,
        })
    }
}

/// The proposed name must be a bare file name that is free in the
/// destination's directory.
fn validate_rename(destination: &Path, name: &str) -> Result<PathBuf, RenameRejection> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.trim().is_empty() || !plain || name.contains(['/', '\\']) {
        return Err(RenameRejection::InvalidName(name.to_string()));
    }

    let candidate = match destination.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    };
    if fs::symlink_metadata(&candidate).is_ok() {
        return Err(RenameRejection::AlreadyExists(name.to_string()));
    }
    Ok(candidate)
}

/// Suggest a free name next to `path`: `report.txt` becomes `report (1).txt`,
/// and `report (1).txt` becomes `report (2).txt`.
///
/// For callers that want to offer a default; the resolver itself never renames
/// on its own.
pub fn suggest_rename(path: &Path) -> PathBuf {
    let folder = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let (base, mut number) = split_counter(&stem).unwrap_or((stem.as_str(), 1));
    loop {
        let candidate = folder.join(format!("{} ({}){}", base, number, ext));
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        number += 1;
    }
}

// "name (12)" -> ("name", 13)
fn split_counter(stem: &str) -> Option<(&str, u32)> {
    let inner = stem.strip_suffix(')')?;
    let open = inner.rfind(" (")?;
    let digits = &inner[open + 2..];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = digits.parse().ok()?;
    Some((&inner[..open], n + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryKind;

    fn task(src: &Path, dst: &Path) -> FileTask {
        FileTask {
            source: src.to_path_buf(),
            destination: dst.to_path_buf(),
            size: 3,
            kind: EntryKind::File,
            modified: None,
            discovered_at: SystemTime::now(),
        }
    }

    fn conflicting_pair() -> (tempfile::TempDir, FileTask) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"new").expect("Failed to write source");
        fs::write(&dst, b"old!").expect("Failed to write destination");
        let t = task(&src, &dst);
        (temp_dir, t)
    }

    #[test]
    fn test_detect_clear_when_destination_missing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let t = task(&temp_dir.path().join("a"), &temp_dir.path().join("b"));
        let resolver = ConflictResolver::new();
        assert_eq!(resolver.detect(0, &t), Detection::Clear);
        assert_eq!(resolver.state(), ResolverState::Idle);
    }

    #[test]
    fn test_detect_reports_both_sides() {
        let (_temp_dir, t) = conflicting_pair();
        let resolver = ConflictResolver::new();
        match resolver.detect(4, &t) {
            Detection::Conflict(request) => {
                assert_eq!(request.task_index, 4);
                assert_eq!(request.source_meta.size, 3);
                assert_eq!(request.destination_meta.size, 4);
                assert!(request.rejected.is_none());
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_submit_without_conflict_is_unexpected() {
        let mut resolver = ConflictResolver::new();
        let outcome = resolver.submit(ConflictResolution::once(ConflictDecision::Skip));
        assert_eq!(outcome, Submission::Unexpected);
    }

    #[test]
    fn test_state_machine_cycle() {
        let (_temp_dir, t) = conflicting_pair();
        let mut resolver = ConflictResolver::new();
        let Detection::Conflict(request) = resolver.detect(0, &t) else {
            panic!("expected conflict");
        };
        resolver.raise(request);
        assert_eq!(resolver.state(), ResolverState::Awaiting);

        let outcome = resolver.submit(ConflictResolution::once(ConflictDecision::Replace));
        assert!(matches!(outcome, Submission::Accepted(ref r) if r.destination == t.destination));
        assert_eq!(resolver.state(), ResolverState::Resolved);
        assert!(resolver.cached().is_none());
    }

    #[test]
    fn test_apply_to_all_caches_for_later_conflicts() {
        let (_temp_dir, t) = conflicting_pair();
        let mut resolver = ConflictResolver::new();
        let Detection::Conflict(request) = resolver.detect(0, &t) else {
            panic!("expected conflict");
        };
        resolver.raise(request);
        resolver.submit(ConflictResolution::for_all(ConflictDecision::Skip));

        assert_eq!(resolver.cached(), Some(&ConflictDecision::Skip));
        match resolver.detect(1, &t) {
            Detection::Cached(resolved) => {
                assert_eq!(resolved.task_index, 1);
                assert_eq!(resolved.decision, ConflictDecision::Skip);
            }
            other => panic!("expected cached decision, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_accepted_when_free() {
        let (temp_dir, t) = conflicting_pair();
        let mut resolver = ConflictResolver::new();
        let Detection::Conflict(request) = resolver.detect(0, &t) else {
            panic!("expected conflict");
        };
        resolver.raise(request);
        let outcome = resolver.submit(ConflictResolution::for_all(ConflictDecision::Rename(
            "copy_2.txt".to_string(),
        )));
        match outcome {
            Submission::Accepted(resolved) => {
                assert_eq!(resolved.destination, temp_dir.path().join("copy_2.txt"));
            }
            other => panic!("expected accepted rename, got {:?}", other),
        }
        // Rename is never cached
        assert!(resolver.cached().is_none());
    }

    #[test]
    fn test_rename_collision_reraises() {
        let (temp_dir, t) = conflicting_pair();
        fs::write(temp_dir.path().join("taken.txt"), b"x").expect("Failed to write file");
        let mut resolver = ConflictResolver::new();
        let Detection::Conflict(request) = resolver.detect(0, &t) else {
            panic!("expected conflict");
        };
        resolver.raise(request);

        let outcome = resolver.submit(ConflictResolution::once(ConflictDecision::Rename(
            "taken.txt".to_string(),
        )));
        match outcome {
            Submission::Rejected(request) => {
                assert_eq!(
                    request.rejected,
                    Some(RenameRejection::AlreadyExists("taken.txt".to_string()))
                );
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(resolver.state(), ResolverState::Awaiting);

        // A second, valid answer settles the same conflict
        let outcome = resolver.submit(ConflictResolution::once(ConflictDecision::Skip));
        assert!(matches!(outcome, Submission::Accepted(_)));
    }

    #[test]
    fn test_rename_rejects_paths() {
        let (_temp_dir, t) = conflicting_pair();
        let mut resolver = ConflictResolver::new();
        for bad in ["", "..", "sub/file.txt", "/abs.txt"] {
            let Detection::Conflict(request) = resolver.detect(0, &t) else {
                panic!("expected conflict");
            };
            resolver.raise(request);
            let outcome =
                resolver.submit(ConflictResolution::once(ConflictDecision::Rename(bad.to_string())));
            assert!(
                matches!(
                    outcome,
                    Submission::Rejected(ConflictRequest {
                        rejected: Some(RenameRejection::InvalidName(_)),
                        ..
                    })
                ),
                "name {:?} should be rejected",
                bad
            );
            resolver.submit(ConflictResolution::once(ConflictDecision::Skip));
        }
    }

    #[test]
    fn test_policy_resolver_never_asks() {
        let (_temp_dir, t) = conflicting_pair();
        let resolver = ConflictResolver::with_policy(Some(ConflictDecision::Replace));
        assert!(matches!(resolver.detect(0, &t), Detection::Cached(_)));
    }

    #[test]
    fn test_suggest_rename_increments() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path().join("report.txt");
        fs::write(&base, b"x").expect("Failed to write file");

        let first = suggest_rename(&base);
        assert_eq!(first, temp_dir.path().join("report (1).txt"));

        fs::write(&first, b"x").expect("Failed to write file");
        assert_eq!(suggest_rename(&base), temp_dir.path().join("report (2).txt"));
        assert_eq!(suggest_rename(&first), temp_dir.path().join("report (2).txt"));

        let no_ext = temp_dir.path().join("notes");
        assert_eq!(suggest_rename(&no_ext), temp_dir.path().join("notes (1)"));
    }
}
