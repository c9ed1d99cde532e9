//! Scan & plan: expand sources into file and directory tasks, then check
//! that the destination has room for them.

use crate::error::EngineError;
use crate::model::{DirTask, EntryKind, FileTask};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Everything a job will transfer, in transfer order.
#[derive(Debug, Default)]
pub struct Plan {
    pub tasks: Vec<FileTask>,
    /// Parents before children
    pub directories: Vec<DirTask>,
    pub total_bytes: u64,
}

/// Which file names a destination volume accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingRules {
    /// NTFS, FAT and exFAT: reserved device names and `<>:"/\|?*` are refused,
    /// as are control characters and a trailing dot or space
    Windows,
    /// Only `/` and NUL are refused
    #[default]
    Posix,
}

impl NamingRules {
    /// Rules for a file system type name such as `ntfs` or `ext4`.
    pub fn for_file_system(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ntfs" | "ntfs3" | "fuseblk" | "vfat" | "fat" | "fat16" | "fat32" | "msdos"
            | "exfat" | "refs" => NamingRules::Windows,
            _ if cfg!(windows) => NamingRules::Windows,
            _ => NamingRules::Posix,
        }
    }
}

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Rewrite one path component so a volume following `rules` can store it.
///
/// Reserved device names are wrapped in underscores and forbidden characters
/// become look-alike Unicode characters. Names that are already valid come
/// back unchanged.
pub fn sanitize_component(name: &OsStr, rules: NamingRules) -> OsString {
    if name.is_empty() || name == "." || name == ".." {
        return name.to_os_string();
    }
    match rules {
        NamingRules::Posix => match name.to_str() {
            Some(text) if text.contains(['/', '\0']) => text
                .chars()
                .filter(|&c| c != '\0')
                .map(|c| if c == '/' { '\u{2215}' } else { c })
                .collect::<String>()
                .into(),
            _ => name.to_os_string(),
        },
        NamingRules::Windows => {
            let text = name.to_string_lossy();
            if RESERVED_NAMES.iter().any(|r| text.eq_ignore_ascii_case(r)) {
                return format!("_{}_", text).into();
            }
            let mut result: String = text
                .chars()
                .map(|c| match c {
                    '<' => '\u{1438}',
                    '>' => '\u{1433}',
                    ':' => '\u{A789}',
                    '"' => '\u{FF02}',
                    '/' => '\u{2215}',
                    '\\' => '\u{FF3C}',
                    '|' => '\u{01C0}',
                    '?' => '\u{FF1F}',
                    '*' => '\u{FF0A}',
                    c if (c as u32) < 32 => '_',
                    c => c,
                })
                .collect();
            if result.ends_with([' ', '.']) {
                result.pop();
                result.push('_');
            }
            result.into()
        }
    }
}

fn destination_name(name: &OsStr, naming: Option<NamingRules>) -> OsString {
    match naming {
        Some(rules) => {
            let sanitized = sanitize_component(name, rules);
            if sanitized.as_os_str() != name {
                tracing::debug!(
                    original = %name.to_string_lossy(),
                    sanitized = %sanitized.to_string_lossy(),
                    "destination name sanitized"
                );
            }
            sanitized
        }
        None => name.to_os_string(),
    }
}

/// Expand `sources` into tasks rooted at `destination`.
///
/// Each source lands inside `destination` under its own file name. Directory
/// entries are visited in name order. Symlinks are planned as links and never
/// followed; other special files are ignored. With `naming` set, every
/// destination component below `destination` is passed through
/// `sanitize_component`.
pub fn scan_sources(
    sources: &[PathBuf],
    destination: &Path,
    naming: Option<NamingRules>,
) -> Result<Plan, EngineError> {
    let mut plan = Plan::default();
    for source in sources {
        let name = source.file_name().ok_or_else(|| EngineError::InvalidPath {
            path: source.clone(),
            reason: "source has no file name".to_string(),
        })?;
        let target = destination.join(destination_name(name, naming));
        scan_entry(source, &target, naming, &mut plan)?;
    }
    tracing::info!(
        files = plan.tasks.len(),
        directories = plan.directories.len(),
        bytes = plan.total_bytes,
        "scan complete"
    );
    Ok(plan)
}

fn scan_entry(
    source: &Path,
    destination: &Path,
    naming: Option<NamingRules>,
    plan: &mut Plan,
) -> Result<(), EngineError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| source_error(source, e))?;
    let modified = metadata.modified().ok();

    if metadata.is_symlink() {
        plan.tasks.push(FileTask {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            size: 0,
            kind: EntryKind::Symlink,
            modified,
            discovered_at: SystemTime::now(),
        });
    } else if metadata.is_file() {
        plan.total_bytes = plan.total_bytes.saturating_add(metadata.len());
        plan.tasks.push(FileTask {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            size: metadata.len(),
            kind: EntryKind::File,
            modified,
            discovered_at: SystemTime::now(),
        });
    } else if metadata.is_dir() {
        plan.directories.push(DirTask {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            modified,
        });

        let mut entries = fs::read_dir(source)
            .map_err(|e| EngineError::enumeration(source, e))?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::enumeration(source, e))?;
        entries.sort();

        for name in entries {
            let target = destination.join(destination_name(&name, naming));
            scan_entry(&source.join(&name), &target, naming, plan)?;
        }
    } else {
        tracing::debug!(path = %source.display(), "skipping special file");
    }
    Ok(())
}

fn source_error(path: &Path, err: io::Error) -> EngineError {
    if err.kind() == io::ErrorKind::NotFound {
        EngineError::SourceNotFound {
            path: path.to_path_buf(),
        }
    } else {
        EngineError::SourceAccessDenied {
            path: path.to_path_buf(),
            source: Arc::new(err),
        }
    }
}

/// Reject copying a directory into itself.
pub fn validate_destination_not_inside_source(
    sources: &[PathBuf],
    destination: &Path,
) -> Result<(), EngineError> {
    let destination = resolve_existing(destination);
    for source in sources {
        let is_dir = fs::symlink_metadata(source)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        let source = source.canonicalize().unwrap_or_else(|_| source.clone());
        if destination.starts_with(&source) {
            return Err(EngineError::InvalidPath {
                path: destination,
                reason: format!("destination is inside source {}", source.display()),
            });
        }
    }
    Ok(())
}

// Canonicalise the deepest existing ancestor and re-append the rest.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.file_name().map(|n| n.to_os_string()), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name);
                current = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Facts about the destination volume.
pub trait SpaceProbe {
    /// Bytes available to an unprivileged writer at `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;

    /// File names the volume holding `path` accepts.
    fn naming_rules(&self, _path: &Path) -> NamingRules {
        NamingRules::default()
    }
}

/// Queries the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpace;

impl SpaceProbe for SystemSpace {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        with_volume(path, |disk| disk.available_space())
    }

    fn naming_rules(&self, path: &Path) -> NamingRules {
        with_volume(path, |disk| {
            NamingRules::for_file_system(&disk.file_system().to_string_lossy())
        })
        .unwrap_or_else(|e| {
            tracing::debug!(path = %path.display(), error = %e, "file system type unknown");
            NamingRules::for_file_system("")
        })
    }
}

// Run `f` on the mounted volume holding `path`, or its nearest existing
// ancestor when the destination does not exist yet.
fn with_volume<T>(path: &Path, f: impl FnOnce(&sysinfo::Disk) -> T) -> io::Result<T> {
    let existing = path
        .ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| Path::new("."));
    let resolved = strip_verbatim(existing.canonicalize()?);

    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(f)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mounted volume contains {}", resolved.display()),
            )
        })
}

// Mount points are listed as `C:\`, not `\\?\C:\`.
#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|p| p.strip_prefix(r"\\?\")) {
        Some(plain) if !plain.starts_with("UNC") => PathBuf::from(plain),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

/// Reports a fixed amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Fail if `required` plus `margin` bytes do not fit at `destination`.
///
/// The reported `required` excludes the margin.
pub fn check_space(
    destination: &Path,
    required: u64,
    probe: &dyn SpaceProbe,
    margin: u64,
) -> Result<(), EngineError> {
    let available = probe
        .available_space(destination)
        .map_err(|e| EngineError::SpaceQueryFailed {
            path: destination.to_path_buf(),
            source: Arc::new(e),
        })?;
    if available < required.saturating_add(margin) {
        tracing::warn!(required, available, margin, "insufficient space");
        return Err(EngineError::InsufficientSpace {
            required,
            available,
        });
    }
    tracing::debug!(required, available, "space check passed");
    Ok(())
}
