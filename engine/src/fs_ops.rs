//! Filesystem operations module.
//!
//! This module provides the low-level operations the transfer loop is built from:
//! - Chunked copying with a per-chunk callback (progress, pause, cancel)
//! - Throttling to a maximum byte rate
//! - Creating destination directories
//! - Recreating symbolic links
//! - Pruning source directories emptied by a move
//! - Writing the placeholder file of a dry run

use crate::checksums::{self, Accumulator, ChecksumAlgorithm, ChecksumValue};
use crate::error::{EngineError, FileError, FileErrorKind};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// What the chunk callback wants the copy loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Stop,
}

/// Why a stream copy ended early.
#[derive(Debug)]
pub enum StreamError {
    Read(io::Error),
    Write(io::Error),
    /// The reader ran dry before the expected length
    UnexpectedEof { copied: u64 },
    /// The chunk callback asked to stop
    Stopped { copied: u64 },
}

/// Why a file copy did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyError {
    Cancelled,
    Failed(FileError),
}

impl From<FileError> for CopyError {
    fn from(err: FileError) -> Self {
        CopyError::Failed(err)
    }
}

/// Copy exactly `expected` bytes from `reader` to `writer` in `buffer`-sized chunks.
///
/// Every chunk is fed to `hasher` (if any) and then reported to `on_chunk` with
/// its length. Returns the number of bytes written.
pub fn copy_stream<R, W, F>(
    mut reader: R,
    mut writer: W,
    expected: u64,
    buffer: &mut [u8],
    mut hasher: Option<&mut Accumulator>,
    mut on_chunk: F,
) -> Result<u64, StreamError>
where
    R: Read,
    W: Write,
    F: FnMut(u64) -> ChunkControl,
{
    let mut copied = 0u64;
    while copied < expected {
        let want = buffer.len().min((expected - copied) as usize);
        let n = match reader.read(&mut buffer[..want]) {
            Ok(0) => return Err(StreamError::UnexpectedEof { copied }),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Read(e)),
        };
        let chunk = &buffer[..n];
        if let Some(hasher) = hasher.as_deref_mut() {
            hasher.update(chunk);
        }
        writer.write_all(chunk).map_err(StreamError::Write)?;
        copied += n as u64;

        if on_chunk(n as u64) == ChunkControl::Stop && copied < expected {
            return Err(StreamError::Stopped { copied });
        }
    }
    writer.flush().map_err(StreamError::Write)?;
    Ok(copied)
}

/// A destination file open for writing.
pub trait DestinationFile: Write + Send {
    /// Flush file data to the device.
    fn sync_data(&mut self) -> io::Result<()>;
}

impl DestinationFile for fs::File {
    fn sync_data(&mut self) -> io::Result<()> {
        fs::File::sync_data(self)
    }
}

/// Where copied files are written.
pub trait DestinationFs: Send + Sync {
    /// Create (or truncate) the file at `path`.
    fn create(&self, path: &Path) -> io::Result<Box<dyn DestinationFile>>;
}

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl DestinationFs for LocalFs {
    fn create(&self, path: &Path) -> io::Result<Box<dyn DestinationFile>> {
        Ok(Box::new(fs::File::create(path)?))
    }
}

/// Options for one file copy.
#[derive(Clone, Copy)]
pub struct CopySpec<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    /// Size recorded when the job was planned
    pub expected: u64,
    /// Flush file data to the device before returning
    pub sync: bool,
    pub modified: Option<SystemTime>,
    pub fs: &'a dyn DestinationFs,
}

/// Copy one regular file, removing the destination if the copy does not finish.
pub fn copy_file<F>(
    spec: CopySpec<'_>,
    buffer: &mut [u8],
    hasher: Option<&mut Accumulator>,
    on_chunk: F,
) -> Result<u64, CopyError>
where
    F: FnMut(u64) -> ChunkControl,
{
    let CopySpec {
        source,
        destination,
        expected,
        ..
    } = spec;

    let reader = fs::File::open(source)
        .map_err(|e| FileError::from_io(FileErrorKind::SourceOpenFailed, source, &e))?;

    if is_same_file(source, destination) {
        return Err(FileError::new(FileErrorKind::DestOpenFailed, destination)
            .with_message("source and destination are the same file")
            .into());
    }
    ensure_parent_dir_exists(destination).map_err(|e| dest_open_error(destination, &e))?;
    remove_symlink_at(destination);

    let mut writer = spec
        .fs
        .create(destination)
        .map_err(|e| FileError::from_io(FileErrorKind::DestOpenFailed, destination, &e))?;

    let copied = match copy_stream(reader, &mut writer, expected, buffer, hasher, on_chunk) {
        Ok(copied) => copied,
        Err(err) => {
            drop(writer);
            remove_partial(destination);
            return Err(match err {
                StreamError::Read(e) => {
                    FileError::from_io(FileErrorKind::ReadError, source, &e).into()
                }
                StreamError::Write(e) => {
                    FileError::from_io(FileErrorKind::WriteError, destination, &e).into()
                }
                StreamError::UnexpectedEof { copied } => {
                    FileError::new(FileErrorKind::UnexpectedEndOfFile, source)
                        .with_message(format!("read {} of {} bytes", copied, expected))
                        .into()
                }
                StreamError::Stopped { .. } => CopyError::Cancelled,
            });
        }
    };

    if spec.sync {
        if let Err(e) = writer.sync_data() {
            drop(writer);
            remove_partial(destination);
            return Err(FileError::from_io(FileErrorKind::WriteError, destination, &e).into());
        }
    }
    drop(writer);

    if let Some(modified) = spec.modified {
        set_modified(destination, modified);
    }
    Ok(copied)
}

/// Hash a file in chunks, reporting each chunk to `on_chunk`.
pub fn hash_file<F>(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    buffer: &mut [u8],
    on_chunk: F,
) -> Result<ChecksumValue, CopyError>
where
    F: FnMut(u64) -> ChunkControl,
{
    let file = fs::File::open(path)
        .map_err(|e| FileError::from_io(FileErrorKind::SourceOpenFailed, path, &e))?;
    let len = file
        .metadata()
        .map_err(|e| FileError::from_io(FileErrorKind::ReadError, path, &e))?
        .len();

    let mut hasher = checksums::begin(algorithm);
    match copy_stream(file, io::sink(), len, buffer, Some(&mut hasher), on_chunk) {
        Ok(_) => Ok(hasher.finish()),
        Err(StreamError::Stopped { .. }) => Err(CopyError::Cancelled),
        Err(StreamError::Read(e)) | Err(StreamError::Write(e)) => {
            Err(FileError::from_io(FileErrorKind::ReadError, path, &e).into())
        }
        Err(StreamError::UnexpectedEof { .. }) => {
            Err(FileError::new(FileErrorKind::UnexpectedEndOfFile, path).into())
        }
    }
}

/// Write `size` zero bytes to `destination` without reading any source.
pub fn write_placeholder<F>(
    destination: &Path,
    size: u64,
    buffer: &mut [u8],
    hasher: Option<&mut Accumulator>,
    on_chunk: F,
) -> Result<u64, CopyError>
where
    F: FnMut(u64) -> ChunkControl,
{
    ensure_parent_dir_exists(destination).map_err(|e| dest_open_error(destination, &e))?;
    let mut writer = fs::File::create(destination)
        .map_err(|e| FileError::from_io(FileErrorKind::DestOpenFailed, destination, &e))?;

    let result = copy_stream(io::repeat(0).take(size), &mut writer, size, buffer, hasher, on_chunk)
        .and_then(|n| writer.sync_data().map(|_| n).map_err(StreamError::Write));
    match result {
        Ok(n) => Ok(n),
        Err(err) => {
            drop(writer);
            remove_partial(destination);
            Err(match err {
                StreamError::Stopped { .. } => CopyError::Cancelled,
                StreamError::Write(e) | StreamError::Read(e) => {
                    FileError::from_io(FileErrorKind::WriteError, destination, &e).into()
                }
                StreamError::UnexpectedEof { .. } => {
                    FileError::new(FileErrorKind::UnexpectedEndOfFile, destination).into()
                }
            })
        }
    }
}

/// Recreate the symbolic link at `source` as `destination`.
#[cfg(unix)]
pub fn copy_symlink(source: &Path, destination: &Path) -> Result<(), FileError> {
    let target = fs::read_link(source)
        .map_err(|e| FileError::from_io(FileErrorKind::SourceOpenFailed, source, &e))?;
    ensure_parent_dir_exists(destination).map_err(|e| dest_open_error(destination, &e))?;

    // Never remove a real directory to make room for a link
    if let Ok(meta) = fs::symlink_metadata(destination) {
        if meta.is_dir() {
            return Err(FileError::new(FileErrorKind::DestOpenFailed, destination)
                .with_message("destination is a directory"));
        }
        fs::remove_file(destination)
            .map_err(|e| FileError::from_io(FileErrorKind::DestOpenFailed, destination, &e))?;
    }
    std::os::unix::fs::symlink(&target, destination)
        .map_err(|e| FileError::from_io(FileErrorKind::WriteError, destination, &e))
}

#[cfg(not(unix))]
pub fn copy_symlink(source: &Path, _destination: &Path) -> Result<(), FileError> {
    Err(FileError::new(FileErrorKind::Unknown, source)
        .with_message("symbolic links are not supported on this platform"))
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}

/// Ensure `dir` exists as a directory.
pub fn ensure_dir_exists(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::directory_creation(
            dir,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::directory_creation(dir, e))
        }
        Err(e) => Err(EngineError::directory_creation(dir, e)),
    }
}

/// Remove the directories in `dirs` that are empty, deepest first.
///
/// Returns the number removed. Non-empty or unreadable directories are left alone.
pub fn remove_empty_dirs(dirs: &[PathBuf]) -> usize {
    let mut ordered: Vec<&PathBuf> = dirs.iter().collect();
    ordered.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0;
    for dir in ordered {
        let is_empty = fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            continue;
        }
        match fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to remove empty folder"),
        }
    }
    removed
}

/// Set a file's modification time, logging on failure.
pub fn set_modified(path: &Path, modified: SystemTime) {
    let mtime = filetime::FileTime::from_system_time(modified);
    if let Err(e) = filetime::set_file_mtime(path, mtime) {
        tracing::warn!(path = %path.display(), error = %e, "failed to set modification time");
    }
}

/// Delete a partially written file.
pub fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}

// A dangling or replaced link would otherwise be written through.
fn remove_symlink_at(path: &Path) {
    if fs::symlink_metadata(path).map(|m| m.is_symlink()).unwrap_or(false) {
        let _ = fs::remove_file(path);
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn dest_open_error(path: &Path, err: &EngineError) -> FileError {
    FileError {
        kind: FileErrorKind::DestOpenFailed,
        path: path.to_path_buf(),
        message: err.to_string(),
        os_code: err.raw_os_error(),
    }
}

/// Limits throughput to `rate` bytes per second, measured since the last reset.
#[derive(Debug)]
pub struct Throttle {
    rate: u64,
    since: Instant,
    bytes: u64,
}

impl Throttle {
    pub fn new(rate: u64, now: Instant) -> Self {
        Throttle {
            rate: rate.max(1),
            since: now,
            bytes: 0,
        }
    }

    /// Account for `bytes` just moved; returns how long to wait before the next chunk.
    pub fn delay_after(&mut self, bytes: u64, now: Instant) -> Option<Duration> {
        self.bytes = self.bytes.saturating_add(bytes);
        let target = Duration::from_secs_f64(self.bytes as f64 / self.rate as f64);
        let elapsed = now.saturating_duration_since(self.since);
        target.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Start measuring afresh (after a pause).
    pub fn reset(&mut self, now: Instant) {
        self.since = now;
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that fails once `limit` bytes have been written.
    struct FailingWriter {
        written: u64,
        limit: u64,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() as u64 > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written += buf.len() as u64;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_copy_stream_copies_exact_length() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut out = Vec::new();
        let mut buffer = vec![0u8; 1024];
        let mut chunks = Vec::new();

        let copied = copy_stream(&data[..], &mut out, data.len() as u64, &mut buffer, None, |n| {
            chunks.push(n);
            ChunkControl::Continue
        })
        .expect("Failed to copy");

        assert_eq!(copied, 10_000);
        assert_eq!(out, data);
        assert!(chunks.iter().all(|&n| n <= 1024));
        assert_eq!(chunks.iter().sum::<u64>(), 10_000);
    }

    #[test]
    fn test_copy_stream_write_failure_at_ninety_percent() {
        let data = vec![7u8; 1000];
        let mut buffer = vec![0u8; 100];
        let writer = FailingWriter {
            written: 0,
            limit: 900,
        };
        let result = copy_stream(&data[..], writer, 1000, &mut buffer, None, |_| {
            ChunkControl::Continue
        });
        assert!(matches!(result, Err(StreamError::Write(_))));
    }

    #[test]
    fn test_copy_stream_short_source() {
        let data = vec![1u8; 10];
        let mut buffer = vec![0u8; 4];
        let result = copy_stream(&data[..], io::sink(), 20, &mut buffer, None, |_| {
            ChunkControl::Continue
        });
        assert!(matches!(result, Err(StreamError::UnexpectedEof { copied: 10 })));
    }

    #[test]
    fn test_copy_stream_stop_requested() {
        let data = vec![1u8; 100];
        let mut buffer = vec![0u8; 10];
        let result = copy_stream(&data[..], io::sink(), 100, &mut buffer, None, |_| {
            ChunkControl::Stop
        });
        assert!(matches!(result, Err(StreamError::Stopped { copied: 10 })));
    }

    #[test]
    fn test_copy_file_with_hash_and_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("nested").join("dest.txt");
        fs::write(&src, b"test content").expect("Failed to write source");
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);

        let mut buffer = vec![0u8; 5];
        let mut hasher = checksums::begin(ChecksumAlgorithm::Crc32);
        let spec = CopySpec {
            source: &src,
            destination: &dst,
            expected: 12,
            sync: true,
            modified: Some(mtime),
            fs: &LocalFs,
        };
        let bytes = copy_file(spec, &mut buffer, Some(&mut hasher), |_| ChunkControl::Continue)
            .expect("Failed to copy");
        assert_eq!(bytes, 12);
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), b"test content");

        let expected = checksums::compute_file_checksum(&src, ChecksumAlgorithm::Crc32)
            .expect("Failed to hash source");
        assert_eq!(hasher.finish(), expected);

        let copied_mtime = fs::metadata(&dst)
            .and_then(|m| m.modified())
            .expect("Failed to read mtime");
        assert_eq!(copied_mtime, mtime);
    }

    #[test]
    fn test_copy_file_cancel_removes_partial() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("big.bin");
        let dst = temp_dir.path().join("big.copy");
        fs::write(&src, vec![3u8; 4096]).expect("Failed to write source");

        let mut buffer = vec![0u8; 512];
        let mut chunks = 0;
        let spec = CopySpec {
            source: &src,
            destination: &dst,
            expected: 4096,
            sync: false,
            modified: None,
            fs: &LocalFs,
        };
        let result = copy_file(spec, &mut buffer, None, |_| {
            chunks += 1;
            if chunks == 3 {
                ChunkControl::Stop
            } else {
                ChunkControl::Continue
            }
        });
        assert_eq!(result, Err(CopyError::Cancelled));
        assert!(!dst.exists());
    }

    /// Real files that refuse writes past `limit` bytes.
    struct CappedFs {
        limit: u64,
    }

    struct CappedFile {
        file: fs::File,
        written: u64,
        limit: u64,
    }

    impl Write for CappedFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() as u64 > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = self.file.write(buf)?;
            self.written += n as u64;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl DestinationFile for CappedFile {
        fn sync_data(&mut self) -> io::Result<()> {
            self.file.sync_data()
        }
    }

    impl DestinationFs for CappedFs {
        fn create(&self, path: &Path) -> io::Result<Box<dyn DestinationFile>> {
            Ok(Box::new(CappedFile {
                file: fs::File::create(path)?,
                written: 0,
                limit: self.limit,
            }))
        }
    }

    #[test]
    fn test_copy_file_write_failure_removes_partial() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("data.bin");
        let dst = temp_dir.path().join("data.copy");
        fs::write(&src, vec![9u8; 1000]).expect("Failed to write source");

        let mut buffer = vec![0u8; 100];
        let mut reported = 0u64;
        let spec = CopySpec {
            source: &src,
            destination: &dst,
            expected: 1000,
            sync: false,
            modified: None,
            fs: &CappedFs { limit: 900 },
        };
        let result = copy_file(spec, &mut buffer, None, |n| {
            reported += n;
            ChunkControl::Continue
        });
        match result {
            Err(CopyError::Failed(err)) => {
                assert_eq!(err.kind, FileErrorKind::WriteError);
                assert_eq!(err.path, dst);
            }
            other => panic!("expected WriteError, got {:?}", other),
        }
        assert_eq!(reported, 900);
        assert!(!dst.exists());
    }

    #[test]
    fn test_copy_file_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("missing");
        let dst = temp_dir.path().join("dst");
        let spec = CopySpec {
            source: &src,
            destination: &dst,
            expected: 0,
            sync: false,
            modified: None,
            fs: &LocalFs,
        };
        let mut buffer = vec![0u8; 8];
        match copy_file(spec, &mut buffer, None, |_| ChunkControl::Continue) {
            Err(CopyError::Failed(err)) => assert_eq!(err.kind, FileErrorKind::SourceOpenFailed),
            other => panic!("expected SourceOpenFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_file_onto_itself_is_refused() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("same.txt");
        fs::write(&src, b"keep me").expect("Failed to write file");
        let spec = CopySpec {
            source: &src,
            destination: &src,
            expected: 7,
            sync: false,
            modified: None,
            fs: &LocalFs,
        };
        let mut buffer = vec![0u8; 8];
        match copy_file(spec, &mut buffer, None, |_| ChunkControl::Continue) {
            Err(CopyError::Failed(err)) => assert_eq!(err.kind, FileErrorKind::DestOpenFailed),
            other => panic!("expected DestOpenFailed, got {:?}", other),
        }
        assert_eq!(fs::read(&src).expect("Failed to read file"), b"keep me");
    }

    #[test]
    fn test_write_placeholder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("DRY_RUN.dat");
        let mut buffer = vec![0xAAu8; 100];
        let written = write_placeholder(&dst, 1000, &mut buffer, None, |_| ChunkControl::Continue)
            .expect("Failed to write placeholder");
        assert_eq!(written, 1000);
        let data = fs::read(&dst).expect("Failed to read placeholder");
        assert_eq!(data.len(), 1000);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_hash_file_matches_compute() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data");
        fs::write(&path, vec![9u8; 3000]).expect("Failed to write file");
        let mut buffer = vec![0u8; 256];
        let mut seen = 0;
        let digest = hash_file(&path, ChecksumAlgorithm::Sha256, &mut buffer, |n| {
            seen += n;
            ChunkControl::Continue
        })
        .expect("Failed to hash");
        assert_eq!(seen, 3000);
        assert_eq!(
            digest,
            checksums::compute_file_checksum(&path, ChecksumAlgorithm::Sha256)
                .expect("Failed to hash")
        );
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().is_dir());

        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"").expect("Failed to write file");
        assert!(matches!(
            ensure_parent_dir_exists(&blocker.join("x")),
            Err(EngineError::DirectoryCreationFailed { .. })
        ));
    }

    #[test]
    fn test_remove_empty_dirs_deepest_first() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("a");
        let deep = root.join("b").join("c");
        fs::create_dir_all(&deep).expect("Failed to create dirs");
        let kept = temp_dir.path().join("k");
        fs::create_dir(&kept).expect("Failed to create dir");
        fs::write(kept.join("file"), b"x").expect("Failed to write file");

        let removed = remove_empty_dirs(&[root.clone(), root.join("b"), deep, kept.clone()]);
        assert_eq!(removed, 3);
        assert!(!root.exists());
        assert!(kept.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_symlink_recreates_link() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink("target.txt", &link).expect("Failed to create symlink");
        let copy = temp_dir.path().join("out").join("link");

        copy_symlink(&link, &copy).expect("Failed to copy symlink");
        assert_eq!(
            fs::read_link(&copy).expect("Failed to read link"),
            PathBuf::from("target.txt")
        );
    }

    #[test]
    fn test_throttle_delays_to_rate() {
        let start = Instant::now();
        let mut throttle = Throttle::new(1000, start);
        let delay = throttle.delay_after(500, start).expect("Expected a delay");
        assert_eq!(delay, Duration::from_millis(500));
        // Already behind schedule: no wait
        assert_eq!(throttle.delay_after(500, start + Duration::from_secs(2)), None);

        throttle.reset(start + Duration::from_secs(10));
        assert_eq!(
            throttle.delay_after(100, start + Duration::from_secs(10)),
            Some(Duration::from_millis(100))
        );
    }
}
