//! Checksum engine.
//!
//! This module provides:
//! - Multiple checksum algorithms (CRC32, MD5, SHA-256, BLAKE3)
//! - A streaming `Accumulator` fed chunk by chunk during a copy
//! - Whole-file checksum computation
//! - Checksum manifest generation and verification
//!
//! Digests do not depend on how the input was chunked: feeding `ab` then `c`
//! gives the same result as feeding `abc`.

use crate::error::{FileError, FileErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC32 (fast, 32-bit)
    Crc32,
    /// MD5 (deprecated, but included for compatibility)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    #[default]
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc32 => write!(f, "crc32"),
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crc32" => Ok(Self::Crc32),
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown checksum algorithm '{}' (expected crc32, md5, sha256 or blake3)",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental hash state for one pass over a byte stream.
pub enum Accumulator {
    Crc32(crc32fast::Hasher),
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Start a new accumulator for `algorithm`.
pub fn begin(algorithm: ChecksumAlgorithm) -> Accumulator {
    match algorithm {
        ChecksumAlgorithm::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
        ChecksumAlgorithm::Md5 => Accumulator::Md5(md5::Context::new()),
        ChecksumAlgorithm::Sha256 => Accumulator::Sha256(<sha2::Sha256 as sha2::Digest>::new()),
        ChecksumAlgorithm::Blake3 => Accumulator::Blake3(Box::new(blake3::Hasher::new())),
    }
}

impl Accumulator {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            Self::Crc32(_) => ChecksumAlgorithm::Crc32,
            Self::Md5(_) => ChecksumAlgorithm::Md5,
            Self::Sha256(_) => ChecksumAlgorithm::Sha256,
            Self::Blake3(_) => ChecksumAlgorithm::Blake3,
        }
    }

    /// Feed the next chunk of bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(h) => sha2::Digest::update(h, data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Consume the accumulator and produce the digest.
    pub fn finish(self) -> ChecksumValue {
        let algorithm = self.algorithm();
        let hex = match self {
            Self::Crc32(h) => format!("{:08x}", h.finalize()),
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(h) => format!("{:x}", sha2::Digest::finalize(h)),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        };
        ChecksumValue::new(algorithm, hex)
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accumulator").field(&self.algorithm()).finish()
    }
}

/// Outcome of comparing the source digest against the destination digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumResult {
    pub algorithm: ChecksumAlgorithm,
    pub source: ChecksumValue,
    pub destination: ChecksumValue,
    pub matches: bool,
}

/// Compare two digests taken over the same file pair.
pub fn compare(source: ChecksumValue, destination: ChecksumValue) -> ChecksumResult {
    let matches =
        source.algorithm() == destination.algorithm() && source.hex() == destination.hex();
    ChecksumResult {
        algorithm: source.algorithm(),
        source,
        destination,
        matches,
    }
}

/// Compute the checksum of a whole file.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, FileError> {
    let mut file = File::open(path)
        .map_err(|e| FileError::from_io(FileErrorKind::SourceOpenFailed, path, &e))?;

    let mut acc = begin(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => acc.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FileError::from_io(FileErrorKind::ReadError, path, &e)),
        }
    }
    Ok(acc.finish())
}

/// Generate a checksum manifest.
///
/// Format: "<hex_checksum> <relative_path>" per line, after a `;` header.
pub fn generate_checksum_file(
    file_checksums: &[(String, ChecksumValue)],
    algorithm: ChecksumAlgorithm,
) -> String {
    let mut result = String::new();

    result.push_str("; Checksum file generated by Ferry\n");
    result.push_str(&format!("; Algorithm: {}\n", algorithm));
    result.push('\n');

    for (rel_path, checksum) in file_checksums {
        result.push_str(&format!("{} {}\n", checksum.hex(), rel_path));
    }

    result
}

/// One line of a verified manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCheck {
    pub relative_path: String,
    pub expected: String,
    pub actual: Result<ChecksumValue, FileError>,
}

impl ManifestCheck {
    pub fn matches(&self) -> bool {
        matches!(&self.actual, Ok(v) if v.hex().eq_ignore_ascii_case(&self.expected))
    }
}

/// Parse a manifest and check every listed file under `root`.
///
/// Unreadable files are reported per line rather than aborting the whole check.
pub fn verify_checksum_file(
    checksum_content: &str,
    root: &Path,
    algorithm: ChecksumAlgorithm,
) -> Vec<ManifestCheck> {
    checksum_content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .filter_map(|line| line.split_once(' '))
        .map(|(expected, rel_path)| ManifestCheck {
            relative_path: rel_path.to_string(),
            expected: expected.to_string(),
            actual: compute_file_checksum(&root.join(rel_path), algorithm),
        })
        .collect()
}
