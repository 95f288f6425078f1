mod rar;
mod zip;

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Supported archive containers, dispatched by filename suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".rar") {
            Some(Self::Rar)
        } else {
            None
        }
    }
}

/// Hard limits enforced during extraction. All violations are fatal for the
/// job, never for the process.
#[derive(Clone, Copy, Debug)]
pub struct ExtractLimits {
    /// Ceiling on cumulative uncompressed bytes across all members.
    pub max_total_bytes: u64,
    /// Per-member uncompressed/compressed ratio cap (ZIP only; RAR headers
    /// do not expose packed size).
    pub max_member_ratio: u64,
    /// Upper bound on member count.
    pub max_members: usize,
}

impl ExtractLimits {
    pub fn new(max_total_bytes: u64, max_member_ratio: u64) -> Self {
        Self {
            max_total_bytes,
            max_member_ratio,
            max_members: 1_000,
        }
    }
}

/// A regular file extracted from an archive.
#[derive(Clone, Debug)]
pub struct ExtractedMember {
    /// Normalized path inside the archive, `/`-separated.
    pub relative_path: String,
    /// Where the member landed on disk, inside the extraction root.
    pub disk_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("member path escapes extraction root: {0}")]
    Traversal(String),

    #[error("decompressed size exceeds ceiling of {limit} bytes")]
    TotalSizeExceeded { limit: u64 },

    #[error("member {path} exceeds compression ratio of {limit}x")]
    RatioExceeded { path: String, limit: u64 },

    #[error("archive has more than {limit} members")]
    TooManyMembers { limit: usize },

    #[error("archive requires a password")]
    PasswordRequired,

    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capability seam over the concrete archive decoders, injected at
/// supervisor boot.
pub trait Extractor: Send + Sync {
    /// Extract all regular file members of `archive_path` into `dest`.
    ///
    /// Blocking: run via `spawn_blocking`. `dest` must be a fresh directory
    /// owned by the caller; on any error the caller removes it wholesale,
    /// which is what cleans up partially written members.
    fn extract(
        &self,
        format: ArchiveFormat,
        archive_path: &Path,
        dest: &Path,
    ) -> Result<Vec<ExtractedMember>, ExtractError>;
}

/// Production extractor dispatching on [`ArchiveFormat`].
pub struct ArchiveExtractor {
    limits: ExtractLimits,
}

impl ArchiveExtractor {
    pub fn new(limits: ExtractLimits) -> Self {
        Self { limits }
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(
        &self,
        format: ArchiveFormat,
        archive_path: &Path,
        dest: &Path,
    ) -> Result<Vec<ExtractedMember>, ExtractError> {
        match format {
            ArchiveFormat::Zip => zip::extract(archive_path, dest, &self.limits),
            ArchiveFormat::Rar => rar::extract(archive_path, dest, &self.limits),
        }
    }
}

/// Normalize a member path and confirm it stays inside the extraction root.
///
/// Entry names may be `/`- or `\`-delimited regardless of the platform that
/// packed them, so both separators are split on here; leaning on the OS
/// path parser would let `..\..\evil` through as one opaque component on
/// Unix. Absolute paths, drive prefixes, and any `..` component are
/// rejected outright rather than resolved; `.` components are dropped.
pub(crate) fn sanitize_member_path(raw: &str) -> Result<PathBuf, ExtractError> {
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(ExtractError::Traversal(raw.to_string()));
    }

    let mut clean = PathBuf::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(ExtractError::Traversal(raw.to_string())),
            // Drive prefixes and NTFS stream names never belong in a
            // member path.
            _ if part.contains(':') => {
                return Err(ExtractError::Traversal(raw.to_string()));
            }
            _ => clean.push(part),
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(ExtractError::Traversal(raw.to_string()));
    }

    Ok(clean)
}

/// `/`-separated rendering of a sanitized member path, used as the
/// indicator provenance path.
pub(crate) fn relative_path_string(path: &Path) -> String {
    path.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
