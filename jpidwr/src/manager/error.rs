//! Error types for the data cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for data cache operations.
pub type DataResult<T> = Result<T, DataError>;

/// Coarse classification of a [`DataError`].
///
/// Callers match on the kind to decide how to react: configuration errors
/// need a code or environment fix, network errors may succeed later, and
/// cache corruption calls for a forced refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed version tag or invalid override.
    Configuration,
    /// Transport failure after the retry budget was spent.
    Network,
    /// Manifest could not be parsed or lacks required fields.
    ManifestFormat,
    /// Digest, size or file-set mismatch during an install.
    Integrity,
    /// Local filesystem failure (space, permissions).
    Disk,
    /// A published cache failed on-demand re-verification.
    CacheCorruption,
}

/// Errors that can occur while resolving, installing or reading cached data.
#[derive(Debug, Error)]
pub enum DataError {
    /// Invalid configuration or version tag.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Network request failed after exhausting retries.
    #[error("failed to fetch {url} after {attempts} attempt(s): {reason}")]
    Network {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Manifest document is unparsable or incomplete.
    #[error("invalid manifest from {url}: {reason}")]
    ManifestFormat { url: String, reason: String },

    /// Checksum verification failed.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Extracted contents do not match the manifest.
    #[error("integrity check failed for {file}: {reason}")]
    Integrity { file: String, reason: String },

    /// Archive could not be read or contains disallowed entries.
    #[error("failed to extract {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// A previously complete cache no longer verifies.
    #[error("cache for {version} at {} is corrupt: {reason}", path.display())]
    CacheCorruption {
        version: String,
        path: PathBuf,
        reason: String,
    },
}

impl DataError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Network { .. } => ErrorKind::Network,
            Self::ManifestFormat { .. } => ErrorKind::ManifestFormat,
            Self::ChecksumMismatch { .. }
            | Self::Integrity { .. }
            | Self::ExtractionFailed { .. } => ErrorKind::Integrity,
            Self::ReadFailed { .. } | Self::WriteFailed { .. } | Self::CreateDirFailed { .. } => {
                ErrorKind::Disk
            }
            Self::CacheCorruption { .. } => ErrorKind::CacheCorruption,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::ReadFailed { path, source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::WriteFailed { path, source }
    }

    pub(crate) fn create_dir(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::CreateDirFailed { path, source }
    }
}
