//! Seams between the cache pipeline and its I/O collaborators.
//!
//! The installer only talks to the network through [`Transport`] and only
//! unpacks archives through [`ArchiveExtractor`], so tests can swap in
//! scripted implementations without a server.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;

use super::error::DataResult;

/// Failure of a single transport attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Connect or read timed out.
    #[error("request timed out")]
    Timeout,

    /// Could not establish or keep a connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Response body ended early or could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// Writing received bytes to the local sink failed.
    #[error("failed to write downloaded bytes: {0}")]
    Sink(#[source] io::Error),
}

impl TransportError {
    /// Whether another attempt might succeed.
    ///
    /// Local write failures and client errors are permanent; timeouts,
    /// dropped connections, throttling and server errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) | Self::Body(_) => true,
            Self::Status(code) => matches!(code, 408 | 429 | 500..=599),
            Self::Sink(_) => false,
        }
    }

    /// Whether the server reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status(404))
    }
}

/// Fetches a URL and streams the body into a sink.
///
/// Every call is a fresh request; implementations never resume a previous
/// attempt's bytes.
pub trait Transport: Send + Sync {
    /// GET `url`, writing the response body to `sink`.
    ///
    /// Returns the number of bytes written.
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError> {
        (**self).fetch(url, sink)
    }
}

/// Unpacks a downloaded archive into a staging directory.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive_path` into `dest_dir`.
    ///
    /// Returns the relative paths (with `/` separators) of every regular
    /// file written.
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> DataResult<BTreeSet<String>>;
}
