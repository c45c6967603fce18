//! Retrying fetches of release assets into memory or onto disk.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use super::retry::{run_with_retry, RetryFailure, RetryPolicy};
use crate::manager::error::{DataError, DataResult};
use crate::manager::traits::{Transport, TransportError};

/// Downloads release assets with the configured retry policy.
pub struct AssetDownloader<'a> {
    transport: &'a dyn Transport,
    retry: RetryPolicy,
}

impl<'a> AssetDownloader<'a> {
    /// Create a downloader over `transport`.
    pub fn new(transport: &'a dyn Transport, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Fetch a small document (the manifest) into memory.
    ///
    /// Returns the raw transport failure so callers can react to specific
    /// statuses such as 404.
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, RetryFailure> {
        run_with_retry(&self.retry, url, |_| {
            let mut body = Vec::new();
            self.transport.fetch(url, &mut body)?;
            Ok(body)
        })
    }

    /// Stream `url` into `dest`, truncating it on every attempt.
    ///
    /// `dest` must be a temporary path; on failure it is removed. Returns
    /// the number of bytes written.
    pub fn download_to(&self, url: &str, dest: &Path) -> DataResult<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(DataError::create_dir(parent))?;
        }

        let result = run_with_retry(&self.retry, url, |attempt| {
            tracing::debug!(url, attempt, dest = %dest.display(), "Downloading asset");
            let file = File::create(dest).map_err(TransportError::Sink)?;
            let mut writer = BufWriter::new(file);
            let bytes = self.transport.fetch(url, &mut writer)?;
            let file = writer
                .into_inner()
                .map_err(|e| TransportError::Sink(e.into_error()))?;
            file.sync_all().map_err(TransportError::Sink)?;
            Ok(bytes)
        });

        match result {
            Ok(bytes) => Ok(bytes),
            Err(failure) => {
                fs::remove_file(dest).ok();
                Err(failure_to_error(url, dest, failure))
            }
        }
    }
}

/// Map a spent retry loop onto the public error taxonomy.
fn failure_to_error(url: &str, dest: &Path, failure: RetryFailure) -> DataError {
    match failure.error {
        TransportError::Sink(source) => DataError::WriteFailed {
            path: dest.to_path_buf(),
            source,
        },
        other => DataError::Network {
            url: url.to_string(),
            attempts: failure.attempts,
            reason: other.to_string(),
        },
    }
}
