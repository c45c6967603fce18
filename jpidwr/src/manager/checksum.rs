//! SHA-256 checksum calculation for file verification.
//!
//! Used twice per install: once on the downloaded archive and once on every
//! extracted table file. Comparison is plain string equality on lowercase
//! hex; these are integrity checks, not secret comparisons.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::{DataError, DataResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Calculate SHA-256 checksum of a file.
///
/// Returns the lowercase hexadecimal SHA-256 hash of the file contents.
pub fn calculate_file_checksum(path: &Path) -> DataResult<String> {
    let mut file = File::open(path).map_err(DataError::read(path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(DataError::read(path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that a file matches an expected checksum.
///
/// `label` names the file in the error (a manifest path rather than the
/// staging location, which is meaningless to callers).
pub fn verify_checksum(path: &Path, label: &str, expected: &str) -> DataResult<()> {
    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DataError::ChecksumMismatch {
            file: label.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

/// Check that a string is a well-formed hex SHA-256 digest.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}
