//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use jpidwr::{DataError, ErrorKind};

/// Errors surfaced to the command line.
#[derive(Debug)]
pub enum CliError {
    /// Failure from the data cache.
    Data(DataError),
    /// The requested version is not installed.
    NotInstalled { version: String, path: PathBuf },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NotInstalled { .. } => 3,
            CliError::Data(e) => match e.kind() {
                ErrorKind::Configuration => 2,
                ErrorKind::CacheCorruption => 4,
                _ => 1,
            },
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Data(e) => match e.kind() {
                ErrorKind::CacheCorruption => write!(
                    f,
                    "{}\nRun `jpidwr data download --force` to reinstall.",
                    e
                ),
                _ => write!(f, "{}", e),
            },
            CliError::NotInstalled { version, path } => write!(
                f,
                "data {} is not installed (expected at {}). Run `jpidwr data download` first.",
                version,
                path.display()
            ),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataError> for CliError {
    fn from(e: DataError) -> Self {
        CliError::Data(e)
    }
}
