//! On-disk cache layout and atomic publishing.
//!
//! # Layout
//!
//! ```text
//! <cache_root>/data/
//! ├── v0.3.0/                     published, verified tables
//! │   ├── bullet.parquet
//! │   └── .complete               completion marker (JSON)
//! └── .staging/
//!     └── v0.3.0-<pid>-<rand>/    private to one install attempt
//!         ├── download/           archive temp file
//!         └── tree/               staged files, renamed on publish
//! ```
//!
//! The marker is written into `tree/` after every file has been verified, so
//! a single rename publishes the tables and the marker together.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::checksum::calculate_file_checksum;
use super::error::{DataError, DataResult};
use super::manifest::Manifest;
use crate::version::VersionTag;

/// Name of the completion marker inside a version directory.
pub const MARKER_FILE: &str = ".complete";

/// Directory under the data root holding in-flight installs.
pub const STAGING_DIR: &str = ".staging";

/// Staging directories older than this are assumed abandoned.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Contents of the `.complete` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Version the directory was installed for.
    pub version: String,
    /// Digest of the archive the files came from, for archive releases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    /// Relative path → verified SHA-256 of every governed file.
    pub files: BTreeMap<String, String>,
    /// Seconds since the Unix epoch at publish time.
    pub installed_at_secs: u64,
}

impl CompletionMarker {
    /// Marker recording that every file of `manifest` was verified.
    pub fn from_manifest(version: &VersionTag, manifest: &Manifest) -> Self {
        let installed_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            version: version.to_string(),
            archive_sha256: manifest.archive.as_ref().map(|a| a.sha256.clone()),
            files: manifest
                .files
                .iter()
                .map(|(path, entry)| (path.clone(), entry.sha256.clone()))
                .collect(),
            installed_at_secs,
        }
    }

    /// Write the marker into `dir`.
    pub fn write_to(&self, dir: &Path) -> DataResult<()> {
        let path = dir.join(MARKER_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| DataError::WriteFailed {
            path: path.clone(),
            source: io::Error::other(e),
        })?;

        let mut file = File::create(&path).map_err(DataError::write(&path))?;
        file.write_all(&json).map_err(DataError::write(&path))?;
        file.sync_all().map_err(DataError::write(&path))?;
        Ok(())
    }
}

/// A private staging area for one install attempt.
///
/// Removed from disk when dropped, unless its tree has already been
/// published.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Root of this staging area.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the archive is downloaded.
    pub fn download_dir(&self) -> PathBuf {
        self.path.join("download")
    }

    /// Where files are staged; becomes the version directory.
    pub fn tree_dir(&self) -> PathBuf {
        self.path.join("tree")
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staging directory"
            );
        }
    }
}

/// Owner of `<cache_root>/data`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Store rooted at `data_root` (normally `<cache_root>/data`).
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into(),
        }
    }

    /// The data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published directory for `version`.
    pub fn version_dir(&self, version: &VersionTag) -> PathBuf {
        self.root.join(version.as_str())
    }

    /// Marker path for `version`.
    pub fn marker_path(&self, version: &VersionTag) -> PathBuf {
        self.version_dir(version).join(MARKER_FILE)
    }

    /// Parent of all staging areas.
    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Read and parse the marker for `version`, if any.
    pub fn read_marker(&self, version: &VersionTag) -> Option<CompletionMarker> {
        let bytes = fs::read(self.marker_path(version)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Whether `version` has a published directory with a valid marker.
    ///
    /// Only the marker is consulted; no file is hashed and no network
    /// request is made.
    pub fn is_complete(&self, version: &VersionTag) -> bool {
        self.read_marker(version)
            .is_some_and(|marker| marker.version == version.as_str())
    }

    /// Create a fresh staging area for an install of `version`.
    pub fn create_staging(&self, version: &VersionTag) -> DataResult<StagingDir> {
        let name = format!(
            "{}-{}-{:08x}",
            version,
            std::process::id(),
            rand::random::<u32>()
        );
        let staging = StagingDir {
            path: self.staging_root().join(name),
        };

        for dir in [staging.download_dir(), staging.tree_dir()] {
            fs::create_dir_all(&dir).map_err(DataError::create_dir(&dir))?;
        }

        tracing::debug!(path = %staging.path.display(), "Created staging directory");
        Ok(staging)
    }

    /// Move a verified staging tree into place for `version`.
    ///
    /// If the version directory already exists and is complete, a non-forced
    /// publish keeps it (another installer finished first) and discards the
    /// staged copy. Otherwise the old directory is replaced: in one atomic
    /// exchange where the platform supports it, else by moving it aside,
    /// renaming the new tree in and restoring the old one if that fails.
    pub fn publish(
        &self,
        staging: StagingDir,
        version: &VersionTag,
        force: bool,
    ) -> DataResult<PathBuf> {
        let target = self.version_dir(version);
        let tree = staging.tree_dir();

        if !target.exists() {
            match fs::rename(&tree, &target) {
                Ok(()) => return Ok(target),
                Err(_) if !force && self.is_complete(version) => {
                    tracing::debug!(
                        version = %version,
                        "Version was published concurrently, discarding staged copy"
                    );
                    return Ok(target);
                }
                // The target appeared between the check and the rename.
                Err(_) if target.exists() => {}
                Err(e) => return Err(DataError::WriteFailed { path: target, source: e }),
            }
        }

        if !force && self.is_complete(version) {
            tracing::debug!(
                version = %version,
                "Version already complete, discarding staged copy"
            );
            return Ok(target);
        }

        match exchange_paths(&tree, &target) {
            // The old directory now sits at `tree` and goes with `staging`.
            Ok(()) => return Ok(target),
            Err(e) => tracing::debug!(
                error = %e,
                "Atomic exchange unavailable, replacing in two steps"
            ),
        }

        let retired = self.staging_root().join(format!(
            "retired-{}-{}-{:08x}",
            version,
            std::process::id(),
            rand::random::<u32>()
        ));
        fs::rename(&target, &retired).map_err(DataError::write(&target))?;

        if let Err(e) = fs::rename(&tree, &target) {
            if let Err(restore) = fs::rename(&retired, &target) {
                tracing::warn!(
                    path = %retired.display(),
                    error = %restore,
                    "Failed to restore previous cache directory"
                );
            }
            return Err(DataError::WriteFailed { path: target, source: e });
        }

        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!(
                path = %retired.display(),
                error = %e,
                "Failed to remove replaced cache directory"
            );
        }

        Ok(target)
    }

    /// Re-hash every file of a published version against its marker.
    ///
    /// Fails with [`DataError::CacheCorruption`] if the marker is missing or
    /// unreadable, a governed file is missing or differs, or an unlisted file
    /// has appeared.
    pub fn verify_cache(&self, version: &VersionTag) -> DataResult<()> {
        let dir = self.version_dir(version);
        let corrupt = |reason: String| DataError::CacheCorruption {
            version: version.to_string(),
            path: dir.clone(),
            reason,
        };

        let marker = self
            .read_marker(version)
            .ok_or_else(|| corrupt("completion marker is missing or unreadable".to_string()))?;
        if marker.version != version.as_str() {
            return Err(corrupt(format!(
                "marker was written for {}",
                marker.version
            )));
        }

        for (relative, expected) in &marker.files {
            let path = dir.join(relative);
            if !path.is_file() {
                return Err(corrupt(format!("'{}' is missing", relative)));
            }
            let actual = calculate_file_checksum(&path)
                .map_err(|e| corrupt(format!("'{}' is unreadable: {}", relative, e)))?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(corrupt(format!(
                    "'{}' has digest {}, expected {}",
                    relative, actual, expected
                )));
            }
        }

        let present = list_files(&dir).map_err(|e| corrupt(e.to_string()))?;
        if let Some(extra) = present
            .iter()
            .find(|p| p.as_str() != MARKER_FILE && !marker.files.contains_key(p.as_str()))
        {
            return Err(corrupt(format!("unexpected file '{}'", extra)));
        }

        tracing::debug!(version = %version, files = marker.files.len(), "Cache verified");
        Ok(())
    }

    /// Complete versions present in the cache, oldest first.
    pub fn cached_versions(&self) -> DataResult<Vec<VersionTag>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root).map_err(DataError::read(&self.root))?;
        let mut versions: Vec<VersionTag> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter_map(|name| VersionTag::parse(&name).ok())
            .filter(|version| self.is_complete(version))
            .collect();

        versions.sort_by(|a, b| a.semver().cmp(b.semver()));
        Ok(versions)
    }

    /// Delete the published directory for `version`.
    ///
    /// The marker goes first so an interrupted removal never leaves a
    /// partially deleted directory that still looks complete. Returns
    /// `false` if nothing was installed.
    pub fn remove_version(&self, version: &VersionTag) -> DataResult<bool> {
        let dir = self.version_dir(version);
        if !dir.exists() {
            return Ok(false);
        }

        let marker = self.marker_path(version);
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DataError::WriteFailed { path: marker, source: e }),
        }
        fs::remove_dir_all(&dir).map_err(DataError::write(&dir))?;

        tracing::info!(version = %version, path = %dir.display(), "Removed cached version");
        Ok(true)
    }

    /// Remove staging areas untouched for longer than `max_age`. Returns how
    /// many were removed.
    ///
    /// An area's age is taken from the newest modification time anywhere
    /// inside it, so an install that is still writing is left alone.
    /// Failures are logged and skipped; cleanup never fails an install.
    pub fn cleanup_stale_staging(&self, max_age: Duration) -> usize {
        let staging_root = self.staging_root();
        let Ok(entries) = fs::read_dir(&staging_root) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            let age = newest_mtime(&path).and_then(|modified| now.duration_since(modified).ok());

            match age {
                Some(age) if age > max_age => {}
                _ => continue,
            }

            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed stale staging entry");
                    removed += 1;
                }
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove stale staging entry"
                ),
            }
        }

        removed
    }
}

/// Most recent modification time of `path` or anything below it.
fn newest_mtime(path: &Path) -> Option<SystemTime> {
    let metadata = fs::symlink_metadata(path).ok()?;
    let mut newest = metadata.modified().ok()?;

    if metadata.is_dir() {
        for entry in fs::read_dir(path).ok()?.flatten() {
            if let Some(modified) = newest_mtime(&entry.path()) {
                newest = newest.max(modified);
            }
        }
    }
    Some(newest)
}

/// Atomically swap two existing paths.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn exchange_paths(a: &Path, b: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let a = CString::new(a.as_os_str().as_bytes())?;
    let b = CString::new(b.as_os_str().as_bytes())?;
    let r = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            a.as_ptr(),
            libc::AT_FDCWD,
            b.as_ptr(),
            libc::RENAME_EXCHANGE as libc::c_uint,
        )
    };
    if r == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn exchange_paths(_a: &Path, _b: &Path) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Relative paths (with `/` separators) of every regular file under `dir`.
pub fn list_files(dir: &Path) -> DataResult<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    collect_files(dir, "", &mut files)?;
    Ok(files)
}

fn collect_files(dir: &Path, prefix: &str, files: &mut BTreeSet<String>) -> DataResult<()> {
    let entries = fs::read_dir(dir).map_err(DataError::read(dir))?;
    for entry in entries {
        let entry = entry.map_err(DataError::read(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let file_type = entry.file_type().map_err(DataError::read(entry.path()))?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &relative, files)?;
        } else {
            files.insert(relative);
        }
    }
    Ok(())
}
