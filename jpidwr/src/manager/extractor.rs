//! Archive extraction into a staging directory.
//!
//! Release bundles are zip files; gzip-compressed tarballs are accepted as
//! well. Only regular files and directories are extracted. Links, devices
//! and any entry whose path would land outside the destination abort the
//! extraction.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use zip::ZipArchive;

use super::error::{DataError, DataResult};
use super::traits::ArchiveExtractor;

/// Buffer size for copying zip entries (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Archive formats recognised from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zip`
    Zip,
    /// `.tar.gz` or `.tgz`
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from an archive file name. Case-insensitive.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Extractor that picks the format from the archive's file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseExtractor;

impl ReleaseExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ReleaseExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> DataResult<BTreeSet<String>> {
        let name = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        match ArchiveFormat::from_file_name(name) {
            Some(ArchiveFormat::Zip) => ZipExtractor.extract(archive_path, dest_dir),
            Some(ArchiveFormat::TarGz) => TarGzExtractor.extract(archive_path, dest_dir),
            None => Err(DataError::ExtractionFailed {
                path: archive_path.to_path_buf(),
                reason: format!("unsupported archive format '{}'", name),
            }),
        }
    }
}

/// Extractor for `.zip` release bundles.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ZipExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> DataResult<BTreeSet<String>> {
        fs::create_dir_all(dest_dir).map_err(DataError::create_dir(dest_dir))?;

        let malformed = |reason: String| DataError::ExtractionFailed {
            path: archive_path.to_path_buf(),
            reason,
        };

        let file = File::open(archive_path).map_err(DataError::read(archive_path))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| malformed(format!("unreadable archive: {}", e)))?;

        let mut extracted = BTreeSet::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| malformed(format!("corrupt entry: {}", e)))?;
            let raw_name = entry.name().to_string();

            let relative = entry
                .enclosed_name()
                .and_then(|path| normalize_entry_path(&path))
                .ok_or_else(|| malformed(format!("unsafe entry path '{}'", raw_name)))?;

            if entry.is_dir() {
                if !relative.is_empty() {
                    let dir = dest_dir.join(&relative);
                    fs::create_dir_all(&dir).map_err(DataError::create_dir(&dir))?;
                }
                continue;
            }
            if entry.is_symlink() || !entry.is_file() || relative.is_empty() {
                return Err(malformed(format!(
                    "unsupported entry '{}': only regular files are allowed",
                    raw_name
                )));
            }

            let target = dest_dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(DataError::create_dir(parent))?;
            }
            let mut out = File::create(&target).map_err(DataError::write(&target))?;
            loop {
                let n = entry
                    .read(&mut buffer)
                    .map_err(|e| malformed(format!("corrupt entry '{}': {}", relative, e)))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n]).map_err(DataError::write(&target))?;
            }

            extracted.insert(relative);
        }

        tracing::debug!(
            archive = %archive_path.display(),
            files = extracted.len(),
            "Extracted zip archive"
        );

        Ok(extracted)
    }
}

/// Extractor for `.tar.gz` release bundles.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzExtractor;

impl TarGzExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for TarGzExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> DataResult<BTreeSet<String>> {
        fs::create_dir_all(dest_dir).map_err(DataError::create_dir(dest_dir))?;

        let file = File::open(archive_path).map_err(DataError::read(archive_path))?;
        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        archive.set_preserve_permissions(false);
        archive.set_overwrite(true);

        let malformed = |reason: String| DataError::ExtractionFailed {
            path: archive_path.to_path_buf(),
            reason,
        };

        let entries = archive
            .entries()
            .map_err(|e| malformed(format!("unreadable archive: {}", e)))?;

        let mut extracted = BTreeSet::new();

        for entry in entries {
            let mut entry = entry.map_err(|e| malformed(format!("corrupt entry: {}", e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| malformed(format!("invalid entry path: {}", e)))?
                .into_owned();

            let relative = normalize_entry_path(&raw_path)
                .ok_or_else(|| malformed(format!("unsafe entry path '{}'", raw_path.display())))?;

            let entry_type = entry.header().entry_type();
            let is_file = match entry_type {
                EntryType::Regular | EntryType::Continuous => true,
                EntryType::Directory => false,
                // pax/GNU metadata records are consumed by the tar crate
                EntryType::XGlobalHeader | EntryType::XHeader => continue,
                other => {
                    return Err(malformed(format!(
                        "unsupported entry type {:?} for '{}'",
                        other, relative
                    )))
                }
            };

            if relative.is_empty() {
                // The archive root itself ("./").
                continue;
            }

            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(DataError::write(dest_dir.join(&relative)))?;
            if !unpacked {
                return Err(malformed(format!(
                    "entry '{}' escapes the destination",
                    relative
                )));
            }

            if is_file {
                extracted.insert(relative);
            }
        }

        tracing::debug!(
            archive = %archive_path.display(),
            files = extracted.len(),
            "Extracted tar archive"
        );

        Ok(extracted)
    }
}

/// Turn an archive entry path into a `/`-separated relative path.
///
/// Leading `./` components are dropped. Returns `None` for absolute paths or
/// any `..` component.
fn normalize_entry_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}
