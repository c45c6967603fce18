//! Release manifest: expected digests for every table file and, for
//! archive releases, for the archive itself.
//!
//! # Formats
//!
//! Current releases publish each table as its own asset and list them in
//! `manifest.json`:
//!
//! ```json
//! {
//!   "spec_version": "1.0.0",
//!   "dataset_id": "jp_idwr_db",
//!   "data_version": "2025.01",
//!   "release_tag": "v0.3.0",
//!   "published_at": "2025-01-01T00:00:00Z",
//!   "license": "GPL-3.0-or-later",
//!   "homepage": "https://github.com/AlFontal/jp-idwr-db",
//!   "assets_base_url": "https://github.com/AlFontal/jp-idwr-db/releases/download/v0.3.0",
//!   "tables": [
//!     { "name": "bullet", "file": "bullet.parquet", "format": "parquet",
//!       "size_bytes": 1234, "sha256": "<64 hex>" }
//!   ]
//! }
//! ```
//!
//! Only `parquet` tables are installed. Older releases ship one zip archive
//! described by `jp_idwr_db-manifest.json`:
//!
//! ```json
//! {
//!   "archive": "jp_idwr_db-parquet.zip",
//!   "archive_sha256": "<64 hex>",
//!   "files": {
//!     "bullet.parquet": { "sha256": "<64 hex>", "size_bytes": 1234 }
//!   }
//! }
//! ```
//!
//! The schema is picked from the document, not from its file name. Unknown
//! keys are ignored.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::Deserialize;
use serde_json::Value;

use super::checksum::is_sha256_hex;
use super::download::AssetDownloader;
use super::error::{DataError, DataResult};
use super::store::MARKER_FILE;
use crate::config::DataConfig;
use crate::version::VersionTag;

/// Top-level keys a `tables` manifest must carry.
const TABLES_MANIFEST_KEYS: &[&str] = &[
    "spec_version",
    "dataset_id",
    "data_version",
    "release_tag",
    "published_at",
    "license",
    "homepage",
    "assets_base_url",
    "tables",
];

/// Keys every entry of `tables` must carry.
const TABLE_ENTRY_KEYS: &[&str] = &["name", "file", "format", "size_bytes", "sha256"];

/// Table format installed from a `tables` manifest.
const TABLE_FORMAT: &str = "parquet";

/// Expected digest (and optionally size) of one installed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// Expected size in bytes, when the publisher recorded it.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// The single archive an archive release ships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveAsset {
    /// Archive file name, relative to the release directory.
    pub name: String,
    /// Lowercase hex SHA-256 of the archive.
    pub sha256: String,
}

/// Parsed and validated release manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Archive holding every file, or `None` when each file is a separate
    /// release asset.
    pub archive: Option<ArchiveAsset>,
    /// Relative path → expected digest for every file the release installs.
    pub files: BTreeMap<String, FileEntry>,
    /// Tag the manifest was published for.
    pub release_tag: Option<String>,
}

#[derive(Deserialize)]
struct ArchiveDocument {
    archive: String,
    archive_sha256: String,
    files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    release_tag: Option<String>,
}

#[derive(Deserialize)]
struct TablesDocument {
    release_tag: String,
    tables: Vec<TableEntry>,
}

#[derive(Deserialize)]
struct TableEntry {
    file: String,
    format: String,
    size_bytes: u64,
    sha256: String,
}

impl Manifest {
    /// Parse a manifest document of either schema. `source` names it in
    /// errors.
    ///
    /// Digests are normalized to lowercase and every structural rule is
    /// checked; see [`Manifest::validate`].
    pub fn parse(bytes: &[u8], source: &str) -> DataResult<Self> {
        let invalid = |reason: String| DataError::ManifestFormat {
            url: source.to_string(),
            reason,
        };

        let document: Value = serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
        if !document.is_object() {
            return Err(invalid("manifest must be a JSON object".to_string()));
        }

        let mut manifest = if document.get("tables").is_some() {
            Self::from_tables(document).map_err(invalid)?
        } else {
            Self::from_archive(document).map_err(invalid)?
        };

        if let Some(archive) = manifest.archive.as_mut() {
            archive.sha256 = archive.sha256.to_ascii_lowercase();
        }
        for entry in manifest.files.values_mut() {
            entry.sha256 = entry.sha256.to_ascii_lowercase();
        }

        manifest.validate(source)?;
        Ok(manifest)
    }

    fn from_archive(document: Value) -> Result<Self, String> {
        let doc: ArchiveDocument = serde_json::from_value(document).map_err(|e| e.to_string())?;
        Ok(Self {
            archive: Some(ArchiveAsset {
                name: doc.archive,
                sha256: doc.archive_sha256,
            }),
            files: doc.files,
            release_tag: doc.release_tag,
        })
    }

    fn from_tables(document: Value) -> Result<Self, String> {
        let missing = missing_keys(&document, TABLES_MANIFEST_KEYS);
        if !missing.is_empty() {
            return Err(format!("missing keys: {}", missing.join(", ")));
        }
        let tables = document["tables"]
            .as_array()
            .filter(|tables| !tables.is_empty())
            .ok_or_else(|| "'tables' must be a non-empty list".to_string())?;
        for (index, table) in tables.iter().enumerate() {
            let missing = missing_keys(table, TABLE_ENTRY_KEYS);
            if !missing.is_empty() {
                return Err(format!(
                    "table entry {} is missing keys: {}",
                    index,
                    missing.join(", ")
                ));
            }
        }

        let doc: TablesDocument = serde_json::from_value(document).map_err(|e| e.to_string())?;
        let mut files = BTreeMap::new();
        for table in doc.tables {
            if table.format != TABLE_FORMAT {
                continue;
            }
            let entry = FileEntry {
                sha256: table.sha256,
                size_bytes: Some(table.size_bytes),
            };
            if files.insert(table.file.clone(), entry).is_some() {
                return Err(format!("table file '{}' is listed twice", table.file));
            }
        }

        Ok(Self {
            archive: None,
            files,
            release_tag: Some(doc.release_tag),
        })
    }

    /// Check structural rules that serde cannot express.
    pub fn validate(&self, source: &str) -> DataResult<()> {
        let invalid = |reason: String| DataError::ManifestFormat {
            url: source.to_string(),
            reason,
        };

        if let Some(archive) = &self.archive {
            if !is_plain_file_name(&archive.name) {
                return Err(invalid(format!(
                    "archive name '{}' is not a plain file name",
                    archive.name
                )));
            }
            if !is_sha256_hex(&archive.sha256) {
                return Err(invalid(format!(
                    "archive_sha256 '{}' is not a SHA-256 hex digest",
                    archive.sha256
                )));
            }
        }
        if self.files.is_empty() {
            return Err(invalid("manifest must list at least one file".to_string()));
        }
        for (path, entry) in &self.files {
            if !is_safe_relative_path(path) {
                return Err(invalid(format!("unsafe file path '{}'", path)));
            }
            if path == MARKER_FILE {
                return Err(invalid(format!("file path '{}' is reserved", path)));
            }
            if !is_sha256_hex(&entry.sha256) {
                return Err(invalid(format!(
                    "digest for '{}' is not a SHA-256 hex digest",
                    path
                )));
            }
        }
        Ok(())
    }

    /// Check the manifest against what this configuration needs.
    ///
    /// The release tag, if recorded, must match the requested version and
    /// every required file must be listed.
    pub fn check_requirements(
        &self,
        source: &str,
        version: &VersionTag,
        required_files: &[String],
    ) -> DataResult<()> {
        if let Some(tag) = &self.release_tag {
            if tag != version.as_str() {
                return Err(DataError::ManifestFormat {
                    url: source.to_string(),
                    reason: format!("manifest is for release {}, expected {}", tag, version),
                });
            }
        }

        let missing: Vec<&str> = required_files
            .iter()
            .filter(|name| !self.files.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DataError::ManifestFormat {
                url: source.to_string(),
                reason: format!("missing required datasets: {}", missing.join(", ")),
            });
        }
        Ok(())
    }

    /// Digest recorded for `path`, if listed.
    pub fn digest_for(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }
}

/// Keys from `keys` that `value` lacks. Everything is missing from a
/// non-object.
fn missing_keys<'k>(value: &Value, keys: &[&'k str]) -> Vec<&'k str> {
    keys.iter()
        .copied()
        .filter(|key| value.get(*key).is_none())
        .collect()
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

/// Whether `path` is a non-empty relative path made only of normal
/// components (no `..`, no root, no drive prefix, no `.`).
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\\') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        && !path.split('/').any(str::is_empty)
}

/// Build the URL of a release asset.
pub fn asset_url(base_url: &str, version: &VersionTag, file_name: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), version, file_name)
}

/// Fetch and parse the manifest for `version`.
///
/// Tries the configured manifest name first. If the server answers 404 and
/// a legacy name is configured, that one is fetched instead. The manifest is
/// never cached: each install re-fetches it so stale integrity data is not
/// trusted.
pub fn fetch_manifest(
    downloader: &AssetDownloader<'_>,
    config: &DataConfig,
    version: &VersionTag,
) -> DataResult<Manifest> {
    let mut names = vec![config.manifest_name.as_str()];
    if let Some(legacy) = config.legacy_manifest_name.as_deref() {
        names.push(legacy);
    }

    let mut last_url = String::new();
    for name in names {
        let url = asset_url(&config.base_url, version, name);
        match downloader.fetch_bytes(&url) {
            Ok(bytes) => {
                tracing::debug!(url = %url, bytes = bytes.len(), "Fetched manifest");
                let manifest = Manifest::parse(&bytes, &url)?;
                manifest.check_requirements(&url, version, &config.required_files)?;
                return Ok(manifest);
            }
            Err(failure) if failure.error.is_not_found() => {
                tracing::debug!(url = %url, "Manifest not found, trying next name");
                last_url = url;
            }
            Err(failure) => {
                return Err(DataError::Network {
                    url,
                    attempts: failure.attempts,
                    reason: failure.error.to_string(),
                })
            }
        }
    }

    Err(DataError::Network {
        url: last_url,
        attempts: 1,
        reason: "manifest not found (HTTP status 404)".to_string(),
    })
}
