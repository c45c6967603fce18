//! Data release installer.
//!
//! This module runs one install attempt for a version:
//! 1. Fetch the release manifest
//! 2. Download the release into a private staging area: either one archive,
//!    verified and extracted, or every table file as its own asset
//! 3. Verify every staged file against the manifest
//! 4. Write the completion marker and publish the staged tree
//!
//! Any failure before step 4 drops the staging area; the published
//! directory, if one exists, is not touched.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::checksum::verify_checksum;
use super::download::AssetDownloader;
use super::error::{DataError, DataResult};
use super::manifest::{asset_url, fetch_manifest, ArchiveAsset, Manifest};
use super::store::{list_files, CacheStore, CompletionMarker, StagingDir, STALE_STAGING_AGE};
use super::traits::{ArchiveExtractor, Transport};
use crate::config::DataConfig;
use crate::version::VersionTag;

/// Progress callback for install operations.
///
/// # Arguments
///
/// * `stage` - Current install stage
/// * `progress` - Progress within the stage (0.0 - 1.0)
/// * `message` - Human-readable message
pub type InstallProgressCallback = Box<dyn Fn(InstallStage, f64, &str) + Send + Sync>;

/// Install stages for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Fetching the release manifest.
    FetchingManifest,
    /// Downloading the archive or the table files.
    Downloading,
    /// Verifying the archive digest.
    VerifyingArchive,
    /// Extracting archive contents.
    Extracting,
    /// Verifying extracted files.
    VerifyingFiles,
    /// Moving the verified tree into place.
    Publishing,
    /// Install complete.
    Complete,
}

impl InstallStage {
    /// Get a human-readable name for the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchingManifest => "Fetching manifest",
            Self::Downloading => "Downloading",
            Self::VerifyingArchive => "Verifying archive",
            Self::Extracting => "Extracting",
            Self::VerifyingFiles => "Verifying files",
            Self::Publishing => "Publishing",
            Self::Complete => "Complete",
        }
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallResult {
    /// Installed version.
    pub version: VersionTag,
    /// Published directory.
    pub path: PathBuf,
    /// Bytes fetched for the archive or the table files.
    pub bytes_downloaded: u64,
    /// Number of verified files in the published directory.
    pub files_installed: usize,
}

/// Runs install attempts against one cache store.
pub struct DataInstaller<'a> {
    config: &'a DataConfig,
    store: &'a CacheStore,
    transport: &'a dyn Transport,
    extractor: &'a dyn ArchiveExtractor,
}

impl<'a> DataInstaller<'a> {
    /// Create an installer.
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, manifest names, required files and retry policy
    /// * `store` - Cache store to stage in and publish to
    /// * `transport` - Network transport
    /// * `extractor` - Archive extractor
    pub fn new(
        config: &'a DataConfig,
        store: &'a CacheStore,
        transport: &'a dyn Transport,
        extractor: &'a dyn ArchiveExtractor,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            extractor,
        }
    }

    /// Download, verify and publish `version`.
    ///
    /// With `force`, an existing complete directory is replaced; without it,
    /// a directory published concurrently by another installer is kept.
    pub fn install(
        &self,
        version: &VersionTag,
        force: bool,
        on_progress: Option<&InstallProgressCallback>,
    ) -> DataResult<InstallResult> {
        let report = |stage: InstallStage, progress: f64, message: &str| {
            if let Some(cb) = on_progress {
                cb(stage, progress, message);
            }
        };

        let stale = self.store.cleanup_stale_staging(STALE_STAGING_AGE);
        if stale > 0 {
            tracing::info!(removed = stale, "Removed stale staging directories");
        }

        tracing::info!(
            version = %version,
            base_url = %self.config.base_url,
            force,
            "Installing data release"
        );

        let downloader = AssetDownloader::new(self.transport, self.config.retry);

        // Manifest
        report(InstallStage::FetchingManifest, 0.0, "Fetching release manifest...");
        let manifest = fetch_manifest(&downloader, self.config, version)?;
        report(
            InstallStage::FetchingManifest,
            1.0,
            &format!("Manifest lists {} files", manifest.files.len()),
        );

        let staging = self.store.create_staging(version)?;
        let tree = staging.tree_dir();

        let bytes_downloaded = match &manifest.archive {
            Some(archive) => self.fetch_archive(&downloader, version, archive, &staging, &report)?,
            None => self.fetch_tables(&downloader, version, &manifest, &tree, &report)?,
        };

        // Per-file digests
        report(InstallStage::VerifyingFiles, 0.0, "Verifying files...");
        let files_installed = verify_tree(&tree, &manifest)?;
        report(
            InstallStage::VerifyingFiles,
            1.0,
            &format!("Verified {} files", files_installed),
        );

        // Publish
        report(InstallStage::Publishing, 0.0, "Publishing cache directory...");
        CompletionMarker::from_manifest(version, &manifest).write_to(&tree)?;
        let path = self.store.publish(staging, version, force)?;
        report(InstallStage::Publishing, 1.0, "Cache directory published");

        tracing::info!(
            version = %version,
            path = %path.display(),
            bytes = bytes_downloaded,
            files = files_installed,
            "Data release installed"
        );
        report(InstallStage::Complete, 1.0, "Install complete");

        Ok(InstallResult {
            version: version.clone(),
            path,
            bytes_downloaded,
            files_installed,
        })
    }

    /// Download the release archive, check its digest and extract it into
    /// the staging tree. Returns the archive size.
    fn fetch_archive(
        &self,
        downloader: &AssetDownloader<'_>,
        version: &VersionTag,
        archive: &ArchiveAsset,
        staging: &StagingDir,
        report: &dyn Fn(InstallStage, f64, &str),
    ) -> DataResult<u64> {
        let url = asset_url(&self.config.base_url, version, &archive.name);
        let archive_path = staging.download_dir().join(&archive.name);

        report(
            InstallStage::Downloading,
            0.0,
            &format!("Downloading {}...", archive.name),
        );
        let bytes = downloader.download_to(&url, &archive_path)?;
        report(
            InstallStage::Downloading,
            1.0,
            &format!("Downloaded {} bytes", bytes),
        );

        // The digest is checked before anything is unpacked.
        report(InstallStage::VerifyingArchive, 0.0, "Verifying archive checksum...");
        verify_checksum(&archive_path, &archive.name, &archive.sha256)?;
        report(InstallStage::VerifyingArchive, 1.0, "Archive checksum verified");

        report(InstallStage::Extracting, 0.0, "Extracting archive...");
        let extracted = self.extractor.extract(&archive_path, &staging.tree_dir())?;
        fs::remove_file(&archive_path).ok();
        report(
            InstallStage::Extracting,
            1.0,
            &format!("Extracted {} files", extracted.len()),
        );

        Ok(bytes)
    }

    /// Download every listed table file straight into the staging tree.
    /// Returns the total size.
    fn fetch_tables(
        &self,
        downloader: &AssetDownloader<'_>,
        version: &VersionTag,
        manifest: &Manifest,
        tree: &Path,
        report: &dyn Fn(InstallStage, f64, &str),
    ) -> DataResult<u64> {
        let total = manifest.files.len();
        let mut bytes = 0u64;

        for (index, file) in manifest.files.keys().enumerate() {
            report(
                InstallStage::Downloading,
                index as f64 / total as f64,
                &format!("Downloading {} ({}/{})...", file, index + 1, total),
            );
            let url = asset_url(&self.config.base_url, version, file);
            bytes += downloader.download_to(&url, &tree.join(file))?;
        }

        report(
            InstallStage::Downloading,
            1.0,
            &format!("Downloaded {} files, {} bytes", total, bytes),
        );
        Ok(bytes)
    }
}

/// Check a staged tree against the manifest.
///
/// The file set must match exactly: a file on disk that the manifest does
/// not list, or a listed file that is absent, fails the install. Each file
/// is then checked for size (when recorded) and digest. Returns the number
/// of verified files.
pub fn verify_tree(tree: &Path, manifest: &Manifest) -> DataResult<usize> {
    let present = list_files(tree)?;
    let listed: BTreeSet<String> = manifest.files.keys().cloned().collect();

    if let Some(unlisted) = present.difference(&listed).next() {
        return Err(DataError::Integrity {
            file: unlisted.clone(),
            reason: "staged file is not listed in the manifest".to_string(),
        });
    }
    if let Some(missing) = listed.difference(&present).next() {
        return Err(DataError::Integrity {
            file: missing.clone(),
            reason: "listed in the manifest but missing from the release".to_string(),
        });
    }

    for (relative, entry) in &manifest.files {
        let path = tree.join(relative);

        if let Some(expected) = entry.size_bytes {
            let actual = fs::metadata(&path)
                .map_err(DataError::read(&path))?
                .len();
            if actual != expected {
                return Err(DataError::Integrity {
                    file: relative.clone(),
                    reason: format!("size is {} bytes, expected {}", actual, expected),
                });
            }
        }

        verify_checksum(&path, relative, &entry.sha256)?;
    }

    Ok(manifest.files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::download::RetryPolicy;
    use crate::manager::error::ErrorKind;
    use crate::manager::extractor::ReleaseExtractor;
    use crate::manager::test_support::{sha256_hex, Release, ScriptedTransport};
    use crate::manager::traits::TransportError;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const BASE: &str = "http://releases.test/download";

    fn config(root: &Path, version: &str) -> DataConfig {
        DataConfig::new(VersionTag::parse(version).unwrap(), root)
            .with_base_url(BASE)
            .unwrap()
            .with_required_files(["a.parquet"])
            .with_retry(RetryPolicy::immediate(4))
    }

    fn url(version: &VersionTag, name: &str) -> String {
        asset_url(BASE, version, name)
    }

    fn serve(transport: &ScriptedTransport, version: &VersionTag, release: &Release) {
        transport.serve(&url(version, "manifest.json"), release.manifest());
        transport.serve(&url(version, &release.archive_name), release.archive.clone());
    }

    #[test]
    fn test_install_stage_names() {
        assert_eq!(InstallStage::FetchingManifest.name(), "Fetching manifest");
        assert_eq!(InstallStage::Downloading.name(), "Downloading");
        assert_eq!(InstallStage::VerifyingArchive.name(), "Verifying archive");
        assert_eq!(InstallStage::Extracting.name(), "Extracting");
        assert_eq!(InstallStage::VerifyingFiles.name(), "Verifying files");
        assert_eq!(InstallStage::Publishing.name(), "Publishing");
        assert_eq!(InstallStage::Complete.name(), "Complete");
    }

    #[test]
    fn test_install_publishes_verified_tree() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let release = Release::new(&[("a.parquet", b"alpha"), ("nested/b.parquet", b"bravo")]);
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stages);
        let callback: InstallProgressCallback = Box::new(move |stage, progress, _| {
            if progress >= 1.0 {
                seen.lock().unwrap().push(stage);
            }
        });

        let result = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor::new())
            .install(&config.version, false, Some(&callback))
            .unwrap();

        assert_eq!(result.path, store.version_dir(&config.version));
        assert_eq!(result.files_installed, 2);
        assert_eq!(result.bytes_downloaded, release.archive.len() as u64);
        assert_eq!(fs::read(result.path.join("nested/b.parquet")).unwrap(), b"bravo");
        assert!(store.is_complete(&config.version));
        store.verify_cache(&config.version).unwrap();

        let marker = store.read_marker(&config.version).unwrap();
        assert_eq!(marker.files["a.parquet"], sha256_hex(b"alpha"));

        assert_eq!(stages.lock().unwrap().last(), Some(&InstallStage::Complete));
        assert!(fs::read_dir(store.staging_root()).unwrap().next().is_none());
    }

    #[test]
    fn test_file_digest_mismatch_publishes_nothing() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let release = Release::new(&[("a.parquet", b"actual-bytes")])
            .with_file_digest("a.parquet", &sha256_hex(b"expected-bytes"));
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);

        let err = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor::new())
            .install(&config.version, false, None)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(matches!(err, DataError::ChecksumMismatch { ref file, .. } if file == "a.parquet"));
        assert!(!store.version_dir(&config.version).exists());
        assert!(fs::read_dir(store.staging_root()).unwrap().next().is_none());
    }

    #[test]
    fn test_archive_digest_mismatch_skips_extraction() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let release =
            Release::new(&[("a.parquet", b"a")]).with_archive_digest(&sha256_hex(b"other"));
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);

        /// Panics if reached.
        struct NeverExtract;
        impl ArchiveExtractor for NeverExtract {
            fn extract(&self, _: &Path, _: &Path) -> DataResult<BTreeSet<String>> {
                panic!("extraction must not run after an archive digest mismatch");
            }
        }

        let err = DataInstaller::new(&config, &store, &transport, &NeverExtract)
            .install(&config.version, false, None)
            .unwrap_err();

        assert!(matches!(err, DataError::ChecksumMismatch { .. }));
        assert!(!store.version_dir(&config.version).exists());
    }

    #[test]
    fn test_unlisted_and_missing_files_fail_closed() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let transport = ScriptedTransport::new();

        let extra = Release::new(&[("a.parquet", b"a"), ("stray.parquet", b"s")])
            .without_file("stray.parquet");
        serve(&transport, &config.version, &extra);
        let installer = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor);
        let err = installer.install(&config.version, false, None).unwrap_err();
        assert!(matches!(err, DataError::Integrity { ref file, .. } if file == "stray.parquet"));

        let missing =
            Release::new(&[("a.parquet", b"a")]).with_manifest_only_entry("ghost.parquet", b"g");
        serve(&transport, &config.version, &missing);
        let err = installer.install(&config.version, false, None).unwrap_err();
        assert!(matches!(err, DataError::Integrity { ref file, .. } if file == "ghost.parquet"));

        assert!(!store.version_dir(&config.version).exists());
    }

    #[test]
    fn test_size_mismatch_is_integrity_error() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let release = Release::new(&[("a.parquet", b"abc")]).with_file_size("a.parquet", 4);
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);

        let err = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor)
            .install(&config.version, false, None)
            .unwrap_err();
        assert!(err.to_string().contains("size is 3 bytes"));
    }

    #[test]
    fn test_archive_retried_after_transient_failures() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let release = Release::new(&[("a.parquet", b"a")]);
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);
        let archive_url = url(&config.version, &release.archive_name);
        transport.fail_next(&archive_url, TransportError::Status(503));
        transport.fail_next(&archive_url, TransportError::Timeout);
        transport.fail_next(&archive_url, TransportError::Connection("reset".into()));

        DataInstaller::new(&config, &store, &transport, &ReleaseExtractor)
            .install(&config.version, false, None)
            .unwrap();

        assert_eq!(transport.request_count(&archive_url), 4);
        assert!(store.is_complete(&config.version));
    }

    #[test]
    fn test_failed_refresh_leaves_previous_install() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let transport = ScriptedTransport::new();
        let installer = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor);

        serve(&transport, &config.version, &Release::new(&[("a.parquet", b"v1")]));
        installer.install(&config.version, false, None).unwrap();

        let bad = Release::new(&[("a.parquet", b"v2")])
            .with_file_digest("a.parquet", &sha256_hex(b"something else"));
        serve(&transport, &config.version, &bad);
        assert!(installer.install(&config.version, true, None).is_err());

        let dir = store.version_dir(&config.version);
        assert_eq!(fs::read(dir.join("a.parquet")).unwrap(), b"v1");
        store.verify_cache(&config.version).unwrap();
    }

    /// `manifest.json` listing `files` as separately hosted parquet tables.
    fn tables_manifest(version: &VersionTag, files: &[(&str, &[u8])]) -> Vec<u8> {
        let tables: Vec<serde_json::Value> = files
            .iter()
            .map(|(file, data)| {
                serde_json::json!({
                    "name": file.trim_end_matches(".parquet"),
                    "file": file,
                    "format": "parquet",
                    "size_bytes": data.len(),
                    "sha256": sha256_hex(data),
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "spec_version": "1.0.0",
            "dataset_id": "jp_idwr_db",
            "data_version": "test",
            "release_tag": version.as_str(),
            "published_at": "2025-01-01T00:00:00Z",
            "license": "GPL-3.0-or-later",
            "homepage": "https://example.invalid",
            "assets_base_url": url(version, ""),
            "tables": tables,
        }))
        .unwrap()
    }

    #[test]
    fn test_install_tables_release_downloads_each_file() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let v = config.version.clone();
        let files: [(&str, &[u8]); 2] = [("a.parquet", b"alpha"), ("b.parquet", b"bravo")];
        let transport = ScriptedTransport::new();
        transport.serve(&url(&v, "manifest.json"), tables_manifest(&v, &files));
        for (file, data) in files {
            transport.serve(&url(&v, file), data.to_vec());
        }
        transport.fail_next(&url(&v, "b.parquet"), TransportError::Status(502));

        /// Panics if reached.
        struct NeverExtract;
        impl ArchiveExtractor for NeverExtract {
            fn extract(&self, _: &Path, _: &Path) -> DataResult<BTreeSet<String>> {
                panic!("a tables release has no archive to extract");
            }
        }

        let result = DataInstaller::new(&config, &store, &transport, &NeverExtract)
            .install(&v, false, None)
            .unwrap();

        assert_eq!(result.files_installed, 2);
        assert_eq!(result.bytes_downloaded, 10);
        assert_eq!(fs::read(result.path.join("b.parquet")).unwrap(), b"bravo");
        assert_eq!(transport.request_count(&url(&v, "b.parquet")), 2);

        let marker = store.read_marker(&v).unwrap();
        assert!(marker.archive_sha256.is_none());
        assert_eq!(marker.files["a.parquet"], sha256_hex(b"alpha"));
        store.verify_cache(&v).unwrap();
        assert!(fs::read_dir(store.staging_root()).unwrap().next().is_none());
    }

    #[test]
    fn test_tables_release_with_missing_asset_publishes_nothing() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let v = config.version.clone();
        let files: [(&str, &[u8]); 2] = [("a.parquet", b"alpha"), ("b.parquet", b"bravo")];
        let transport = ScriptedTransport::new();
        transport.serve(&url(&v, "manifest.json"), tables_manifest(&v, &files));
        transport.serve(&url(&v, "a.parquet"), b"alpha".to_vec());

        let err = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor)
            .install(&v, false, None)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!store.version_dir(&v).exists());
        assert!(fs::read_dir(store.staging_root()).unwrap().next().is_none());
    }

    #[test]
    fn test_tables_release_size_mismatch_is_integrity_error() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0");
        let store = CacheStore::new(config.data_root());
        let v = config.version.clone();
        let transport = ScriptedTransport::new();
        transport.serve(
            &url(&v, "manifest.json"),
            tables_manifest(&v, &[("a.parquet", b"alpha")]),
        );
        transport.serve(&url(&v, "a.parquet"), b"alpha plus more".to_vec());

        let err = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor)
            .install(&v, false, None)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.to_string().contains("size is 15 bytes"));
        assert!(!store.is_complete(&v));
    }

    #[test]
    fn test_missing_required_dataset_fails_before_download() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), "v0.3.0").with_required_files(["a.parquet", "b.parquet"]);
        let store = CacheStore::new(config.data_root());
        let release = Release::new(&[("a.parquet", b"a")]);
        let transport = ScriptedTransport::new();
        serve(&transport, &config.version, &release);

        let err = DataInstaller::new(&config, &store, &transport, &ReleaseExtractor)
            .install(&config.version, false, None)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ManifestFormat);
        assert_eq!(
            transport.request_count(&url(&config.version, &release.archive_name)),
            0
        );
    }
}
