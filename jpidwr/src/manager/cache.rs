//! Entry point of the cache pipeline.

use std::path::PathBuf;

use super::download::HttpTransport;
use super::error::DataResult;
use super::extractor::ReleaseExtractor;
use super::installer::{DataInstaller, InstallProgressCallback, InstallResult};
use super::store::CacheStore;
use super::traits::{ArchiveExtractor, Transport};
use crate::config::DataConfig;
use crate::version::VersionTag;

/// Ensures verified copies of data releases exist in the local cache.
///
/// The completion marker on disk is the only record of whether a version is
/// installed; nothing is remembered between calls, so a marker removed by
/// another process is noticed on the next [`ensure_data`](Self::ensure_data).
pub struct CacheManager<T: Transport = HttpTransport> {
    config: DataConfig,
    store: CacheStore,
    transport: T,
    extractor: Box<dyn ArchiveExtractor>,
}

impl CacheManager<HttpTransport> {
    /// Create a manager that downloads over HTTP.
    pub fn new(config: DataConfig) -> DataResult<Self> {
        let transport = HttpTransport::with_timeout(config.timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> CacheManager<T> {
    /// Create a manager over a custom transport.
    pub fn with_transport(config: DataConfig, transport: T) -> Self {
        let store = CacheStore::new(config.data_root());
        Self {
            config,
            store,
            transport,
            extractor: Box::new(ReleaseExtractor::new()),
        }
    }

    /// Replace the archive extractor.
    pub fn with_extractor(mut self, extractor: impl ArchiveExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Underlying cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Replace the configuration for subsequent calls.
    ///
    /// The transport is kept. Completeness is always read from disk, so
    /// nothing decided under the old configuration carries over.
    pub fn reconfigure(&mut self, config: DataConfig) {
        tracing::debug!(
            version = %config.version,
            cache_root = %config.cache_root.display(),
            base_url = %config.base_url,
            "Reconfigured cache manager"
        );
        self.store = CacheStore::new(config.data_root());
        self.config = config;
    }

    /// Directory `version` is (or would be) published to.
    pub fn version_dir(&self, version: &VersionTag) -> PathBuf {
        self.store.version_dir(version)
    }

    /// Whether `version` is installed and marked complete. No network I/O.
    pub fn is_complete(&self, version: &VersionTag) -> bool {
        self.store.is_complete(version)
    }

    /// Return the directory of a verified install of `version`, installing
    /// it first if needed.
    ///
    /// Without `force`, a complete install is returned immediately. With
    /// `force`, a fresh copy is downloaded and verified, then swapped in.
    pub fn ensure_data(&self, version: &VersionTag, force: bool) -> DataResult<PathBuf> {
        self.ensure_data_with_progress(version, force, None)
    }

    /// Like [`ensure_data`](Self::ensure_data), reporting install progress.
    pub fn ensure_data_with_progress(
        &self,
        version: &VersionTag,
        force: bool,
        on_progress: Option<InstallProgressCallback>,
    ) -> DataResult<PathBuf> {
        if !force && self.is_complete(version) {
            let dir = self.version_dir(version);
            tracing::debug!(version = %version, path = %dir.display(), "Cache hit");
            return Ok(dir);
        }

        self.install(version, force, on_progress)
            .map(|result| result.path)
    }

    /// Run an install attempt unconditionally.
    pub fn install(
        &self,
        version: &VersionTag,
        force: bool,
        on_progress: Option<InstallProgressCallback>,
    ) -> DataResult<InstallResult> {
        DataInstaller::new(
            &self.config,
            &self.store,
            &self.transport,
            self.extractor.as_ref(),
        )
        .install(version, force, on_progress.as_ref())
    }

    /// Re-hash a published version against its marker.
    pub fn verify_cache(&self, version: &VersionTag) -> DataResult<()> {
        self.store.verify_cache(version)
    }

    /// Complete versions in the cache, oldest first.
    pub fn cached_versions(&self) -> DataResult<Vec<VersionTag>> {
        self.store.cached_versions()
    }

    /// Delete a published version. Returns `false` if it was not present.
    pub fn remove_version(&self, version: &VersionTag) -> DataResult<bool> {
        self.store.remove_version(version)
    }
}
