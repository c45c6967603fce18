//! Public entry point for reading cached tables.
//!
//! [`DataAccess`] resolves the configuration once, then hands out paths to
//! verified table files, installing the release on first use.
//!
//! # Example
//!
//! ```no_run
//! use jpidwr::DataAccess;
//!
//! let data = DataAccess::from_env()?;
//! let bullet = data.table_path("bullet")?;
//! println!("{}", bullet.display());
//! # Ok::<(), jpidwr::DataError>(())
//! ```

use std::path::{Path, PathBuf};

use crate::config::{DataConfig, DataSettings};
use crate::manager::{
    is_safe_relative_path, CacheManager, DataError, DataResult, HttpTransport,
    InstallProgressCallback, Transport,
};
use crate::version::VersionTag;

/// Extension appended to table names given without one.
pub const TABLE_EXTENSION: &str = "parquet";

/// Verified, versioned access to the dataset bundle.
pub struct DataAccess<T: Transport = HttpTransport> {
    manager: CacheManager<T>,
}

impl DataAccess<HttpTransport> {
    /// Resolve settings from the environment and defaults.
    pub fn from_env() -> DataResult<Self> {
        Self::from_settings(DataSettings::default())
    }

    /// Resolve explicit settings, falling back to the environment and
    /// defaults for anything left unset.
    pub fn from_settings(settings: DataSettings) -> DataResult<Self> {
        Self::new(DataConfig::from_env(settings)?)
    }

    /// Use a fully built configuration.
    pub fn new(config: DataConfig) -> DataResult<Self> {
        Ok(Self {
            manager: CacheManager::new(config)?,
        })
    }
}

impl<T: Transport> DataAccess<T> {
    /// Use a custom transport.
    pub fn with_transport(config: DataConfig, transport: T) -> Self {
        Self {
            manager: CacheManager::with_transport(config, transport),
        }
    }

    /// Active version.
    pub fn version(&self) -> &VersionTag {
        &self.manager.config().version
    }

    /// Active configuration.
    pub fn config(&self) -> &DataConfig {
        self.manager.config()
    }

    /// Underlying cache manager.
    pub fn manager(&self) -> &CacheManager<T> {
        &self.manager
    }

    /// Whether the active version is installed. No network I/O.
    pub fn is_complete(&self) -> bool {
        self.manager.is_complete(self.version())
    }

    /// Make sure the active version is installed and return its directory.
    pub fn ensure_data(&self, force: bool) -> DataResult<PathBuf> {
        self.manager.ensure_data(self.version(), force)
    }

    /// [`ensure_data`](Self::ensure_data) with install progress reporting.
    pub fn ensure_data_with_progress(
        &self,
        force: bool,
        on_progress: InstallProgressCallback,
    ) -> DataResult<PathBuf> {
        self.manager
            .ensure_data_with_progress(self.version(), force, Some(on_progress))
    }

    /// Make sure a specific version is installed, without changing the
    /// active one.
    pub fn ensure_version(&self, version: &str, force: bool) -> DataResult<PathBuf> {
        let version = VersionTag::parse(version)?;
        self.manager.ensure_data(&version, force)
    }

    /// Directory of verified tables for the active version.
    pub fn data_dir(&self) -> DataResult<PathBuf> {
        self.ensure_data(false)
    }

    /// Path to one table of the active version.
    ///
    /// `name` may omit the `.parquet` extension. Names the release does not
    /// contain are rejected with a configuration error.
    pub fn table_path(&self, name: &str) -> DataResult<PathBuf> {
        let file = table_file_name(name)?;
        let dir = self.data_dir()?;

        let listed = self
            .manager
            .store()
            .read_marker(self.version())
            .is_some_and(|marker| marker.files.contains_key(&file));
        if !listed {
            return Err(DataError::Configuration(format!(
                "release {} has no table '{}'",
                self.version(),
                name
            )));
        }

        Ok(dir.join(file))
    }

    /// Re-verify the active version against its marker.
    pub fn verify(&self) -> DataResult<()> {
        self.manager.verify_cache(self.version())
    }

    /// Swap in new settings for subsequent calls.
    ///
    /// Unset fields fall back to the environment and defaults, as at
    /// construction. Paths returned earlier are unaffected.
    pub fn reconfigure(&mut self, settings: DataSettings) -> DataResult<()> {
        let resolved = DataConfig::from_env(settings)?;
        self.reconfigure_with(resolved);
        Ok(())
    }

    /// Swap in a fully built configuration.
    ///
    /// Tuning that is not part of the three user settings (required files,
    /// retry policy, manifest names) is carried over from the current one.
    pub fn reconfigure_with(&mut self, resolved: DataConfig) {
        let current = self.manager.config();
        let config = DataConfig {
            version: resolved.version,
            cache_root: resolved.cache_root,
            base_url: resolved.base_url,
            ..current.clone()
        };
        self.manager.reconfigure(config);
    }
}

fn table_file_name(name: &str) -> DataResult<String> {
    let trimmed = name.trim();
    let file = if Path::new(trimmed).extension().is_some() {
        trimmed.to_string()
    } else {
        format!("{}.{}", trimmed, TABLE_EXTENSION)
    };

    if trimmed.is_empty() || !is_safe_relative_path(&file) {
        return Err(DataError::Configuration(format!(
            "invalid table name '{}'",
            name
        )));
    }
    Ok(file)
}
