//! Configuration for the data cache.
//!
//! A [`DataConfig`] is resolved once per session and handed to the cache
//! manager. Every field has a default; three of them (version, cache root and
//! base URL) can also be overridden through the environment or passed
//! explicitly as [`DataSettings`].

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::manager::download::{RetryPolicy, DEFAULT_TIMEOUT_SECS};
use crate::manager::{DataError, DataResult};
use crate::version::{resolve_version_with, VersionTag};

/// Environment variable overriding the release base URL.
pub const BASE_URL_ENV: &str = "JPINFECT_DATA_BASE_URL";

/// Environment variable overriding the cache root directory.
pub const CACHE_DIR_ENV: &str = "JPINFECT_CACHE_DIR";

/// Release assets are fetched from `<base>/<version>/<file>`.
pub const DEFAULT_BASE_URL: &str = "https://github.com/AlFontal/jp-idwr-db/releases/download";

/// Manifest file name published with each release.
pub const DEFAULT_MANIFEST_NAME: &str = "manifest.json";

/// Manifest name used by older releases, tried when the default is missing.
pub const LEGACY_MANIFEST_NAME: &str = "jp_idwr_db-manifest.json";

/// Archive name most releases use. The manifest is authoritative.
pub const DEFAULT_ARCHIVE_NAME: &str = "jp_idwr_db-parquet.zip";

/// Directory name under the platform cache directory.
pub const CACHE_DIR_NAME: &str = "jp_idwr_db";

/// Tables every release must ship.
pub const REQUIRED_DATASETS: &[&str] = &[
    "sex_prefecture.parquet",
    "place_prefecture.parquet",
    "bullet.parquet",
    "sentinel.parquet",
    "unified.parquet",
    "prefecture_en.parquet",
];

/// Configuration for the data cache.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Release to install and read.
    pub version: VersionTag,

    /// Root of the on-disk cache; versions live under `<root>/data/`.
    pub cache_root: PathBuf,

    /// Base URL of the release server, without a trailing slash.
    pub base_url: String,

    /// Manifest file name inside the release directory.
    pub manifest_name: String,

    /// Fallback manifest name tried on HTTP 404.
    pub legacy_manifest_name: Option<String>,

    /// Files that must appear in the manifest and the archive.
    pub required_files: Vec<String>,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Retry policy for network operations.
    pub retry: RetryPolicy,
}

impl DataConfig {
    /// Create a configuration for `version` rooted at `cache_root`.
    pub fn new(version: VersionTag, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            version,
            cache_root: cache_root.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            legacy_manifest_name: Some(LEGACY_MANIFEST_NAME.to_string()),
            required_files: REQUIRED_DATASETS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// Resolve a configuration from the process environment.
    pub fn from_env(settings: DataSettings) -> DataResult<Self> {
        Self::resolve_with(settings, |key| std::env::var(key).ok())
    }

    /// Resolve a configuration with an injected environment lookup.
    ///
    /// Each setting follows the same precedence: explicit value, then the
    /// environment, then the built-in default. Blank values count as unset.
    pub fn resolve_with<F>(settings: DataSettings, lookup: F) -> DataResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let version = resolve_version_with(settings.version.as_deref(), &lookup)?;

        let cache_root = match settings.cache_root {
            Some(root) if !root.as_os_str().is_empty() => root,
            _ => match env(CACHE_DIR_ENV) {
                Some(root) => expand_home(root.trim()),
                None => default_cache_root()?,
            },
        };

        let base_url = settings
            .base_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| env(BASE_URL_ENV))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self::new(version, cache_root).with_base_url(base_url)
    }

    /// Set the release base URL.
    ///
    /// Only absolute `http` and `https` URLs are accepted.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> DataResult<Self> {
        self.base_url = validate_base_url(base_url.as_ref())?;
        Ok(self)
    }

    /// Set the manifest file name.
    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Set or clear the legacy manifest fallback.
    pub fn with_legacy_manifest_name(mut self, name: Option<String>) -> Self {
        self.legacy_manifest_name = name;
        self
    }

    /// Replace the list of required files.
    pub fn with_required_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Directory holding published versions and staging areas.
    pub fn data_root(&self) -> PathBuf {
        self.cache_root.join("data")
    }
}

/// The three user-facing settings, as passed to a reconfigure call.
///
/// `None` means "use the environment or the default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSettings {
    pub version: Option<String>,
    pub cache_root: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl DataSettings {
    /// Settings that defer everything to the environment and defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the cache root.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with(std::path::MAIN_SEPARATOR) => {
            &rest[1..]
        }
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

fn default_cache_root() -> DataResult<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(CACHE_DIR_NAME))
        .ok_or_else(|| {
            DataError::Configuration(format!(
                "no platform cache directory; set {} to choose one",
                CACHE_DIR_ENV
            ))
        })
}

fn validate_base_url(raw: &str) -> DataResult<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| {
        DataError::Configuration(format!("invalid base URL '{}': {}", trimmed, e))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DataError::Configuration(format!(
                "unsupported base URL scheme '{}' in '{}'",
                other, trimmed
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(DataError::Configuration(format!(
            "base URL '{}' has no host",
            trimmed
        )));
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}
