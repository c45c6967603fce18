//! jpidwr - versioned, checksum-verified cache of Japanese infectious disease
//! surveillance tables.
//!
//! Tables are published per release tag together with a JSON manifest of
//! SHA-256 digests, either as separate parquet assets or, for older
//! releases, as one zip archive. This crate downloads a release on first
//! use, verifies every file, and publishes the result atomically under the
//! cache root. Later calls return the cached directory without touching the
//! network.
//!
//! # Quick start
//!
//! ```no_run
//! use jpidwr::{DataAccess, DataSettings};
//!
//! let data = DataAccess::from_settings(DataSettings::new().with_version("v0.3.0"))?;
//! let dir = data.ensure_data(false)?;
//! println!("tables in {}", dir.display());
//! # Ok::<(), jpidwr::DataError>(())
//! ```
//!
//! # Environment
//!
//! - `JPINFECT_DATA_VERSION`: release tag, e.g. `v0.3.0`
//! - `JPINFECT_DATA_BASE_URL`: release server base URL
//! - `JPINFECT_CACHE_DIR`: cache root directory

pub mod config;
pub mod facade;
pub mod logging;
pub mod manager;
pub mod version;

pub use config::{DataConfig, DataSettings};
pub use facade::DataAccess;
pub use manager::{CacheManager, DataError, DataResult, ErrorKind, InstallStage};
pub use version::{resolve_version, VersionTag, DEFAULT_VERSION};
