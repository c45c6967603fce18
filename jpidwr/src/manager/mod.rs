//! Cache manager for versioned data releases.
//!
//! This module downloads, verifies and installs release bundles into a local
//! cache, one directory per version.
//!
//! # Architecture
//!
//! ```text
//! CacheManager
//!     ├── CacheStore          (layout, marker, staging, publish)
//!     └── DataInstaller       (one install attempt)
//!             ├── fetch_manifest
//!             ├── AssetDownloader ── Transport (HttpTransport)
//!             ├── verify_checksum
//!             └── ArchiveExtractor (ReleaseExtractor: zip, tar.gz)
//! ```
//!
//! A version directory is visible to readers only once every file in it
//! has been verified and the completion marker written beside them.

mod cache;
mod checksum;
pub mod download;
mod error;
mod extractor;
mod installer;
mod manifest;
mod store;
mod traits;

pub use cache::CacheManager;
pub use checksum::{calculate_file_checksum, is_sha256_hex, verify_checksum, SHA256_HEX_LEN};
pub use download::{HttpTransport, RetryPolicy};
pub use error::{DataError, DataResult, ErrorKind};
pub use extractor::{ArchiveFormat, ReleaseExtractor, TarGzExtractor, ZipExtractor};
pub use installer::{
    verify_tree, DataInstaller, InstallProgressCallback, InstallResult, InstallStage,
};
pub use manifest::{
    asset_url, fetch_manifest, is_safe_relative_path, ArchiveAsset, FileEntry, Manifest,
};
pub use store::{CacheStore, CompletionMarker, StagingDir, MARKER_FILE, STALE_STAGING_AGE};
pub use traits::{ArchiveExtractor, Transport, TransportError};
