//! Network side of the install pipeline.
//!
//! - `http`: reqwest-backed [`Transport`](super::traits::Transport)
//! - `retry`: bounded exponential backoff with jitter
//! - `archive`: retrying fetches into memory (manifest) or a temp file (archive)
//!
//! # Architecture
//!
//! ```text
//! AssetDownloader
//!         │
//!         ├── run_with_retry(RetryPolicy)
//!         │
//!         └── Transport (trait)
//!                 └── HttpTransport
//! ```

mod archive;
mod http;
mod retry;

pub use archive::AssetDownloader;
pub use http::{HttpTransport, DEFAULT_TIMEOUT_SECS};
pub use retry::{run_with_retry, RetryFailure, RetryPolicy};
