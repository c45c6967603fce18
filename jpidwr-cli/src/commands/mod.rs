//! CLI command implementations.

pub mod data;

use std::path::PathBuf;

use jpidwr::DataSettings;

/// Flags accepted by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub cache_dir: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl GlobalArgs {
    /// Settings for `version`, with unset values left to the environment.
    pub fn settings(&self, version: Option<String>) -> DataSettings {
        DataSettings {
            version,
            cache_root: self.cache_dir.clone(),
            base_url: self.base_url.clone(),
        }
    }
}
