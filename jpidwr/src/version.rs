//! Data release version tags and their resolution order.
//!
//! A version tag names one immutable release of the dataset bundle, for
//! example `v0.3.0`. The active tag is chosen once per session:
//!
//! 1. an explicit argument,
//! 2. the `JPINFECT_DATA_VERSION` environment variable,
//! 3. the version compiled into this crate.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

use crate::manager::{DataError, DataResult};

/// Environment variable overriding the data version.
pub const VERSION_ENV: &str = "JPINFECT_DATA_VERSION";

/// Version used when neither an argument nor the environment picks one.
pub const DEFAULT_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v([0-9]+)\.([0-9]+)\.([0-9]+)$").expect("valid tag regex"))
}

/// A validated data release tag.
///
/// # Example
///
/// ```
/// use jpidwr::VersionTag;
///
/// let tag = VersionTag::parse("v0.3.0").unwrap();
/// assert_eq!(tag.as_str(), "v0.3.0");
/// assert!(VersionTag::parse("0.3.0").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTag {
    tag: String,
    version: Version,
}

impl VersionTag {
    /// Parse and validate a tag of the form `vMAJOR.MINOR.PATCH`.
    pub fn parse(tag: &str) -> DataResult<Self> {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            return Err(DataError::Configuration(
                "data version tag is empty".to_string(),
            ));
        }

        let malformed = || {
            DataError::Configuration(format!(
                "malformed data version tag '{}': expected vMAJOR.MINOR.PATCH",
                trimmed
            ))
        };

        let caps = tag_pattern().captures(trimmed).ok_or_else(malformed)?;
        let component = |i: usize| -> DataResult<u64> {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(malformed)
        };
        let version = Version::new(component(1)?, component(2)?, component(3)?);

        Ok(Self {
            tag: trimmed.to_string(),
            version,
        })
    }

    /// The tag as written, including the leading `v`.
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Semantic version of this tag, used for ordering.
    pub fn semver(&self) -> &Version {
        &self.version
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl AsRef<str> for VersionTag {
    fn as_ref(&self) -> &str {
        &self.tag
    }
}

/// Resolve the active version, reading the process environment.
pub fn resolve_version(explicit: Option<&str>) -> DataResult<VersionTag> {
    resolve_version_with(explicit, |key| std::env::var(key).ok())
}

/// Resolve the active version with an injected environment lookup.
///
/// Blank values count as unset so they fall through to the next source;
/// anything non-blank must be a valid tag.
pub fn resolve_version_with<F>(explicit: Option<&str>, lookup: F) -> DataResult<VersionTag>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(tag) = explicit.filter(|t| !t.trim().is_empty()) {
        return VersionTag::parse(tag);
    }
    if let Some(tag) = lookup(VERSION_ENV).filter(|t| !t.trim().is_empty()) {
        return VersionTag::parse(&tag);
    }
    VersionTag::parse(DEFAULT_VERSION)
}
