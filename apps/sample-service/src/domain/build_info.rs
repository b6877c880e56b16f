//! Build Metadata
//!
//! Version, commit and date are stamped at compile time. The commit and
//! date come from `SAMPLE_SERVICE_COMMIT` / `SAMPLE_SERVICE_BUILD_DATE` in
//! the build environment and fall back to `"undefined"` when unset.

use std::fmt;

use serde::Serialize;

/// Name the running system reports about itself.
pub const SYSTEM_NAME: &str = "sample-service";

const UNDEFINED: &str = "undefined";

/// Metadata describing the binary that is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    /// Semantic version from the package manifest.
    pub version: String,
    /// Source revision the binary was built from.
    pub commit: String,
    /// Build timestamp.
    pub date: String,
    /// Target operating system.
    pub os: String,
    /// Target CPU architecture.
    pub arch: String,
}

impl BuildInfo {
    /// Metadata for the current binary.
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("SAMPLE_SERVICE_COMMIT")
                .unwrap_or(UNDEFINED)
                .to_string(),
            date: option_env!("SAMPLE_SERVICE_BUILD_DATE")
                .unwrap_or(UNDEFINED)
                .to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (commit {}, built {}, {}/{})",
            self.version, self.commit, self.date, self.os, self.arch
        )
    }
}
