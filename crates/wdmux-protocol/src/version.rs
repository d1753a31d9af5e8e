//! Format versioning for documents the daemon emits.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Version of a structured document the daemon prints.
///
/// Uses semantic versioning: major.minor
/// - Major version bump: breaking changes, incompatible
/// - Minor version bump: additive changes, backward compatible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Current version of the configuration document.
    pub const CURRENT: FormatVersion = FormatVersion { major: 0, minor: 1 };

    /// Creates a new FormatVersion.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses a version string like "0.1".
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| VersionError::InvalidFormat(s.to_string()))?;

        let major = major
            .parse::<u32>()
            .map_err(|_| VersionError::InvalidFormat(s.to_string()))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| VersionError::InvalidFormat(s.to_string()))?;

        Ok(Self { major, minor })
    }

}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
}
