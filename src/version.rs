//! Major-version compatibility between a license and a client build.
//!
//! A license issued for `1.x.y` validates any `1.*` client and nothing else.
//! Only the leading dot-separated component is inspected, so pre-release and
//! build suffixes on later components are ignored.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("invalid major version in {0:?}")]
    InvalidMajor(String),

    #[error("major version cannot be negative: {0:?}")]
    NegativeMajor(String),
}

/// Parse the leading numeric component of a version string.
pub fn major_version(version: &str) -> Result<u64, VersionError> {
    if version.is_empty() {
        return Err(VersionError::Empty);
    }

    let major = version.split('.').next().unwrap_or_default();
    let parsed: i64 = major
        .parse()
        .map_err(|_| VersionError::InvalidMajor(version.to_string()))?;

    u64::try_from(parsed).map_err(|_| VersionError::NegativeMajor(version.to_string()))
}

/// Whether a license issued for `license_version` covers `app_version`.
pub fn is_compatible(license_version: &str, app_version: &str) -> Result<bool, VersionError> {
    let licensed = major_version(license_version)?;
    let requested = major_version(app_version)?;
    Ok(licensed == requested)
}
