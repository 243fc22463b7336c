//! Metadata stamped into application binaries.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{constants::*, errors::VersionParseError};

/// Four component version number, e.g. `1.2.3.4`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct VersionNumber {
    pub major:    u16,
    pub minor:    u16,
    pub build:    u16,
    pub revision: u16,
}
impl VersionNumber {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Returns the most significant double word: `major << 16 | minor`.
    pub const fn ms(&self) -> DWORD { (self.major as u32) << 16 | self.minor as u32 }

    /// Returns the least significant double word: `build << 16 | revision`.
    pub const fn ls(&self) -> DWORD { (self.build as u32) << 16 | self.revision as u32 }

    pub const fn from_dwords(ms: DWORD, ls: DWORD) -> Self {
        Self::new((ms >> 16) as u16, ms as u16, (ls >> 16) as u16, ls as u16)
    }
}
impl FromStr for VersionNumber {
    type Err = VersionParseError;

    /// Parse a dotted version string. Exactly four components are required,
    /// each a decimal number in `0..=65535`.
    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let components = version.split('.').collect::<Vec<_>>();
        if components.len() != 4 {
            return Err(VersionParseError::ComponentCount(version.to_string()));
        }

        let mut parts = [0u16; 4];
        for (part, component) in parts.iter_mut().zip(components) {
            let component = component.trim();
            if component.is_empty() {
                return Err(VersionParseError::EmptyComponent(version.to_string()));
            }
            if !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::NotNumeric(version.to_string(), component.to_string()));
            }
            *part = component
                .parse::<u16>()
                .map_err(|_| VersionParseError::OutOfRange(version.to_string(), component.to_string()))?;
        }
        let [major, minor, build, revision] = parts;
        Ok(Self::new(major, minor, build, revision))
    }
}
impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

/// Branding of an application binary.
///
/// Absent text fields are stamped as empty strings, an absent icon leaves the existing icon in place.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct BinaryMetadata {
    pub name:        Option<String>,
    pub description: Option<String>,
    pub copyright:   Option<String>,
    pub icon:        Option<PathBuf>,
    pub version:     VersionNumber,
}
impl BinaryMetadata {
    /// Returns the version string values in the order they are written.
    pub fn string_values(&self) -> [(&'static str, &str); 3] {
        [
            (VS_PRODUCT_NAME, self.name.as_deref().unwrap_or_default()),
            (VS_FILE_DESCRIPTION, self.description.as_deref().unwrap_or_default()),
            (VS_LEGAL_COPYRIGHT, self.copyright.as_deref().unwrap_or_default()),
        ]
    }
}

