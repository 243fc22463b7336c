//! Errors specific to reading, writing or modifying a PE image and stamping it with metadata.

use std::{io::Error as IOError, path::PathBuf};

use crate::bundle::Stage;

/// Error that can occur when reading and parsing bytes.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReadError(pub String);

/// Errors that can occur when reading a PE image.
///
/// Every variant means the source is not a well-formed portable executable.
#[derive(Debug, thiserror::Error)]
pub enum ImageReadError {
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid section: {0}")]
    InvalidSection(String),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<ReadError> for ImageReadError {
    fn from(error: ReadError) -> Self { ImageReadError::InvalidBytes(error) }
}
impl From<IOError> for ImageReadError {
    fn from(error: IOError) -> Self { ImageReadError::IOError(error) }
}

/// Errors that can occur when writing a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageWriteError {
    #[error("not enough space in file header")]
    NotEnoughSpaceInHeader,
    #[error("section points outside image: {0} > {1}")]
    InvalidSectionRange(u64, u64),
    #[error("resource directory too large: {0} bytes")]
    ResourceDirectoryTooLarge(u64),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<IOError> for ImageWriteError {
    fn from(error: IOError) -> Self { ImageWriteError::IOError(error) }
}

/// Errors that can occur when reading or modifying resource data.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("image has no resource section")]
    MissingResourceSection,
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("invalid icon group: {0}")]
    InvalidIconGroup(String),
    #[error("invalid version info: {0}")]
    InvalidVersionInfo(String),
    #[error("unsupported version info string key: {0}")]
    UnsupportedVersionKey(String),
    #[error("no free resource id left")]
    ResourceIdsExhausted,
}
impl From<ReadError> for ResourceError {
    fn from(error: ReadError) -> Self { ResourceError::InvalidBytes(error) }
}

/// Errors that can occur when reading an icon container file.
#[derive(Debug, thiserror::Error)]
pub enum IconError {
    #[error("not an icon file: reserved {0:#x}, type {1:#x}")]
    InvalidMagic(u16, u16),
    #[error("icon file contains no images")]
    NoImages,
    #[error("icon file truncated: {0}")]
    Truncated(String),
    #[error("icon path does not have an .ico extension: {0}")]
    InvalidExtension(PathBuf),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<ReadError> for IconError {
    fn from(error: ReadError) -> Self { IconError::Truncated(error.0) }
}
impl From<IOError> for IconError {
    fn from(error: IOError) -> Self { IconError::IOError(error) }
}

/// Error that can occur when parsing a dotted version string.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VersionParseError {
    #[error("version {0:?} must have exactly four components")]
    ComponentCount(String),
    #[error("version {0:?} has an empty component")]
    EmptyComponent(String),
    #[error("version {0:?} has a non-numeric component {1:?}")]
    NotNumeric(String, String),
    #[error("version {0:?} has a component {1} out of range 0..=65535")]
    OutOfRange(String, String),
}

/// Errors that can occur when reading the application configuration.
#[cfg(feature = "config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid application version: {0}")]
    Version(#[from] VersionParseError),
    #[error("io error: {0}")]
    IOError(#[from] IOError),
}

/// Cause of a failed stamping operation.
#[derive(Debug, thiserror::Error)]
pub enum StampErrorKind {
    #[error("malformed image: {0}")]
    MalformedImage(#[from] ImageReadError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("failed to apply resources: {0}")]
    Apply(#[from] ImageWriteError),
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailure { path: PathBuf, source: IOError },
    #[error("failed to read {}: {source}", .path.display())]
    ReadFailure { path: PathBuf, source: IOError },
}

/// Error that aborted processing of one binary, together with the stage it occurred in.
#[derive(Debug, thiserror::Error)]
#[error("{kind} (in stage {stage:?})")]
pub struct StampError {
    pub stage: Stage,
    pub kind:  StampErrorKind,
}
impl StampError {
    pub fn new<K: Into<StampErrorKind>>(stage: Stage, kind: K) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }
}
