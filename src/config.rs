//! Application configuration file.
//!
//! Only the parts relevant for binary metadata are read, unknown fields are ignored:
//!
//! ```json
//! {
//!     "version": "1.2.3.4",
//!     "cli": {
//!         "binaryMetadata": {
//!             "name": "MyApp",
//!             "description": "My application",
//!             "copyright": "Copyright (c) Me",
//!             "icon": "/resources/icons/app.ico"
//!         }
//!     }
//! }
//! ```

use std::path::{Component, Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::{errors::ConfigError, metadata::*};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cli:     CliConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(default)]
    pub binary_metadata: BinaryMetadataConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinaryMetadataConfig {
    pub name:        Option<String>,
    pub description: Option<String>,
    pub copyright:   Option<String>,
    pub icon:        Option<String>,
}

impl AppConfig {
    /// Parse the configuration from JSON.
    pub fn parse(json: &str) -> Result<Self, ConfigError> { Ok(serde_json::from_str(json)?) }

    /// Read and parse the configuration file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        debug!("read configuration {}", path.as_ref().display());
        Self::parse(&json)
    }

    /// Returns the binary metadata described by the configuration.
    ///
    /// A missing version is `0.0.0.0`. The icon path is always relative to the application directory,
    /// a leading separator is ignored.
    ///
    /// # Returns
    /// Returns an error if the version is not a four component version number.
    pub fn binary_metadata(&self) -> Result<BinaryMetadata, ConfigError> {
        let version = match &self.version {
            Some(version) => version.parse::<VersionNumber>()?,
            None => VersionNumber::default(),
        };
        let metadata = &self.cli.binary_metadata;
        Ok(BinaryMetadata {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            copyright: metadata.copyright.clone(),
            icon: metadata.icon.as_deref().map(relative_path),
            version,
        })
    }
}

fn relative_path(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|component| !matches!(component, Component::Prefix(_) | Component::RootDir))
        .collect()
}
