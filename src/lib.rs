//! **P**ortable **e**xecutable resource **stamp**er for bundled applications.
//!
//! Supports:
//! * Parsing and introspection of portable executables
//! * Replacing the icon group with the images of an `.ico` file
//! * Writing version information with product name, description, copyright and version
//! * Bundling a set of binaries, stamping Windows executables and copying the others
//!
//! See [`Image`] for parsing and updating a portable executable image and [`Stamper`] for applying [`BinaryMetadata`].
//!
//! # Examples
//!
//! ### Icon and version replacement
//! ```
//! use pestamp::{IconFile, Image, VersionInfo, VersionLanguage, VersionNumber};
//!
//! let data = std::fs::read(BINARY_PATH)?;
//! let icon = IconFile::parse_file(ICON_PATH)?;
//!
//! // parse the executable image
//! let mut image = Image::parse(&data)?;
//!
//! // get the resource tree
//! let mut resources = image.resource_tree()?.clone();
//!
//! // replace the first icon group
//! resources.replace_icon_group(0, 1033, icon.images())?;
//!
//! // write the version information
//! let mut info = VersionInfo::create_empty();
//! info.set_file_version(VersionNumber::new(1, 2, 3, 4));
//! info.set_string_values(VersionLanguage::default(), [("ProductName", "MyApp")])?;
//! resources.write_version_info(&info)?;
//!
//! // set the resource tree in the image
//! image.set_resource_tree(resources)?;
//!
//! // build an executable image with all changes applied
//! let target = image.data();
//! ```
//!
//! ### Bundling
//! ```
//! use pestamp::{bundle, AppConfig, BundleTarget, Stamper};
//!
//! let config = AppConfig::parse_file("app.config.json")?;
//! let stamper = Stamper::new(config.binary_metadata()?).with_base_dir(".");
//!
//! let report = bundle(&stamper, vec![
//!     BundleTarget::windows("bin/app-win_x64.exe", "dist/app-win_x64.exe"),
//!     BundleTarget::verbatim("bin/app-linux_x64", "dist/app-linux_x64"),
//! ]);
//! assert!(report.is_success());
//! ```

pub(crate) mod bundle;
#[cfg(feature = "config")]
pub(crate) mod config;
pub(crate) mod errors;
pub(crate) mod icon;
pub(crate) mod image;
pub(crate) mod metadata;
pub(crate) mod resource;
pub(crate) mod util;
pub(crate) mod version;

pub mod constants;
pub mod types;

#[cfg(feature = "config")]
pub use crate::config::*;
pub use crate::{bundle::*, errors::*, icon::*, image::*, metadata::*, resource::*, version::*};
