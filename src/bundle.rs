//! Stamping application metadata into binaries and bundling a set of target binaries.
//!
//! Every Windows executable passes through the stages of [`Stage`] in order.
//! A failure aborts only the binary it occurred in, other targets are still processed.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    constants::*,
    errors::*,
    icon::*,
    image::Image,
    metadata::BinaryMetadata,
    resource::ResourceTree,
    util::write_atomically,
    version::{VersionInfo, VersionLanguage},
};

/// Processing stage of a single binary.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    /// Source bytes read and parsed as an image.
    Loaded,
    /// Resource tree extracted from the image.
    ResourceTreeBuilt,
    /// Icon group replaced, or skipped with a warning.
    IconApplied,
    /// Version information written.
    VersionInfoApplied,
    /// Resource section regenerated and headers updated.
    Regenerated,
    /// Output written to the destination.
    Written,
}

/// Non-fatal problem encountered while stamping a binary.
#[derive(Debug)]
pub enum Warning {
    /// The icon could not be read, the existing icon was kept.
    InvalidIcon { path: PathBuf, error: IconError },
    /// The icon could not be written into the resource tree, the existing icon was kept.
    IconNotApplied { path: PathBuf, error: ResourceError },
}
impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::InvalidIcon { path, error } => {
                write!(f, "icon {} skipped: {}", path.display(), error)
            }
            Warning::IconNotApplied { path, error } => {
                write!(f, "icon {} not applied: {}", path.display(), error)
            }
        }
    }
}

/// Result of stamping a single image in memory.
#[derive(Debug)]
pub struct Stamped {
    pub data:     Vec<u8>,
    pub warnings: Vec<Warning>,
}

/// Applies [`BinaryMetadata`] to Windows executables.
///
/// The stamper is immutable and can be shared between threads stamping different binaries.
#[derive(Debug, Clone)]
pub struct Stamper {
    metadata: BinaryMetadata,
    base_dir: PathBuf,
    language: VersionLanguage,
}
impl Stamper {
    pub fn new(metadata: BinaryMetadata) -> Self {
        Self {
            metadata,
            base_dir: PathBuf::new(),
            language: VersionLanguage::default(),
        }
    }

    /// Set the directory relative icon paths are resolved against.
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Set the language and codepage of the written resources, en-US Unicode by default.
    pub fn with_language(mut self, language: VersionLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn metadata(&self) -> &BinaryMetadata { &self.metadata }

    fn icon_path(&self) -> Option<PathBuf> {
        let icon = self.metadata.icon.as_ref()?;
        Some(if icon.is_absolute() { icon.clone() } else { self.base_dir.join(icon) })
    }

    /// Returns the version information block written to every binary.
    pub fn version_info(&self) -> Result<VersionInfo, ResourceError> {
        let mut info = VersionInfo::create_empty();
        info.set_file_version(self.metadata.version);
        info.set_product_version(self.metadata.version);
        let fixed = info.fixed_file_info_mut();
        fixed.file_flags_mask = VS_FFI_FILEFLAGSMASK;
        fixed.file_os = VOS_NT_WINDOWS32;
        fixed.file_type = VFT_APP;
        info.set_string_values(self.language, self.metadata.string_values())?;
        Ok(info)
    }

    /// Stamp the metadata into the image bytes.
    ///
    /// An unreadable icon is reported as a warning and leaves the existing icon in place.
    ///
    /// # Returns
    /// Returns the new image bytes, or an error tagged with the stage that failed.
    pub fn stamp(&self, data: &[u8]) -> Result<Stamped, StampError> {
        let mut image = Image::parse(data).map_err(|e| StampError::new(Stage::Loaded, e))?;
        debug!("stage {:?}", Stage::Loaded);

        let mut tree = image
            .resource_tree()
            .map_err(|e| StampError::new(Stage::ResourceTreeBuilt, e))?
            .clone();
        debug!("stage {:?}: {} resources", Stage::ResourceTreeBuilt, tree.len());

        let mut warnings = Vec::new();
        if let Some(path) = self.icon_path() {
            if let Err(warning) = self.apply_icon(&mut tree, &path) {
                warn!("{}, keeping the existing icon", warning);
                warnings.push(warning);
            }
        }
        debug!("stage {:?}", Stage::IconApplied);

        let info = self.version_info().map_err(|e| StampError::new(Stage::VersionInfoApplied, e))?;
        tree.write_version_info(&info)
            .map_err(|e| StampError::new(Stage::VersionInfoApplied, e))?;
        debug!("stage {:?}: version {}", Stage::VersionInfoApplied, self.metadata.version);

        image
            .set_resource_tree(tree)
            .map_err(|e| StampError::new(Stage::Regenerated, e))?;
        debug!("stage {:?}", Stage::Regenerated);

        Ok(Stamped {
            data: image.into_data(),
            warnings,
        })
    }

    fn apply_icon(&self, tree: &mut ResourceTree, path: &Path) -> Result<(), Warning> {
        let icon = load_icon(path).map_err(|error| Warning::InvalidIcon {
            path: path.to_path_buf(),
            error,
        })?;

        // the shell shows the first group, replace it in its own language if there is none in ours
        let mut language = self.language.language;
        if tree.icon_groups(language).is_empty() {
            if let Some(first) = tree.keys_of_kind(&RT_GROUP_ICON.into()).first() {
                language = first.language;
            }
        }

        // modify a copy so a failure leaves the tree untouched
        let mut candidate = tree.clone();
        match candidate.replace_icon_group(0, language, icon.images()) {
            Ok(key) => {
                debug!("replaced icon group {} with {} images", key, icon.images().len());
                *tree = candidate;
                Ok(())
            }
            Err(error) => Err(Warning::IconNotApplied {
                path: path.to_path_buf(),
                error,
            }),
        }
    }

    /// Stamp the metadata into the source binary and write the result to the destination.
    ///
    /// The destination is written atomically and gets the permissions of the source.
    ///
    /// # Returns
    /// Returns the warnings encountered, or an error tagged with the stage that failed.
    pub fn stamp_file<S: AsRef<Path>, D: AsRef<Path>>(
        &self, source: S, destination: D,
    ) -> Result<Vec<Warning>, StampError> {
        let (source, destination) = (source.as_ref(), destination.as_ref());
        let data = read_source(source)?;
        let stamped = self.stamp(&data)?;
        write_destination(source, destination, &stamped.data)?;
        info!(
            "stamped {} -> {} ({} warnings)",
            source.display(),
            destination.display(),
            stamped.warnings.len()
        );
        Ok(stamped.warnings)
    }
}

fn load_icon(path: &Path) -> Result<IconFile, IconError> {
    if !is_icon_path(path) {
        return Err(IconError::InvalidExtension(path.to_path_buf()));
    }
    IconFile::parse_file(path)
}

fn read_source(source: &Path) -> Result<Vec<u8>, StampError> {
    fs::read(source).map_err(|e| {
        StampError::new(Stage::Loaded, StampErrorKind::ReadFailure {
            path:   source.to_path_buf(),
            source: e,
        })
    })
}

fn write_destination(source: &Path, destination: &Path, data: &[u8]) -> Result<(), StampError> {
    let permissions = fs::metadata(source).ok().map(|metadata| metadata.permissions());
    write_atomically(destination, data, permissions).map_err(|e| {
        StampError::new(Stage::Written, StampErrorKind::WriteFailure {
            path:   destination.to_path_buf(),
            source: e,
        })
    })
}

/// How a target binary is processed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TargetKind {
    /// Windows executable, stamped with the metadata.
    Windows,
    /// Any other binary, copied unchanged.
    Verbatim,
}

/// Binary to produce from a source binary.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct BundleTarget {
    pub source:      PathBuf,
    pub destination: PathBuf,
    pub kind:        TargetKind,
}
impl BundleTarget {
    pub fn windows<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, destination: D) -> Self {
        Self {
            source:      source.into(),
            destination: destination.into(),
            kind:        TargetKind::Windows,
        }
    }

    pub fn verbatim<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, destination: D) -> Self {
        Self {
            source:      source.into(),
            destination: destination.into(),
            kind:        TargetKind::Verbatim,
        }
    }
}

/// Outcome of processing a single target.
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: BundleTarget,
    pub result: Result<Vec<Warning>, StampError>,
}

/// Outcomes of all targets of a bundling operation, in target order.
#[derive(Debug)]
pub struct BundleReport {
    pub outcomes: Vec<TargetOutcome>,
}
impl BundleReport {
    /// Returns whether every target was processed successfully. Warnings do not count as failures.
    pub fn is_success(&self) -> bool { self.outcomes.iter().all(|outcome| outcome.result.is_ok()) }

    /// Returns the failed targets with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&BundleTarget, &StampError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|error| (&outcome.target, error)))
    }

    /// Returns the warnings of all successful targets.
    pub fn warnings(&self) -> impl Iterator<Item = (&BundleTarget, &Warning)> {
        self.outcomes.iter().flat_map(|outcome| {
            outcome
                .result
                .as_ref()
                .map(|warnings| warnings.iter().map(|warning| (&outcome.target, warning)).collect::<Vec<_>>())
                .unwrap_or_default()
        })
    }
}

/// Process all targets, stamping Windows executables and copying other binaries unchanged.
///
/// Targets are independent: a failing target is recorded in the report and does not stop the others.
/// With the `parallel` feature targets are processed concurrently.
pub fn bundle(stamper: &Stamper, targets: Vec<BundleTarget>) -> BundleReport {
    info!("bundling {} targets", targets.len());

    #[cfg(feature = "parallel")]
    let outcomes = targets
        .into_par_iter()
        .map(|target| process_target(stamper, target))
        .collect::<Vec<_>>();
    #[cfg(not(feature = "parallel"))]
    let outcomes = targets
        .into_iter()
        .map(|target| process_target(stamper, target))
        .collect::<Vec<_>>();

    BundleReport { outcomes }
}

fn process_target(stamper: &Stamper, target: BundleTarget) -> TargetOutcome {
    debug!("processing {:?} target {}", target.kind, target.source.display());
    let result = match target.kind {
        TargetKind::Windows => stamper.stamp_file(&target.source, &target.destination),
        TargetKind::Verbatim => copy_verbatim(&target.source, &target.destination).map(|()| Vec::new()),
    };
    if let Err(e) = &result {
        error!("{} -> {}: {}", target.source.display(), target.destination.display(), e);
    }
    TargetOutcome { target, result }
}

fn copy_verbatim(source: &Path, destination: &Path) -> Result<(), StampError> {
    let data = read_source(source)?;
    write_destination(source, destination, &data)?;
    info!("copied {} -> {}", source.display(), destination.display());
    Ok(())
}
