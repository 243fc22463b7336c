//! Icon container files and icon group resources.
//!
//! An `.ico` file and an `RT_GROUP_ICON` resource share the same header but differ in their entries:
//! the file references image data by offset, the resource references `RT_ICON` resources by id.
//! See <https://learn.microsoft.com/en-us/previous-versions/ms997538(v=msdn.10)> for more information.

use std::{collections::HashSet, path::Path};

use ahash::RandomState;
use debug_ignore::DebugIgnore;
use log::{debug, trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

/// Returns whether the path has an `.ico` extension, ignoring case.
pub fn is_icon_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("ico"))
}

/// Single image of an icon container file.
///
/// The image data is kept exactly as it was read, either a PNG stream or a DIB without file header.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconImage {
    entry: IconFileEntry,
    data:  DebugIgnore<Vec<u8>>,
}
impl IconImage {
    /// Returns the raw image data.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Returns whether the image data is a PNG stream.
    pub fn is_png(&self) -> bool { self.data.starts_with(&PNG_SIGNATURE) }

    fn bitmap_header(&self) -> Option<BitmapInfoHeader> {
        let header = read::<BitmapInfoHeader>(&self.data).ok()?;
        (header.size >= 40).then_some(header)
    }

    // width, height, bit depth
    fn png_header(&self) -> Option<(u32, u32, u16)> {
        if !self.is_png() || self.data.get(12..16) != Some(b"IHDR".as_slice()) {
            return None;
        }
        let ihdr = self.data.get(16..26)?;
        let width = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
        let height = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
        let channels = match ihdr[9] {
            2 => 3,
            4 => 2,
            6 => 4,
            _ => 1,
        };
        Some((width, height, ihdr[8] as u16 * channels))
    }

    /// Returns the width in pixels as stored in the embedded image header.
    pub fn width(&self) -> u32 {
        if let Some((width, _, _)) = self.png_header() {
            return width;
        }
        if let Some(header) = self.bitmap_header() {
            return header.width.unsigned_abs();
        }
        dimension(self.entry.width)
    }

    /// Returns the height in pixels as stored in the embedded image header.
    pub fn height(&self) -> u32 {
        if let Some((_, height, _)) = self.png_header() {
            return height;
        }
        if let Some(header) = self.bitmap_header() {
            // bitmap height includes the and-mask
            return header.height.unsigned_abs() / 2;
        }
        dimension(self.entry.height)
    }

    /// Returns the bits per pixel as stored in the embedded image header.
    pub fn bit_count(&self) -> u16 {
        if let Some((_, _, bit_count)) = self.png_header() {
            return bit_count;
        }
        if let Some(header) = self.bitmap_header() {
            return header.bit_count;
        }
        self.entry.bit_count
    }

    /// Returns the number of color planes.
    pub fn planes(&self) -> u16 {
        match self.bitmap_header() {
            Some(header) => header.planes,
            None if self.entry.planes > 0 => self.entry.planes,
            None => 1,
        }
    }

    /// Returns the number of palette colors, `0` for images without palette.
    pub fn color_count(&self) -> u8 { self.entry.color_count }

    fn group_entry(&self, id: u16) -> IconDirectoryEntry {
        IconDirectoryEntry {
            width: dimension_byte(self.width()),
            height: dimension_byte(self.height()),
            color_count: self.color_count(),
            reserved: 0,
            planes: self.planes(),
            bit_count: self.bit_count(),
            bytes: self.data.len() as u32,
            id,
        }
    }
}

// a stored size of 0 means 256 pixels
fn dimension(value: u8) -> u32 {
    if value == 0 { 256 } else { value as u32 }
}

fn dimension_byte(value: u32) -> u8 {
    if value >= 256 { 0 } else { value as u8 }
}

/// Parsed `.ico` icon container file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconFile {
    images: Vec<IconImage>,
}
impl IconFile {
    /// Parse an icon container file.
    ///
    /// # Returns
    /// Returns an error if the header magic is wrong, the file contains no images,
    /// or the directory or any image data is truncated.
    pub fn parse(data: &[u8]) -> Result<Self, IconError> {
        let directory = read_at::<IconDirectory>(data, 0)?;
        trace!("{:#x?}", directory);
        if directory.reserved != ICON_DIRECTORY_RESERVED || directory.type_ != ICON_DIRECTORY_TYPE_ICON {
            return Err(IconError::InvalidMagic(directory.reserved, directory.type_));
        }
        if directory.count == 0 {
            return Err(IconError::NoImages);
        }

        let mut images = Vec::with_capacity(directory.count as usize);
        for index in 0..directory.count as usize {
            let entry = read_at::<IconFileEntry>(data, 6 + index * 16)?;
            trace!("{:#x?}", entry);
            let image = slice_at(data, entry.offset as usize, entry.bytes as usize)
                .map_err(|e| IconError::Truncated(format!("image {}: {}", index, e)))?;
            images.push(IconImage {
                entry,
                data: image.to_vec().into(),
            });
        }
        debug!("parsed icon file with {} images", images.len());
        Ok(Self { images })
    }

    /// Read and parse an icon container file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, IconError> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Returns the images in file order.
    pub fn images(&self) -> &[IconImage] { &self.images }

    /// Returns the icon group descriptor and the image data of the file, both in file order.
    ///
    /// The descriptor numbers the images from `1`; the ids are reassigned when the group is written to a resource tree.
    /// The image data is not re-encoded.
    pub fn to_group_entries(&self) -> (IconGroup, Vec<&[u8]>) {
        let ids = (1..=self.images.len() as u16).collect::<Vec<_>>();
        let group = IconGroup::from_images(&self.images, &ids);
        let data = self.images.iter().map(|image| image.data()).collect();
        (group, data)
    }
}

/// `RT_GROUP_ICON` resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct IconGroup {
    entries: Vec<IconDirectoryEntry>,
}
impl IconGroup {
    fn from_images(images: &[IconImage], ids: &[u16]) -> Self {
        Self {
            entries: images.iter().zip(ids).map(|(image, &id)| image.group_entry(id)).collect(),
        }
    }

    /// Parse icon group resource data.
    pub fn parse(data: &[u8]) -> Result<Self, ResourceError> {
        let directory = read_at::<IconDirectory>(data, 0)?;
        if directory.type_ != ICON_DIRECTORY_TYPE_ICON {
            return Err(ResourceError::InvalidIconGroup(format!(
                "unexpected type {:#x}",
                { directory.type_ }
            )));
        }
        let entries = (0..directory.count as usize)
            .map(|index| read_at::<IconDirectoryEntry>(data, 6 + index * 14))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Build the icon group into resource data.
    pub fn build(&self) -> Vec<u8> {
        let directory = IconDirectory {
            reserved: ICON_DIRECTORY_RESERVED,
            type_:    ICON_DIRECTORY_TYPE_ICON,
            count:    self.entries.len() as u16,
        };
        let mut data = Vec::with_capacity(6 + self.entries.len() * 14);
        data.extend_from_slice(directory.as_bytes());
        for entry in &self.entries {
            data.extend_from_slice(entry.as_bytes());
        }
        data
    }

    /// Returns the group entries in display order.
    pub fn entries(&self) -> &[IconDirectoryEntry] { &self.entries }

    /// Returns the ids of the `RT_ICON` resources referenced by the group.
    pub fn ids(&self) -> Vec<u16> { self.entries.iter().map(|entry| entry.id).collect() }
}

impl ResourceTree {
    /// Returns the keys of the icon groups in the given language in loader order.
    /// The first group is the one shown for the executable.
    pub fn icon_groups(&self, language: LANGID) -> Vec<&ResourceKey> {
        let mut groups = self.keys_of_kind(&RT_GROUP_ICON.into());
        groups.retain(|key| key.language == language);
        groups
    }

    /// Returns the key and parsed data of the icon group at the index among the groups in the given language.
    pub fn icon_group(
        &self, group_index: usize, language: LANGID,
    ) -> Result<Option<(ResourceKey, IconGroup)>, ResourceError> {
        let Some(key) = self.icon_groups(language).get(group_index).map(|key| (*key).clone()) else {
            return Ok(None);
        };
        let group = match self.get(&key) {
            Some(data) => IconGroup::parse(data.data())?,
            None => return Ok(None),
        };
        Ok(Some((key, group)))
    }

    /// Replace the icon group at the index among the groups in the given language.
    ///
    /// The existing group and the icon images only it references are removed and the group name is reused.
    /// If there is no group at the index, a new group with the next free id is added.
    /// The first image becomes the first entry of the group.
    ///
    /// # Returns
    /// The key of the written icon group.
    pub fn replace_icon_group(
        &mut self, group_index: usize, language: LANGID, images: &[IconImage],
    ) -> Result<ResourceKey, ResourceError> {
        if images.is_empty() {
            return Err(ResourceError::InvalidIconGroup("no icon images".into()));
        }
        if images.len() > u16::MAX as usize {
            return Err(ResourceError::InvalidIconGroup(format!("{} icon images", images.len())));
        }

        let existing = self.icon_groups(language).get(group_index).map(|key| (*key).clone());
        let (group_key, reusable_ids) = match existing {
            Some(key) => {
                let removed_ids = self.remove_icon_group(&key);
                (key, removed_ids)
            }
            None => {
                let id = self.next_free_id(&RT_GROUP_ICON.into())?;
                debug!(
                    "no icon group at index {} for language {}, adding group {}",
                    group_index, language, id
                );
                (ResourceKey::new(RT_GROUP_ICON, id, language), Vec::new())
            }
        };

        let mut reusable_ids = reusable_ids.into_iter();
        let mut ids = Vec::with_capacity(images.len());
        for image in images {
            let id = match reusable_ids.next() {
                Some(id) => id,
                None => self.next_free_id(&RT_ICON.into())?,
            };
            trace!("writing icon image {} ({} bytes)", id, image.data().len());
            self.insert(ResourceKey::new(RT_ICON, id, language), ResourceData::new(image.data()));
            ids.push(id);
        }

        let group = IconGroup::from_images(images, &ids);
        self.insert(group_key.clone(), ResourceData::new(group.build()));
        debug!("wrote icon group {} with icons {:?}", group_key, ids);
        Ok(group_key)
    }

    // removes the group and the images no other group references, returning the removed image ids
    fn remove_icon_group(&mut self, key: &ResourceKey) -> Vec<u16> {
        let Some(data) = self.remove(key) else {
            return Vec::new();
        };
        let ids = match IconGroup::parse(data.data()) {
            Ok(group) => group.ids(),
            Err(e) => {
                warn!("existing icon group {} is invalid, keeping its images: {}", key, e);
                return Vec::new();
            }
        };

        let mut referenced = HashSet::with_hasher(RandomState::new());
        for group_key in self.keys_of_kind(&RT_GROUP_ICON.into()) {
            if let Some(group) = self.get(group_key).and_then(|data| IconGroup::parse(data.data()).ok()) {
                referenced.extend(group.ids().into_iter().map(|id| (id, group_key.language)));
            }
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if referenced.contains(&(id, key.language)) {
                debug!("icon image {} is shared with another group, keeping it", id);
                continue;
            }
            if self.remove(ResourceKey::new(RT_ICON, id, key.language)).is_some() {
                removed.push(id);
            }
        }
        removed
    }
}
