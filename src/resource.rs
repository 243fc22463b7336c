//! Data types for parsing and building the resource section.
//! The resource section contains the resource directory and the resource data.
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-rsrc-section> for more information.
//!
//! On disk the directory is a three level tree (type, name, language). In memory it is flattened into
//! a [`ResourceTree`] keyed by [`ResourceKey`], which avoids aliasing nested tables while entries are
//! replaced, and is nested again only when building.

use std::{borrow::Borrow, collections::BTreeMap, fmt};

use ahash::RandomState;
use debug_ignore::DebugIgnore;
use indexmap::{IndexMap, IndexSet};
use log::{error, trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, types::*, util::*};

// type, name, language
const RESOURCE_LEVELS: usize = 3;
const DATA_ALIGNMENT: usize = 8;
const SUBDIRECTORY_FLAG: u32 = 0x80000000;
const NAME_FLAG: u32 = 0x80000000;

/// Resource directory entry name.
/// This can either be a raw id or a name.
///
/// Ordering follows the order the loader expects entries in: names first, then ids in ascending order.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ResourceName {
    // utf16 code units without length prefix
    Name(Vec<u16>),
    // raw id
    ID(u32),
}
impl ResourceName {
    fn parse(image: &[u8], offset: u32, id: u32) -> Result<Self, ReadError> {
        if id & NAME_FLAG != 0 {
            trace!("reading resource name {:#x?}", id);
            let address = offset as usize + (id ^ NAME_FLAG) as usize;
            let length = read_at::<u16>(image, address)? as usize;
            // size is in 16 bit characters so it needs to be doubled
            let data = slice_at(image, address + 2, length * 2)?;
            let units = data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            Ok(Self::Name(units))
        } else {
            Ok(Self::ID(id))
        }
    }

    pub fn from_string<S: AsRef<str>>(string: S) -> Self {
        Self::Name(string.as_ref().encode_utf16().collect())
    }

    /// Returns the id, or `None` for named entries.
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::ID(id) => Some(*id),
            Self::Name(_) => None,
        }
    }

    /// Returns the name, or `None` for id entries.
    pub fn name(&self) -> Option<String> {
        match self {
            Self::ID(_) => None,
            Self::Name(units) => Some(String::from_utf16_lossy(units)),
        }
    }

    // length prefix + data
    fn string_size(&self) -> usize {
        match self {
            Self::ID(_) => 0,
            Self::Name(units) => 2 + units.len() * 2,
        }
    }
}
impl From<u16> for ResourceName {
    fn from(id: u16) -> Self { Self::ID(id as u32) }
}
impl From<&str> for ResourceName {
    fn from(name: &str) -> Self { Self::from_string(name) }
}
impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ID(id) => write!(f, "{}", id),
            Self::Name(units) => write!(f, "{:?}", String::from_utf16_lossy(units)),
        }
    }
}

/// Address of a single resource: its type, its name and its language.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceKey {
    pub kind:     ResourceName,
    pub name:     ResourceName,
    pub language: LANGID,
}
impl ResourceKey {
    pub fn new<K: Into<ResourceName>, N: Into<ResourceName>>(kind: K, name: N, language: LANGID) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            language,
        }
    }
}
impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.id().and_then(|id| u16::try_from(id).ok()).and_then(resource_type_name) {
            Some(kind) => write!(f, "{}/{}/{}", kind, self.name, self.language),
            None => write!(f, "{}/{}/{}", self.kind, self.name, self.language),
        }
    }
}

/// Raw resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceData {
    data:     DebugIgnore<Vec<u8>>,
    codepage: u32,
    reserved: u32,
}
impl ResourceData {
    pub fn new<D: Into<Vec<u8>>>(data: D) -> Self {
        Self {
            data: DebugIgnore(data.into()),
            ..Default::default()
        }
    }

    /// Returns the raw data.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Returns the codepage of the data.
    pub fn codepage(&self) -> u32 { self.codepage }
}

/// Portable executable resource tree.
///
/// Entries keep their insertion order in memory. The built directory is always sorted the way the loader expects.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    pub(crate) virtual_address: u32,
    pub(crate) header:          ResourceDirectoryTable,
    pub(crate) entries:         IndexMap<ResourceKey, ResourceData, RandomState>,
}
// trees are equal when they hold the same resources, wherever they were read from
impl PartialEq for ResourceTree {
    fn eq(&self, other: &Self) -> bool { self.entries == other.entries }
}
impl Eq for ResourceTree {}

impl ResourceTree {
    /// Parse the resource directory from the given image at the given base address.
    /// The virtual address is used to resolve the resource data offsets and has to correspond to the virtual address in the section table header of the source image.
    ///
    /// # Returns
    /// Returns an error if the resource directory at the given address is invalid.
    pub fn parse(
        image: &[u8], base_address: u32, virtual_address: u32,
    ) -> Result<Self, ImageReadError> {
        let header = read_at::<ResourceDirectoryTable>(image, base_address as usize)?;
        let mut tree = Self {
            virtual_address,
            header,
            entries: IndexMap::default(),
        };
        let mut path = Vec::with_capacity(RESOURCE_LEVELS);
        let mut visited = IndexSet::default();
        tree.parse_table(image, base_address, 0, &mut path, &mut visited)?;
        Ok(tree)
    }

    fn parse_table(
        &mut self, image: &[u8], base_address: u32, directory_offset: u32,
        path: &mut Vec<ResourceName>, visited: &mut IndexSet<u32, RandomState>,
    ) -> Result<(), ImageReadError> {
        // every table is read once, shared subdirectories would multiply the leaves
        if !visited.insert(directory_offset) {
            return Err(ImageReadError::InvalidSection(format!(
                "resource directory table at {:#x} referenced more than once",
                directory_offset
            )));
        }
        let level = path.len();
        let table_offset = base_address as usize + directory_offset as usize;
        let table = read_at::<ResourceDirectoryTable>(image, table_offset)?;
        trace!("{} {:#x?}", "--".repeat(level + 1), table);

        let count = table.number_of_name_entries as usize + table.number_of_id_entries as usize;
        for index in 0..count {
            let entry = read_at::<ResourceDirectoryEntry>(image, table_offset + 16 + index * 8)?;
            trace!("{} {:#x?}", "--".repeat(level + 1), entry);
            let name = ResourceName::parse(image, base_address, entry.name_offset_or_integer_id)?;
            let offset = entry.data_entry_or_subdirectory_offset;

            if offset & SUBDIRECTORY_FLAG != 0 {
                if level + 1 >= RESOURCE_LEVELS {
                    return Err(ImageReadError::InvalidSection(format!(
                        "resource directory nested deeper than {} levels",
                        RESOURCE_LEVELS
                    )));
                }
                path.push(name);
                self.parse_table(image, base_address, offset ^ SUBDIRECTORY_FLAG, path, visited)?;
                path.pop();
                continue;
            }

            let language = match (level + 1 == RESOURCE_LEVELS, &name) {
                (true, ResourceName::ID(id)) if *id <= LANGID::MAX as u32 => *id as LANGID,
                _ => {
                    warn!(
                        "{} resource data entry {} at level {} is not a language entry, ignoring",
                        "--".repeat(level + 1),
                        name,
                        level
                    );
                    continue;
                }
            };

            let data = read_at::<ResourceDataEntry>(image, base_address as usize + offset as usize)?;
            // calculate as i64 and convert to u64 first to check for padding
            let address = base_address as i64 + data.data_rva as i64 - self.virtual_address as i64;
            let mut address = address as u64;
            if address & 0xffffffffff000000 == 0xffffffffff000000 {
                warn!(
                    "{} resource data entry address {:#x?} seems to be packed, ignoring padding",
                    "--".repeat(level + 1),
                    address
                );
                address ^= 0xffffffffff000000;
            }
            trace!("{} {:#x?} {:#x?}", "--".repeat(level + 1), address, data);
            let Ok(bytes) = slice_at(image, address as usize, data.size as usize) else {
                error!(
                    "{} resource data entry address {:#x?} with size {:#x?} outside valid range ({:#x?})",
                    "--".repeat(level + 1),
                    address,
                    data.size,
                    image.len()
                );
                continue;
            };

            let key = ResourceKey {
                kind: path[0].clone(),
                name: path[1].clone(),
                language,
            };
            self.entries.insert(key, ResourceData {
                data:     bytes.to_vec().into(),
                codepage: data.codepage,
                reserved: data.reserved,
            });
        }
        Ok(())
    }

    fn nested(&self) -> Nested<'_> {
        let mut nested = Nested::new();
        for (key, data) in &self.entries {
            nested
                .entry(&key.kind)
                .or_default()
                .entry(&key.name)
                .or_default()
                .insert(key.language, data);
        }
        nested
    }

    fn table_header<'n, I: Iterator<Item = &'n ResourceName>>(&self, names: I) -> ResourceDirectoryTable {
        let mut header = self.header;
        header.number_of_name_entries = 0;
        header.number_of_id_entries = 0;
        for name in names {
            match name {
                ResourceName::Name(_) => header.number_of_name_entries += 1,
                ResourceName::ID(_) => header.number_of_id_entries += 1,
            }
        }
        header
    }

    /// Build the resource directory into raw bytes to be included in an image.
    /// The virtual address is used to compute the resource data offsets and has to correspond to the virtual address in the section table header of the target image.
    ///
    /// The layout is: directory tables breadth first, name strings, data descriptions, data.
    pub fn build(&self, virtual_address: u32) -> Vec<u8> {
        let nested = self.nested();
        let layout = Layout::compute(&nested);

        let mut tables = Vec::with_capacity(layout.strings_offset);
        let mut strings = Vec::new();
        let mut descriptions = Vec::new();
        let mut data = Vec::new();

        // root table, pointing to one table per type
        let mut type_table_offset = table_size(nested.len());
        let mut language_table_offset =
            type_table_offset + nested.values().map(|names| table_size(names.len())).sum::<usize>();
        tables.extend_from_slice(self.table_header(nested.keys().copied()).as_bytes());
        for (kind, names) in &nested {
            let name = name_field(kind, layout.strings_offset, &mut strings);
            push_entry(&mut tables, name, type_table_offset as u32 | SUBDIRECTORY_FLAG);
            type_table_offset += table_size(names.len());
        }

        // type tables, pointing to one table per name
        for names in nested.values() {
            tables.extend_from_slice(self.table_header(names.keys().copied()).as_bytes());
            for (name, languages) in names {
                let name = name_field(name, layout.strings_offset, &mut strings);
                push_entry(&mut tables, name, language_table_offset as u32 | SUBDIRECTORY_FLAG);
                language_table_offset += table_size(languages.len());
            }
        }

        // language tables, pointing to the data descriptions
        let mut description_offset = layout.descriptions_offset;
        for languages in nested.values().flat_map(|names| names.values()) {
            let ids = languages.keys().map(|&language| ResourceName::ID(language as u32)).collect::<Vec<_>>();
            tables.extend_from_slice(self.table_header(ids.iter()).as_bytes());
            for (&language, resource) in languages {
                push_entry(&mut tables, language as u32, description_offset as u32);
                description_offset += 16;

                pad_to(&mut data, DATA_ALIGNMENT);
                let description = ResourceDataEntry {
                    data_rva: virtual_address + (layout.data_offset + data.len()) as u32,
                    size:     resource.data.len() as u32,
                    codepage: resource.codepage,
                    reserved: resource.reserved,
                };
                descriptions.extend_from_slice(description.as_bytes());
                data.extend_from_slice(&resource.data);
            }
        }

        let mut result = tables;
        result.extend(strings);
        result.resize(layout.descriptions_offset, 0);
        result.extend(descriptions);
        result.resize(layout.data_offset, 0);
        result.extend(data);
        debug_assert_eq!(result.len(), layout.size, "built resource size equals computed size");
        result
    }

    /// Returns the size of the resulting resource directory in bytes.
    pub fn size(&self) -> usize { Layout::compute(&self.nested()).size }

    /// Returns the virtual address of the resource directory in the source image.
    pub fn virtual_address(&self) -> u32 { self.virtual_address }

    /// Returns the entries in the tree.
    pub fn entries(&self) -> &IndexMap<ResourceKey, ResourceData, RandomState> { &self.entries }

    /// Returns the mutable entries in the tree.
    pub fn entries_mut(&mut self) -> &mut IndexMap<ResourceKey, ResourceData, RandomState> {
        &mut self.entries
    }

    /// Get a resource entry from the tree.
    pub fn get<K: Borrow<ResourceKey>>(&self, key: K) -> Option<&ResourceData> {
        self.entries.get(key.borrow())
    }

    /// Insert a resource entry into the tree.
    /// If an entry with the given key already exists, it will be replaced.
    /// # Returns
    /// The replaced entry.
    pub fn insert(&mut self, key: ResourceKey, data: ResourceData) -> Option<ResourceData> {
        self.entries.insert(key, data)
    }

    /// Remove a resource entry from the tree, keeping the order of the remaining entries.
    /// # Returns
    /// The removed entry.
    pub fn remove<K: Borrow<ResourceKey>>(&mut self, key: K) -> Option<ResourceData> {
        self.entries.shift_remove(key.borrow())
    }

    /// Returns the keys of all entries of the given type in loader order.
    pub fn keys_of_kind(&self, kind: &ResourceName) -> Vec<&ResourceKey> {
        let mut keys = self.entries.keys().filter(|key| &key.kind == kind).collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Returns the smallest id above all numeric ids used by entries of the given type.
    pub fn next_free_id(&self, kind: &ResourceName) -> Result<u16, ResourceError> {
        let max = self
            .entries
            .keys()
            .filter(|key| &key.kind == kind)
            .filter_map(|key| key.name.id())
            .max()
            .unwrap_or(0);
        u16::try_from(max + 1).map_err(|_| ResourceError::ResourceIdsExhausted)
    }

    /// Returns the number of entries in the tree.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns whether the tree has no entries.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

type Nested<'a> =
    BTreeMap<&'a ResourceName, BTreeMap<&'a ResourceName, BTreeMap<LANGID, &'a ResourceData>>>;

fn table_size(entries: usize) -> usize { 16 + entries * 8 }

fn name_field(name: &ResourceName, strings_offset: usize, strings: &mut Vec<u8>) -> u32 {
    match name {
        ResourceName::ID(id) => *id,
        ResourceName::Name(units) => {
            let offset = (strings_offset + strings.len()) as u32;
            strings.extend((units.len() as u16).to_le_bytes());
            strings.extend(units.iter().flat_map(|c| c.to_le_bytes()));
            offset | NAME_FLAG
        }
    }
}

fn push_entry(tables: &mut Vec<u8>, name_offset_or_integer_id: u32, data_entry_or_subdirectory_offset: u32) {
    let entry = ResourceDirectoryEntry {
        name_offset_or_integer_id,
        data_entry_or_subdirectory_offset,
    };
    tables.extend_from_slice(entry.as_bytes());
}

/// Offsets of the regions of a built resource directory.
struct Layout {
    strings_offset:      usize,
    descriptions_offset: usize,
    data_offset:         usize,
    size:                usize,
}
impl Layout {
    fn compute(nested: &Nested) -> Self {
        let mut tables_size = table_size(nested.len());
        let mut strings_size = 0;
        let mut leaves = 0;
        let mut data_size = 0;
        for (kind, names) in nested {
            tables_size += table_size(names.len());
            strings_size += kind.string_size();
            for (name, languages) in names {
                tables_size += table_size(languages.len());
                strings_size += name.string_size();
                leaves += languages.len();
                for resource in languages.values() {
                    data_size = aligned_to(data_size, DATA_ALIGNMENT) + resource.data.len();
                }
            }
        }
        let descriptions_offset = aligned_to(tables_size + strings_size, 4);
        let data_offset = aligned_to(descriptions_offset + leaves * 16, DATA_ALIGNMENT);
        Self {
            strings_offset: tables_size,
            descriptions_offset,
            data_offset,
            size: data_offset + data_size,
        }
    }
}
