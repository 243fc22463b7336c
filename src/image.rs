//! Portable executable image representation.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format> for more information.

use std::{borrow::Cow, path::Path};

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

const SECTION_HEADER_SIZE: u64 = 40;
const DATA_DIRECTORY_SIZE: u64 = 8;
const MAX_DATA_DIRECTORIES: u32 = 16;

/// Image data directory type enumeration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataDirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TLSTable,
    LoadConfigTable,
    BoundImport,
    IAT,
    DelayImportDescriptor,
    CLRRuntimeHeader,
    Reserved,
}
impl DataDirectoryType {
    const ALL: [DataDirectoryType; MAX_DATA_DIRECTORIES as usize] = {
        use DataDirectoryType::*;
        [
            ExportTable,
            ImportTable,
            ResourceTable,
            ExceptionTable,
            CertificateTable,
            BaseRelocationTable,
            Debug,
            Architecture,
            GlobalPtr,
            TLSTable,
            LoadConfigTable,
            BoundImport,
            IAT,
            DelayImportDescriptor,
            CLRRuntimeHeader,
            Reserved,
        ]
    };
}

// where the rebuilt resource directory goes
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Placement {
    // overwrite the existing directory inside its section
    InPlace { section: usize, available: usize },
    // grow the last section of the image
    Extend { section: usize },
    // add a new section after all others
    Append,
}

/// Portable executable image representation.
///
/// This struct is the main entry point for parsing, querying and updating a portable executable image.
/// Data that is not part of the resource directory is preserved when the resource tree is replaced,
/// including any overlay after the last section.
#[derive(Debug, Clone)]
pub struct Image<'a> {
    pub(crate) image: Cow<'a, [u8]>,

    pub(crate) coff_header:           CoffHeader,
    pub(crate) standard_header:       StandardHeader,
    pub(crate) windows_header:        GenericWindowsHeader,
    pub(crate) header_data_directory: IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
    pub(crate) section_table:         Vec<SectionHeader>,

    pub(crate) resource_tree: Option<ResourceTree>,

    coff_header_offset:        u64,
    windows_header_offset:     u64,
    checksum_offset:           u64,
    optional_header_dd_offset: u64,
    section_table_offset:      u64,
}

impl PartialEq for Image<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.coff_header == other.coff_header
            && self.standard_header == other.standard_header
            && self.windows_header == other.windows_header
            && self.header_data_directory == other.header_data_directory
            && self.section_table == other.section_table
            && self.resource_tree == other.resource_tree
    }
}
impl Eq for Image<'_> {}

impl<'a> Image<'a> {
    /// Parse a portable executable image from a byte slice.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the byte slice is not a valid portable executable image or is missing required headers.
    /// A missing resource section is not an error, see [`Image::resource_tree`].
    pub fn parse<R: Into<Cow<'a, [u8]>>>(image: R) -> Result<Self, ImageReadError> {
        let image = image.into();

        let pe_dos_magic = read_at::<u16>(&image, 0)?;
        debug!("pe_dos_magic: {:#x?}", pe_dos_magic);
        if pe_dos_magic != PE_DOS_MAGIC {
            return Err(ImageReadError::InvalidHeader("no dos magic".into()));
        }

        let pe_signature_offset = read_at::<u32>(&image, PE_PTR_OFFSET as usize)?;
        debug!("pe_signature_offset: {:#x?}", pe_signature_offset);

        let pe_signature = read_at::<u32>(&image, pe_signature_offset as usize)?;
        debug!("pe_signature: {:#x?}", pe_signature);
        if pe_signature != PE_NT_SIGNATURE {
            return Err(ImageReadError::InvalidHeader("no pe signature".into()));
        }

        let coff_header_offset = pe_signature_offset as u64 + 4;
        let coff_header = read_at::<CoffHeader>(&image, coff_header_offset as usize)?;
        debug!("{:#x?}: {:#x?}", coff_header_offset, coff_header);
        if coff_header.size_of_optional_header < 24 {
            return Err(ImageReadError::InvalidHeader("optional header too small".into()));
        }

        let standard_header_offset = coff_header_offset + 20;
        let standard_header = read_at::<StandardHeader>(&image, standard_header_offset as usize)?;
        debug!("{:#x?}: {:#x?}", standard_header_offset, standard_header);

        let (windows_header_offset, windows_header, optional_header_dd_offset) = {
            if standard_header.magic == PE_32_MAGIC && coff_header.size_of_optional_header >= 96 {
                let windows_header_offset = standard_header_offset + 28;
                let windows_header = read_at::<WindowsHeader<u32>>(&image, windows_header_offset as usize)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader32(windows_header),
                    standard_header_offset + 96,
                )
            } else if standard_header.magic == PE_64_MAGIC && coff_header.size_of_optional_header >= 112 {
                let windows_header_offset = standard_header_offset + 24;
                let windows_header = read_at::<WindowsHeader<u64>>(&image, windows_header_offset as usize)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader64(windows_header),
                    standard_header_offset + 112,
                )
            } else {
                return Err(ImageReadError::InvalidHeader("invalid optional header".into()));
            }
        };
        debug!("{:#x?}: {:#x?}", windows_header_offset, windows_header);

        let section_table_offset = standard_header_offset + coff_header.size_of_optional_header as u64;
        // never read data directories overlapping the section table
        let number_of_rva_and_sizes = windows_header
            .number_of_rva_and_sizes()
            .min(MAX_DATA_DIRECTORIES)
            .min(((section_table_offset - optional_header_dd_offset) / DATA_DIRECTORY_SIZE) as u32);
        if number_of_rva_and_sizes <= DataDirectoryType::ResourceTable as u32 {
            return Err(ImageReadError::InvalidHeader(format!(
                "{} data directories, no resource table entry",
                number_of_rva_and_sizes
            )));
        }

        debug!("optional_header_dd_offset: {:#x?}", optional_header_dd_offset);
        let mut header_data_directory =
            IndexMap::<DataDirectoryType, ImageDataDirectory, _>::with_hasher(RandomState::new());
        let directories = DataDirectoryType::ALL.iter().enumerate().take(number_of_rva_and_sizes as usize);
        for (index, &header) in directories {
            let offset = optional_header_dd_offset + index as u64 * DATA_DIRECTORY_SIZE;
            let data = read_at::<ImageDataDirectory>(&image, offset as usize)?;
            header_data_directory.insert(header, data);
            debug!("{:#x?}: {:?}: {:#x?}", offset, header, data);
        }

        let mut section_table = Vec::with_capacity(coff_header.number_of_sections as usize);
        for index in 0..coff_header.number_of_sections as u64 {
            let offset = section_table_offset + index * SECTION_HEADER_SIZE;
            let section_header = read_at::<SectionHeader>(&image, offset as usize)?;
            debug!(
                "{:#x?}: {}: {:#x?}",
                offset,
                section_header.name().unwrap_or("?".to_string()),
                section_header
            );
            if section_header.size_of_raw_data > 0 && section_header.raw_end() > image.len() as u64 {
                return Err(ImageReadError::InvalidSection(format!(
                    "section {} ends at {:#x} beyond the image size {:#x}",
                    section_header.name().unwrap_or("?".to_string()),
                    section_header.raw_end(),
                    image.len()
                )));
            }
            section_table.push(section_header);
        }

        let mut resource_tree = None;
        if let Some(resource_data) = header_data_directory.get(&DataDirectoryType::ResourceTable) {
            if resource_data.virtual_address > 0 && resource_data.size > 0 {
                let section = section_table
                    .iter()
                    .find(|section| section.contains_virtual_address(resource_data.virtual_address));
                match section {
                    Some(section) => {
                        debug!(
                            "found resource directory in {} section: {:#x?}",
                            section.name().unwrap_or("?".to_string()),
                            section
                        );
                        let base_address = section
                            .pointer_to_raw_data
                            .saturating_add(resource_data.virtual_address - section.virtual_address);
                        resource_tree =
                            Some(ResourceTree::parse(&image, base_address, resource_data.virtual_address)?);
                    }
                    None => {
                        return Err(ImageReadError::InvalidSection(format!(
                            "resource directory at {:#x} is not inside any section",
                            { resource_data.virtual_address }
                        )))
                    }
                }
            }
        }

        Ok(Self {
            image,
            coff_header,
            standard_header,
            windows_header,
            header_data_directory,
            section_table,
            resource_tree,
            coff_header_offset,
            windows_header_offset,
            checksum_offset: standard_header_offset + PE_CHECKSUM_OFFSET as u64,
            optional_header_dd_offset,
            section_table_offset,
        })
    }

    /// Parse a portable executable image from a file.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the file could not be read, is not a valid portable executable image or is missing required headers.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ImageReadError> {
        let data = std::fs::read(path)?;
        Self::parse(data)
    }

    /// Write the portable executable image to a file.
    ///
    /// The image is written to a temporary file next to the destination first and moved into place,
    /// an existing file at the destination is either fully replaced or left untouched.
    /// An existing destination keeps its permissions, a new file is created executable (`0o755` on unix).
    ///
    /// # Returns
    /// Returns an error if the file could not be written.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ImageWriteError> {
        write_atomically(path.as_ref(), &self.image, None).map_err(|e| e.into())
    }

    /// Set the resource tree of the image.
    ///
    /// This will update the resource data directory and the resource section.
    /// The rebuilt directory is placed, in order of preference:
    /// - In place, if it fits into the space of the existing directory and its section is not shared with other data directories.
    /// - At the end of the existing section, if the directory is the last data of the last section of the image.
    /// - Into a new `.rsrc` section after all other sections, keeping the existing section intact.
    ///
    /// Raw section sizes stay multiples of the file alignment and the image size is recomputed.
    /// Data after the last section is preserved, except an embedded signature, which is invalidated by any change and dropped.
    /// If the image had a checksum, it is recomputed.
    ///
    /// # Returns
    /// Returns the previous resource tree, or an error in the following cases:
    /// - Returns an error if there is not enough space in the image header to add a new section.
    /// - Returns an error if a section points to data outside the image.
    ///
    /// On error the image is left unchanged.
    pub fn set_resource_tree(
        &mut self, resource_tree: ResourceTree,
    ) -> Result<Option<ResourceTree>, ImageWriteError> {
        // copy to-be-modified data to allow erroring out without invalidating the image
        let mut coff_header = self.coff_header;
        let mut windows_header = self.windows_header;
        let mut header_data_directory = self.header_data_directory.clone();
        let mut section_table = self.section_table.clone();

        let file_alignment = windows_header.file_alignment() as u64;
        let section_alignment = windows_header.section_alignment() as u64;
        let section_table_end = self.section_table_offset + section_table.len() as u64 * SECTION_HEADER_SIZE;

        let sections_end = section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(SectionHeader::raw_end)
            .max()
            .unwrap_or(section_table_end)
            .max(windows_header.size_of_headers() as u64);
        if sections_end > self.image.len() as u64 {
            return Err(ImageWriteError::InvalidSectionRange(sections_end, self.image.len() as u64));
        }

        let new_size = resource_tree.size();
        if new_size > u32::MAX as usize {
            return Err(ImageWriteError::ResourceDirectoryTooLarge(new_size as u64));
        }

        let resource_data = header_data_directory
            .get(&DataDirectoryType::ResourceTable)
            .copied()
            .unwrap_or_default();
        let placement = self.placement(&section_table, &resource_data, sections_end, new_size);
        debug!("placing {:#x} bytes of resource directory: {:?}", new_size, placement);

        let mut new_image = self.image[..sections_end as usize].to_vec();
        let virtual_address = match placement {
            Placement::InPlace { section, available } => {
                let header = &mut section_table[section];
                let offset_in_section = (resource_data.virtual_address - header.virtual_address) as usize;
                let start = header.pointer_to_raw_data as usize + offset_in_section;
                new_image[start..start + available].fill(0);
                let built = resource_tree.build(resource_data.virtual_address);
                new_image[start..start + new_size].copy_from_slice(&built);
                header.virtual_size = header.virtual_size.max((offset_in_section + new_size) as u32);
                resource_data.virtual_address
            }
            Placement::Extend { section } => {
                let header = &mut section_table[section];
                let offset_in_section = (resource_data.virtual_address - header.virtual_address) as usize;
                let start = header.pointer_to_raw_data as usize + offset_in_section;
                new_image.truncate(start);
                new_image.extend(resource_tree.build(resource_data.virtual_address));
                let raw_size = aligned_to((offset_in_section + new_size) as u64, file_alignment);
                new_image.resize(header.pointer_to_raw_data as usize + raw_size as usize, 0);
                header.size_of_raw_data = raw_size as u32;
                header.virtual_size = header.virtual_size.max((offset_in_section + new_size) as u32);
                resource_data.virtual_address
            }
            Placement::Append => {
                let header_end = section_table_end + SECTION_HEADER_SIZE;
                let header_space = self.image.get(section_table_end as usize..header_end as usize);
                if header_end > self.header_space_end(&section_table)
                    || header_space.map_or(true, |bytes| bytes.iter().any(|&b| b != 0))
                {
                    return Err(ImageWriteError::NotEnoughSpaceInHeader);
                }
                let virtual_address = aligned_to(
                    section_table.iter().map(SectionHeader::virtual_end).max().unwrap_or(section_alignment),
                    section_alignment,
                );
                if virtual_address + new_size as u64 > u32::MAX as u64 {
                    return Err(ImageWriteError::ResourceDirectoryTooLarge(new_size as u64));
                }
                let pointer_to_raw_data = aligned_to(sections_end, file_alignment);
                let raw_size = aligned_to(new_size as u64, file_alignment);
                new_image.resize(pointer_to_raw_data as usize, 0);
                new_image.extend(resource_tree.build(virtual_address as u32));
                new_image.resize((pointer_to_raw_data + raw_size) as usize, 0);

                section_table.push(SectionHeader {
                    name: u64::from_le_bytes(*RESOURCE_SECTION_NAME),
                    virtual_size: new_size as u32,
                    virtual_address: virtual_address as u32,
                    size_of_raw_data: raw_size as u32,
                    pointer_to_raw_data: pointer_to_raw_data as u32,
                    characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
                    ..Default::default()
                });
                coff_header.number_of_sections += 1;
                virtual_address as u32
            }
        };
        header_data_directory.insert(DataDirectoryType::ResourceTable, ImageDataDirectory {
            virtual_address,
            size: new_size as u32,
        });

        let mut overlay = &self.image[sections_end as usize..];
        if let Some(certificate) = header_data_directory.get_mut(&DataDirectoryType::CertificateTable) {
            if certificate.size > 0 {
                // the certificate table address is a file offset
                let start = certificate.virtual_address as u64;
                let end = start + certificate.size as u64;
                warn!(
                    "image is signed, dropping the signature at {:#x}..{:#x} invalidated by the modification",
                    start, end
                );
                if start >= sections_end && end == self.image.len() as u64 {
                    overlay = &overlay[..(start - sections_end) as usize];
                } else if start >= sections_end && end < self.image.len() as u64 {
                    warn!("signature is not at the end of the image, keeping its bytes");
                }
                *certificate = ImageDataDirectory::default();
            }
        }
        if !overlay.is_empty() {
            debug!("preserving {:#x} bytes of overlay", overlay.len());
            new_image.extend_from_slice(overlay);
        }

        let size_of_image = aligned_to(
            section_table.iter().map(SectionHeader::virtual_end).max().unwrap_or(0),
            section_alignment,
        );
        windows_header.set_size_of_image(size_of_image as u32);

        let coff_header_offset = self.coff_header_offset as usize;
        new_image[coff_header_offset..coff_header_offset + 20].copy_from_slice(coff_header.as_bytes());
        for (index, data_directory) in header_data_directory.values().enumerate() {
            let offset = (self.optional_header_dd_offset + index as u64 * DATA_DIRECTORY_SIZE) as usize;
            let end = offset + DATA_DIRECTORY_SIZE as usize;
            new_image[offset..end].copy_from_slice(data_directory.as_bytes());
        }
        for (index, section) in section_table.iter().enumerate() {
            let offset = (self.section_table_offset + index as u64 * SECTION_HEADER_SIZE) as usize;
            new_image[offset..offset + SECTION_HEADER_SIZE as usize].copy_from_slice(section.as_bytes());
        }

        if windows_header.check_sum() != 0 {
            write_windows_header(&mut new_image, self.windows_header_offset, &windows_header);
            let check_sum = pe_checksum(&new_image, self.checksum_offset as usize);
            debug!("updating checksum {:#x} -> {:#x}", self.windows_header.check_sum(), check_sum);
            windows_header.set_check_sum(check_sum);
        }
        write_windows_header(&mut new_image, self.windows_header_offset, &windows_header);

        info!(
            "rebuilt resource directory with {} entries at {:#x} ({:#x} bytes)",
            resource_tree.len(),
            virtual_address,
            new_size
        );
        self.coff_header = coff_header;
        self.windows_header = windows_header;
        self.header_data_directory = header_data_directory;
        self.section_table = section_table;
        self.image = new_image.into();

        // keep the tree as it would be parsed from the new image
        let mut resource_tree = resource_tree;
        resource_tree.virtual_address = virtual_address;
        Ok(self.resource_tree.replace(resource_tree))
    }

    fn placement(
        &self, section_table: &[SectionHeader], resource_data: &ImageDataDirectory, sections_end: u64,
        new_size: usize,
    ) -> Placement {
        if resource_data.virtual_address == 0 || resource_data.size == 0 {
            return Placement::Append;
        }
        let Some(index) = section_table
            .iter()
            .position(|section| section.contains_virtual_address(resource_data.virtual_address))
        else {
            return Placement::Append;
        };
        let section = &section_table[index];

        let shared = self.header_data_directory.iter().any(|(kind, directory)| {
            *kind != DataDirectoryType::ResourceTable
                && *kind != DataDirectoryType::CertificateTable
                && directory.size > 0
                && section.contains_virtual_address(directory.virtual_address)
        });
        if shared {
            warn!(
                "section {} is shared with other data directories, adding a new resource section",
                section.name().unwrap_or("?".to_string())
            );
            return Placement::Append;
        }

        let offset_in_section = (resource_data.virtual_address - section.virtual_address) as u64;
        let old_end = offset_in_section + resource_data.size as u64;
        let raw_size = section.size_of_raw_data as u64;
        if old_end > raw_size {
            return Placement::Append;
        }
        // the directory owns the rest of the section when only zeros follow it
        let is_tail = self
            .image
            .get((section.pointer_to_raw_data as u64 + old_end) as usize..section.raw_end() as usize)
            .is_some_and(|rest| rest.iter().all(|&b| b == 0));
        let available = if is_tail { raw_size - offset_in_section } else { resource_data.size as u64 };

        if new_size as u64 <= available {
            let new_virtual_end = section.virtual_address as u64 + offset_in_section + new_size as u64;
            let next_section = section_table
                .iter()
                .map(|other| other.virtual_address as u64)
                .filter(|&address| address > section.virtual_address as u64)
                .min();
            if next_section.map_or(true, |next| new_virtual_end <= next) {
                return Placement::InPlace {
                    section:   index,
                    available: available as usize,
                };
            }
        }

        let is_last_in_file = section.raw_end() == sections_end;
        let is_last_in_memory =
            section_table.iter().all(|other| other.virtual_end() <= section.virtual_end());
        if is_tail && is_last_in_file && is_last_in_memory {
            return Placement::Extend { section: index };
        }
        Placement::Append
    }

    // first byte after the header region that must not be overwritten
    fn header_space_end(&self, section_table: &[SectionHeader]) -> u64 {
        section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(|section| section.pointer_to_raw_data as u64)
            .min()
            .unwrap_or(self.windows_header.size_of_headers() as u64)
            .min(self.windows_header.size_of_headers() as u64)
    }

    /// Returns the resource tree of the image.
    ///
    /// # Returns
    /// Returns an error if the image has no resource section.
    pub fn resource_tree(&self) -> Result<&ResourceTree, ResourceError> {
        self.resource_tree.as_ref().ok_or(ResourceError::MissingResourceSection)
    }

    /// Returns the raw image data with all changes applied.
    pub fn data(&self) -> &[u8] { &self.image }

    /// Returns the raw image data with all changes applied, consuming the image.
    pub fn into_data(self) -> Vec<u8> { self.image.into_owned() }

    /// Returns the checksum computed over the current image data.
    pub fn compute_checksum(&self) -> u32 { pe_checksum(&self.image, self.checksum_offset as usize) }

    /// Returns the parsed coff header.
    pub fn coff_header(&self) -> &CoffHeader { &self.coff_header }

    /// Returns the parsed standard header.
    pub fn standard_header(&self) -> &StandardHeader { &self.standard_header }

    /// Returns the parsed windows header.
    pub fn windows_header(&self) -> &GenericWindowsHeader { &self.windows_header }

    /// Returns the data directory for the requested header.
    pub fn data_directory(&self, directory: DataDirectoryType) -> Option<&ImageDataDirectory> {
        self.header_data_directory.get(&directory)
    }

    /// Returns the section header containing the data directory.
    pub fn section_header_for_data_directory(&self, directory: DataDirectoryType) -> Option<&SectionHeader> {
        let data_directory = self.data_directory(directory)?;
        if data_directory.size == 0 {
            return None;
        }
        self.section_table
            .iter()
            .find(|section| section.contains_virtual_address(data_directory.virtual_address))
    }

    /// Returns all section tables existing in the image.
    pub fn section_table(&self) -> &[SectionHeader] { &self.section_table }

    /// Returns the `Image` with all data cloned into owned memory.
    pub fn cloned(&self) -> Image<'static> {
        Image {
            image:                     self.image.clone().into_owned().into(),
            coff_header:               self.coff_header,
            standard_header:           self.standard_header,
            windows_header:            self.windows_header,
            header_data_directory:     self.header_data_directory.clone(),
            section_table:             self.section_table.clone(),
            resource_tree:             self.resource_tree.clone(),
            coff_header_offset:        self.coff_header_offset,
            windows_header_offset:     self.windows_header_offset,
            checksum_offset:           self.checksum_offset,
            optional_header_dd_offset: self.optional_header_dd_offset,
            section_table_offset:      self.section_table_offset,
        }
    }
}

fn write_windows_header(image: &mut [u8], offset: u64, header: &GenericWindowsHeader) {
    let bytes = header.as_bytes();
    image[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
}

/// Compute the image checksum the way the loader verifies it:
/// a 16-bit one's complement sum over the image with the checksum field skipped, plus the image length.
pub fn pe_checksum(image: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    for (index, chunk) in image.chunks(2).enumerate() {
        let offset = index * 2;
        if offset == checksum_offset || offset == checksum_offset + 2 {
            continue;
        }
        let word = match *chunk {
            [low, high] => u16::from_le_bytes([low, high]),
            [low] => low as u16,
            _ => 0,
        };
        sum += word as u64;
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum = (sum & 0xffff) + (sum >> 16);
    (sum as u32).wrapping_add(image.len() as u32)
}
