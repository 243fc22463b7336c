//! Synthetic executables and icon files for the integration tests.
#![allow(dead_code)]

use std::sync::Once;

use pestamp::{constants::*, types::*, *};
use zerocopy::IntoBytes;

pub const FILE_ALIGNMENT: u32 = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;
pub const PE_OFFSET: usize = 0x80;
pub const OPTIONAL_HEADER_OFFSET: usize = PE_OFFSET + 4 + 20;
pub const CHECKSUM_OFFSET: usize = OPTIONAL_HEADER_OFFSET + 64;
const SIZE_OF_HEADERS: u32 = 0x400;

static INIT_LOGGER: Once = Once::new();
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            .is_test(false)
            .filter_level(log::LevelFilter::Info)
            .format_timestamp(None)
            .format_module_path(false)
            .format_level(true)
            .format_target(false)
            .write_style(env_logger::WriteStyle::Auto)
            .init();
    });
}

/// Builder for a minimal PE32+ or PE32 executable with a code section, an optional resource section,
/// an optional relocation section after it and optional overlay data.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    pub pe32:           bool,
    pub code_size:      usize,
    pub resources:      Option<ResourceTree>,
    /// Assembles the raw resource directory for the given virtual address instead of building `resources`.
    pub raw_resources:  Option<fn(u32) -> Vec<u8>>,
    pub resource_slack: usize,
    pub reloc_section:  bool,
    pub overlay:        Vec<u8>,
    pub checksum:       bool,
    pub signature:      Option<Vec<u8>>,
}
impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            pe32:           false,
            code_size:      0x600,
            resources:      Some(sample_resources()),
            raw_resources:  None,
            resource_slack: 0,
            reloc_section:  false,
            overlay:        Vec::new(),
            checksum:       false,
            signature:      None,
        }
    }
}
impl ImageBuilder {
    fn optional_header_size(&self) -> usize { if self.pe32 { 96 + 16 * 8 } else { 112 + 16 * 8 } }

    pub fn build(&self) -> Vec<u8> {
        let mut data = vec![0u8; SIZE_OF_HEADERS as usize];
        let mut sections = Vec::new();
        let mut directories = [ImageDataDirectory::default(); 16];

        let code = code(self.code_size);
        sections.push(add_section(&mut data, b".text\0\0\0", &code, SECTION_ALIGNMENT, 0x60000020));

        let virtual_address = next_section_address(&sections);
        let content = match (self.raw_resources, &self.resources) {
            (Some(assemble), _) => Some(assemble(virtual_address)),
            (None, Some(resources)) => Some(resources.build(virtual_address)),
            (None, None) => None,
        };
        if let Some(mut content) = content {
            directories[2] = ImageDataDirectory {
                virtual_address,
                size: content.len() as u32,
            };
            content.resize(content.len() + self.resource_slack, 0);
            sections.push(add_section(
                &mut data,
                RESOURCE_SECTION_NAME,
                &content,
                virtual_address,
                IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
            ));
            // the slack is raw space, not part of the directory
            if let Some(section) = sections.last_mut() {
                section.virtual_size -= self.resource_slack as u32;
            }
        }

        if self.reloc_section {
            let virtual_address = next_section_address(&sections);
            directories[5] = ImageDataDirectory {
                virtual_address,
                size: 0x20,
            };
            sections.push(add_section(&mut data, b".reloc\0\0", &[0xA5; 0x20], virtual_address, 0x42000040));
        }

        data.extend_from_slice(&self.overlay);
        if let Some(signature) = &self.signature {
            data.resize(aligned(data.len() as u32, 8) as usize, 0);
            directories[4] = ImageDataDirectory {
                virtual_address: data.len() as u32,
                size: signature.len() as u32,
            };
            data.extend_from_slice(signature);
        }

        data[0..2].copy_from_slice(&PE_DOS_MAGIC.to_le_bytes());
        write(&mut data, PE_PTR_OFFSET as usize, &(PE_OFFSET as u32).to_le_bytes());
        data[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(&PE_NT_SIGNATURE.to_le_bytes());

        let coff_header = CoffHeader {
            machine: if self.pe32 { 0x14c } else { 0x8664 },
            number_of_sections: sections.len() as u16,
            size_of_optional_header: self.optional_header_size() as u16,
            characteristics: if self.pe32 { 0x102 } else { 0x22 },
            ..Default::default()
        };
        write(&mut data, PE_OFFSET + 4, coff_header.as_bytes());

        let standard_header = StandardHeader {
            magic: if self.pe32 { PE_32_MAGIC } else { PE_64_MAGIC },
            size_of_code: sections[0].size_of_raw_data,
            address_of_entry_point: SECTION_ALIGNMENT,
            base_of_code: SECTION_ALIGNMENT,
            ..Default::default()
        };
        write(&mut data, OPTIONAL_HEADER_OFFSET, standard_header.as_bytes());

        let size_of_image = next_section_address(&sections);
        let data_directories_offset = if self.pe32 {
            // base of data precedes the windows header in PE32 images
            let base_of_data = sections.get(1).map_or(0, |section| section.virtual_address);
            write(&mut data, OPTIONAL_HEADER_OFFSET + 24, &base_of_data.to_le_bytes());
            let windows_header = WindowsHeader::<u32> {
                image_base: 0x400000,
                size_of_stack_reserve: 0x100000,
                size_of_stack_commit: 0x1000,
                size_of_heap_reserve: 0x100000,
                size_of_heap_commit: 0x1000,
                ..windows_header_fields(size_of_image)
            };
            write(&mut data, OPTIONAL_HEADER_OFFSET + 28, windows_header.as_bytes());
            OPTIONAL_HEADER_OFFSET + 96
        } else {
            let windows_header = WindowsHeader::<u64> {
                image_base: 0x140000000,
                size_of_stack_reserve: 0x100000,
                size_of_stack_commit: 0x1000,
                size_of_heap_reserve: 0x100000,
                size_of_heap_commit: 0x1000,
                ..windows_header_fields(size_of_image)
            };
            write(&mut data, OPTIONAL_HEADER_OFFSET + 24, windows_header.as_bytes());
            OPTIONAL_HEADER_OFFSET + 112
        };

        for (index, directory) in directories.iter().enumerate() {
            write(&mut data, data_directories_offset + index * 8, directory.as_bytes());
        }
        let section_table_offset = OPTIONAL_HEADER_OFFSET + self.optional_header_size();
        for (index, section) in sections.iter().enumerate() {
            write(&mut data, section_table_offset + index * 40, section.as_bytes());
        }

        if self.checksum {
            let checksum = pe_checksum(&data, CHECKSUM_OFFSET);
            write(&mut data, CHECKSUM_OFFSET, &checksum.to_le_bytes());
        }
        data
    }
}

fn add_section(
    data: &mut Vec<u8>, name: &[u8; 8], content: &[u8], virtual_address: u32, characteristics: u32,
) -> SectionHeader {
    let pointer_to_raw_data = data.len() as u32;
    data.extend_from_slice(content);
    data.resize(aligned(data.len() as u32, FILE_ALIGNMENT) as usize, 0);
    SectionHeader {
        name: u64::from_le_bytes(*name),
        virtual_size: content.len() as u32,
        virtual_address,
        size_of_raw_data: data.len() as u32 - pointer_to_raw_data,
        pointer_to_raw_data,
        characteristics,
        ..Default::default()
    }
}

/// Windows header fields shared by PE32 and PE32+ images.
fn windows_header_fields<UXX: Default>(size_of_image: u32) -> WindowsHeader<UXX> {
    WindowsHeader {
        section_alignment: SECTION_ALIGNMENT,
        file_alignment: FILE_ALIGNMENT,
        operating_system_version: VersionU16 { major: 6, minor: 0 },
        subsystem_version: VersionU16 { major: 6, minor: 0 },
        size_of_image,
        size_of_headers: SIZE_OF_HEADERS,
        subsystem: 3,
        dll_characteristics: 0x8160,
        number_of_rva_and_sizes: 16,
        ..Default::default()
    }
}

fn next_section_address(sections: &[SectionHeader]) -> u32 {
    sections
        .iter()
        .map(|section| {
            let size = section.size_of_raw_data.max(section.virtual_size);
            aligned(section.virtual_address + size, SECTION_ALIGNMENT)
        })
        .max()
        .unwrap_or(SECTION_ALIGNMENT)
}

fn aligned(value: u32, alignment: u32) -> u32 { value.div_ceil(alignment) * alignment }

fn write(data: &mut [u8], offset: usize, bytes: &[u8]) {
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Recognizable code bytes.
pub fn code(size: usize) -> Vec<u8> { (0..size).map(|i| (i % 251) as u8 | 0x01).collect() }

const MANIFEST: &[u8] = b"<assembly xmlns=\"urn:schemas-microsoft-com:asm.v1\" manifestVersion=\"1.0\"/>";

/// Resources resembling those of a freshly linked application: an icon, a version block,
/// a manifest and a named custom resource.
pub fn sample_resources() -> ResourceTree {
    let mut resources = ResourceTree::default();
    let icon = IconFile::parse(&ico_file(&[png_image(32, 32, 1), bmp_image(16, 16, 32, 2)])).unwrap();
    resources.replace_icon_group(0, LANGUAGE_ID_EN_US, icon.images()).unwrap();

    let mut info = VersionInfo::create_empty();
    info.set_file_version(VersionNumber::new(0, 1, 0, 0));
    info.set_product_version(VersionNumber::new(0, 1, 0, 0));
    info.set_string_values(VersionLanguage::default(), [(VS_PRODUCT_NAME, "Runtime")]).unwrap();
    resources.write_version_info(&info).unwrap();

    resources.insert(
        ResourceKey::new(RT_MANIFEST, 1u16, LANGUAGE_ID_EN_US),
        ResourceData::new(MANIFEST.to_vec()),
    );
    resources.insert(
        ResourceKey::new("CUSTOM", "PAYLOAD", 0),
        ResourceData::new(vec![0x5A; 37]),
    );
    resources
}

/// PNG stream with a valid signature and header chunk followed by filler bytes.
pub fn png_image(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend(13u32.to_be_bytes());
    data.extend(b"IHDR");
    data.extend(width.to_be_bytes());
    data.extend(height.to_be_bytes());
    // bit depth 8, truecolor with alpha
    data.extend([8, 6, 0, 0, 0]);
    data.extend([0; 4]);
    data.extend((0..64).map(|i| seed.wrapping_add(i)));
    data
}

/// DIB with a `BITMAPINFOHEADER` whose height includes the and-mask, followed by filler bytes.
pub fn bmp_image(width: i32, height: i32, bit_count: u16, seed: u8) -> Vec<u8> {
    let header = BitmapInfoHeader {
        size: 40,
        width,
        height: height * 2,
        planes: 1,
        bit_count,
        ..Default::default()
    };
    let mut data = header.as_bytes().to_vec();
    data.extend((0..96).map(|i| seed.wrapping_mul(3).wrapping_add(i)));
    data
}

/// `.ico` container for the images, in the given order.
pub fn ico_file(images: &[Vec<u8>]) -> Vec<u8> {
    let directory = IconDirectory {
        reserved: 0,
        type_:    1,
        count:    images.len() as u16,
    };
    let mut data = directory.as_bytes().to_vec();
    let mut offset = 6 + images.len() * 16;
    for image in images {
        let entry = IconFileEntry {
            planes: 1,
            bit_count: 32,
            bytes: image.len() as u32,
            offset: offset as u32,
            ..Default::default()
        };
        data.extend_from_slice(entry.as_bytes());
        offset += image.len();
    }
    for image in images {
        data.extend_from_slice(image);
    }
    data
}

pub const LINKER_PAYLOAD: &[u8] = b"\x01\x02\x03\x04\x05";
pub const LINKER_RCDATA: &[u8] = b"abc";
pub const LINKER_MANIFEST: &[u8] = b"<assembly/>";

const NAME_FLAG: u32 = 0x8000_0000;
const SUBDIRECTORY_FLAG: u32 = 0x8000_0000;

fn directory_table(named: u16, ids: u16) -> ResourceDirectoryTable {
    ResourceDirectoryTable {
        number_of_name_entries: named,
        number_of_id_entries: ids,
        ..Default::default()
    }
}

fn directory_entry(name: u32, offset: u32) -> ResourceDirectoryEntry {
    ResourceDirectoryEntry {
        name_offset_or_integer_id:         name,
        data_entry_or_subdirectory_offset: offset,
    }
}

fn data_entry(data_rva: u32, size: usize) -> ResourceDataEntry {
    ResourceDataEntry {
        data_rva,
        size: size as u32,
        ..Default::default()
    }
}

/// Resource directory laid out the way linkers emit it: tables, data descriptions, name strings,
/// then unaligned data. `RT_RCDATA/2` points below the section like entries of packed images do.
///
/// Holds `CUSTOM/PAYLOAD/0`, `RT_RCDATA/1/1033`, `RT_RCDATA/2/1033` and `RT_MANIFEST/1/1033`.
pub fn linker_resource_directory(virtual_address: u32) -> Vec<u8> {
    let mut data = Vec::new();

    // root at 0x00: CUSTOM, RT_RCDATA, RT_MANIFEST
    data.extend(directory_table(1, 2).as_bytes());
    data.extend(directory_entry(NAME_FLAG | 280, SUBDIRECTORY_FLAG | 40).as_bytes());
    data.extend(directory_entry(RT_RCDATA as u32, SUBDIRECTORY_FLAG | 64).as_bytes());
    data.extend(directory_entry(RT_MANIFEST as u32, SUBDIRECTORY_FLAG | 96).as_bytes());
    assert_eq!(data.len(), 40);

    // names
    data.extend(directory_table(1, 0).as_bytes());
    data.extend(directory_entry(NAME_FLAG | 294, SUBDIRECTORY_FLAG | 120).as_bytes());
    data.extend(directory_table(0, 2).as_bytes());
    data.extend(directory_entry(1, SUBDIRECTORY_FLAG | 144).as_bytes());
    data.extend(directory_entry(2, SUBDIRECTORY_FLAG | 168).as_bytes());
    data.extend(directory_table(0, 1).as_bytes());
    data.extend(directory_entry(1, SUBDIRECTORY_FLAG | 192).as_bytes());
    assert_eq!(data.len(), 120);

    // languages
    let languages = [(0, 216), (LANGUAGE_ID_EN_US, 232), (LANGUAGE_ID_EN_US, 248), (LANGUAGE_ID_EN_US, 264)];
    for (language, description) in languages {
        data.extend(directory_table(0, 1).as_bytes());
        data.extend(directory_entry(language as u32, description).as_bytes());
    }
    assert_eq!(data.len(), 216);

    // data descriptions before the strings
    data.extend(data_entry(virtual_address + 310, LINKER_PAYLOAD.len()).as_bytes());
    data.extend(data_entry(virtual_address + 315, LINKER_RCDATA.len()).as_bytes());
    data.extend(data_entry(0x10, 4).as_bytes());
    data.extend(data_entry(virtual_address + 318, LINKER_MANIFEST.len()).as_bytes());
    assert_eq!(data.len(), 280);

    for name in ["CUSTOM", "PAYLOAD"] {
        data.extend((name.len() as u16).to_le_bytes());
        data.extend(name.encode_utf16().flat_map(u16::to_le_bytes));
    }
    assert_eq!(data.len(), 310);

    // data without alignment padding
    data.extend(LINKER_PAYLOAD);
    data.extend(LINKER_RCDATA);
    data.extend(LINKER_MANIFEST);
    data
}

/// Resource directory whose entries all point at one shared table per level,
/// so every level multiplies the number of reachable leaves.
pub fn shared_resource_directory(virtual_address: u32) -> Vec<u8> {
    const COUNT: u32 = 200;
    let table_size = 16 + COUNT * 8;

    let mut data = Vec::new();
    for level in 1..=3 {
        data.extend(directory_table(0, COUNT as u16).as_bytes());
        for id in 1..=COUNT {
            let offset = match level {
                3 => table_size * 3,
                _ => SUBDIRECTORY_FLAG | (table_size * level),
            };
            data.extend(directory_entry(id, offset).as_bytes());
        }
    }
    data.extend(data_entry(virtual_address + table_size * 3 + 16, 4).as_bytes());
    data.extend([1, 2, 3, 4]);
    data
}
