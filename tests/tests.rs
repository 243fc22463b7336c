mod common;

use common::*;
use pestamp::{constants::*, types::*, *};

#[test]
fn parse_image() {
    init_logger();

    let data = ImageBuilder::default().build();
    let image = Image::parse(&data[..]);
    assert!(image.is_ok(), "image successfully parsed");

    let image = image.unwrap();
    assert_eq!(image.section_table().len(), 2);
    assert_eq!(image.windows_header().file_alignment(), FILE_ALIGNMENT);
    assert_eq!(image.cloned().data(), image.data(), "owned copy holds the same bytes");
    assert_eq!(image.cloned(), image);
}

#[test]
fn reject_malformed_images() {
    init_logger();

    assert!(matches!(Image::parse(&b"not an executable"[..]), Err(ImageReadError::InvalidHeader(_))));
    assert!(Image::parse(&[0u8; 0][..]).is_err(), "empty input rejected");

    let data = ImageBuilder::default().build();
    assert!(Image::parse(&data[..0x100]).is_err(), "truncated headers rejected");

    let mut bad_signature = data.clone();
    bad_signature[PE_OFFSET] = b'X';
    assert!(matches!(Image::parse(&bad_signature[..]), Err(ImageReadError::InvalidHeader(_))));

    let mut bad_pointer = data.clone();
    bad_pointer[0x3c..0x40].copy_from_slice(&0x7fff_fff0u32.to_le_bytes());
    assert!(Image::parse(&bad_pointer[..]).is_err(), "signature pointer outside the image rejected");

    let truncated_section = &data[..data.len() - 0x100];
    assert!(
        matches!(Image::parse(truncated_section), Err(ImageReadError::InvalidSection(_))),
        "section data beyond the end of the image rejected"
    );
}

#[test]
fn query_resource_section() {
    init_logger();

    let data = ImageBuilder::default().build();
    let image = Image::parse(&data[..]).unwrap();

    let tree = image.resource_tree().unwrap();
    let section = image.section_header_for_data_directory(DataDirectoryType::ResourceTable).unwrap();
    assert_eq!(section.name().as_deref(), Some(".rsrc"));
    assert_eq!(tree.virtual_address(), { section.virtual_address });
    assert_eq!(tree, &sample_resources());

    let custom = tree.get(ResourceKey::new("CUSTOM", "PAYLOAD", 0)).unwrap();
    assert_eq!(custom.data(), &[0x5A; 37][..]);

    let mut tree = tree.clone();
    tree.entries_mut().retain(|key, _| key.kind == RT_MANIFEST.into());
    assert_eq!(tree.len(), 1);
    assert!(tree.remove(ResourceKey::new(RT_MANIFEST, 1u16, LANGUAGE_ID_EN_US)).is_some());
    assert!(tree.is_empty());
}

#[test]
fn missing_resource_section() {
    init_logger();

    let data = ImageBuilder {
        resources: None,
        ..Default::default()
    }
    .build();
    let image = Image::parse(&data[..]).unwrap();
    assert!(matches!(image.resource_tree(), Err(ResourceError::MissingResourceSection)));
}

#[test]
fn build_resource_section() {
    init_logger();

    let data = ImageBuilder::default().build();
    let image = Image::parse(&data[..]).unwrap();

    let tree = image.resource_tree().unwrap();
    let built = tree.build(tree.virtual_address());
    assert_eq!(built.len(), tree.size(), "built resource size equals computed size");

    let section = image.section_header_for_data_directory(DataDirectoryType::ResourceTable).unwrap();
    let start = section.pointer_to_raw_data as usize;
    assert_eq!(&data[start..start + built.len()], &built[..], "rebuilt directory equals the parsed one");
}

#[test]
fn resource_directory_ordering() {
    init_logger();

    let mut tree = ResourceTree::default();
    tree.insert(ResourceKey::new(RT_RCDATA, 7u16, 0), ResourceData::new(vec![7]));
    tree.insert(ResourceKey::new(RT_RCDATA, "ZETA", 0), ResourceData::new(vec![3]));
    tree.insert(ResourceKey::new(RT_RCDATA, 2u16, 0), ResourceData::new(vec![2]));
    tree.insert(ResourceKey::new(RT_RCDATA, "ALPHA", 0), ResourceData::new(vec![1]));
    tree.insert(ResourceKey::new(RT_ICON, 1u16, 0), ResourceData::new(vec![0]));

    let built = tree.build(0x2000);
    let parsed = ResourceTree::parse(&built, 0, 0x2000).unwrap();
    let order = parsed
        .keys_of_kind(&RT_RCDATA.into())
        .into_iter()
        .map(|key| key.name.to_string())
        .collect::<Vec<_>>();
    assert_eq!(order, ["\"ALPHA\"", "\"ZETA\"", "2", "7"], "names first, then ids ascending");

    // root table: one named type, two id types in ascending order
    let root_named = u16::from_le_bytes([built[12], built[13]]);
    let root_ids = u16::from_le_bytes([built[14], built[15]]);
    assert_eq!((root_named, root_ids), (0, 2));
    let first_type = u32::from_le_bytes([built[16], built[17], built[18], built[19]]);
    assert_eq!(first_type, RT_ICON as u32);
    assert_eq!(parsed, tree);
}

#[test]
fn unmodified_round_trip() {
    init_logger();

    let data = ImageBuilder {
        overlay: b"appended payload".to_vec(),
        checksum: true,
        ..Default::default()
    }
    .build();

    let image = Image::parse(&data[..]).unwrap();
    assert_eq!(image.data(), &data[..], "parsing does not modify the image");

    let mut image = Image::parse(&data[..]).unwrap();
    let tree = image.resource_tree().unwrap().clone();
    image.set_resource_tree(tree).unwrap();
    assert_eq!(image.data(), &data[..], "applying the unmodified resource tree reproduces the image");
}

#[test]
fn set_resource_section_in_place() {
    init_logger();

    let data = ImageBuilder {
        resource_slack: 0x1000,
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    let sections = image.section_table().to_vec();

    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x11; 0x800]));
    image.set_resource_tree(tree.clone()).unwrap();

    assert_eq!(image.section_table().len(), sections.len(), "no section added");
    assert_eq!({ image.section_table()[1].size_of_raw_data }, { sections[1].size_of_raw_data });
    assert_eq!(image.data().len(), data.len());

    let image = Image::parse(image.data()).unwrap();
    assert_eq!(image.resource_tree().unwrap(), &tree);
}

#[test]
fn set_resource_section_extend_last() {
    init_logger();

    let data = ImageBuilder::default().build();
    let mut image = Image::parse(&data[..]).unwrap();
    let sections = image.section_table().to_vec();

    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x22; 0x3456]));
    image.set_resource_tree(tree.clone()).unwrap();

    let section = image.section_table()[1];
    assert_eq!(image.section_table().len(), sections.len(), "last section extended");
    assert_eq!(section.size_of_raw_data % FILE_ALIGNMENT, 0, "raw size aligned to the file alignment");
    assert!(section.size_of_raw_data as usize >= tree.size());
    assert_eq!(
        image.windows_header().size_of_image(),
        (section.virtual_end() as u32).div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT
    );

    let image = Image::parse(image.data()).unwrap();
    assert_eq!(image.resource_tree().unwrap(), &tree);
}

#[test]
fn set_resource_section_append() {
    init_logger();

    let data = ImageBuilder {
        reloc_section: true,
        overlay: b"appended payload".to_vec(),
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    let sections = image.section_table().to_vec();

    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x33; 0x2000]));
    image.set_resource_tree(tree.clone()).unwrap();

    let section_table = image.section_table();
    assert_eq!(section_table.len(), sections.len() + 1, "new section added");
    assert_eq!(&section_table[..sections.len()], &sections[..], "existing sections untouched");
    let added = section_table[sections.len()];
    assert_eq!(added.name().as_deref(), Some(".rsrc"));
    assert_eq!({ added.pointer_to_raw_data } % FILE_ALIGNMENT, 0);
    assert_eq!({ added.virtual_address } % SECTION_ALIGNMENT, 0);
    assert!(added.virtual_address as u64 >= sections[2].virtual_end());
    assert_eq!({ image.coff_header().number_of_sections }, sections.len() as u16 + 1);

    // code, relocations and overlay are preserved
    let text = sections[0];
    let start = text.pointer_to_raw_data as usize;
    assert_eq!(&image.data()[start..start + 0x600], &code(0x600)[..]);
    let reloc = sections[2];
    let start = reloc.pointer_to_raw_data as usize;
    assert_eq!(&image.data()[start..start + 0x20], &[0xA5; 0x20][..]);
    assert!(image.data().ends_with(b"appended payload"));

    let image = Image::parse(image.data()).unwrap();
    assert_eq!(image.resource_tree().unwrap(), &tree);
    assert_eq!(
        { image.data_directory(DataDirectoryType::ResourceTable).unwrap().virtual_address },
        { added.virtual_address }
    );
}

#[test]
fn add_resource_section() {
    init_logger();

    let data = ImageBuilder {
        resources: None,
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    image.set_resource_tree(sample_resources()).unwrap();

    let image = Image::parse(image.data()).unwrap();
    assert_eq!(image.resource_tree().unwrap(), &sample_resources());
    assert_eq!(image.section_table().len(), 2);
}

#[test]
fn update_checksum() {
    init_logger();

    let data = ImageBuilder {
        checksum: true,
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    assert_ne!(image.windows_header().check_sum(), 0);

    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x44; 0x1000]));
    image.set_resource_tree(tree).unwrap();

    let image = Image::parse(image.data()).unwrap();
    assert_eq!(image.windows_header().check_sum(), image.compute_checksum(), "checksum recomputed");

    // a zero checksum stays zero
    let data = ImageBuilder::default().build();
    let mut image = Image::parse(&data[..]).unwrap();
    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x44; 0x1000]));
    image.set_resource_tree(tree).unwrap();
    assert_eq!(Image::parse(image.data()).unwrap().windows_header().check_sum(), 0);
}

#[test]
fn drop_signature() {
    init_logger();

    let data = ImageBuilder {
        signature: Some(vec![0x30; 0x100]),
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    let tree = image.resource_tree().unwrap().clone();
    image.set_resource_tree(tree).unwrap();

    let image = Image::parse(image.data()).unwrap();
    let certificate = image.data_directory(DataDirectoryType::CertificateTable).unwrap();
    assert_eq!({ certificate.size }, 0);
    assert_eq!(image.data().len(), data.len() - 0x100);
}

#[test]
fn transfer_resource_section() {
    init_logger();

    let source = ImageBuilder::default().build();
    let target = ImageBuilder {
        resources: Some(ResourceTree::default()),
        reloc_section: true,
        ..Default::default()
    }
    .build();

    let source = Image::parse(&source[..]).unwrap();
    let mut target = Image::parse(&target[..]).unwrap();
    target.set_resource_tree(source.resource_tree().unwrap().clone()).unwrap();

    let target = Image::parse(target.data()).unwrap();
    assert_eq!(target.resource_tree().unwrap(), source.resource_tree().unwrap());
}

#[test]
fn convert_resource_name_string() {
    let name = ResourceName::from_string("Hello, World!");
    assert_eq!(name.name().unwrap(), "Hello, World!");
    assert_eq!(name.id(), None);
    assert_eq!(ResourceName::from(3u16).id(), Some(3));
}

#[test]
fn reject_shared_resource_tables() {
    init_logger();

    let directory = shared_resource_directory(0x2000);
    assert!(
        matches!(ResourceTree::parse(&directory, 0, 0x2000), Err(ImageReadError::InvalidSection(_))),
        "table referenced by several entries rejected"
    );

    let data = ImageBuilder {
        raw_resources: Some(shared_resource_directory),
        ..Default::default()
    }
    .build();
    assert!(matches!(Image::parse(&data[..]), Err(ImageReadError::InvalidSection(_))));
}

#[test]
fn parse_linker_resource_layout() {
    init_logger();

    let data = ImageBuilder {
        raw_resources: Some(linker_resource_directory),
        overlay: b"appended payload".to_vec(),
        checksum: true,
        ..Default::default()
    }
    .build();
    let image = Image::parse(&data[..]).unwrap();
    assert_eq!(image.data(), &data[..], "parsing does not modify the image");

    let tree = image.resource_tree().unwrap();
    assert_eq!(tree.len(), 3, "entry pointing outside the image skipped");
    let payload = tree.get(ResourceKey::new("CUSTOM", "PAYLOAD", 0)).unwrap();
    assert_eq!(payload.data(), LINKER_PAYLOAD);
    let rcdata = tree.get(ResourceKey::new(RT_RCDATA, 1u16, LANGUAGE_ID_EN_US)).unwrap();
    assert_eq!(rcdata.data(), LINKER_RCDATA);
    let manifest = tree.get(ResourceKey::new(RT_MANIFEST, 1u16, LANGUAGE_ID_EN_US)).unwrap();
    assert_eq!(manifest.data(), LINKER_MANIFEST);
    assert!(tree.get(ResourceKey::new(RT_RCDATA, 2u16, LANGUAGE_ID_EN_US)).is_none());

    // rebuilding in the sorted layout keeps every entry
    let mut rebuilt = Image::parse(&data[..]).unwrap();
    rebuilt.set_resource_tree(tree.clone()).unwrap();
    let rebuilt = Image::parse(rebuilt.data()).unwrap();
    assert_eq!(rebuilt.resource_tree().unwrap(), tree);
    assert!(rebuilt.data().ends_with(b"appended payload"));
    assert_eq!(rebuilt.windows_header().check_sum(), rebuilt.compute_checksum());
}

#[test]
fn pe32_image() {
    init_logger();

    let data = ImageBuilder {
        pe32: true,
        reloc_section: true,
        checksum: true,
        ..Default::default()
    }
    .build();
    let mut image = Image::parse(&data[..]).unwrap();
    assert!(matches!(image.windows_header(), GenericWindowsHeader::WindowsHeader32(_)));
    assert_eq!({ image.standard_header().magic }, PE_32_MAGIC);
    assert_eq!(image.windows_header().file_alignment(), FILE_ALIGNMENT);
    assert_eq!(image.windows_header().check_sum(), image.compute_checksum());
    assert_eq!(image.resource_tree().unwrap(), &sample_resources());

    let sections = image.section_table().to_vec();
    let relocations = image.data_directory(DataDirectoryType::BaseRelocationTable).unwrap();
    assert_eq!({ relocations.virtual_address }, { sections[2].virtual_address });

    let mut tree = image.resource_tree().unwrap().clone();
    tree.insert(ResourceKey::new(RT_RCDATA, 1u16, 0), ResourceData::new(vec![0x55; 0x2000]));
    image.set_resource_tree(tree.clone()).unwrap();

    let image = Image::parse(image.data()).unwrap();
    assert!(matches!(image.windows_header(), GenericWindowsHeader::WindowsHeader32(_)));
    assert_eq!(image.section_table().len(), sections.len() + 1, "new section appended");
    assert_eq!(image.resource_tree().unwrap(), &tree);
    let added = image.section_table()[sections.len()];
    assert_eq!(
        image.windows_header().size_of_image(),
        (added.virtual_end() as u32).div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT
    );
    assert_eq!(image.windows_header().check_sum(), image.compute_checksum(), "checksum recomputed");
    assert_eq!({ image.standard_header().address_of_entry_point }, SECTION_ALIGNMENT);
}

#[cfg(unix)]
#[test]
fn write_file_permissions() {
    use std::{fs, os::unix::fs::PermissionsExt};

    init_logger();

    let directory = tempfile::tempdir().unwrap();
    let image = Image::parse(ImageBuilder::default().build()).unwrap();

    let created = directory.path().join("created.exe");
    image.write_file(&created).unwrap();
    assert_eq!(fs::metadata(&created).unwrap().permissions().mode() & 0o777, 0o755, "new file executable");

    let existing = directory.path().join("existing.exe");
    fs::write(&existing, b"previous build").unwrap();
    fs::set_permissions(&existing, fs::Permissions::from_mode(0o640)).unwrap();
    image.write_file(&existing).unwrap();
    assert_eq!(fs::metadata(&existing).unwrap().permissions().mode() & 0o777, 0o640, "permissions kept");
    assert_eq!(fs::read(&existing).unwrap(), image.data());
}
