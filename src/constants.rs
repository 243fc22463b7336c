//! Windows API and binary constants.

#![allow(non_upper_case_globals)]

pub type DWORD = u32;
pub type WORD = u16;
pub type LANGID = WORD;


pub const VS_VERSION_INFO: &str = "VS_VERSION_INFO";
pub const VS_STRING_FILE_INFO: &str = "StringFileInfo";
pub const VS_VAR_FILE_INFO: &str = "VarFileInfo";
pub const VS_TRANSLATION: &str = "Translation";

pub const VS_FILE_DESCRIPTION: &str = "FileDescription";
pub const VS_LEGAL_COPYRIGHT: &str = "LegalCopyright";
pub const VS_PRODUCT_NAME: &str = "ProductName";

/// String table keys accepted by [`VersionInfo::set_string_values`](crate::VersionInfo::set_string_values).
pub const VS_STRING_KEYS: [&str; 3] = [VS_PRODUCT_NAME, VS_FILE_DESCRIPTION, VS_LEGAL_COPYRIGHT];


// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-lcid/a9eac961-e77d-41a6-90a5-ce1a8b0cdb9c
pub const LANGUAGE_ID_EN_US: LANGID = 1033; // 0x0409, en-US
// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-ucoderef/28fefe92-d66c-4b03-90a9-97b473223d43
pub const CODE_PAGE_ID_UNICODE: WORD = 1200; // 0x04B0, UTF-16LE


// https://docs.microsoft.com/en-us/windows/win32/api/verrsrc/ns-verrsrc-vs_fixedfileinfo

pub const VOS_NT: DWORD = 0x00040000;
pub const VOS__WINDOWS32: DWORD = 0x00000004;
pub const VOS_NT_WINDOWS32: DWORD = VOS_NT | VOS__WINDOWS32;

pub const VFT_APP: DWORD = 0x00000001;

pub const VS_FFI_FILEFLAGSMASK: DWORD = 0x0000003F;
pub const VS_FIXEDFILEINFO_SIGNATURE: DWORD = 0xFEEF04BD;
pub const VS_FIXEDFILEINFO_VERSION: DWORD = 0x00010000;

pub const VERSION_VALUE_BINARY: WORD = 0;
pub const VERSION_VALUE_TEXT: WORD = 1;


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format

pub const PE_DOS_MAGIC: WORD = 0x5a4d; // MZ
pub const PE_PTR_OFFSET: DWORD = 0x03c;
pub const PE_NT_SIGNATURE: DWORD = 0x00004550; // PE00
pub const PE_32_MAGIC: WORD = 0x010b;
pub const PE_64_MAGIC: WORD = 0x020b;
// offset of the checksum field from the start of the optional header, identical for PE32 and PE32+
pub const PE_CHECKSUM_OFFSET: DWORD = 64;

pub const RESOURCE_SECTION_NAME: &[u8; 8] = b".rsrc\0\0\0";


// https://docs.microsoft.com/en-us/windows/win32/menurc/resource-types

pub const RT_CURSOR: WORD = 0x01;
pub const RT_BITMAP: WORD = 0x02;
pub const RT_ICON: WORD = 0x03;
pub const RT_MENU: WORD = 0x04;
pub const RT_DIALOG: WORD = 0x05;
pub const RT_STRING: WORD = 0x06;
pub const RT_FONTDIR: WORD = 0x07;
pub const RT_FONT: WORD = 0x08;
pub const RT_ACCELERATOR: WORD = 0x09;
pub const RT_RCDATA: WORD = 0x0A;
pub const RT_MESSAGETABLE: WORD = 0x0B;
pub const RT_GROUP_CURSOR: WORD = 0x0C;
pub const RT_GROUP_ICON: WORD = 0x0E;
pub const RT_VERSION: WORD = 0x10;
pub const RT_DLGINCLUDE: WORD = 0x11;
pub const RT_PLUGPLAY: WORD = 0x13;
pub const RT_VXD: WORD = 0x14;
pub const RT_ANICURSOR: WORD = 0x15;
pub const RT_ANIICON: WORD = 0x16;
pub const RT_HTML: WORD = 0x17;
pub const RT_MANIFEST: WORD = 0x18;

/// Returns the symbolic name of a predefined resource type.
pub const fn resource_type_name(id: WORD) -> Option<&'static str> {
    Some(match id {
        RT_CURSOR => "RT_CURSOR",
        RT_BITMAP => "RT_BITMAP",
        RT_ICON => "RT_ICON",
        RT_MENU => "RT_MENU",
        RT_DIALOG => "RT_DIALOG",
        RT_STRING => "RT_STRING",
        RT_FONTDIR => "RT_FONTDIR",
        RT_FONT => "RT_FONT",
        RT_ACCELERATOR => "RT_ACCELERATOR",
        RT_RCDATA => "RT_RCDATA",
        RT_MESSAGETABLE => "RT_MESSAGETABLE",
        RT_GROUP_CURSOR => "RT_GROUP_CURSOR",
        RT_GROUP_ICON => "RT_GROUP_ICON",
        RT_VERSION => "RT_VERSION",
        RT_DLGINCLUDE => "RT_DLGINCLUDE",
        RT_PLUGPLAY => "RT_PLUGPLAY",
        RT_VXD => "RT_VXD",
        RT_ANICURSOR => "RT_ANICURSOR",
        RT_ANIICON => "RT_ANIICON",
        RT_HTML => "RT_HTML",
        RT_MANIFEST => "RT_MANIFEST",
        _ => return None,
    })
}


// https://learn.microsoft.com/en-us/previous-versions/ms997538(v=msdn.10)

pub const ICON_DIRECTORY_RESERVED: WORD = 0;
pub const ICON_DIRECTORY_TYPE_ICON: WORD = 1;
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#section-flags

pub const IMAGE_SCN_CNT_INITIALIZED_DATA: DWORD = 0x00000040;
pub const IMAGE_SCN_MEM_READ: DWORD = 0x40000000;
