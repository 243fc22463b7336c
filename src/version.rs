//! Version information resources.
//!
//! A version resource is a tree of nodes, each with a length prefixed header, a UTF-16 key and an optional value,
//! every node starting on a 32-bit boundary relative to the start of the resource.
//! See <https://learn.microsoft.com/en-us/windows/win32/menurc/vs-versioninfo> for more information.

use std::fmt;

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, trace};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, metadata::VersionNumber, resource::*, types::*, util::*};

/// Language and codepage of a version string table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VersionLanguage {
    pub language: LANGID,
    pub codepage: WORD,
}
impl VersionLanguage {
    pub const fn new(language: LANGID, codepage: WORD) -> Self { Self { language, codepage } }

    /// Parse the hexadecimal string table key, e.g. `040904b0`.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.len() != 8 || !key.is_ascii() {
            return None;
        }
        Some(Self {
            language: u16::from_str_radix(&key[0..4], 16).ok()?,
            codepage: u16::from_str_radix(&key[4..8], 16).ok()?,
        })
    }

    /// Returns the hexadecimal string table key.
    pub fn key(&self) -> String { format!("{:04x}{:04x}", self.language, self.codepage) }

    fn translation(&self) -> [u8; 4] {
        let mut data = [0; 4];
        data[0..2].copy_from_slice(&self.language.to_le_bytes());
        data[2..4].copy_from_slice(&self.codepage.to_le_bytes());
        data
    }
}
impl Default for VersionLanguage {
    fn default() -> Self { Self::new(LANGUAGE_ID_EN_US, CODE_PAGE_ID_UNICODE) }
}
impl fmt::Display for VersionLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.key()) }
}

pub type StringTable = IndexMap<String, String, RandomState>;

/// Version information block: fixed numeric fields and localized string tables.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionInfo {
    fixed:        FixedFileInfo,
    strings:      IndexMap<VersionLanguage, StringTable, RandomState>,
    translations: Vec<VersionLanguage>,
}
impl Default for VersionInfo {
    fn default() -> Self { Self::create_empty() }
}
impl VersionInfo {
    /// Create a version information block with all numeric fields zeroed and no string tables.
    pub fn create_empty() -> Self {
        Self {
            fixed:        FixedFileInfo::default(),
            strings:      IndexMap::default(),
            translations: Vec::new(),
        }
    }

    /// Returns the fixed file info.
    pub fn fixed_file_info(&self) -> &FixedFileInfo { &self.fixed }

    /// Returns the mutable fixed file info.
    pub fn fixed_file_info_mut(&mut self) -> &mut FixedFileInfo { &mut self.fixed }

    pub fn file_version(&self) -> VersionNumber {
        VersionNumber::from_dwords(self.fixed.file_version_ms, self.fixed.file_version_ls)
    }

    pub fn set_file_version(&mut self, version: VersionNumber) {
        self.fixed.file_version_ms = version.ms();
        self.fixed.file_version_ls = version.ls();
    }

    pub fn product_version(&self) -> VersionNumber {
        VersionNumber::from_dwords(self.fixed.product_version_ms, self.fixed.product_version_ls)
    }

    pub fn set_product_version(&mut self, version: VersionNumber) {
        self.fixed.product_version_ms = version.ms();
        self.fixed.product_version_ls = version.ls();
    }

    /// Returns the languages of the string tables.
    pub fn languages(&self) -> Vec<VersionLanguage> { self.strings.keys().copied().collect() }

    /// Returns the translations listed in the `VarFileInfo` block.
    pub fn translations(&self) -> &[VersionLanguage] { &self.translations }

    /// Returns the language the block is stored under in a resource tree:
    /// the first translation, or the first string table, or en-US.
    pub fn language(&self) -> LANGID {
        self.translations
            .first()
            .or_else(|| self.strings.keys().next())
            .map(|language| language.language)
            .unwrap_or(LANGUAGE_ID_EN_US)
    }

    /// Returns the string table of the language.
    pub fn strings(&self, language: VersionLanguage) -> Option<&StringTable> { self.strings.get(&language) }

    /// Returns a single string value.
    pub fn string(&self, language: VersionLanguage, key: &str) -> Option<&str> {
        self.strings.get(&language).and_then(|table| table.get(key)).map(String::as_str)
    }

    /// Insert or overwrite string values in the table of the language.
    ///
    /// Only the keys in [`VS_STRING_KEYS`] are accepted. After the call the table contains every one of them,
    /// keys without a value are stored as empty strings.
    ///
    /// # Returns
    /// Returns an error and leaves the block unchanged if any key is not accepted.
    pub fn set_string_values<K, V, I>(
        &mut self, language: VersionLanguage, values: I,
    ) -> Result<(), ResourceError>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let values = values.into_iter().collect::<Vec<_>>();
        if let Some((key, _)) = values.iter().find(|(key, _)| !VS_STRING_KEYS.contains(&key.as_ref())) {
            return Err(ResourceError::UnsupportedVersionKey(key.as_ref().to_string()));
        }

        let table = self.strings.entry(language).or_default();
        for key in VS_STRING_KEYS {
            table.entry(key.to_string()).or_default();
        }
        for (key, value) in values {
            table.insert(key.as_ref().to_string(), value.into());
        }
        if !self.translations.contains(&language) {
            self.translations.push(language);
        }
        Ok(())
    }

    /// Parse a version information resource.
    pub fn parse(data: &[u8]) -> Result<Self, ResourceError> {
        let (root, _) = VersionNode::parse(data, 0)?;
        if root.key != VS_VERSION_INFO {
            return Err(ResourceError::InvalidVersionInfo(format!("unexpected root key {:?}", root.key)));
        }

        let fixed = match &root.value {
            NodeValue::Binary(value) if !value.is_empty() => {
                let fixed = read::<FixedFileInfo>(value)?;
                if fixed.signature != VS_FIXEDFILEINFO_SIGNATURE {
                    return Err(ResourceError::InvalidVersionInfo(format!(
                        "invalid fixed file info signature {:#x}",
                        { fixed.signature }
                    )));
                }
                fixed
            }
            _ => FixedFileInfo::default(),
        };

        let mut info = Self {
            fixed,
            ..Self::create_empty()
        };
        for child in root.children {
            match child.key.as_str() {
                VS_STRING_FILE_INFO => {
                    for table in child.children {
                        let language = VersionLanguage::from_key(&table.key).ok_or_else(|| {
                            let message = format!("invalid string table key {:?}", table.key);
                            ResourceError::InvalidVersionInfo(message)
                        })?;
                        let strings = info.strings.entry(language).or_default();
                        for string in table.children {
                            strings.insert(string.key, string.value.into_text());
                        }
                    }
                }
                VS_VAR_FILE_INFO => {
                    for var in child.children.into_iter().filter(|var| var.key == VS_TRANSLATION) {
                        if let NodeValue::Binary(value) = var.value {
                            info.translations.extend(value.chunks_exact(4).map(|chunk| VersionLanguage {
                                language: u16::from_le_bytes([chunk[0], chunk[1]]),
                                codepage: u16::from_le_bytes([chunk[2], chunk[3]]),
                            }));
                        }
                    }
                }
                other => trace!("ignoring version info block {:?}", other),
            }
        }
        Ok(info)
    }

    /// Build the version information into resource data.
    pub fn build(&self) -> Vec<u8> {
        let tables = self
            .strings
            .iter()
            .map(|(language, strings)| VersionNode {
                key:      language.key(),
                value:    NodeValue::None,
                children: strings
                    .iter()
                    .map(|(key, value)| VersionNode {
                        key:      key.clone(),
                        value:    NodeValue::Text(value.clone()),
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        let mut children = Vec::with_capacity(2);
        if !tables.is_empty() {
            children.push(VersionNode {
                key:      VS_STRING_FILE_INFO.to_string(),
                value:    NodeValue::None,
                children: tables,
            });
        }
        if !self.translations.is_empty() {
            children.push(VersionNode {
                key:      VS_VAR_FILE_INFO.to_string(),
                value:    NodeValue::None,
                children: vec![VersionNode {
                    key:      VS_TRANSLATION.to_string(),
                    value:    NodeValue::Binary(
                        self.translations.iter().flat_map(|language| language.translation()).collect(),
                    ),
                    children: Vec::new(),
                }],
            });
        }

        let root = VersionNode {
            key: VS_VERSION_INFO.to_string(),
            value: NodeValue::Binary(self.fixed.as_bytes().to_vec()),
            children,
        };
        let mut data = Vec::new();
        root.build(&mut data);
        data
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum NodeValue {
    // container node without value
    None,
    Binary(Vec<u8>),
    Text(String),
}
impl NodeValue {
    fn into_text(self) -> String {
        match self {
            NodeValue::Text(text) => text,
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct VersionNode {
    key:      String,
    value:    NodeValue,
    children: Vec<VersionNode>,
}
impl VersionNode {
    // returns the node and the offset of its end, excluding trailing padding
    fn parse(data: &[u8], start: usize) -> Result<(Self, usize), ResourceError> {
        let header = read_at::<VersionHeader>(data, start)?;
        let length = header.length as usize;
        let end = start + length;
        if length < 6 || end > data.len() {
            return Err(ResourceError::InvalidVersionInfo(format!(
                "invalid block length {} at {:#x}",
                length, start
            )));
        }
        let block = &data[..end];

        let (key, key_size) = read_u16_string(&block[start + 6..])?;
        let mut offset = aligned_to(start + 6 + key_size, 4);

        let type_ = header.type_;
        let value_size = match type_ {
            VERSION_VALUE_TEXT => header.value_length as usize * 2,
            _ => header.value_length as usize,
        };
        // some producers count bytes instead of characters, never read past the block
        let value_size = value_size.min(end.saturating_sub(offset));
        let value = if value_size == 0 {
            NodeValue::None
        } else {
            let value = slice_at(block, offset, value_size)?;
            match type_ {
                VERSION_VALUE_TEXT => NodeValue::Text(read_u16_string_lossy(value)),
                _ => NodeValue::Binary(value.to_vec()),
            }
        };
        offset = aligned_to(offset + value_size, 4);
        trace!("version block {:?} at {:#x} ({} bytes)", key, start, length);

        let mut children = Vec::new();
        while offset < end {
            let (child, child_end) = Self::parse(block, offset)?;
            children.push(child);
            offset = aligned_to(child_end, 4);
        }
        Ok((
            Self {
                key,
                value,
                children,
            },
            end,
        ))
    }

    fn build(&self, data: &mut Vec<u8>) {
        let start = data.len();
        data.extend([0; 6]);
        data.extend(string_to_u16(&self.key));
        pad_to(data, 4);

        let (value_length, type_) = match &self.value {
            NodeValue::None => (0, VERSION_VALUE_TEXT),
            NodeValue::Binary(value) => {
                data.extend_from_slice(value);
                (value.len(), VERSION_VALUE_BINARY)
            }
            NodeValue::Text(text) => {
                let value = string_to_u16(text);
                data.extend_from_slice(&value);
                // length in characters including the terminator
                (value.len() / 2, VERSION_VALUE_TEXT)
            }
        };

        for child in &self.children {
            pad_to(data, 4);
            child.build(data);
        }

        let header = VersionHeader {
            length: (data.len() - start) as u16,
            value_length: value_length as u16,
            type_,
        };
        data[start..start + 6].copy_from_slice(header.as_bytes());
    }
}

// text values are not always terminated within their declared length
fn read_u16_string_lossy(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

impl ResourceTree {
    /// Returns the keys of all version information resources in loader order.
    pub fn version_info_keys(&self) -> Vec<&ResourceKey> { self.keys_of_kind(&RT_VERSION.into()) }

    /// Returns the parsed version information stored under the language, if any.
    pub fn version_info(&self, language: LANGID) -> Result<Option<VersionInfo>, ResourceError> {
        let key = self.version_info_keys().into_iter().find(|key| key.language == language);
        match key.and_then(|key| self.get(key)) {
            Some(data) => VersionInfo::parse(data.data()).map(Some),
            None => Ok(None),
        }
    }

    /// Write the version information, replacing any version resource with the same language.
    ///
    /// The block is stored under its [`VersionInfo::language`]. Version resources in other languages are kept,
    /// so writing blocks of different languages adds one resource per language.
    ///
    /// # Returns
    /// The key the version information was written to.
    pub fn write_version_info(&mut self, info: &VersionInfo) -> Result<ResourceKey, ResourceError> {
        let language = info.language();
        let existing = self
            .version_info_keys()
            .into_iter()
            .filter(|key| key.language == language)
            .cloned()
            .collect::<Vec<_>>();

        let key = match existing.first() {
            Some(key) => key.clone(),
            None => ResourceKey::new(RT_VERSION, 1u16, language),
        };
        for key in existing.iter().skip(1) {
            debug!("removing duplicate version resource {}", key);
            self.remove(key);
        }

        let data = info.build();
        if data.len() > u16::MAX as usize {
            return Err(ResourceError::InvalidVersionInfo(format!(
                "{} bytes exceed the block size limit",
                data.len()
            )));
        }
        debug!("writing version info {} ({} bytes)", key, data.len());
        self.insert(key.clone(), ResourceData::new(data));
        Ok(key)
    }
}
