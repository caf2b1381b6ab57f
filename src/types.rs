//! Core data types for mdict parsing

use std::collections::HashMap;

/// File extension type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileExt {
    Mdx,
    Mdd,
}

/// Encoding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Gb18030,
    Big5,
}

impl Encoding {
    /// Resolve the `Encoding` header attribute
    pub fn from_header(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "gbk" | "gb2312" | "gb18030" => Encoding::Gb18030,
            "big5" => Encoding::Big5,
            "utf16" | "utf-16" => Encoding::Utf16Le,
            _ => Encoding::Utf8,
        }
    }

    /// Width in bytes of a key terminator
    pub fn unit_width(&self) -> usize {
        match self {
            Encoding::Utf16Le => 2,
            _ => 1,
        }
    }
}

/// Encryption type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptType {
    None = 0,
    RecordBlock = 1,
    KeyInfoBlock = 2,
}

impl EncryptType {
    /// Resolve the `Encrypted` header attribute
    pub fn from_header(value: &str) -> Self {
        match value {
            "" | "No" => EncryptType::None,
            "Yes" => EncryptType::RecordBlock,
            other => match other.parse::<u8>().unwrap_or(0) {
                1 => EncryptType::RecordBlock,
                2 => EncryptType::KeyInfoBlock,
                // Both flags set
                3 => EncryptType::RecordBlock,
                _ => EncryptType::None,
            },
        }
    }
}

/// Compression type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lzo,
    Zlib,
}

impl CompressionType {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..4)? {
            [0x00, 0x00, 0x00, 0x00] => Some(CompressionType::None),
            [0x01, 0x00, 0x00, 0x00] => Some(CompressionType::Lzo),
            [0x02, 0x00, 0x00, 0x00] => Some(CompressionType::Zlib),
            _ => None,
        }
    }
}

/// Dictionary metadata
#[derive(Debug, Clone)]
pub struct DictMeta {
    pub version: f64,
    pub encoding: Encoding,
    pub encrypt: EncryptType,
    /// Width of stored numbers: 8 for engine 2.x, 4 before
    pub num_width: usize,
    pub ext: FileExt,
    pub strip_key: bool,
    pub case_sensitive: bool,
}

impl DictMeta {
    pub fn is_v2(&self) -> bool {
        self.version >= 2.0
    }
}

impl Default for DictMeta {
    fn default() -> Self {
        DictMeta {
            version: 1.2,
            encoding: Encoding::Utf8,
            encrypt: EncryptType::None,
            num_width: 4,
            ext: FileExt::Mdx,
            strip_key: true,
            case_sensitive: false,
        }
    }
}

/// Dictionary header attributes
pub type DictHeader = HashMap<String, String>;

/// Key block info item
#[derive(Debug, Clone)]
pub struct KeyInfoItem {
    pub first_key: String,
    pub last_key: String,
    /// Compressed size of this key block
    pub pack_size: u64,
    /// Offset of this key block from the start of the key block section
    pub pack_offset: u64,
    /// Decompressed size of this key block
    pub unpack_size: u64,
    pub entries: u64,
}

/// Keyword item
#[derive(Debug, Clone)]
pub struct KeyWordItem {
    /// Start offset in the decompressed record stream
    pub record_start_offset: u64,
    /// End offset in the decompressed record stream, 0 for the last record
    pub record_end_offset: u64,
    pub key_text: String,
    /// Index of the key block this keyword belongs to
    pub key_block_idx: usize,
}

/// Record block info
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub pack_size: u64,
    pub pack_offset: u64,
    pub unpack_size: u64,
    pub unpack_offset: u64,
}

/// Lookup result
#[derive(Debug, Clone)]
pub struct LookupResult {
    /// The keyword
    pub key_text: String,
    /// The definition, or base64 resource data for MDD files
    pub definition: String,
}

/// Fuzzy search result
#[derive(Debug, Clone)]
pub struct FuzzyWord {
    pub item: KeyWordItem,
    pub edit_distance: usize,
}
