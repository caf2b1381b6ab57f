//! MDict base implementation
//!
//! This module provides the core parsing functionality for MDX/MDD files.
//! Layout of a file, in order:
//!
//! ```text
//! header length | header (UTF-16LE XML) | adler32
//! key header    | key block info        | key blocks
//! record header | record block info     | record blocks
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::codec::unpack_block;
use crate::error::{MdictError, Result};
use crate::types::*;
use crate::utils::{self, decode_string, parse_header, SectionReader};

/// MDict base parser
pub struct MdictBase {
    file: File,
    pub filepath: String,
    pub meta: DictMeta,
    pub header: DictHeader,
    /// All keywords, sorted by their comparison key
    pub keyword_list: Vec<KeyWordItem>,
    /// Comparison keys parallel to `keyword_list`
    sort_keys: Vec<String>,
    pub record_info_list: Vec<RecordInfo>,
    record_block_start_offset: u64,
}

impl MdictBase {
    /// Open and index the dictionary file at `filepath`
    pub fn new<P: AsRef<Path>>(filepath: P, ext: FileExt) -> Result<Self> {
        let path = filepath.as_ref();
        let mut file = File::open(path)?;

        // Header
        let header_len = utils::bytes_to_number(&read_at(&mut file, 0, 4)?) as usize;
        let header_buf = read_at(&mut file, 4, header_len)?;
        let header_text = decode_string(&header_buf, Encoding::Utf16Le)?;
        let header = parse_header(header_text.trim_end_matches('\0'))?;
        let meta = meta_from_header(&header, ext)?;
        // header length + header + adler32
        let key_header_offset = (4 + header_len + 4) as u64;

        // Key header
        let key_header_len = if meta.is_v2() { 8 * 5 } else { 4 * 4 };
        let key_header_buf = read_at(&mut file, key_header_offset, key_header_len)?;
        let mut reader = SectionReader::new(&key_header_buf, "key header");
        let w = meta.num_width;
        let key_blocks_num = reader.number(w)?;
        let _keyword_num = reader.number(w)?;
        let key_info_unpack_size = if meta.is_v2() { reader.number(w)? } else { 0 };
        let key_info_packed_size = reader.number(w)?;
        let key_blocks_packed_size = reader.number(w)?;
        // v2 appends an adler32 of the key header
        let key_info_offset =
            key_header_offset + key_header_len as u64 + if meta.is_v2() { 4 } else { 0 };

        // Key block info
        let key_info_raw = read_at(&mut file, key_info_offset, key_info_packed_size as usize)?;
        let key_info_buf = if meta.is_v2() {
            unpack_block(
                &key_info_raw,
                key_info_unpack_size as usize,
                meta.encrypt == EncryptType::KeyInfoBlock,
            )?
        } else {
            key_info_raw
        };
        let key_info_list = decode_key_info(&key_info_buf, key_blocks_num as usize, &meta)?;

        // Key blocks
        let key_blocks_offset = key_info_offset + key_info_packed_size;
        let key_blocks_buf =
            read_at(&mut file, key_blocks_offset, key_blocks_packed_size as usize)?;
        let mut keyword_list = Vec::new();
        for (idx, info) in key_info_list.iter().enumerate() {
            let start = info.pack_offset as usize;
            let block = start
                .checked_add(info.pack_size as usize)
                .and_then(|end| key_blocks_buf.get(start..end))
                .ok_or_else(|| {
                    MdictError::InvalidFormat(format!("key block {} out of range", idx))
                })?;
            let unpacked = unpack_block(block, info.unpack_size as usize, false)?;
            split_key_block(&unpacked, idx, &meta, &mut keyword_list)?;
        }

        // Record ends are the next record's start in file order
        for i in 1..keyword_list.len() {
            keyword_list[i - 1].record_end_offset = keyword_list[i].record_start_offset;
        }

        // Record header
        let record_header_offset = key_blocks_offset + key_blocks_packed_size;
        let record_header_len = if meta.is_v2() { 8 * 4 } else { 4 * 4 };
        let record_header_buf = read_at(&mut file, record_header_offset, record_header_len)?;
        let mut reader = SectionReader::new(&record_header_buf, "record header");
        let record_blocks_num = reader.number(w)?;
        let _entries_num = reader.number(w)?;
        let record_info_size = reader.number(w)?;
        let _record_blocks_size = reader.number(w)?;

        // Record block info
        let record_info_offset = record_header_offset + record_header_len as u64;
        let record_info_buf = read_at(&mut file, record_info_offset, record_info_size as usize)?;
        let mut reader = SectionReader::new(&record_info_buf, "record block info");
        let max_blocks = record_info_buf.len() / (2 * w);
        let mut record_info_list = Vec::with_capacity((record_blocks_num as usize).min(max_blocks));
        let (mut pack_offset, mut unpack_offset) = (0u64, 0u64);
        for _ in 0..record_blocks_num {
            let pack_size = reader.number(w)?;
            let unpack_size = reader.number(w)?;
            record_info_list.push(RecordInfo {
                pack_size,
                pack_offset,
                unpack_size,
                unpack_offset,
            });
            pack_offset = pack_offset.saturating_add(pack_size);
            unpack_offset = unpack_offset.saturating_add(unpack_size);
        }

        keyword_list.sort_by_cached_key(|item| comparison_key(&meta, &item.key_text));
        let sort_keys = keyword_list
            .iter()
            .map(|item| comparison_key(&meta, &item.key_text))
            .collect();

        Ok(MdictBase {
            file,
            filepath: path.to_string_lossy().to_string(),
            meta,
            header,
            keyword_list,
            sort_keys,
            record_info_list,
            record_block_start_offset: record_info_offset + record_info_size,
        })
    }

    /// Strip key for comparison
    pub fn strip(&self, key: &str) -> String {
        comparison_key(&self.meta, key)
    }

    /// Index of the exact match for `word`, or of the nearest keyword when
    /// `is_associate` is set
    fn position_of(&self, word: &str, is_associate: bool) -> Option<usize> {
        if self.sort_keys.is_empty() {
            return None;
        }
        let target = self.strip(word);
        let idx = self.sort_keys.partition_point(|k| k.as_str() < target.as_str());
        if idx < self.sort_keys.len() && self.sort_keys[idx] == target {
            // Stripping can make distinct keys compare equal (`\a.png`, `\a.spx`)
            let run = self.sort_keys[idx..]
                .iter()
                .take_while(|k| **k == target)
                .count();
            let exact = (idx..idx + run)
                .find(|&i| self.keyword_list[i].key_text.eq_ignore_ascii_case(word));
            Some(exact.unwrap_or(idx))
        } else if is_associate {
            Some(idx.min(self.sort_keys.len() - 1))
        } else {
            None
        }
    }

    /// Binary search for keyword by word
    pub fn lookup_keyword_by_word(&self, word: &str, is_associate: bool) -> Option<&KeyWordItem> {
        self.position_of(word, is_associate)
            .map(|idx| &self.keyword_list[idx])
    }

    /// Read the raw record bytes for a keyword
    pub fn lookup_record_by_keyword(&mut self, item: &KeyWordItem) -> Result<Vec<u8>> {
        let block_idx = self
            .record_info_list
            .partition_point(|info| info.unpack_offset <= item.record_start_offset)
            .saturating_sub(1);
        let info = self
            .record_info_list
            .get(block_idx)
            .cloned()
            .ok_or_else(|| MdictError::InvalidFormat("dictionary has no record blocks".into()))?;

        let packed = read_at(
            &mut self.file,
            self.record_block_start_offset.saturating_add(info.pack_offset),
            info.pack_size as usize,
        )?;
        let unpacked = unpack_block(&packed, info.unpack_size as usize, false)?;

        let start = (item.record_start_offset - info.unpack_offset) as usize;
        let end = if item.record_end_offset > item.record_start_offset {
            ((item.record_end_offset - info.unpack_offset) as usize).min(unpacked.len())
        } else {
            unpacked.len()
        };
        unpacked
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                MdictError::InvalidFormat(format!(
                    "record for `{}` lies outside its block",
                    item.key_text
                ))
            })
    }

    /// Get keywords that start with the given prefix
    pub fn get_prefix_keywords(&self, prefix: &str) -> Vec<&KeyWordItem> {
        let prefix = prefix.to_lowercase();
        self.keyword_list
            .iter()
            .filter(|item| item.key_text.to_lowercase().starts_with(&prefix))
            .collect()
    }

    /// Get associated keywords (same key block as the nearest match)
    pub fn get_associated_keywords(&self, word: &str) -> Vec<&KeyWordItem> {
        match self.lookup_keyword_by_word(word, true) {
            Some(item) => {
                let block_idx = item.key_block_idx;
                self.keyword_list
                    .iter()
                    .filter(|kw| kw.key_block_idx == block_idx)
                    .collect()
            }
            None => Vec::new(),
        }
    }
}

/// Read `length` bytes at `offset`, refusing ranges that leave the file
fn read_at(file: &mut File, offset: u64, length: usize) -> Result<Vec<u8>> {
    let file_len = file.metadata()?.len();
    let in_bounds = offset
        .checked_add(length as u64)
        .is_some_and(|end| end <= file_len);
    if !in_bounds {
        return Err(MdictError::InvalidFormat(format!(
            "{} bytes at offset {} run past the end of a {}-byte file",
            length, offset, file_len
        )));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::with_capacity(length);
    file.by_ref().take(length as u64).read_to_end(&mut buffer)?;
    if buffer.len() != length {
        return Err(MdictError::InvalidFormat(format!(
            "short read at offset {}: {} of {} bytes",
            offset,
            buffer.len(),
            length
        )));
    }
    Ok(buffer)
}

fn meta_from_header(header: &DictHeader, ext: FileExt) -> Result<DictMeta> {
    let attr = |name: &str| header.get(name).map(String::as_str).unwrap_or("");

    let version = attr("GeneratedByEngineVersion").parse::<f64>().unwrap_or(1.2);
    if version >= 3.0 {
        return Err(MdictError::UnsupportedVersion(version));
    }

    let encrypt = EncryptType::from_header(attr("Encrypted"));
    if encrypt == EncryptType::RecordBlock {
        return Err(MdictError::EncryptedFileRequiresPasscode);
    }

    // MDD files always use UTF-16LE keys
    let encoding = match ext {
        FileExt::Mdd => Encoding::Utf16Le,
        FileExt::Mdx => Encoding::from_header(attr("Encoding")),
    };

    Ok(DictMeta {
        version,
        encoding,
        encrypt,
        num_width: if version >= 2.0 { 8 } else { 4 },
        ext,
        strip_key: attr("StripKey") != "No",
        case_sensitive: attr("KeyCaseSensitive") == "Yes",
    })
}

fn comparison_key(meta: &DictMeta, key: &str) -> String {
    let mut result = if meta.strip_key {
        utils::strip_key(key, meta.ext == FileExt::Mdd)
    } else {
        key.to_string()
    };
    if !meta.case_sensitive {
        result = result.to_lowercase();
    }
    result.trim().to_string()
}

/// Size in bytes of a first/last key stored in the key block info
fn info_key_bytes(units: usize, meta: &DictMeta) -> usize {
    // v2 stores a terminator after each key
    let units = if meta.is_v2() { units + 1 } else { units };
    units * meta.encoding.unit_width()
}

fn decode_key_info(buf: &[u8], blocks: usize, meta: &DictMeta) -> Result<Vec<KeyInfoItem>> {
    let w = meta.num_width;
    let size_width = w / 4;
    let mut reader = SectionReader::new(buf, "key block info");
    let mut list = Vec::with_capacity(blocks.min(buf.len() / (2 * w)));
    let mut pack_offset = 0u64;

    for _ in 0..blocks {
        let entries = reader.number(w)?;
        let first_len = info_key_bytes(reader.number(size_width)? as usize, meta);
        let first = reader.take(first_len)?;
        let last_len = info_key_bytes(reader.number(size_width)? as usize, meta);
        let last = reader.take(last_len)?;
        let pack_size = reader.number(w)?;
        let unpack_size = reader.number(w)?;

        list.push(KeyInfoItem {
            first_key: utils::decode_entry(first, meta.encoding),
            last_key: utils::decode_entry(last, meta.encoding),
            pack_size,
            pack_offset,
            unpack_size,
            entries,
        });
        pack_offset = pack_offset.saturating_add(pack_size);
    }

    Ok(list)
}

fn split_key_block(
    block: &[u8],
    key_block_idx: usize,
    meta: &DictMeta,
    out: &mut Vec<KeyWordItem>,
) -> Result<()> {
    let width = meta.encoding.unit_width();
    let w = meta.num_width;
    let mut pos = 0;

    while pos + w <= block.len() {
        let record_start_offset = utils::bytes_to_number(&block[pos..pos + w]);
        let text_start = pos + w;

        let text_end = (text_start..block.len())
            .step_by(width)
            .find(|&i| block.get(i..i + width).is_some_and(|u| u.iter().all(|b| *b == 0)))
            .ok_or_else(|| {
                MdictError::InvalidFormat(format!(
                    "unterminated key in key block {}",
                    key_block_idx
                ))
            })?;

        out.push(KeyWordItem {
            record_start_offset,
            record_end_offset: 0,
            key_text: decode_string(&block[text_start..text_end], meta.encoding)
                .unwrap_or_default(),
            key_block_idx,
        });

        pos = text_end + width;
    }

    Ok(())
}
