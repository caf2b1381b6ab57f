//! Utility functions for mdict parsing

use crate::error::{MdictError, Result};
use crate::types::Encoding;
use encoding_rs::{BIG5, GB18030, UTF_16LE};
use regex::Regex;
use ripemd::{Digest, Ripemd128};
use std::collections::HashMap;

/// Read a big-endian number of 1, 2, 4 or 8 bytes
pub fn bytes_to_number(data: &[u8]) -> u64 {
    match data.len() {
        1 => data[0] as u64,
        2 => u16::from_be_bytes([data[0], data[1]]) as u64,
        4 => u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64,
        8 => u64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]),
        _ => 0,
    }
}

/// Sequential big-endian reader over a decoded section.
///
/// Every read is bounds-checked so a truncated or corrupt section surfaces as
/// [`MdictError::InvalidFormat`] instead of a panic.
pub struct SectionReader<'a> {
    buf: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> SectionReader<'a> {
    pub fn new(buf: &'a [u8], section: &'static str) -> Self {
        SectionReader {
            buf,
            pos: 0,
            section,
        }
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                MdictError::InvalidFormat(format!(
                    "{} truncated at byte {} (wanted {} more)",
                    self.section, self.pos, len
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn number(&mut self, width: usize) -> Result<u64> {
        self.take(width).map(bytes_to_number)
    }
}

/// Decode bytes to string based on encoding
pub fn decode_string(bytes: &[u8], encoding: Encoding) -> Result<String> {
    let codec = match encoding {
        Encoding::Utf8 => {
            return String::from_utf8(bytes.to_vec())
                .map_err(|e| MdictError::EncodingError(e.to_string()))
        }
        Encoding::Utf16Le => UTF_16LE,
        Encoding::Gb18030 => GB18030,
        Encoding::Big5 => BIG5,
    };

    let (result, _, had_errors) = codec.decode(bytes);
    if had_errors {
        Err(MdictError::EncodingError(format!(
            "{} decode error",
            codec.name()
        )))
    } else {
        Ok(result.into_owned())
    }
}

/// Decode entry text, falling back to lossy UTF-8, and drop trailing NULs
pub fn decode_entry(bytes: &[u8], encoding: Encoding) -> String {
    let text = decode_string(bytes, encoding)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
    text.trim_end_matches('\0').to_string()
}

/// Unescape HTML entities
pub fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse header XML text to attributes
pub fn parse_header(header_text: &str) -> Result<HashMap<String, String>> {
    // Match all attributes in format: key="value"
    let re = Regex::new(r#"(\w+)="((?:[^"\\]|\\.)*)""#)
        .map_err(|e| MdictError::HeaderParseError(e.to_string()))?;

    Ok(re
        .captures_iter(header_text)
        .map(|cap| {
            let key = cap[1].to_string();
            let value = unescape_entities(&cap[2]);
            (key, value)
        })
        .collect())
}

/// Calculate Levenshtein distance between two strings
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // Single rolling row
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a_chars.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }

    row[b_chars.len()]
}

/// Strip punctuation and normalize key for comparison
pub fn strip_key(key: &str, is_mdd: bool) -> String {
    let mut result = key.to_lowercase();

    if is_mdd {
        // For MDD: remove extension and special characters
        if let Some(pos) = result.rfind('.') {
            result.truncate(pos);
        }
        result = result.replace(['(', ')', '.', ',', ' ', '\'', '/', '@'], "");
        result = result.replace('_', "!");
    } else {
        result = result.replace(
            [
                '(', ')', '.', ',', '-', '&', ' ', '\'', '/', '\\', '@', '_', '$', '!',
            ],
            "",
        );
    }

    result.trim().to_string()
}

/// XOR stream used by encrypted MDict blocks
pub fn fast_decrypt(data: &mut [u8], key: &[u8]) {
    let mut previous: u8 = 0x36;
    for (i, byte) in data.iter_mut().enumerate() {
        let t = (*byte).rotate_left(4) ^ previous ^ (i as u8) ^ key[i % key.len()];
        previous = *byte;
        *byte = t;
    }
}

/// Decrypt a block whose key is RIPEMD-128 of its checksum bytes
pub fn mdx_decrypt(comp_block: &[u8]) -> Vec<u8> {
    if comp_block.len() < 8 {
        return comp_block.to_vec();
    }

    let mut key_buffer = [0u8; 8];
    key_buffer[..4].copy_from_slice(&comp_block[4..8]);
    key_buffer[4] = 0x95;
    key_buffer[5] = 0x36;

    let key = Ripemd128::digest(key_buffer);

    let mut result = comp_block.to_vec();
    fast_decrypt(&mut result[8..], &key);
    result
}
