//! Writes small MDict v2 files for tests
//!
//! Every block is zlib compressed. MDX keys are UTF-8, MDD keys UTF-16LE, as
//! real dictionaries store them.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;

const KEYS_PER_BLOCK: usize = 2;
const RECORDS_PER_BLOCK: usize = 3;

fn pack(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut block = vec![0x02, 0x00, 0x00, 0x00];
    block.extend_from_slice(&[0u8; 4]);
    block.extend_from_slice(&compressed);
    block
}

fn push_u64(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&(n as u64).to_be_bytes());
}

struct KeyCodec {
    utf16: bool,
}

impl KeyCodec {
    /// Encoded bytes with terminator, and length in code units
    fn encode(&self, key: &str) -> (Vec<u8>, usize) {
        if self.utf16 {
            let units: Vec<u16> = key.encode_utf16().collect();
            let mut bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
            bytes.extend_from_slice(&[0, 0]);
            (bytes, units.len())
        } else {
            let mut bytes = key.as_bytes().to_vec();
            bytes.push(0);
            (bytes, key.len())
        }
    }
}

fn write_file(path: &Path, header_attrs: &str, utf16: bool, entries: &[(String, Vec<u8>)]) {
    let codec = KeyCodec { utf16 };

    // Record offsets in the concatenated, uncompressed record stream
    let mut offsets = Vec::with_capacity(entries.len());
    let mut total = 0;
    for (_, data) in entries {
        offsets.push(total);
        total += data.len();
    }

    // Key blocks and their info
    let mut key_blocks = Vec::new();
    let mut key_info = Vec::new();
    for (chunk_idx, chunk) in entries.chunks(KEYS_PER_BLOCK).enumerate() {
        let mut raw = Vec::new();
        for (i, (key, _)) in chunk.iter().enumerate() {
            push_u64(&mut raw, offsets[chunk_idx * KEYS_PER_BLOCK + i]);
            raw.extend_from_slice(&codec.encode(key).0);
        }
        let packed = pack(&raw);

        push_u64(&mut key_info, chunk.len());
        for key in [&chunk[0].0, &chunk[chunk.len() - 1].0] {
            let (bytes, units) = codec.encode(key);
            key_info.extend_from_slice(&(units as u16).to_be_bytes());
            key_info.extend_from_slice(&bytes);
        }
        push_u64(&mut key_info, packed.len());
        push_u64(&mut key_info, raw.len());
        key_blocks.extend_from_slice(&packed);
    }
    let key_info_packed = pack(&key_info);

    // Record blocks never split a record
    let mut record_blocks = Vec::new();
    let mut record_info = Vec::new();
    let mut record_block_count = 0;
    for chunk in entries.chunks(RECORDS_PER_BLOCK) {
        let raw: Vec<u8> = chunk.iter().flat_map(|(_, data)| data.clone()).collect();
        let packed = pack(&raw);
        push_u64(&mut record_info, packed.len());
        push_u64(&mut record_info, raw.len());
        record_blocks.extend_from_slice(&packed);
        record_block_count += 1;
    }

    let mut out = Vec::new();

    let header = format!(
        "<Dictionary GeneratedByEngineVersion=\"2.0\" RequiredEngineVersion=\"2.0\" {}/>\r\n\0",
        header_attrs
    );
    let header_bytes: Vec<u8> = header.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&[0u8; 4]);

    push_u64(&mut out, entries.chunks(KEYS_PER_BLOCK).count());
    push_u64(&mut out, entries.len());
    push_u64(&mut out, key_info.len());
    push_u64(&mut out, key_info_packed.len());
    push_u64(&mut out, key_blocks.len());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&key_info_packed);
    out.extend_from_slice(&key_blocks);

    push_u64(&mut out, record_block_count);
    push_u64(&mut out, entries.len());
    push_u64(&mut out, record_info.len());
    push_u64(&mut out, record_blocks.len());
    out.extend_from_slice(&record_info);
    out.extend_from_slice(&record_blocks);

    std::fs::write(path, out).unwrap();
}

/// Write an MDX file with UTF-8 keys and HTML definitions
pub fn write_mdx(path: &Path, title: &str, entries: &[(&str, &str)]) {
    let attrs = format!(
        "Format=\"Html\" KeyCaseSensitive=\"No\" StripKey=\"Yes\" Encrypted=\"0\" \
         Encoding=\"UTF-8\" Title=\"{}\"",
        title
    );
    let entries: Vec<(String, Vec<u8>)> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), format!("{}\r\n\0", v).into_bytes()))
        .collect();
    write_file(path, &attrs, false, &entries);
}

/// Write an MDD file holding raw resources under `\`-separated keys
pub fn write_mdd(path: &Path, entries: &[(&str, &[u8])]) {
    let attrs = "KeyCaseSensitive=\"No\" StripKey=\"Yes\" Encrypted=\"0\" Encoding=\"\"";
    let entries: Vec<(String, Vec<u8>)> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_vec()))
        .collect();
    write_file(path, attrs, true, &entries);
}
