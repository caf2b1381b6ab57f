//! Block decoding for MDX/MDD files
//!
//! Every compressed block starts with a 4-byte compression tag and a 4-byte
//! checksum, followed by the payload.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{MdictError, Result};
use crate::types::CompressionType;
use crate::utils::mdx_decrypt;

const BLOCK_PREFIX: usize = 8;

/// Ceiling on the decoded size of one block
pub const MAX_UNPACKED_BLOCK: usize = 64 * 1024 * 1024;

/// Decompress LZO1X data
pub fn lzo_decompress(input: &[u8], output_size: usize) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if output_size > MAX_UNPACKED_BLOCK {
        return Err(MdictError::InvalidFormat(format!(
            "lzo block claims {} decoded bytes",
            output_size
        )));
    }
    let lzo = minilzo_rs::LZO::init()
        .map_err(|e| MdictError::DecompressionError(format!("lzo init: {:?}", e)))?;
    lzo.decompress_safe(input, output_size)
        .map_err(|e| MdictError::DecompressionError(format!("lzo: {:?}", e)))
}

fn zlib_decompress(input: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.min(MAX_UNPACKED_BLOCK));
    ZlibDecoder::new(input)
        .take(MAX_UNPACKED_BLOCK as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| MdictError::DecompressionError(format!("zlib: {}", e)))?;
    if out.len() > MAX_UNPACKED_BLOCK {
        return Err(MdictError::InvalidFormat(format!(
            "zlib block inflates past {} bytes",
            MAX_UNPACKED_BLOCK
        )));
    }
    Ok(out)
}

/// Decode one stored block, decrypting first when `encrypted` is set
pub fn unpack_block(block: &[u8], unpack_size: usize, encrypted: bool) -> Result<Vec<u8>> {
    if block.len() < BLOCK_PREFIX {
        return Err(MdictError::InvalidFormat(format!(
            "block of {} bytes is shorter than its header",
            block.len()
        )));
    }

    if unpack_size > MAX_UNPACKED_BLOCK {
        return Err(MdictError::InvalidFormat(format!(
            "block claims {} decoded bytes, limit is {}",
            unpack_size, MAX_UNPACKED_BLOCK
        )));
    }

    let comp_type = CompressionType::from_bytes(block).ok_or_else(|| {
        MdictError::InvalidCompressionType(u32::from_le_bytes([
            block[0], block[1], block[2], block[3],
        ]))
    })?;

    let data = if encrypted {
        mdx_decrypt(block)
    } else {
        block.to_vec()
    };
    let payload = &data[BLOCK_PREFIX..];

    match comp_type {
        CompressionType::None => Ok(payload.to_vec()),
        CompressionType::Lzo => lzo_decompress(payload, unpack_size),
        CompressionType::Zlib => zlib_decompress(payload, unpack_size),
    }
}
