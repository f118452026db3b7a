//! Index page codec.
//!
//! A page is a contiguous run of triples sharing one primary value under an
//! ordering. On disk every page is a self-describing record:
//!
//! ```text
//! [primary: u32][flags: u32][raw_len: u32][stored_len: u32][crc32: u32][stored bytes]
//! ```
//!
//! The raw body is `[count: u32][a, b, c]*` in permuted order, optionally
//! brotli-compressed into the stored bytes. The CRC covers the stored bytes,
//! so verification happens before any decompression. Records being
//! self-describing keeps the append-only page files scannable even when the
//! manifest is lost.

use crate::{Error, Result};
use nervusdb_api::Id;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const PAGE_RECORD_HEADER_LEN: usize = 20;

const FLAG_BROTLI: u32 = 1;

/// Page compression configuration, recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum Compression {
    Off,
    Brotli { quality: u32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Brotli { quality: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub primary: Id,
    pub compressed: bool,
    pub raw_len: u32,
    pub stored_len: u32,
    pub crc32: u32,
}

impl PageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_RECORD_HEADER_LEN {
            return Err(Error::Corrupted("truncated page record header"));
        }
        let primary = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let flags = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let raw_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let stored_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let crc32 = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        Ok(Self {
            primary,
            compressed: flags & FLAG_BROTLI != 0,
            raw_len,
            stored_len,
            crc32,
        })
    }

    fn encode(&self) -> [u8; PAGE_RECORD_HEADER_LEN] {
        let mut out = [0u8; PAGE_RECORD_HEADER_LEN];
        out[0..4].copy_from_slice(&self.primary.to_le_bytes());
        let flags = if self.compressed { FLAG_BROTLI } else { 0 };
        out[4..8].copy_from_slice(&flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.raw_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.stored_len.to_le_bytes());
        out[16..20].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }
}

/// Encodes one page record. Returns the full record bytes plus its header.
pub fn encode_page(
    primary: Id,
    permuted: &[(Id, Id, Id)],
    compression: Compression,
) -> Result<(Vec<u8>, PageHeader)> {
    let mut raw = Vec::with_capacity(4 + permuted.len() * 12);
    raw.extend_from_slice(&(permuted.len() as u32).to_le_bytes());
    for (a, b, c) in permuted {
        raw.extend_from_slice(&a.to_le_bytes());
        raw.extend_from_slice(&b.to_le_bytes());
        raw.extend_from_slice(&c.to_le_bytes());
    }

    let (stored, compressed) = match compression {
        Compression::Off => (raw.clone(), false),
        Compression::Brotli { quality } => {
            let mut buf = Vec::with_capacity(raw.len() / 2 + 64);
            {
                let mut writer = brotli::CompressorWriter::new(&mut buf, 4096, quality, 22);
                writer.write_all(&raw)?;
            }
            (buf, true)
        }
    };

    let header = PageHeader {
        primary,
        compressed,
        raw_len: raw.len() as u32,
        stored_len: stored.len() as u32,
        crc32: crc32(&stored),
    };

    let mut record = Vec::with_capacity(PAGE_RECORD_HEADER_LEN + stored.len());
    record.extend_from_slice(&header.encode());
    record.extend_from_slice(&stored);
    Ok((record, header))
}

/// Verifies and decodes a page payload back into permuted triples.
pub fn decode_page(
    header: &PageHeader,
    stored: &[u8],
    order_name: &'static str,
) -> Result<Vec<(Id, Id, Id)>> {
    if stored.len() != header.stored_len as usize {
        return Err(Error::Corrupted("page payload length mismatch"));
    }
    if crc32(stored) != header.crc32 {
        return Err(Error::PageChecksumMismatch {
            order: order_name,
            primary: header.primary,
        });
    }

    let raw = if header.compressed {
        let mut buf = Vec::with_capacity(header.raw_len as usize);
        let mut reader = brotli::Decompressor::new(stored, 4096);
        reader.read_to_end(&mut buf)?;
        buf
    } else {
        stored.to_vec()
    };

    if raw.len() != header.raw_len as usize || raw.len() < 4 {
        return Err(Error::Corrupted("page body length mismatch"));
    }
    let count = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
    if raw.len() != 4 + count * 12 {
        return Err(Error::Corrupted("page body count mismatch"));
    }

    let mut triples = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        let a = u32::from_le_bytes(raw[pos..pos + 4].try_into().unwrap());
        let b = u32::from_le_bytes(raw[pos + 4..pos + 8].try_into().unwrap());
        let c = u32::from_le_bytes(raw[pos + 8..pos + 12].try_into().unwrap());
        triples.push((a, b, c));
        pos += 12;
    }
    Ok(triples)
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
