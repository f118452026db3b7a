//! The main database file.
//!
//! Fixed 32-byte header (magic, storage format epoch, section count) followed
//! by length-prefixed, CRC-protected sections: dictionary, triples (legacy,
//! written empty once the paged indexes hold the data), a legacy indexes
//! placeholder, and the property store. The file is replaced atomically on
//! flush. A storage-format-epoch mismatch fails the open; there is no
//! auto-upgrade.

use crate::manifest::atomic_replace;
use crate::{Error, FILE_MAGIC, Result, STORAGE_FORMAT_EPOCH};
use std::path::Path;

pub const HEADER_LEN: usize = 32;

const SECTION_DICTIONARY: u8 = 1;
const SECTION_TRIPLES: u8 = 2;
const SECTION_INDEXES: u8 = 3;
const SECTION_PROPERTIES: u8 = 4;

const SECTION_TAGS: [u8; 4] = [
    SECTION_DICTIONARY,
    SECTION_TRIPLES,
    SECTION_INDEXES,
    SECTION_PROPERTIES,
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MainFileSections {
    pub dictionary: Vec<u8>,
    pub triples: Vec<u8>,
    /// Legacy slot, kept for layout compatibility; always written empty.
    pub indexes: Vec<u8>,
    pub properties: Vec<u8>,
}

impl MainFileSections {
    fn section(&self, tag: u8) -> &[u8] {
        match tag {
            SECTION_DICTIONARY => &self.dictionary,
            SECTION_TRIPLES => &self.triples,
            SECTION_INDEXES => &self.indexes,
            SECTION_PROPERTIES => &self.properties,
            _ => unreachable!("unknown section tag"),
        }
    }

    fn section_mut(&mut self, tag: u8) -> &mut Vec<u8> {
        match tag {
            SECTION_DICTIONARY => &mut self.dictionary,
            SECTION_TRIPLES => &mut self.triples,
            SECTION_INDEXES => &mut self.indexes,
            SECTION_PROPERTIES => &mut self.properties,
            _ => unreachable!("unknown section tag"),
        }
    }
}

/// Serializes and atomically replaces the main file.
pub fn write(path: &Path, sections: &MainFileSections) -> Result<()> {
    let mut out = Vec::with_capacity(
        HEADER_LEN
            + SECTION_TAGS
                .iter()
                .map(|&tag| 13 + sections.section(tag).len())
                .sum::<usize>(),
    );
    out.extend_from_slice(&FILE_MAGIC);
    out.extend_from_slice(&STORAGE_FORMAT_EPOCH.to_le_bytes());
    out.extend_from_slice(&(SECTION_TAGS.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    debug_assert_eq!(out.len(), HEADER_LEN);

    for &tag in &SECTION_TAGS {
        let body = sections.section(tag);
        out.push(tag);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&crc32(body).to_le_bytes());
        out.extend_from_slice(body);
    }

    atomic_replace(path, &out)
}

/// Reads and verifies the main file. `Ok(None)` when the file does not exist.
pub fn read(path: &Path) -> Result<Option<MainFileSections>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if bytes.len() < HEADER_LEN {
        return Err(Error::Corrupted("main file shorter than header"));
    }
    if bytes[0..16] != FILE_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let found = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    if found != STORAGE_FORMAT_EPOCH {
        return Err(Error::StorageFormatMismatch {
            expected: STORAGE_FORMAT_EPOCH,
            found,
        });
    }
    let section_count = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;

    let mut sections = MainFileSections::default();
    let mut pos = HEADER_LEN;
    for _ in 0..section_count {
        if pos + 13 > bytes.len() {
            return Err(Error::Corrupted("truncated section header"));
        }
        let tag = bytes[pos];
        let len = u64::from_le_bytes(bytes[pos + 1..pos + 9].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(bytes[pos + 9..pos + 13].try_into().unwrap());
        pos += 13;
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(Error::Corrupted("section overruns file"))?;
        let body = &bytes[pos..end];
        if crc32(body) != crc {
            return Err(Error::Corrupted("section checksum mismatch"));
        }
        if SECTION_TAGS.contains(&tag) {
            *sections.section_mut(tag) = body.to_vec();
        }
        pos = end;
    }
    Ok(Some(sections))
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
