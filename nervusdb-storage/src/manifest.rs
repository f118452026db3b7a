//! The index manifest: the single point of publication.
//!
//! A JSON document enumerating every live page across all orderings plus the
//! tombstone set, orphaned pages and global configuration. Advancing the
//! manifest advances the visible epoch; it is replaced atomically (temp file,
//! fsync, rename, directory fsync), so readers either see the old state in
//! full or the new state in full.

use crate::order::TripleOrder;
use crate::page::Compression;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use nervusdb_api::{Id, TripleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::warn;

pub const MANIFEST_FILE: &str = "index-manifest.json";
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// One live page of one ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub primary: Id,
    /// Byte offset of the page record (header included) in the ordering's file.
    pub offset: u64,
    pub compressed_len: u32,
    pub raw_len: u32,
    pub crc32: u32,
}

/// A page superseded by a rewrite but possibly still visible to a pinned reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanPage {
    pub order: TripleOrder,
    pub primary: Id,
    pub offset: u64,
    pub compressed_len: u32,
    /// Epoch at which the page was orphaned; reclaimable once every active
    /// reader pins a later epoch.
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub page_size: u32,
    pub compression: Compression,
    pub epoch: u64,
    pub created_at: DateTime<Utc>,
    pub pages: BTreeMap<TripleOrder, Vec<PageEntry>>,
    /// Tombstoned triples, encoded as id triples.
    pub tombstones: Vec<(Id, Id, Id)>,
    #[serde(default)]
    pub orphans: Vec<OrphanPage>,
}

impl Manifest {
    pub fn new(page_size: u32, compression: Compression) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            page_size,
            compression,
            epoch: 0,
            created_at: Utc::now(),
            pages: BTreeMap::new(),
            tombstones: Vec::new(),
            orphans: Vec::new(),
        }
    }

    pub fn entries(&self, order: TripleOrder) -> &[PageEntry] {
        self.pages.get(&order).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entries_for_primary(
        &self,
        order: TripleOrder,
        primary: Id,
    ) -> impl Iterator<Item = &PageEntry> {
        self.entries(order)
            .iter()
            .filter(move |entry| entry.primary == primary)
    }

    pub fn page_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn tombstone_set(&self) -> im::OrdSet<TripleKey> {
        self.tombstones
            .iter()
            .map(|&(s, p, o)| TripleKey::new(s, p, o))
            .collect()
    }

    pub fn set_tombstones<I: IntoIterator<Item = TripleKey>>(&mut self, keys: I) {
        self.tombstones = keys.into_iter().map(|k| (k.s, k.p, k.o)).collect();
        self.tombstones.sort_unstable();
    }

    /// Writes the manifest atomically and stamps `created_at`.
    pub fn store(&mut self, pages_dir: &Path) -> Result<()> {
        self.created_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_replace(&pages_dir.join(MANIFEST_FILE), &bytes)
    }

    /// Loads the current manifest. `Ok(None)` when absent; an undecodable
    /// manifest also yields `Ok(None)` with a warning so the caller falls
    /// back to a rebuild.
    pub fn load(pages_dir: &Path) -> Result<Option<Self>> {
        let path = pages_dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) if manifest.format_version == MANIFEST_FORMAT_VERSION => {
                Ok(Some(manifest))
            }
            Ok(manifest) => {
                warn!(
                    found = manifest.format_version,
                    expected = MANIFEST_FORMAT_VERSION,
                    "unknown manifest format version; rebuilding indexes"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "undecodable manifest; rebuilding indexes");
                Ok(None)
            }
        }
    }
}

/// Replaces `path` atomically: temp file in the same directory, fsync,
/// rename over the target, fsync the directory.
pub(crate) fn atomic_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or(Error::Corrupted("target path has no parent directory"))?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_dir(dir)?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new(1024, Compression::default());
        manifest.epoch = 3;
        manifest.pages.insert(
            TripleOrder::Spo,
            vec![PageEntry {
                primary: 7,
                offset: 0,
                compressed_len: 40,
                raw_len: 64,
                crc32: 0xDEAD_BEEF,
            }],
        );
        manifest.set_tombstones([TripleKey::new(1, 2, 3)]);
        manifest.store(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.page_size, 1024);
        assert_eq!(loaded.entries(TripleOrder::Spo).len(), 1);
        assert_eq!(loaded.entries(TripleOrder::Pos).len(), 0);
        assert!(loaded.tombstone_set().contains(&TripleKey::new(1, 2, 3)));
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempdir().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn undecodable_manifest_falls_back_to_rebuild() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());
    }
}
