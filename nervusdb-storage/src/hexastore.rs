//! Paged hexastore: one append-only page file per triple ordering.
//!
//! The writer appends pages and publishes them through the manifest; readers
//! open the page files read-only and only ever seek to offsets the manifest
//! (or a pinned snapshot of it) names, which makes concurrent appends safe.
//! A page that fails its checksum is skipped with a warning rather than
//! failing the query.

use crate::manifest::{Manifest, PageEntry};
use crate::order::{ALL_ORDERS, TripleOrder};
use crate::page::{self, Compression, PAGE_RECORD_HEADER_LEN, PageHeader};
use crate::{Error, Result};
use nervusdb_api::{Id, TripleKey};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Hexastore {
    pages_dir: PathBuf,
}

impl Hexastore {
    pub fn new(pages_dir: impl AsRef<Path>) -> Result<Self> {
        let pages_dir = pages_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&pages_dir)?;
        Ok(Self { pages_dir })
    }

    #[inline]
    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    pub fn file_path(&self, order: TripleOrder) -> PathBuf {
        self.pages_dir.join(order.file_name())
    }

    /// Appends the staged triples to every ordering's page file, grouped by
    /// primary and chunked to the manifest's page size. New entries are
    /// recorded in the manifest draft; publishing it is the caller's step.
    /// Returns `true` when at least one page was written.
    pub fn append_from_staging(
        &self,
        manifest: &mut Manifest,
        staged: &[TripleKey],
    ) -> Result<bool> {
        if staged.is_empty() {
            return Ok(false);
        }
        let page_size = manifest.page_size as usize;
        let compression = manifest.compression;

        for order in ALL_ORDERS {
            let mut by_primary: BTreeMap<Id, Vec<(Id, Id, Id)>> = BTreeMap::new();
            for &key in staged {
                let permuted = order.permute(key);
                by_primary.entry(permuted.0).or_default().push(permuted);
            }

            let path = self.file_path(order);
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut offset = file.metadata()?.len();
            let entries = manifest.pages.entry(order).or_default();

            for (primary, mut permuted) in by_primary {
                permuted.sort_unstable();
                for chunk in permuted.chunks(page_size) {
                    let (record, header) = page::encode_page(primary, chunk, compression)?;
                    file.write_all(&record)?;
                    entries.push(PageEntry {
                        primary,
                        offset,
                        compressed_len: header.stored_len,
                        raw_len: header.raw_len,
                        crc32: header.crc32,
                    });
                    offset += record.len() as u64;
                }
            }
            file.sync_data()?;
        }

        debug!(staged = staged.len(), "appended staged triples to page files");
        Ok(true)
    }

    /// Rewrites every ordering's page file from scratch and returns a fresh
    /// manifest at `epoch`. Used when no manifest exists, when its page size
    /// disagrees with the configured one, and by full compaction.
    pub fn rebuild(
        &self,
        triples: &[TripleKey],
        page_size: u32,
        compression: Compression,
        epoch: u64,
    ) -> Result<Manifest> {
        let mut manifest = Manifest::new(page_size, compression);
        manifest.epoch = epoch;

        for order in ALL_ORDERS {
            let path = self.file_path(order);
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            let mut offset = 0u64;

            let mut by_primary: BTreeMap<Id, Vec<(Id, Id, Id)>> = BTreeMap::new();
            for &key in triples {
                let permuted = order.permute(key);
                by_primary.entry(permuted.0).or_default().push(permuted);
            }

            let entries = manifest.pages.entry(order).or_default();
            for (primary, mut permuted) in by_primary {
                permuted.sort_unstable();
                permuted.dedup();
                for chunk in permuted.chunks(page_size as usize) {
                    let (record, header) = page::encode_page(primary, chunk, compression)?;
                    file.write_all(&record)?;
                    entries.push(PageEntry {
                        primary,
                        offset,
                        compressed_len: header.stored_len,
                        raw_len: header.raw_len,
                        crc32: header.crc32,
                    });
                    offset += record.len() as u64;
                }
            }
            file.sync_data()?;
        }

        Ok(manifest)
    }

    /// Lazy iterator over one primary's pages under `order`.
    pub fn read_primary(
        &self,
        manifest: &Manifest,
        order: TripleOrder,
        primary: Id,
    ) -> PageIter {
        let entries = manifest
            .entries_for_primary(order, primary)
            .copied()
            .collect();
        PageIter::new(self.file_path(order), order, entries)
    }

    /// Lazy iterator over every page of `order`, for bulk scans.
    pub fn stream_all(&self, manifest: &Manifest, order: TripleOrder) -> PageIter {
        let entries = manifest.entries(order).to_vec();
        PageIter::new(self.file_path(order), order, entries)
    }

    /// Sequential scan of an ordering's file using the self-describing record
    /// headers, ignoring the manifest. Recovery path for a lost manifest;
    /// superseded duplicates are expected and deduplicated by the caller.
    pub fn scan_file(&self, order: TripleOrder) -> Result<Vec<TripleKey>> {
        let path = self.file_path(order);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let len = file.metadata()?.len();
        let mut out = Vec::new();
        let mut offset = 0u64;
        let mut header_buf = [0u8; PAGE_RECORD_HEADER_LEN];

        while offset + PAGE_RECORD_HEADER_LEN as u64 <= len {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut header_buf)?;
            let header = PageHeader::parse(&header_buf)?;
            let end = offset + PAGE_RECORD_HEADER_LEN as u64 + u64::from(header.stored_len);
            if end > len {
                warn!(order = order.name(), offset, "torn page record at file tail");
                break;
            }
            let mut stored = vec![0u8; header.stored_len as usize];
            file.read_exact(&mut stored)?;
            match page::decode_page(&header, &stored, order.name()) {
                Ok(permuted) => out.extend(permuted.into_iter().map(|raw| order.restore(raw))),
                Err(e) => warn!(order = order.name(), offset, error = %e, "skipping unreadable page"),
            }
            offset = end;
        }
        Ok(out)
    }
}

/// Lazily decodes pages from one ordering's file; the file handle opens on
/// first use and closes when the iterator drops.
pub struct PageIter {
    path: PathBuf,
    order: TripleOrder,
    entries: std::vec::IntoIter<PageEntry>,
    file: Option<File>,
    current: std::vec::IntoIter<TripleKey>,
    failed: bool,
}

impl PageIter {
    fn new(path: PathBuf, order: TripleOrder, entries: Vec<PageEntry>) -> Self {
        Self {
            path,
            order,
            entries: entries.into_iter(),
            file: None,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    fn load_next_page(&mut self) -> Option<Vec<TripleKey>> {
        loop {
            let entry = self.entries.next()?;
            if self.file.is_none() {
                match File::open(&self.path) {
                    Ok(file) => self.file = Some(file),
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "page file unreadable");
                        self.failed = true;
                        return None;
                    }
                }
            }
            let file = self.file.as_mut().expect("file opened above");

            match read_entry(file, self.order, &entry) {
                Ok(triples) => return Some(triples),
                Err(e) => {
                    warn!(
                        order = self.order.name(),
                        primary = entry.primary,
                        offset = entry.offset,
                        error = %e,
                        "skipping unreadable page"
                    );
                }
            }
        }
    }
}

impl Iterator for PageIter {
    type Item = TripleKey;

    fn next(&mut self) -> Option<TripleKey> {
        loop {
            if let Some(key) = self.current.next() {
                return Some(key);
            }
            if self.failed {
                return None;
            }
            let page = self.load_next_page()?;
            self.current = page.into_iter();
        }
    }
}

fn read_entry(file: &mut File, order: TripleOrder, entry: &PageEntry) -> Result<Vec<TripleKey>> {
    let mut header_buf = [0u8; PAGE_RECORD_HEADER_LEN];
    file.seek(SeekFrom::Start(entry.offset))?;
    file.read_exact(&mut header_buf)?;
    let header = PageHeader::parse(&header_buf)?;
    if header.primary != entry.primary || header.stored_len != entry.compressed_len {
        return Err(Error::Corrupted("page header disagrees with manifest entry"));
    }
    let mut stored = vec![0u8; header.stored_len as usize];
    file.read_exact(&mut stored)?;
    let permuted = page::decode_page(&header, &stored, order.name())?;
    Ok(permuted.into_iter().map(|raw| order.restore(raw)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn keys(n: u32) -> Vec<TripleKey> {
        (0..n).map(|i| TripleKey::new(i % 5, 100 + i % 3, i)).collect()
    }

    fn setup(dir: &Path, triples: &[TripleKey], page_size: u32) -> (Hexastore, Manifest) {
        let store = Hexastore::new(dir.join("pages")).unwrap();
        let mut manifest = Manifest::new(page_size, Compression::default());
        store.append_from_staging(&mut manifest, triples).unwrap();
        (store, manifest)
    }

    #[test]
    fn append_then_read_primary() {
        let dir = tempdir().unwrap();
        let triples = keys(50);
        let (store, manifest) = setup(dir.path(), &triples, 16);

        let expected = triples.iter().filter(|k| k.s == 2).count();
        let got: Vec<TripleKey> = store
            .read_primary(&manifest, TripleOrder::Spo, 2)
            .collect();
        assert_eq!(got.len(), expected);
        assert!(got.iter().all(|k| k.s == 2));
    }

    #[test]
    fn stream_all_covers_every_triple() {
        let dir = tempdir().unwrap();
        let triples = keys(50);
        let (store, manifest) = setup(dir.path(), &triples, 8);
        for order in ALL_ORDERS {
            let mut got: Vec<TripleKey> = store.stream_all(&manifest, order).collect();
            got.sort_unstable();
            got.dedup();
            assert_eq!(got.len(), triples.len(), "{}", order.name());
        }
    }

    #[test]
    fn pages_respect_page_size() {
        let dir = tempdir().unwrap();
        // 30 triples share subject 1: page size 10 must yield 3 SPO pages.
        let triples: Vec<_> = (0..30).map(|i| TripleKey::new(1, 2, i)).collect();
        let (_store, manifest) = setup(dir.path(), &triples, 10);
        let spo = manifest.entries(TripleOrder::Spo);
        assert_eq!(spo.len(), 3);
        assert!(spo.iter().all(|e| e.primary == 1));
    }

    #[test]
    fn rebuild_matches_append_contents() {
        let dir = tempdir().unwrap();
        let triples = keys(40);
        let store = Hexastore::new(dir.path().join("pages")).unwrap();
        let manifest = store
            .rebuild(&triples, 16, Compression::default(), 1)
            .unwrap();
        assert_eq!(manifest.epoch, 1);
        let mut got: Vec<TripleKey> = store.stream_all(&manifest, TripleOrder::Pos).collect();
        got.sort_unstable();
        let mut want = triples.clone();
        want.sort_unstable();
        assert_eq!(got.len(), want.len());
    }

    #[test]
    fn corrupt_page_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let triples = keys(40);
        let (store, manifest) = setup(dir.path(), &triples, 8);

        // Flip a byte inside the first SPO page's payload.
        let entry = manifest.entries(TripleOrder::Spo)[0];
        let path = store.file_path(TripleOrder::Spo);
        let mut bytes = std::fs::read(&path).unwrap();
        let target = entry.offset as usize + PAGE_RECORD_HEADER_LEN;
        bytes[target] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let survivors: Vec<TripleKey> =
            store.stream_all(&manifest, TripleOrder::Spo).collect();
        assert!(survivors.len() < triples.len());
        assert!(!survivors.is_empty());
    }

    #[test]
    fn scan_file_recovers_without_manifest() {
        let dir = tempdir().unwrap();
        let triples = keys(25);
        let (store, _manifest) = setup(dir.path(), &triples, 8);
        let mut scanned = store.scan_file(TripleOrder::Spo).unwrap();
        scanned.sort_unstable();
        scanned.dedup();
        assert_eq!(scanned.len(), triples.len());
    }
}
