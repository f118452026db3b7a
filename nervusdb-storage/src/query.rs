//! Query dispatcher: triple patterns against the union of sources.
//!
//! A pattern is answered from, in order: the transactional overlay (when a
//! batch is open), the unflushed memtable delta, and the paged hexastore
//! through the ordering whose primary is the most selective bound position.
//! Tombstones and overlay deletes are filtered everywhere; a per-query seen
//! set removes duplicates across sources. Everything is lazy: page files are
//! opened on demand and closed when the stream drops, so memory stays
//! O(batch size + open handles) regardless of store size.

use crate::hexastore::{Hexastore, PageIter};
use crate::order::TripleOrder;
use crate::snapshot::Snapshot;
use crate::txn::Overlay;
use nervusdb_api::{TripleKey, TriplePattern};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 1_024;

/// Builds the lazy match iterator for `pattern`. Returns the stream plus the
/// ordering it chose (whose primary the caller records as hot).
pub(crate) fn dispatch(
    snapshot: Arc<Snapshot>,
    hexastore: &Hexastore,
    overlay: Option<Overlay>,
    pattern: TriplePattern,
    batch_size: usize,
) -> (TripleStream, TripleOrder) {
    let order = TripleOrder::choose(&pattern);

    let pages: PageIter = match order.primary_of_pattern(&pattern) {
        Some(primary) => hexastore.read_primary(snapshot.manifest(), order, primary),
        None => hexastore.stream_all(snapshot.manifest(), order),
    };

    let tombstones = snapshot.tombstone_set();
    let delta = snapshot.delta_vector();

    let (overlay_adds, overlay_deletes) = match overlay {
        Some(overlay) => (overlay.adds, overlay.deletes),
        None => (Vec::new(), HashSet::new()),
    };

    let mut seen: HashSet<TripleKey> = HashSet::new();
    let deletes_for_adds = overlay_deletes.clone();

    // Overlay adds are visible even when the shared state holds a tombstone
    // for the same key: the re-add wins inside its own batch.
    let from_overlay = overlay_adds
        .into_iter()
        .filter(move |key| pattern.matches(*key) && !deletes_for_adds.contains(key));

    let from_shared = delta
        .into_iter()
        .chain(pages)
        .filter(move |key| pattern.matches(*key));

    let tomb = tombstones;
    let dels = overlay_deletes;
    let merged = from_overlay
        .chain(
            from_shared
                .filter(move |key| !tomb.contains(key) && !dels.contains(key)),
        )
        .filter(move |key| seen.insert(*key));

    (
        TripleStream {
            batch_size: batch_size.max(1),
            inner: Box::new(merged),
        },
        order,
    )
}

/// Lazily yields matches in caller-sized batches. Dropping the stream closes
/// any page file handles it still holds.
pub struct TripleStream {
    batch_size: usize,
    inner: Box<dyn Iterator<Item = TripleKey> + Send>,
}

impl TripleStream {
    /// Collects the remaining matches.
    pub fn into_vec(self) -> Vec<TripleKey> {
        let mut out = Vec::new();
        for batch in self {
            out.extend(batch);
        }
        out
    }
}

impl Iterator for TripleStream {
    type Item = Vec<TripleKey>;

    fn next(&mut self) -> Option<Vec<TripleKey>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.inner.next() {
                Some(key) => batch.push(key),
                None => break,
            }
        }
        if batch.is_empty() { None } else { Some(batch) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::page::Compression;
    use tempfile::tempdir;

    fn snapshot_with(
        manifest: Manifest,
        delta: &[TripleKey],
        tombstones: &[TripleKey],
    ) -> Arc<Snapshot> {
        let delta_vec: im::Vector<TripleKey> = delta.iter().copied().collect();
        let delta_set: im::OrdSet<TripleKey> = delta.iter().copied().collect();
        let tombs: im::OrdSet<TripleKey> = tombstones.iter().copied().collect();
        Arc::new(Snapshot::new(
            Arc::new(manifest),
            delta_vec,
            delta_set,
            tombs,
            None,
        ))
    }

    fn key(s: u32, p: u32, o: u32) -> TripleKey {
        TripleKey::new(s, p, o)
    }

    #[test]
    fn union_of_pages_and_delta_without_duplicates() {
        let dir = tempdir().unwrap();
        let hexastore = Hexastore::new(dir.path().join("pages")).unwrap();
        let mut manifest = Manifest::new(8, Compression::Off);
        let flushed = [key(1, 2, 3), key(1, 2, 4)];
        hexastore.append_from_staging(&mut manifest, &flushed).unwrap();

        // key(1, 2, 4) also sits in the delta: it must come out once.
        let snap = snapshot_with(manifest, &[key(1, 2, 4), key(1, 2, 5)], &[]);
        let (stream, order) = dispatch(
            snap,
            &hexastore,
            None,
            TriplePattern {
                s: Some(1),
                p: None,
                o: None,
            },
            DEFAULT_BATCH_SIZE,
        );
        assert_eq!(order, TripleOrder::Spo);
        let mut got = stream.into_vec();
        got.sort_unstable();
        assert_eq!(got, vec![key(1, 2, 3), key(1, 2, 4), key(1, 2, 5)]);
    }

    #[test]
    fn tombstones_filter_page_hits() {
        let dir = tempdir().unwrap();
        let hexastore = Hexastore::new(dir.path().join("pages")).unwrap();
        let mut manifest = Manifest::new(8, Compression::Off);
        hexastore
            .append_from_staging(&mut manifest, &[key(1, 2, 3), key(1, 2, 4)])
            .unwrap();

        let snap = snapshot_with(manifest, &[], &[key(1, 2, 3)]);
        let (stream, _) = dispatch(
            snap,
            &hexastore,
            None,
            TriplePattern::any(),
            DEFAULT_BATCH_SIZE,
        );
        assert_eq!(stream.into_vec(), vec![key(1, 2, 4)]);
    }

    #[test]
    fn overlay_adds_and_deletes_take_effect() {
        let dir = tempdir().unwrap();
        let hexastore = Hexastore::new(dir.path().join("pages")).unwrap();
        let mut manifest = Manifest::new(8, Compression::Off);
        hexastore
            .append_from_staging(&mut manifest, &[key(1, 2, 3)])
            .unwrap();

        let snap = snapshot_with(manifest, &[], &[]);
        let mut overlay = Overlay::default();
        overlay.adds.push(key(9, 9, 9));
        overlay.deletes.insert(key(1, 2, 3));

        let (stream, _) = dispatch(
            snap,
            &hexastore,
            Some(overlay),
            TriplePattern::any(),
            DEFAULT_BATCH_SIZE,
        );
        assert_eq!(stream.into_vec(), vec![key(9, 9, 9)]);
    }

    #[test]
    fn batches_respect_requested_size() {
        let dir = tempdir().unwrap();
        let hexastore = Hexastore::new(dir.path().join("pages")).unwrap();
        let manifest = Manifest::new(8, Compression::Off);
        let delta: Vec<TripleKey> = (0..10).map(|i| key(1, 2, i)).collect();
        let snap = snapshot_with(manifest, &delta, &[]);

        let (stream, _) = dispatch(snap, &hexastore, None, TriplePattern::any(), 4);
        let sizes: Vec<usize> = stream.map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
