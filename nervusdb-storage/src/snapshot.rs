//! Immutable snapshots: what a reader sees.
//!
//! A snapshot is `(manifest, epoch)` plus O(1) clones of the in-memory delta
//! and tombstone set taken at publication time. The writer builds a new one
//! after every mutation or flush and swaps it into an `ArcSwap`; readers
//! clone the `Arc` and keep it for as long as they stream, pinned or not.

use crate::manifest::Manifest;
use nervusdb_api::TripleKey;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct Snapshot {
    epoch: u64,
    manifest: Arc<Manifest>,
    delta: im::Vector<TripleKey>,
    delta_set: im::OrdSet<TripleKey>,
    tombstones: im::OrdSet<TripleKey>,
    /// Manifest file mtime at load, for cheap cross-process staleness checks.
    manifest_stamp: Option<SystemTime>,
}

impl Snapshot {
    pub fn new(
        manifest: Arc<Manifest>,
        delta: im::Vector<TripleKey>,
        delta_set: im::OrdSet<TripleKey>,
        tombstones: im::OrdSet<TripleKey>,
        manifest_stamp: Option<SystemTime>,
    ) -> Self {
        Self {
            epoch: manifest.epoch,
            manifest,
            delta,
            delta_set,
            tombstones,
            manifest_stamp,
        }
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    #[inline]
    pub fn manifest_stamp(&self) -> Option<SystemTime> {
        self.manifest_stamp
    }

    /// Unflushed triples, in append order.
    pub fn delta(&self) -> impl Iterator<Item = TripleKey> + '_ {
        self.delta.iter().copied()
    }

    /// O(1) owned clone of the delta, for iterators that outlive `self`.
    pub fn delta_vector(&self) -> im::Vector<TripleKey> {
        self.delta.clone()
    }

    /// O(1) owned clone of the tombstone set.
    pub fn tombstone_set(&self) -> im::OrdSet<TripleKey> {
        self.tombstones.clone()
    }

    pub fn delta_len(&self) -> usize {
        self.delta.len()
    }

    pub fn in_delta(&self, key: TripleKey) -> bool {
        self.delta_set.contains(&key)
    }

    pub fn is_tombstoned(&self, key: TripleKey) -> bool {
        self.tombstones.contains(&key)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Compression;

    #[test]
    fn snapshot_exposes_epoch_and_delta() {
        let mut manifest = Manifest::new(1024, Compression::Off);
        manifest.epoch = 4;
        let delta: im::Vector<TripleKey> = [TripleKey::new(1, 2, 3)].into_iter().collect();
        let delta_set: im::OrdSet<TripleKey> = delta.iter().copied().collect();
        let snap = Snapshot::new(
            Arc::new(manifest),
            delta,
            delta_set,
            im::OrdSet::new(),
            None,
        );
        assert_eq!(snap.epoch(), 4);
        assert_eq!(snap.delta_len(), 1);
        assert!(snap.in_delta(TripleKey::new(1, 2, 3)));
        assert!(!snap.is_tombstoned(TripleKey::new(1, 2, 3)));
    }
}
