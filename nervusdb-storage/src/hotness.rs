//! Hotness counters: which `{ordering, primary}` pairs queries actually touch.
//!
//! Counters decay by half on every snapshot save so stale heat ages out;
//! compaction consults them to pick primaries worth merging. Persisted as a
//! JSON snapshot next to the page files, on a throttle.

use crate::Result;
use crate::manifest::atomic_replace;
use crate::order::TripleOrder;
use nervusdb_api::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const HOTNESS_FILE: &str = "hotness.json";

const DECAY_FACTOR: f64 = 0.5;
const PRUNE_BELOW: f64 = 0.01;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HotnessMap {
    counters: BTreeMap<String, f64>,
}

impl HotnessMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(order: TripleOrder, primary: Id) -> String {
        format!("{}:{}", order.name(), primary)
    }

    pub fn touch(&mut self, order: TripleOrder, primary: Id) {
        *self.counters.entry(Self::key(order, primary)).or_insert(0.0) += 1.0;
    }

    pub fn get(&self, order: TripleOrder, primary: Id) -> f64 {
        self.counters
            .get(&Self::key(order, primary))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Halves every counter and drops the ones that faded to noise.
    pub fn decay(&mut self) {
        for value in self.counters.values_mut() {
            *value *= DECAY_FACTOR;
        }
        self.counters.retain(|_, value| *value >= PRUNE_BELOW);
    }

    /// Decays, then writes the snapshot atomically.
    pub fn save(&mut self, pages_dir: &Path) -> Result<()> {
        self.decay();
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_replace(&pages_dir.join(HOTNESS_FILE), &bytes)
    }

    /// Loads the snapshot; an absent or unreadable one yields a fresh map.
    pub fn load(pages_dir: &Path) -> Self {
        let path = pages_dir.join(HOTNESS_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "unreadable hotness snapshot; starting cold");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn touch_accumulates_and_decay_halves() {
        let mut map = HotnessMap::new();
        map.touch(TripleOrder::Spo, 7);
        map.touch(TripleOrder::Spo, 7);
        map.touch(TripleOrder::Pos, 1);
        assert_eq!(map.get(TripleOrder::Spo, 7), 2.0);
        map.decay();
        assert_eq!(map.get(TripleOrder::Spo, 7), 1.0);
        assert_eq!(map.get(TripleOrder::Pos, 1), 0.5);
    }

    #[test]
    fn decay_prunes_cold_entries() {
        let mut map = HotnessMap::new();
        map.touch(TripleOrder::Osp, 3);
        for _ in 0..10 {
            map.decay();
        }
        assert!(map.is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut map = HotnessMap::new();
        map.touch(TripleOrder::Spo, 7);
        map.touch(TripleOrder::Spo, 7);
        map.save(dir.path()).unwrap();

        let loaded = HotnessMap::load(dir.path());
        // One decay happened at save time.
        assert_eq!(loaded.get(TripleOrder::Spo, 7), 1.0);
    }

    #[test]
    fn missing_snapshot_starts_cold() {
        let dir = tempdir().unwrap();
        assert!(HotnessMap::load(dir.path()).is_empty());
    }
}
