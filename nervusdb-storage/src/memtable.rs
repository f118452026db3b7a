//! In-memory triple delta and tombstones.
//!
//! Holds triples appended since the last flush plus the logical-delete set.
//! Tombstones take precedence everywhere: a tombstoned key must never reach
//! query output, whatever its source. Re-adding a tombstoned triple revives
//! it by clearing the tombstone.
//!
//! The collections are persistent (`im`) so a snapshot clones them in O(1).

use nervusdb_api::TripleKey;

#[derive(Debug, Default, Clone)]
pub struct TripleMemtable {
    /// Append-ordered delta since last flush.
    delta: im::Vector<TripleKey>,
    delta_set: im::OrdSet<TripleKey>,
    tombstones: im::OrdSet<TripleKey>,
    version: u64,
}

impl TripleMemtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a triple. Returns `false` when the key is already staged.
    /// Clears any tombstone for the key either way.
    pub fn add(&mut self, key: TripleKey) -> bool {
        let revived = self.tombstones.remove(&key).is_some();
        if revived {
            self.version += 1;
        }
        if self.delta_set.insert(key).is_some() {
            return false;
        }
        self.delta.push_back(key);
        self.version += 1;
        true
    }

    /// Tombstones a triple and withdraws it from the unflushed delta.
    pub fn delete(&mut self, key: TripleKey) {
        if self.delta_set.remove(&key).is_some() {
            self.delta = self.delta.iter().copied().filter(|k| *k != key).collect();
        }
        self.tombstones.insert(key);
        self.version += 1;
    }

    pub fn contains(&self, key: TripleKey) -> bool {
        self.delta_set.contains(&key)
    }

    pub fn is_tombstoned(&self, key: TripleKey) -> bool {
        self.tombstones.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.delta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TripleKey> + '_ {
        self.delta.iter().copied()
    }

    pub fn delta(&self) -> im::Vector<TripleKey> {
        self.delta.clone()
    }

    pub fn delta_set(&self) -> im::OrdSet<TripleKey> {
        self.delta_set.clone()
    }

    pub fn tombstones(&self) -> im::OrdSet<TripleKey> {
        self.tombstones.clone()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replaces the tombstone set wholesale (manifest load / compaction).
    pub fn set_tombstones(&mut self, tombstones: im::OrdSet<TripleKey>) {
        self.tombstones = tombstones;
        self.version += 1;
    }

    /// Drops the staged delta after a successful flush. Tombstones stay: they
    /// remain the live delete set until compaction expunges the triples.
    pub fn clear_delta(&mut self) {
        self.delta.clear();
        self.delta_set.clear();
        self.version += 1;
    }

    /// Section form: `[count: u32][s, p, o]*` over the staged delta.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.delta.len() as u32).to_le_bytes());
        for key in &self.delta {
            out.extend_from_slice(&key.s.to_le_bytes());
            out.extend_from_slice(&key.p.to_le_bytes());
            out.extend_from_slice(&key.o.to_le_bytes());
        }
    }

    pub fn deserialize(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 4 {
            return Err(crate::Error::Corrupted("truncated triples section"));
        }
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() != 4 + count * 12 {
            return Err(crate::Error::Corrupted("triples section length mismatch"));
        }
        let mut table = Self::new();
        let mut pos = 4;
        for _ in 0..count {
            let s = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let p = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
            let o = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap());
            table.add(TripleKey::new(s, p, o));
            pos += 12;
        }
        table.version = 0;
        Ok(table)
    }
}
