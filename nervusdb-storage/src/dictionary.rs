//! String dictionary: bidirectional mapping between user strings and dense ids.
//!
//! Ids are assigned sequentially from 0 in insertion order and never change;
//! removal is not supported. The version counter lets the flush coordinator
//! skip rewriting the dictionary section when nothing was interned.

use crate::{Error, Result};
use nervusdb_api::Id;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Dictionary {
    values: Vec<String>,
    ids: HashMap<String, Id>,
    version: u64,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `value`, interning it if missing.
    pub fn get_or_create_id(&mut self, value: &str) -> Id {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        let id = self.values.len() as Id;
        self.values.push(value.to_owned());
        self.ids.insert(value.to_owned(), id);
        self.version += 1;
        id
    }

    /// Returns the id for `value`, or `None` if it was never interned.
    pub fn get_id(&self, value: &str) -> Option<Id> {
        self.ids.get(value).copied()
    }

    /// Returns the string for `id`, or `None` for an unassigned id.
    pub fn get_value(&self, id: Id) -> Option<&str> {
        self.values.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bumped once per insert; used to detect whether the on-disk section is stale.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Section form: `[count: u32][len: u32, bytes]*`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            let bytes = value.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let count = read_u32(bytes, &mut pos)? as usize;
        let mut values = Vec::with_capacity(count);
        let mut ids = HashMap::with_capacity(count);
        for id in 0..count {
            let len = read_u32(bytes, &mut pos)? as usize;
            let end = pos
                .checked_add(len)
                .filter(|end| *end <= bytes.len())
                .ok_or(Error::Corrupted("dictionary entry overruns section"))?;
            let value = std::str::from_utf8(&bytes[pos..end])
                .map_err(|_| Error::Corrupted("dictionary entry is not utf-8"))?
                .to_owned();
            ids.insert(value.clone(), id as Id);
            values.push(value);
            pos = end;
        }
        if pos != bytes.len() {
            return Err(Error::Corrupted("trailing bytes after dictionary section"));
        }
        Ok(Self {
            values,
            ids,
            version: 0,
        })
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let end = pos
        .checked_add(4)
        .filter(|end| *end <= bytes.len())
        .ok_or(Error::Corrupted("truncated dictionary section"))?;
    let value = u32::from_le_bytes(bytes[*pos..end].try_into().unwrap());
    *pos = end;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut dict = Dictionary::new();
        let alice = dict.get_or_create_id("alice");
        let bob = dict.get_or_create_id("bob");
        assert_eq!(alice, 0);
        assert_eq!(bob, 1);
        assert_eq!(dict.get_or_create_id("alice"), alice);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_value(alice), Some("alice"));
        assert_eq!(dict.get_id("bob"), Some(bob));
        assert_eq!(dict.get_id("carol"), None);
        assert_eq!(dict.get_value(99), None);
    }

    #[test]
    fn version_counts_inserts_only() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.version(), 0);
        dict.get_or_create_id("a");
        dict.get_or_create_id("a");
        dict.get_or_create_id("b");
        assert_eq!(dict.version(), 2);
    }

    #[test]
    fn serialize_roundtrip() {
        let mut dict = Dictionary::new();
        for value in ["", "alice", "知识", "bob"] {
            dict.get_or_create_id(value);
        }
        let mut buf = Vec::new();
        dict.serialize(&mut buf);
        let restored = Dictionary::deserialize(&buf).unwrap();
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.get_id("知识"), dict.get_id("知识"));
        assert_eq!(restored.get_value(1), Some("alice"));
    }

    #[test]
    fn truncated_section_is_rejected() {
        let mut dict = Dictionary::new();
        dict.get_or_create_id("alice");
        let mut buf = Vec::new();
        dict.serialize(&mut buf);
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            Dictionary::deserialize(&buf),
            Err(Error::Corrupted(_))
        ));
    }
}
