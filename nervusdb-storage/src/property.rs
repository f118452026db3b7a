//! Property bags: binary codec and the two-tier store.
//!
//! Values use a tagged little-endian encoding, recursive for lists and maps.
//! The store layers an in-memory delta over the disk-backed base that the
//! main file's properties section feeds; bags are replaced whole, and a
//! missing bag stays distinct from an empty one.

use crate::{Error, Result};
use nervusdb_api::{Id, PropertyBag, PropertyValue, TripleKey};
use std::collections::HashMap;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

pub fn encode_value(value: &PropertyValue, out: &mut Vec<u8>) {
    match value {
        PropertyValue::Null => out.push(TAG_NULL),
        PropertyValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        PropertyValue::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        PropertyValue::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        PropertyValue::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        PropertyValue::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        PropertyValue::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
        PropertyValue::Map(map) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (key, item) in map {
                out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                out.extend_from_slice(key.as_bytes());
                encode_value(item, out);
            }
        }
    }
}

pub fn decode_value(bytes: &[u8], pos: &mut usize) -> Result<PropertyValue> {
    let tag = *bytes
        .get(*pos)
        .ok_or(Error::PropertyDecode("empty value"))?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(PropertyValue::Null),
        TAG_BOOL => {
            let b = *bytes
                .get(*pos)
                .ok_or(Error::PropertyDecode("truncated bool"))?;
            *pos += 1;
            Ok(PropertyValue::Bool(b != 0))
        }
        TAG_INT => {
            let raw = take(bytes, pos, 8, "truncated int")?;
            Ok(PropertyValue::Int(i64::from_le_bytes(
                raw.try_into().unwrap(),
            )))
        }
        TAG_FLOAT => {
            let raw = take(bytes, pos, 8, "truncated float")?;
            Ok(PropertyValue::Float(f64::from_le_bytes(
                raw.try_into().unwrap(),
            )))
        }
        TAG_STRING => {
            let len = decode_len(bytes, pos)?;
            let raw = take(bytes, pos, len, "truncated string")?;
            Ok(PropertyValue::String(
                std::str::from_utf8(raw)
                    .map_err(|_| Error::PropertyDecode("invalid utf-8 in string value"))?
                    .to_owned(),
            ))
        }
        TAG_BYTES => {
            let len = decode_len(bytes, pos)?;
            let raw = take(bytes, pos, len, "truncated bytes")?;
            Ok(PropertyValue::Bytes(raw.to_vec()))
        }
        TAG_LIST => {
            let len = decode_len(bytes, pos)?;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(decode_value(bytes, pos)?);
            }
            Ok(PropertyValue::List(items))
        }
        TAG_MAP => {
            let len = decode_len(bytes, pos)?;
            let mut map = PropertyBag::new();
            for _ in 0..len {
                let key_len = decode_len(bytes, pos)?;
                let raw = take(bytes, pos, key_len, "truncated map key")?;
                let key = std::str::from_utf8(raw)
                    .map_err(|_| Error::PropertyDecode("invalid utf-8 in map key"))?
                    .to_owned();
                let value = decode_value(bytes, pos)?;
                map.insert(key, value);
            }
            Ok(PropertyValue::Map(map))
        }
        _ => Err(Error::PropertyDecode("unknown value tag")),
    }
}

pub fn encode_bag(bag: &PropertyBag, out: &mut Vec<u8>) {
    out.extend_from_slice(&(bag.len() as u32).to_le_bytes());
    for (key, value) in bag {
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        encode_value(value, out);
    }
}

pub fn decode_bag(bytes: &[u8], pos: &mut usize) -> Result<PropertyBag> {
    let len = decode_len(bytes, pos)?;
    let mut bag = PropertyBag::new();
    for _ in 0..len {
        let key_len = decode_len(bytes, pos)?;
        let raw = take(bytes, pos, key_len, "truncated bag key")?;
        let key = std::str::from_utf8(raw)
            .map_err(|_| Error::PropertyDecode("invalid utf-8 in bag key"))?
            .to_owned();
        let value = decode_value(bytes, pos)?;
        bag.insert(key, value);
    }
    Ok(bag)
}

fn decode_len(bytes: &[u8], pos: &mut usize) -> Result<usize> {
    let raw = take(bytes, pos, 4, "truncated length")?;
    Ok(u32::from_le_bytes(raw.try_into().unwrap()) as usize)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize, what: &'static str) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(Error::PropertyDecode(what))?;
    let raw = &bytes[*pos..end];
    *pos = end;
    Ok(raw)
}

/// Two-tier property store: in-memory delta over the disk-backed base.
#[derive(Debug, Default)]
pub struct PropertyStore {
    base_nodes: HashMap<Id, PropertyBag>,
    base_edges: HashMap<TripleKey, PropertyBag>,
    delta_nodes: HashMap<Id, PropertyBag>,
    delta_edges: HashMap<TripleKey, PropertyBag>,
    version: u64,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the node's bag. Returns the previously visible bag, if any.
    pub fn set_node(&mut self, node: Id, bag: PropertyBag) -> Option<PropertyBag> {
        let old = self.get_node(node).cloned();
        self.delta_nodes.insert(node, bag);
        self.version += 1;
        old
    }

    pub fn set_edge(&mut self, edge: TripleKey, bag: PropertyBag) -> Option<PropertyBag> {
        let old = self.get_edge(edge).cloned();
        self.delta_edges.insert(edge, bag);
        self.version += 1;
        old
    }

    pub fn get_node(&self, node: Id) -> Option<&PropertyBag> {
        self.delta_nodes
            .get(&node)
            .or_else(|| self.base_nodes.get(&node))
    }

    pub fn get_edge(&self, edge: TripleKey) -> Option<&PropertyBag> {
        self.delta_edges
            .get(&edge)
            .or_else(|| self.base_edges.get(&edge))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Folds the delta into the base after a successful flush.
    pub fn merge_delta(&mut self) {
        for (node, bag) in self.delta_nodes.drain() {
            self.base_nodes.insert(node, bag);
        }
        for (edge, bag) in self.delta_edges.drain() {
            self.base_edges.insert(edge, bag);
        }
    }

    /// All currently visible node bags (delta shadowing base).
    pub fn iter_node_bags(&self) -> impl Iterator<Item = (Id, &PropertyBag)> {
        self.base_nodes
            .iter()
            .filter(|(node, _)| !self.delta_nodes.contains_key(node))
            .map(|(node, bag)| (*node, bag))
            .chain(self.delta_nodes.iter().map(|(node, bag)| (*node, bag)))
    }

    pub fn iter_edge_bags(&self) -> impl Iterator<Item = (TripleKey, &PropertyBag)> {
        self.base_edges
            .iter()
            .filter(|(edge, _)| !self.delta_edges.contains_key(edge))
            .map(|(edge, bag)| (*edge, bag))
            .chain(self.delta_edges.iter().map(|(edge, bag)| (*edge, bag)))
    }

    /// Section form: node bags then edge bags, each `[count][entry]*`, where a
    /// node entry is `[id][bag]` and an edge entry is `[s][p][o][bag]`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let nodes: Vec<(Id, &PropertyBag)> = {
            let mut v: Vec<_> = self.iter_node_bags().collect();
            v.sort_by_key(|(node, _)| *node);
            v
        };
        out.extend_from_slice(&(nodes.len() as u32).to_le_bytes());
        for (node, bag) in nodes {
            out.extend_from_slice(&node.to_le_bytes());
            encode_bag(bag, out);
        }

        let edges: Vec<(TripleKey, &PropertyBag)> = {
            let mut v: Vec<_> = self.iter_edge_bags().collect();
            v.sort_by_key(|(edge, _)| *edge);
            v
        };
        out.extend_from_slice(&(edges.len() as u32).to_le_bytes());
        for (edge, bag) in edges {
            out.extend_from_slice(&edge.s.to_le_bytes());
            out.extend_from_slice(&edge.p.to_le_bytes());
            out.extend_from_slice(&edge.o.to_le_bytes());
            encode_bag(bag, out);
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let mut store = Self::new();

        let node_count = decode_len(bytes, &mut pos)?;
        for _ in 0..node_count {
            let raw = take(bytes, &mut pos, 4, "truncated node id")?;
            let node = Id::from_le_bytes(raw.try_into().unwrap());
            let bag = decode_bag(bytes, &mut pos)?;
            store.base_nodes.insert(node, bag);
        }

        let edge_count = decode_len(bytes, &mut pos)?;
        for _ in 0..edge_count {
            let raw = take(bytes, &mut pos, 12, "truncated edge key")?;
            let edge = TripleKey::new(
                u32::from_le_bytes(raw[0..4].try_into().unwrap()),
                u32::from_le_bytes(raw[4..8].try_into().unwrap()),
                u32::from_le_bytes(raw[8..12].try_into().unwrap()),
            );
            let bag = decode_bag(bytes, &mut pos)?;
            store.base_edges.insert(edge, bag);
        }

        if pos != bytes.len() {
            return Err(Error::Corrupted("trailing bytes after properties section"));
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bag() -> PropertyBag {
        let mut bag = PropertyBag::new();
        bag.insert("name".into(), PropertyValue::from("Alice"));
        bag.insert("age".into(), PropertyValue::Int(30));
        bag.insert("score".into(), PropertyValue::Float(0.75));
        bag.insert("raw".into(), PropertyValue::Bytes(vec![0, 1, 255]));
        bag.insert(
            "tags".into(),
            PropertyValue::List(vec![PropertyValue::from("a"), PropertyValue::Null]),
        );
        let mut nested = PropertyBag::new();
        nested.insert("ok".into(), PropertyValue::Bool(true));
        bag.insert("meta".into(), PropertyValue::Map(nested));
        bag
    }

    #[test]
    fn value_roundtrip_covers_every_variant() {
        let bag = sample_bag();
        for value in bag.values() {
            let mut buf = Vec::new();
            encode_value(value, &mut buf);
            let mut pos = 0;
            let decoded = decode_value(&buf, &mut pos).unwrap();
            assert_eq!(&decoded, value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn bag_roundtrip() {
        let bag = sample_bag();
        let mut buf = Vec::new();
        encode_bag(&bag, &mut buf);
        let mut pos = 0;
        assert_eq!(decode_bag(&buf, &mut pos).unwrap(), bag);
    }

    #[test]
    fn truncated_value_is_rejected() {
        let mut buf = Vec::new();
        encode_value(&PropertyValue::from("hello"), &mut buf);
        buf.truncate(buf.len() - 1);
        let mut pos = 0;
        assert!(decode_value(&buf, &mut pos).is_err());
    }

    #[test]
    fn delta_shadows_base_until_merge() {
        let mut store = PropertyStore::new();
        let mut first = PropertyBag::new();
        first.insert("v".into(), PropertyValue::Int(1));
        store.set_node(7, first);
        store.merge_delta();

        let mut second = PropertyBag::new();
        second.insert("v".into(), PropertyValue::Int(2));
        store.set_node(7, second);

        assert_eq!(
            store.get_node(7).unwrap().get("v"),
            Some(&PropertyValue::Int(2))
        );
        store.merge_delta();
        assert_eq!(
            store.get_node(7).unwrap().get("v"),
            Some(&PropertyValue::Int(2))
        );
    }

    #[test]
    fn empty_bag_is_distinct_from_missing() {
        let mut store = PropertyStore::new();
        store.set_node(1, PropertyBag::new());
        assert!(store.get_node(1).is_some());
        assert!(store.get_node(2).is_none());
    }

    #[test]
    fn store_roundtrip_through_section() {
        let mut store = PropertyStore::new();
        store.set_node(1, sample_bag());
        store.set_edge(TripleKey::new(1, 2, 3), sample_bag());
        let mut buf = Vec::new();
        store.serialize(&mut buf);
        let restored = PropertyStore::deserialize(&buf).unwrap();
        assert_eq!(restored.get_node(1), store.get_node(1));
        assert_eq!(
            restored.get_edge(TripleKey::new(1, 2, 3)),
            store.get_edge(TripleKey::new(1, 2, 3))
        );
    }
}
