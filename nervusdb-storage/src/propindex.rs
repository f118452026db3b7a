//! Secondary indexes over property values and node labels.
//!
//! Both indexes are maintained online by diffing the old and new bag on every
//! property write, and both are advisory: queries that cannot use them fall
//! back to scans. Snapshots are versioned JSON documents under the pages
//! directory; an unknown version or unreadable file just triggers a rebuild
//! from the property store.

use crate::Result;
use crate::manifest::atomic_replace;
use crate::property::PropertyStore;
use nervusdb_api::{Id, LABELS_KEY, PropertyBag, PropertyValue, TripleKey};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

pub const VALUE_INDEX_FILE: &str = "property-values.json";
pub const LABEL_INDEX_FILE: &str = "property-labels.json";

const SNAPSHOT_VERSION: u32 = 1;

/// Totally ordered rendering of a property value, usable as a BTree key.
/// Floats order through `OrderedFloat`, which is what makes this total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<IndexKey>),
    Map(Vec<(String, IndexKey)>),
}

impl From<&PropertyValue> for IndexKey {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Null => IndexKey::Null,
            PropertyValue::Bool(b) => IndexKey::Bool(*b),
            PropertyValue::Int(i) => IndexKey::Int(*i),
            PropertyValue::Float(f) => IndexKey::Float(OrderedFloat(*f)),
            PropertyValue::String(s) => IndexKey::String(s.clone()),
            PropertyValue::Bytes(b) => IndexKey::Bytes(b.clone()),
            PropertyValue::List(items) => IndexKey::List(items.iter().map(IndexKey::from).collect()),
            PropertyValue::Map(map) => IndexKey::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), IndexKey::from(v)))
                    .collect(),
            ),
        }
    }
}

impl IndexKey {
    fn to_value(&self) -> PropertyValue {
        match self {
            IndexKey::Null => PropertyValue::Null,
            IndexKey::Bool(b) => PropertyValue::Bool(*b),
            IndexKey::Int(i) => PropertyValue::Int(*i),
            IndexKey::Float(f) => PropertyValue::Float(f.into_inner()),
            IndexKey::String(s) => PropertyValue::String(s.clone()),
            IndexKey::Bytes(b) => PropertyValue::Bytes(b.clone()),
            IndexKey::List(items) => {
                PropertyValue::List(items.iter().map(IndexKey::to_value).collect())
            }
            IndexKey::Map(entries) => PropertyValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

/// `(property, value) → node ids` plus the edge-keyed analogue.
#[derive(Debug, Default)]
pub struct PropertyValueIndex {
    nodes: BTreeMap<(String, IndexKey), BTreeSet<Id>>,
    edges: BTreeMap<(String, IndexKey), BTreeSet<TripleKey>>,
    dirty: bool,
}

impl PropertyValueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_node_diff(&mut self, node: Id, old: Option<&PropertyBag>, new: &PropertyBag) {
        diff_bags(old, new, |key, removed| {
            let slot = (key.0.to_owned(), key.1);
            if removed {
                if let Some(set) = self.nodes.get_mut(&slot) {
                    set.remove(&node);
                    if set.is_empty() {
                        self.nodes.remove(&slot);
                    }
                }
            } else {
                self.nodes.entry(slot).or_default().insert(node);
            }
            self.dirty = true;
        });
    }

    pub fn apply_edge_diff(
        &mut self,
        edge: TripleKey,
        old: Option<&PropertyBag>,
        new: &PropertyBag,
    ) {
        diff_bags(old, new, |key, removed| {
            let slot = (key.0.to_owned(), key.1);
            if removed {
                if let Some(set) = self.edges.get_mut(&slot) {
                    set.remove(&edge);
                    if set.is_empty() {
                        self.edges.remove(&slot);
                    }
                }
            } else {
                self.edges.entry(slot).or_default().insert(edge);
            }
            self.dirty = true;
        });
    }

    pub fn lookup_nodes(&self, property: &str, value: &PropertyValue) -> Vec<Id> {
        self.nodes
            .get(&(property.to_owned(), IndexKey::from(value)))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn lookup_edges(&self, property: &str, value: &PropertyValue) -> Vec<TripleKey> {
        self.edges
            .get(&(property.to_owned(), IndexKey::from(value)))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn rebuild(store: &PropertyStore) -> Self {
        let mut index = Self::new();
        for (node, bag) in store.iter_node_bags() {
            index.apply_node_diff(node, None, bag);
        }
        for (edge, bag) in store.iter_edge_bags() {
            index.apply_edge_diff(edge, None, bag);
        }
        index.dirty = false;
        index
    }

    /// `epoch` stamps the snapshot with the manifest epoch it reflects; a
    /// snapshot from another epoch is ignored at load time.
    pub fn save(&mut self, pages_dir: &Path, epoch: u64) -> Result<()> {
        let snapshot = ValueIndexSnapshot {
            version: SNAPSHOT_VERSION,
            epoch,
            nodes: self
                .nodes
                .iter()
                .map(|((property, key), ids)| ValueIndexNodeEntry {
                    property: property.clone(),
                    value: key.to_value(),
                    ids: ids.iter().copied().collect(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|((property, key), keys)| ValueIndexEdgeEntry {
                    property: property.clone(),
                    value: key.to_value(),
                    keys: keys.iter().map(|k| (k.s, k.p, k.o)).collect(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        atomic_replace(&pages_dir.join(VALUE_INDEX_FILE), &bytes)?;
        self.dirty = false;
        Ok(())
    }

    /// Loads the snapshot, or rebuilds from the property store when the file
    /// is absent, unreadable, from an unknown version, or stamped with a
    /// different manifest epoch than the one being opened.
    pub fn load_or_rebuild(pages_dir: &Path, store: &PropertyStore, epoch: u64) -> Self {
        let path = pages_dir.join(VALUE_INDEX_FILE);
        let snapshot: Option<ValueIndexSnapshot> = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ValueIndexSnapshot>(&bytes) {
                Ok(snap) if snap.version == SNAPSHOT_VERSION && snap.epoch == epoch => Some(snap),
                Ok(snap) => {
                    warn!(
                        found_version = snap.version,
                        found_epoch = snap.epoch,
                        epoch,
                        "stale or unknown value-index snapshot; rebuilding"
                    );
                    None
                }
                Err(e) => {
                    warn!(error = %e, "unreadable value-index snapshot; rebuilding");
                    None
                }
            },
            Err(_) => None,
        };

        match snapshot {
            Some(snap) => {
                let mut index = Self::new();
                for entry in snap.nodes {
                    index
                        .nodes
                        .insert((entry.property, IndexKey::from(&entry.value)), entry.ids.into_iter().collect());
                }
                for entry in snap.edges {
                    index.edges.insert(
                        (entry.property, IndexKey::from(&entry.value)),
                        entry
                            .keys
                            .into_iter()
                            .map(|(s, p, o)| TripleKey::new(s, p, o))
                            .collect(),
                    );
                }
                index
            }
            None => Self::rebuild(store),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ValueIndexSnapshot {
    version: u32,
    #[serde(default)]
    epoch: u64,
    nodes: Vec<ValueIndexNodeEntry>,
    edges: Vec<ValueIndexEdgeEntry>,
}

#[derive(Serialize, Deserialize)]
struct ValueIndexNodeEntry {
    property: String,
    value: PropertyValue,
    ids: Vec<Id>,
}

#[derive(Serialize, Deserialize)]
struct ValueIndexEdgeEntry {
    property: String,
    value: PropertyValue,
    keys: Vec<(Id, Id, Id)>,
}

fn diff_bags(
    old: Option<&PropertyBag>,
    new: &PropertyBag,
    mut apply: impl FnMut((&str, IndexKey), bool),
) {
    if let Some(old) = old {
        for (key, value) in old {
            if key == LABELS_KEY {
                continue;
            }
            if new.get(key) != Some(value) {
                apply((key, IndexKey::from(value)), true);
            }
        }
    }
    for (key, value) in new {
        if key == LABELS_KEY {
            continue;
        }
        if old.and_then(|o| o.get(key)) != Some(value) {
            apply((key, IndexKey::from(value)), false);
        }
    }
}

/// `label → node ids`, derived from the reserved `labels` property and kept
/// in lockstep with it.
#[derive(Debug, Default)]
pub struct LabelIndex {
    labels: BTreeMap<String, BTreeSet<Id>>,
    dirty: bool,
}

fn bag_labels(bag: Option<&PropertyBag>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if let Some(PropertyValue::List(items)) = bag.and_then(|b| b.get(LABELS_KEY)) {
        for item in items {
            if let PropertyValue::String(s) = item {
                out.insert(s.clone());
            }
        }
    }
    out
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_diff(&mut self, node: Id, old: Option<&PropertyBag>, new: &PropertyBag) {
        let old_labels = bag_labels(old);
        let new_labels = bag_labels(Some(new));
        for label in old_labels.difference(&new_labels) {
            if let Some(set) = self.labels.get_mut(label) {
                set.remove(&node);
                if set.is_empty() {
                    self.labels.remove(label);
                }
            }
            self.dirty = true;
        }
        for label in new_labels.difference(&old_labels) {
            self.labels.entry(label.clone()).or_default().insert(node);
            self.dirty = true;
        }
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<Id> {
        self.labels
            .get(label)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn rebuild(store: &PropertyStore) -> Self {
        let mut index = Self::new();
        for (node, bag) in store.iter_node_bags() {
            index.apply_diff(node, None, bag);
        }
        index.dirty = false;
        index
    }

    pub fn save(&mut self, pages_dir: &Path, epoch: u64) -> Result<()> {
        let snapshot = LabelIndexSnapshot {
            version: SNAPSHOT_VERSION,
            epoch,
            labels: self
                .labels
                .iter()
                .map(|(label, ids)| (label.clone(), ids.iter().copied().collect()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        atomic_replace(&pages_dir.join(LABEL_INDEX_FILE), &bytes)?;
        self.dirty = false;
        Ok(())
    }

    pub fn load_or_rebuild(pages_dir: &Path, store: &PropertyStore, epoch: u64) -> Self {
        let path = pages_dir.join(LABEL_INDEX_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<LabelIndexSnapshot>(&bytes) {
                Ok(snap) if snap.version == SNAPSHOT_VERSION && snap.epoch == epoch => Self {
                    labels: snap
                        .labels
                        .into_iter()
                        .map(|(label, ids)| (label, ids.into_iter().collect()))
                        .collect(),
                    dirty: false,
                },
                Ok(snap) => {
                    warn!(
                        found_version = snap.version,
                        found_epoch = snap.epoch,
                        epoch,
                        "stale or unknown label-index snapshot; rebuilding"
                    );
                    Self::rebuild(store)
                }
                Err(e) => {
                    warn!(error = %e, "unreadable label-index snapshot; rebuilding");
                    Self::rebuild(store)
                }
            },
            Err(_) => Self::rebuild(store),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LabelIndexSnapshot {
    version: u32,
    #[serde(default)]
    epoch: u64,
    labels: BTreeMap<String, Vec<Id>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bag(pairs: &[(&str, PropertyValue)]) -> PropertyBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn node_diff_moves_index_membership() {
        let mut index = PropertyValueIndex::new();
        let old = bag(&[("age", PropertyValue::Int(30))]);
        index.apply_node_diff(1, None, &old);
        assert_eq!(index.lookup_nodes("age", &PropertyValue::Int(30)), vec![1]);

        let new = bag(&[("age", PropertyValue::Int(31))]);
        index.apply_node_diff(1, Some(&old), &new);
        assert!(index.lookup_nodes("age", &PropertyValue::Int(30)).is_empty());
        assert_eq!(index.lookup_nodes("age", &PropertyValue::Int(31)), vec![1]);
    }

    #[test]
    fn float_values_index_through_ordered_keys() {
        let mut index = PropertyValueIndex::new();
        index.apply_node_diff(5, None, &bag(&[("score", PropertyValue::Float(1.5))]));
        assert_eq!(
            index.lookup_nodes("score", &PropertyValue::Float(1.5)),
            vec![5]
        );
    }

    #[test]
    fn edge_index_tracks_triple_keys() {
        let mut index = PropertyValueIndex::new();
        let edge = TripleKey::new(1, 2, 3);
        index.apply_edge_diff(edge, None, &bag(&[("weight", PropertyValue::Int(9))]));
        assert_eq!(index.lookup_edges("weight", &PropertyValue::Int(9)), vec![edge]);

        index.apply_edge_diff(edge, Some(&bag(&[("weight", PropertyValue::Int(9))])), &bag(&[]));
        assert!(index.lookup_edges("weight", &PropertyValue::Int(9)).is_empty());
    }

    #[test]
    fn label_index_follows_labels_property() {
        let mut index = LabelIndex::new();
        let with_labels = bag(&[(LABELS_KEY, PropertyValue::labels(["Person", "Admin"]))]);
        index.apply_diff(1, None, &with_labels);
        assert_eq!(index.nodes_with_label("Person"), vec![1]);
        assert_eq!(index.nodes_with_label("Admin"), vec![1]);

        let person_only = bag(&[(LABELS_KEY, PropertyValue::labels(["Person"]))]);
        index.apply_diff(1, Some(&with_labels), &person_only);
        assert!(index.nodes_with_label("Admin").is_empty());
        assert_eq!(index.nodes_with_label("Person"), vec![1]);
    }

    #[test]
    fn snapshots_roundtrip_and_unknown_version_rebuilds() {
        let dir = tempdir().unwrap();
        let mut store = PropertyStore::new();
        store.set_node(1, bag(&[("age", PropertyValue::Int(30))]));
        store.set_node(
            2,
            bag(&[(LABELS_KEY, PropertyValue::labels(["Person"]))]),
        );

        let mut value_index = PropertyValueIndex::rebuild(&store);
        let mut label_index = LabelIndex::rebuild(&store);
        value_index.save(dir.path(), 4).unwrap();
        label_index.save(dir.path(), 4).unwrap();

        let value_loaded = PropertyValueIndex::load_or_rebuild(dir.path(), &store, 4);
        assert_eq!(value_loaded.lookup_nodes("age", &PropertyValue::Int(30)), vec![1]);
        let label_loaded = LabelIndex::load_or_rebuild(dir.path(), &store, 4);
        assert_eq!(label_loaded.nodes_with_label("Person"), vec![2]);

        // Unknown snapshot version falls back to the property store.
        std::fs::write(
            dir.path().join(VALUE_INDEX_FILE),
            br#"{"version":99,"epoch":4,"nodes":[],"edges":[]}"#,
        )
        .unwrap();
        let rebuilt = PropertyValueIndex::load_or_rebuild(dir.path(), &store, 4);
        assert_eq!(rebuilt.lookup_nodes("age", &PropertyValue::Int(30)), vec![1]);

        // A snapshot from another epoch is stale and rebuilt too.
        let stale = PropertyValueIndex::load_or_rebuild(dir.path(), &store, 9);
        assert_eq!(stale.lookup_nodes("age", &PropertyValue::Int(30)), vec![1]);
    }
}
