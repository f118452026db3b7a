//! Nestable write batches.
//!
//! Each batch collects pending adds, deletes and whole-bag property overlays
//! in a frame. Writes inside a batch reach the WAL immediately but touch the
//! shared stores only when the outermost frame commits; a nested commit
//! merges into its parent. Reads inside a batch see the merged overlay
//! layered over the shared state.

use nervusdb_api::{Id, PropertyBag, TripleKey};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct BatchOptions {
    pub tx_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchFrame {
    pub tx_id: Option<String>,
    pub adds: Vec<TripleKey>,
    adds_set: HashSet<TripleKey>,
    pub deletes: HashSet<TripleKey>,
    pub node_props: HashMap<Id, PropertyBag>,
    pub edge_props: HashMap<TripleKey, PropertyBag>,
}

impl BatchFrame {
    fn new(tx_id: Option<String>) -> Self {
        Self {
            tx_id,
            ..Default::default()
        }
    }

    fn stage_add(&mut self, key: TripleKey) {
        self.deletes.remove(&key);
        if self.adds_set.insert(key) {
            self.adds.push(key);
        }
    }

    fn stage_delete(&mut self, key: TripleKey) {
        if self.adds_set.remove(&key) {
            self.adds.retain(|k| *k != key);
        }
        self.deletes.insert(key);
    }

    /// Folds this frame into its parent, child entries winning.
    fn merge_into(self, parent: &mut BatchFrame) {
        for key in self.deletes {
            parent.stage_delete(key);
        }
        for key in self.adds {
            parent.stage_add(key);
        }
        parent.node_props.extend(self.node_props);
        parent.edge_props.extend(self.edge_props);
    }
}

/// The merged read view of every open frame.
#[derive(Debug, Default, Clone)]
pub struct Overlay {
    pub adds: Vec<TripleKey>,
    pub deletes: HashSet<TripleKey>,
    pub node_props: HashMap<Id, PropertyBag>,
    pub edge_props: HashMap<TripleKey, PropertyBag>,
}

#[derive(Debug, Default)]
pub struct BatchStack {
    frames: Vec<BatchFrame>,
}

impl BatchStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn begin(&mut self, tx_id: Option<String>) {
        self.frames.push(BatchFrame::new(tx_id));
    }

    pub fn stage_add(&mut self, key: TripleKey) {
        self.top().stage_add(key);
    }

    pub fn stage_delete(&mut self, key: TripleKey) {
        self.top().stage_delete(key);
    }

    pub fn stage_node_props(&mut self, node: Id, bag: PropertyBag) {
        self.top().node_props.insert(node, bag);
    }

    pub fn stage_edge_props(&mut self, edge: TripleKey, bag: PropertyBag) {
        self.top().edge_props.insert(edge, bag);
    }

    /// Transaction id of the innermost open frame.
    pub fn current_tx_id(&self) -> Option<String> {
        self.frames.last().and_then(|frame| frame.tx_id.clone())
    }

    /// Pops the top frame. When a parent remains the frame is merged into it
    /// and `None` is returned; the outermost frame is handed back for the
    /// caller to apply to the shared stores.
    pub fn commit(&mut self) -> Option<BatchFrame> {
        let frame = self.frames.pop().expect("commit with no active batch");
        match self.frames.last_mut() {
            Some(parent) => {
                frame.merge_into(parent);
                None
            }
            None => Some(frame),
        }
    }

    /// Pops and discards the top frame.
    pub fn abort(&mut self) -> BatchFrame {
        self.frames.pop().expect("abort with no active batch")
    }

    /// Merged view of all open frames, bottom to top. `None` outside a batch.
    pub fn overlay(&self) -> Option<Overlay> {
        if self.frames.is_empty() {
            return None;
        }
        let mut merged = Overlay::default();
        let mut adds_set: HashSet<TripleKey> = HashSet::new();
        for frame in &self.frames {
            for key in &frame.deletes {
                if adds_set.remove(key) {
                    merged.adds.retain(|k| k != key);
                }
                merged.deletes.insert(*key);
            }
            for key in &frame.adds {
                merged.deletes.remove(key);
                if adds_set.insert(*key) {
                    merged.adds.push(*key);
                }
            }
            for (node, bag) in &frame.node_props {
                merged.node_props.insert(*node, bag.clone());
            }
            for (edge, bag) in &frame.edge_props {
                merged.edge_props.insert(*edge, bag.clone());
            }
        }
        Some(merged)
    }

    /// Reads a staged node bag, top frame first.
    pub fn node_props(&self, node: Id) -> Option<&PropertyBag> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.node_props.get(&node))
    }

    pub fn edge_props(&self, edge: TripleKey) -> Option<&PropertyBag> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.edge_props.get(&edge))
    }

    fn top(&mut self) -> &mut BatchFrame {
        self.frames.last_mut().expect("write staged with no active batch")
    }
}
