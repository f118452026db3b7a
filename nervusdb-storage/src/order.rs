//! Triple orderings for the paged hexastore.
//!
//! Each ordering defines the permutation a page file is sorted by; the first
//! position is the *primary* that partitions pages. Ordering choice follows
//! the most-selective bound position of a query pattern.

use nervusdb_api::{Id, TripleKey, TriplePattern};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TripleOrder {
    Spo,
    Sop,
    Pos,
    Pso,
    Osp,
    Ops,
}

pub const ALL_ORDERS: [TripleOrder; 6] = [
    TripleOrder::Spo,
    TripleOrder::Sop,
    TripleOrder::Pos,
    TripleOrder::Pso,
    TripleOrder::Osp,
    TripleOrder::Ops,
];

impl TripleOrder {
    pub const fn name(self) -> &'static str {
        match self {
            TripleOrder::Spo => "SPO",
            TripleOrder::Sop => "SOP",
            TripleOrder::Pos => "POS",
            TripleOrder::Pso => "PSO",
            TripleOrder::Osp => "OSP",
            TripleOrder::Ops => "OPS",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.idxpage", self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_ORDERS.iter().copied().find(|o| o.name() == name)
    }

    /// Rearranges a triple into this ordering's sort key.
    pub const fn permute(self, key: TripleKey) -> (Id, Id, Id) {
        let TripleKey { s, p, o } = key;
        match self {
            TripleOrder::Spo => (s, p, o),
            TripleOrder::Sop => (s, o, p),
            TripleOrder::Pos => (p, o, s),
            TripleOrder::Pso => (p, s, o),
            TripleOrder::Osp => (o, s, p),
            TripleOrder::Ops => (o, p, s),
        }
    }

    /// Inverse of [`permute`](Self::permute).
    pub const fn restore(self, raw: (Id, Id, Id)) -> TripleKey {
        let (a, b, c) = raw;
        match self {
            TripleOrder::Spo => TripleKey::new(a, b, c),
            TripleOrder::Sop => TripleKey::new(a, c, b),
            TripleOrder::Pos => TripleKey::new(c, a, b),
            TripleOrder::Pso => TripleKey::new(b, a, c),
            TripleOrder::Osp => TripleKey::new(b, c, a),
            TripleOrder::Ops => TripleKey::new(c, b, a),
        }
    }

    /// The id that partitions pages under this ordering.
    pub const fn primary(self, key: TripleKey) -> Id {
        self.permute(key).0
    }

    /// The pattern position that corresponds to this ordering's primary.
    pub const fn primary_of_pattern(self, pattern: &TriplePattern) -> Option<Id> {
        match self {
            TripleOrder::Spo | TripleOrder::Sop => pattern.s,
            TripleOrder::Pos | TripleOrder::Pso => pattern.p,
            TripleOrder::Osp | TripleOrder::Ops => pattern.o,
        }
    }

    /// Picks the ordering whose primary is the most selective bound position.
    /// With nothing bound, SPO is streamed in full.
    pub fn choose(pattern: &TriplePattern) -> TripleOrder {
        match (pattern.s, pattern.p, pattern.o) {
            (Some(_), Some(_), Some(_)) => TripleOrder::Spo,
            (Some(_), Some(_), None) => TripleOrder::Spo,
            (Some(_), None, Some(_)) => TripleOrder::Sop,
            (None, Some(_), Some(_)) => TripleOrder::Pos,
            (Some(_), None, None) => TripleOrder::Spo,
            (None, Some(_), None) => TripleOrder::Pos,
            (None, None, Some(_)) => TripleOrder::Osp,
            (None, None, None) => TripleOrder::Spo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_restore_are_inverse() {
        let key = TripleKey::new(10, 20, 30);
        for order in ALL_ORDERS {
            assert_eq!(order.restore(order.permute(key)), key, "{}", order.name());
        }
    }

    #[test]
    fn choose_prefers_selective_primary() {
        let p = |s: Option<u32>, pr: Option<u32>, o: Option<u32>| TriplePattern { s, p: pr, o };
        assert_eq!(TripleOrder::choose(&p(Some(1), Some(2), None)), TripleOrder::Spo);
        assert_eq!(TripleOrder::choose(&p(None, Some(2), None)), TripleOrder::Pos);
        assert_eq!(TripleOrder::choose(&p(None, None, Some(3))), TripleOrder::Osp);
        assert_eq!(TripleOrder::choose(&p(Some(1), None, Some(3))), TripleOrder::Sop);
        assert_eq!(TripleOrder::choose(&p(None, Some(2), Some(3))), TripleOrder::Pos);
        assert_eq!(TripleOrder::choose(&p(None, None, None)), TripleOrder::Spo);
    }

    #[test]
    fn names_roundtrip() {
        for order in ALL_ORDERS {
            assert_eq!(TripleOrder::from_name(order.name()), Some(order));
        }
        assert_eq!(TripleOrder::from_name("XYZ"), None);
    }
}
