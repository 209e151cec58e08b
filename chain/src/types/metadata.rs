//! Mutable per-vertex metadata.
//!
//! Metadata is created empty when a vertex is first persisted and is
//! mutated exclusively by the consensus engine. It is stored alongside
//! the vertex bytes and can always be rebuilt by replaying the DAG.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::VertexId;

/// Consensus-maintained state attached to every vertex.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexMetadata {
    /// For each output index, the set of transactions spending it. More
    /// than one entry means an unresolved or resolved double-spend.
    #[serde(default)]
    pub spent_outputs: BTreeMap<u8, BTreeSet<VertexId>>,

    /// Vertices that double-spend at least one output with this one.
    #[serde(default)]
    pub conflict_with: BTreeSet<VertexId>,

    /// Vertices responsible for voiding this one. Empty iff the vertex
    /// is executed. A conflict loser carries its own id here.
    #[serde(default)]
    pub voided_by: BTreeSet<VertexId>,

    /// Vertices byte-equivalent to this one except for parent order.
    #[serde(default)]
    pub twins: BTreeSet<VertexId>,

    /// Inverse of `parents`: vertices listing this one as a parent.
    #[serde(default)]
    pub children: BTreeSet<VertexId>,

    /// Log-scale sum of this vertex's weight and the weights of every
    /// descendant in the verification DAG.
    pub accumulated_weight: f64,

    /// Blocks only: log-scale weight of the block's whole past cone;
    /// non-decreasing along a chain of block parents.
    pub score: f64,

    /// Earliest executed block that transitively confirms this vertex;
    /// `None` while it is still unconfirmed.
    pub first_block: Option<VertexId>,

    /// Blocks only: distance from the genesis block along block parents.
    pub height: u64,
}

impl VertexMetadata {
    /// Fresh metadata for a vertex of the given weight.
    pub fn new(weight: f64) -> Self {
        Self {
            accumulated_weight: weight,
            ..Self::default()
        }
    }

    /// A vertex is executed iff nothing voids it.
    pub fn is_executed(&self) -> bool {
        self.voided_by.is_empty()
    }

    /// Records `spender` as spending `index`, returning the set of other
    /// spenders already present (the conflict candidates).
    pub fn record_spender(&mut self, index: u8, spender: VertexId) -> BTreeSet<VertexId> {
        let entry = self.spent_outputs.entry(index).or_default();
        let others: BTreeSet<VertexId> = entry.iter().copied().filter(|s| *s != spender).collect();
        entry.insert(spender);
        others
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn vid(byte: u8) -> VertexId {
        VertexId(Hash256([byte; crate::types::HASH_LEN]))
    }

    #[test]
    fn executed_iff_voided_by_empty() {
        let mut meta = VertexMetadata::new(2.0);
        assert!(meta.is_executed());
        meta.voided_by.insert(vid(1));
        assert!(!meta.is_executed());
    }

    #[test]
    fn record_spender_reports_existing_spenders() {
        let mut meta = VertexMetadata::new(2.0);
        assert!(meta.record_spender(0, vid(1)).is_empty());

        let others = meta.record_spender(0, vid(2));
        assert_eq!(others, BTreeSet::from([vid(1)]));

        // Re-recording the same spender does not conflict with itself.
        let again = meta.record_spender(0, vid(1));
        assert_eq!(again, BTreeSet::from([vid(2)]));
        assert_eq!(meta.spent_outputs[&0].len(), 2);
    }

    #[test]
    fn metadata_json_roundtrip() {
        let mut meta = VertexMetadata::new(17.25);
        meta.record_spender(3, vid(9));
        meta.conflict_with.insert(vid(4));
        meta.voided_by.insert(vid(4));
        meta.children.insert(vid(5));
        meta.first_block = Some(vid(6));
        meta.height = 42;

        let json = serde_json::to_string(&meta).expect("serialize");
        let back: VertexMetadata = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(meta, back);
    }
}
