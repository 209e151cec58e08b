//! Tips index.
//!
//! Tracks, for every vertex, the interval during which it was a tip:
//! from its own timestamp until the timestamp of its first child (open
//! ended while childless). Supports point-in-time queries and a
//! per-second histogram, both answered from the intervals alone.

use std::collections::HashMap;

use crate::storage::VertexRecord;
use crate::types::VertexId;

/// Liveness interval of one vertex: `[begin, end)`, `end == None`
/// while the vertex is still a tip.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TipInterval {
    pub begin: u64,
    pub end: Option<u64>,
}

/// Index of tip-liveness intervals.
#[derive(Default)]
pub struct TipsIndex {
    intervals: HashMap<VertexId, TipInterval>,
}

impl TipsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Registers a new vertex: it opens its own interval and closes its
    /// parents' intervals at its timestamp.
    pub fn add_vertex(&mut self, record: &VertexRecord) {
        let ts = record.vertex.timestamp;
        self.intervals
            .entry(record.vertex.hash)
            .or_insert(TipInterval {
                begin: ts,
                end: None,
            });
        for parent in &record.vertex.parents {
            self.on_new_child(parent, ts);
        }
    }

    /// Re-registers a vertex touched by consensus. Tip intervals are
    /// structural, so this only guarantees presence.
    pub fn update_vertex(&mut self, record: &VertexRecord) {
        self.intervals
            .entry(record.vertex.hash)
            .or_insert(TipInterval {
                begin: record.vertex.timestamp,
                end: None,
            });
    }

    /// Closes a parent's interval at its first child's timestamp.
    pub fn on_new_child(&mut self, parent: &VertexId, child_timestamp: u64) {
        if let Some(interval) = self.intervals.get_mut(parent) {
            interval.end = Some(match interval.end {
                Some(end) => end.min(child_timestamp),
                None => child_timestamp,
            });
        }
    }

    /// The interval of one vertex, if known.
    pub fn interval(&self, id: &VertexId) -> Option<TipInterval> {
        self.intervals.get(id).copied()
    }

    /// Vertices that were tips at `timestamp`, sorted by id.
    pub fn tips_at(&self, timestamp: u64) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self
            .intervals
            .iter()
            .filter(|(_, iv)| {
                iv.begin <= timestamp && iv.end.map_or(true, |end| timestamp < end)
            })
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }

    /// Per-second tip counts over the inclusive range `[begin, end]`.
    pub fn histogram(&self, begin: u64, end: u64) -> Vec<(u64, usize)> {
        (begin..=end)
            .map(|second| (second, self.tips_at(second).len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxOutput, Vertex, VertexMetadata};

    fn record(timestamp: u64, parents: Vec<VertexId>) -> VertexRecord {
        let mut v = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp,
            weight: 2.0,
            parents,
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(1, Vec::new())],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        };
        v.update_hash();
        VertexRecord {
            metadata: VertexMetadata::new(v.weight),
            vertex: v,
        }
    }

    #[test]
    fn new_vertex_is_a_tip_until_its_first_child() {
        let mut index = TipsIndex::new();
        let a = record(100, Vec::new());
        index.add_vertex(&a);

        assert_eq!(index.tips_at(100), vec![a.vertex.hash]);
        assert_eq!(index.tips_at(99), Vec::<VertexId>::new());

        let b = record(150, vec![a.vertex.hash]);
        index.add_vertex(&b);

        // a stopped being a tip the moment b appeared.
        assert_eq!(index.tips_at(149), vec![a.vertex.hash]);
        assert_eq!(index.tips_at(150), vec![b.vertex.hash]);
        assert_eq!(
            index.interval(&a.vertex.hash),
            Some(TipInterval {
                begin: 100,
                end: Some(150)
            })
        );
    }

    #[test]
    fn first_child_wins_when_several_arrive() {
        let mut index = TipsIndex::new();
        let a = record(100, Vec::new());
        index.add_vertex(&a);
        let late = record(300, vec![a.vertex.hash]);
        index.add_vertex(&late);
        let early = record(200, vec![a.vertex.hash]);
        index.add_vertex(&early);

        assert_eq!(
            index.interval(&a.vertex.hash).unwrap().end,
            Some(200),
            "the earliest child closes the interval"
        );
    }

    #[test]
    fn histogram_counts_tips_per_second() {
        let mut index = TipsIndex::new();
        let a = record(100, Vec::new());
        let b = record(101, vec![a.vertex.hash]);
        index.add_vertex(&a);
        index.add_vertex(&b);

        let histogram = index.histogram(100, 102);
        assert_eq!(
            histogram,
            vec![(100, 1), (101, 1), (102, 1)],
        );
    }

    #[test]
    fn two_live_tips_counted_together() {
        let mut index = TipsIndex::new();
        let a = record(100, Vec::new());
        let b = record(100, Vec::new());
        index.add_vertex(&a);
        index.add_vertex(&b);
        assert_eq!(index.tips_at(100).len(), 2);
        assert_eq!(index.histogram(100, 100), vec![(100, 2)]);
    }
}
