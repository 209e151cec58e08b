//! Time-ordered indices with cursor pagination.
//!
//! Blocks and transactions are kept in separate orderings keyed by
//! `(timestamp, hash)`; the hash breaks timestamp ties
//! lexicographically, which makes every cursor position unambiguous.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::storage::VertexRecord;
use crate::types::VertexId;

/// Pagination cursor: the `(timestamp, hash)` of the last seen entry.
pub type Cursor = (u64, VertexId);

/// Newest/oldest orderings over blocks and transactions.
#[derive(Default)]
pub struct TimelineIndex {
    blocks: BTreeSet<Cursor>,
    txs: BTreeSet<Cursor>,
}

impl TimelineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.txs.clear();
    }

    /// Registers a new vertex under its kind's ordering.
    pub fn add_vertex(&mut self, record: &VertexRecord) {
        let entry = (record.vertex.timestamp, record.vertex.hash);
        if record.vertex.is_block() {
            self.blocks.insert(entry);
        } else {
            self.txs.insert(entry);
        }
    }

    /// Removes a vertex (administrative deletion).
    pub fn remove_vertex(&mut self, record: &VertexRecord) {
        let entry = (record.vertex.timestamp, record.vertex.hash);
        self.blocks.remove(&entry);
        self.txs.remove(&entry);
    }

    fn newest(set: &BTreeSet<Cursor>, count: usize) -> Vec<VertexId> {
        set.iter().rev().take(count).map(|(_, id)| *id).collect()
    }

    fn oldest(set: &BTreeSet<Cursor>, count: usize) -> Vec<VertexId> {
        set.iter().take(count).map(|(_, id)| *id).collect()
    }

    fn older_than(set: &BTreeSet<Cursor>, cursor: Cursor, count: usize) -> Vec<VertexId> {
        set.range((Bound::Unbounded, Bound::Excluded(cursor)))
            .rev()
            .take(count)
            .map(|(_, id)| *id)
            .collect()
    }

    fn newer_than(set: &BTreeSet<Cursor>, cursor: Cursor, count: usize) -> Vec<VertexId> {
        set.range((Bound::Excluded(cursor), Bound::Unbounded))
            .take(count)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Newest blocks first.
    pub fn newest_blocks(&self, count: usize) -> Vec<VertexId> {
        Self::newest(&self.blocks, count)
    }

    /// Oldest blocks first.
    pub fn oldest_blocks(&self, count: usize) -> Vec<VertexId> {
        Self::oldest(&self.blocks, count)
    }

    /// Blocks strictly older than the cursor, newest first.
    pub fn blocks_older_than(&self, cursor: Cursor, count: usize) -> Vec<VertexId> {
        Self::older_than(&self.blocks, cursor, count)
    }

    /// Blocks strictly newer than the cursor, oldest first.
    pub fn blocks_newer_than(&self, cursor: Cursor, count: usize) -> Vec<VertexId> {
        Self::newer_than(&self.blocks, cursor, count)
    }

    /// Newest transactions first.
    pub fn newest_txs(&self, count: usize) -> Vec<VertexId> {
        Self::newest(&self.txs, count)
    }

    /// Oldest transactions first.
    pub fn oldest_txs(&self, count: usize) -> Vec<VertexId> {
        Self::oldest(&self.txs, count)
    }

    /// Transactions strictly older than the cursor, newest first.
    pub fn txs_older_than(&self, cursor: Cursor, count: usize) -> Vec<VertexId> {
        Self::older_than(&self.txs, cursor, count)
    }

    /// Transactions strictly newer than the cursor, oldest first.
    pub fn txs_newer_than(&self, cursor: Cursor, count: usize) -> Vec<VertexId> {
        Self::newer_than(&self.txs, cursor, count)
    }
}
