//! BFS and DFS walks over the DAG.
//!
//! Walks are parameterized by edge set and direction:
//!
//! - `verifications`: parent pointers (right-to-left) and their inverse,
//!   the `children` metadata (left-to-right);
//! - `funds`: spending inputs (right-to-left) and recorded spenders
//!   (left-to-right);
//! - both flags together walk the union of the two edge sets.
//!
//! BFS yields vertices in non-decreasing timestamp order when walking
//! left-to-right and non-increasing order right-to-left, with ties
//! broken by discovery order. DFS promises no timestamp order. Walks
//! are plain iterators: dropping one cancels it before the next vertex.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use crate::storage::{VertexRecord, VertexStore};
use crate::types::VertexId;

/// Which edges a walk follows.
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeSet {
    pub verifications: bool,
    pub funds: bool,
}

impl EdgeSet {
    /// Only verification (parent/child) edges.
    pub fn verifications() -> Self {
        Self {
            verifications: true,
            funds: false,
        }
    }

    /// Only funds (spending) edges.
    pub fn funds() -> Self {
        Self {
            verifications: false,
            funds: true,
        }
    }

    /// The union of both edge sets.
    pub fn both() -> Self {
        Self {
            verifications: true,
            funds: true,
        }
    }
}

/// Collects the neighbors of a record in the walk direction.
fn neighbors(record: &VertexRecord, edges: EdgeSet, left_to_right: bool) -> Vec<VertexId> {
    let mut out = Vec::new();
    if left_to_right {
        if edges.verifications {
            out.extend(record.metadata.children.iter().copied());
        }
        if edges.funds {
            for spenders in record.metadata.spent_outputs.values() {
                out.extend(spenders.iter().copied());
            }
        }
    } else {
        if edges.verifications {
            out.extend(record.vertex.parents.iter().copied());
        }
        if edges.funds {
            out.extend(record.vertex.inputs.iter().map(|i| i.tx_id));
        }
    }
    out
}

/// Breadth-first walk configuration.
#[derive(Clone, Copy, Debug)]
pub struct BfsWalk {
    pub edges: EdgeSet,
    pub left_to_right: bool,
}

impl BfsWalk {
    pub fn new(edges: EdgeSet, left_to_right: bool) -> Self {
        Self {
            edges,
            left_to_right,
        }
    }

    /// Starts the walk at `root`.
    pub fn run<'a, S: VertexStore + ?Sized>(
        &self,
        store: &'a S,
        root: &VertexId,
        skip_root: bool,
    ) -> BfsIter<'a, S> {
        let mut iter = BfsIter {
            store,
            edges: self.edges,
            left_to_right: self.left_to_right,
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            seq: 0,
        };
        iter.seen.insert(*root);
        if let Ok(record) = store.get(root) {
            if skip_root {
                // Seed the frontier with the root's neighbors directly.
                iter.push_neighbors(&record);
            } else {
                iter.push(record);
            }
        }
        iter
    }
}

/// Heap entry ordered by timestamp with discovery-order tie-break.
struct HeapEntry {
    key: (i64, Reverse<u64>),
    record: VertexRecord,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// Iterator state of a breadth-first walk.
pub struct BfsIter<'a, S: VertexStore + ?Sized> {
    store: &'a S,
    edges: EdgeSet,
    left_to_right: bool,
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<VertexId>,
    seq: u64,
}

impl<S: VertexStore + ?Sized> BfsIter<'_, S> {
    fn push(&mut self, record: VertexRecord) {
        // Max-heap: negate timestamps for left-to-right so the earliest
        // pops first; ties pop in discovery order either way.
        let ts = record.vertex.timestamp as i64;
        let key = if self.left_to_right { -ts } else { ts };
        self.heap.push(HeapEntry {
            key: (key, Reverse(self.seq)),
            record,
        });
        self.seq += 1;
    }

    fn push_neighbors(&mut self, record: &VertexRecord) {
        for id in neighbors(record, self.edges, self.left_to_right) {
            if !self.seen.insert(id) {
                continue;
            }
            if let Ok(next) = self.store.get(&id) {
                self.push(next);
            }
        }
    }
}

impl<S: VertexStore + ?Sized> Iterator for BfsIter<'_, S> {
    type Item = VertexRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        self.push_neighbors(&entry.record);
        Some(entry.record)
    }
}

/// Depth-first walk configuration.
#[derive(Clone, Copy, Debug)]
pub struct DfsWalk {
    pub edges: EdgeSet,
    pub left_to_right: bool,
}

impl DfsWalk {
    pub fn new(edges: EdgeSet, left_to_right: bool) -> Self {
        Self {
            edges,
            left_to_right,
        }
    }

    /// Starts the walk at `root`.
    pub fn run<'a, S: VertexStore + ?Sized>(
        &self,
        store: &'a S,
        root: &VertexId,
        skip_root: bool,
    ) -> DfsIter<'a, S> {
        let mut iter = DfsIter {
            store,
            edges: self.edges,
            left_to_right: self.left_to_right,
            stack: VecDeque::new(),
            seen: HashSet::new(),
        };
        iter.seen.insert(*root);
        if let Ok(record) = store.get(root) {
            if skip_root {
                for id in neighbors(&record, iter.edges, iter.left_to_right) {
                    if iter.seen.insert(id) {
                        iter.stack.push_back(id);
                    }
                }
            } else {
                iter.stack.push_back(*root);
            }
        }
        iter
    }
}

/// Iterator state of a depth-first walk.
pub struct DfsIter<'a, S: VertexStore + ?Sized> {
    store: &'a S,
    edges: EdgeSet,
    left_to_right: bool,
    stack: VecDeque<VertexId>,
    seen: HashSet<VertexId>,
}

impl<S: VertexStore + ?Sized> Iterator for DfsIter<'_, S> {
    type Item = VertexRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop_back() {
            let Ok(record) = self.store.get(&id) else {
                continue;
            };
            for next in neighbors(&record, self.edges, self.left_to_right) {
                if self.seen.insert(next) {
                    self.stack.push_back(next);
                }
            }
            return Some(record);
        }
        None
    }
}
