//! Derived indices over the vertex set.
//!
//! Every index is a view: it can always be rebuilt deterministically by
//! scanning storage, and it is kept current incrementally as vertices
//! arrive and as consensus flips their state. The node updates indices
//! in the same critical section as the metadata they reflect.

use crate::storage::{StorageError, VertexRecord, VertexStore};
use crate::types::VertexId;

pub mod address;
pub mod timeline;
pub mod tips;
pub mod tokens;

pub use address::AddressIndex;
pub use timeline::TimelineIndex;
pub use tips::TipsIndex;
pub use tokens::{TokenEntry, TokenIndex};

/// The full set of indices a node maintains.
pub struct IndexSet {
    pub tips: TipsIndex,
    pub addresses: AddressIndex,
    pub tokens: TokenIndex,
    pub timeline: TimelineIndex,
}

impl IndexSet {
    /// Empty indices for the given network address version bytes.
    pub fn new(p2pkh_version_byte: u8, multisig_version_byte: u8) -> Self {
        Self {
            tips: TipsIndex::new(),
            addresses: AddressIndex::new(p2pkh_version_byte, multisig_version_byte),
            tokens: TokenIndex::new(),
            timeline: TimelineIndex::new(),
        }
    }

    /// Registers a vertex seen for the first time.
    pub fn add_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        record: &VertexRecord,
    ) -> Result<(), StorageError> {
        self.tips.add_vertex(record);
        self.addresses.add_vertex(store, record)?;
        self.tokens.add_vertex(store, record)?;
        self.timeline.add_vertex(record);
        Ok(())
    }

    /// Refreshes index state after consensus touched a vertex.
    pub fn update_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        id: &VertexId,
    ) -> Result<(), StorageError> {
        let record = store.get(id)?;
        self.tips.update_vertex(&record);
        self.tokens.update_vertex(store, &record)?;
        Ok(())
    }

    /// Drops and rebuilds every index from a full scan.
    ///
    /// Records are replayed in `(timestamp, hash)` order so the rebuild
    /// is deterministic regardless of scan order.
    pub fn rebuild<S: VertexStore + ?Sized>(&mut self, store: &S) -> Result<(), StorageError> {
        self.tips.clear();
        self.addresses.clear();
        self.tokens.clear();
        self.timeline.clear();

        let mut records: Vec<VertexRecord> = store.iter_all().collect();
        records.sort_by_key(|r| (r.vertex.timestamp, r.vertex.hash));
        for record in &records {
            self.add_vertex(store, record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryVertexStore;
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxOutput, Vertex, VertexMetadata};

    fn vertex(timestamp: u64, parents: Vec<VertexId>) -> Vertex {
        let mut v = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp,
            weight: 2.0,
            parents,
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(10, Vec::new())],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        };
        v.update_hash();
        v
    }

    #[test]
    fn rebuild_matches_incremental_state() {
        let mut store = MemoryVertexStore::new();
        let mut incremental = IndexSet::new(0x28, 0x64);

        let a = vertex(100, Vec::new());
        let b = vertex(200, vec![a.hash]);

        let mut meta_a = VertexMetadata::new(2.0);
        meta_a.children.insert(b.hash);
        store.put(a.clone(), meta_a).unwrap();
        store.put(b.clone(), VertexMetadata::new(2.0)).unwrap();

        incremental
            .add_vertex(&store, &store.get(&a.hash).unwrap())
            .unwrap();
        incremental
            .add_vertex(&store, &store.get(&b.hash).unwrap())
            .unwrap();

        let mut rebuilt = IndexSet::new(0x28, 0x64);
        rebuilt.rebuild(&store).unwrap();

        assert_eq!(
            rebuilt.tips.tips_at(250),
            incremental.tips.tips_at(250)
        );
        assert_eq!(
            rebuilt.timeline.newest_txs(10),
            incremental.timeline.newest_txs(10)
        );
    }
}
