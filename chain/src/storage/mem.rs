//! In-memory vertex store.
//!
//! Keeps every record in a `HashMap` keyed by vertex id. Useful for unit
//! tests, benchmarks, and small devnets; genesis records live in the
//! same map but are protected from removal.

use std::collections::{HashMap, HashSet};

use crate::types::{Vertex, VertexId, VertexMetadata};

use super::{validate_fresh_genesis, StorageError, VertexRecord, VertexStore};

/// In-memory implementation of [`VertexStore`].
#[derive(Default)]
pub struct MemoryVertexStore {
    records: HashMap<VertexId, VertexRecord>,
    genesis_ids: HashSet<VertexId>,
}

impl MemoryVertexStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the resident genesis records.
    pub fn with_genesis(genesis: Vec<VertexRecord>) -> Self {
        validate_fresh_genesis(&genesis);
        let mut store = Self::new();
        for record in genesis {
            store.genesis_ids.insert(record.vertex.hash);
            store.records.insert(record.vertex.hash, record);
        }
        store
    }

    /// Whether an id belongs to the genesis trio.
    pub fn is_genesis(&self, id: &VertexId) -> bool {
        self.genesis_ids.contains(id)
    }
}

impl VertexStore for MemoryVertexStore {
    fn get(&self, id: &VertexId) -> Result<VertexRecord, StorageError> {
        self.records
            .get(id)
            .cloned()
            .ok_or(StorageError::TransactionDoesNotExist(*id))
    }

    fn put(&mut self, vertex: Vertex, metadata: VertexMetadata) -> Result<(), StorageError> {
        self.records
            .insert(vertex.hash, VertexRecord { vertex, metadata });
        Ok(())
    }

    fn save_metadata(
        &mut self,
        id: &VertexId,
        metadata: &VertexMetadata,
    ) -> Result<(), StorageError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or(StorageError::TransactionDoesNotExist(*id))?;
        record.metadata = metadata.clone();
        Ok(())
    }

    fn contains(&self, id: &VertexId) -> Result<bool, StorageError> {
        Ok(self.records.contains_key(id))
    }

    fn remove(&mut self, id: &VertexId) -> Result<(), StorageError> {
        if self.genesis_ids.contains(id) {
            return Err(StorageError::GenesisIsImmutable);
        }
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::TransactionDoesNotExist(*id))
    }

    fn iter_all(&self) -> Box<dyn Iterator<Item = VertexRecord> + '_> {
        Box::new(self.records.values().cloned())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxOutput};

    fn dummy_vertex(timestamp: u64) -> Vertex {
        let mut v = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp,
            weight: 2.0,
            parents: Vec::new(),
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(1, Vec::new())],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        };
        v.update_hash();
        v
    }

    #[test]
    fn put_get_roundtrip() {
        let mut store = MemoryVertexStore::new();
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;

        store
            .put(v.clone(), VertexMetadata::new(v.weight))
            .expect("put");
        let record = store.get(&id).expect("present");
        assert_eq!(record.vertex, v);
        assert!(store.contains(&id).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_hash_reports_does_not_exist() {
        let store = MemoryVertexStore::new();
        let id = dummy_vertex(1).hash;
        match store.get(&id) {
            Err(StorageError::TransactionDoesNotExist(missing)) => assert_eq!(missing, id),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn metadata_updates_in_place() {
        let mut store = MemoryVertexStore::new();
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;
        store.put(v, VertexMetadata::new(2.0)).expect("put");

        let mut meta = store.get_metadata(&id).expect("meta");
        meta.height = 7;
        store.save_metadata(&id, &meta).expect("save");
        assert_eq!(store.get_metadata(&id).unwrap().height, 7);
    }

    #[test]
    fn genesis_cannot_be_removed() {
        let g = dummy_vertex(1_500_000_000);
        let id = g.hash;
        let mut store = MemoryVertexStore::with_genesis(vec![VertexRecord::new(g)]);
        assert!(store.is_genesis(&id));
        match store.remove(&id) {
            Err(StorageError::GenesisIsImmutable) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        // Genesis metadata is still mutable.
        let mut meta = store.get_metadata(&id).unwrap();
        meta.height = 0;
        store.save_metadata(&id, &meta).expect("genesis metadata update");
    }

    #[test]
    fn remove_deletes_regular_vertices() {
        let mut store = MemoryVertexStore::new();
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;
        store.put(v, VertexMetadata::new(2.0)).expect("put");
        store.remove(&id).expect("remove");
        assert!(!store.contains(&id).unwrap());
    }

    #[test]
    fn iter_all_covers_every_record() {
        let mut store = MemoryVertexStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let v = dummy_vertex(1_600_000_000 + i);
            ids.push(v.hash);
            store.put(v, VertexMetadata::new(2.0)).expect("put");
        }
        let seen: std::collections::HashSet<_> =
            store.iter_all().map(|r| r.vertex.hash).collect();
        assert_eq!(seen.len(), 5);
        for id in ids {
            assert!(seen.contains(&id));
        }
    }
}
