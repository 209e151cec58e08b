//! Async facade over a synchronous vertex store.
//!
//! The core event loop is cooperative: storage calls must not starve
//! other tasks. `Deferred` wraps any [`VertexStore`] and exposes
//! `*_deferred` variants that yield back to the runtime after each
//! operation, so long ingestion bursts interleave with other work.

use crate::types::{Vertex, VertexId, VertexMetadata};

use super::{StorageError, VertexRecord, VertexStore};

/// Async adapter over a synchronous store.
pub struct Deferred<S> {
    inner: S,
}

impl<S: VertexStore> Deferred<S> {
    /// Wraps a synchronous store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped store.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Synchronous view of the wrapped store.
    pub fn sync(&self) -> &S {
        &self.inner
    }

    /// Mutable synchronous view of the wrapped store.
    pub fn sync_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Deferred fetch.
    pub async fn get_deferred(&self, id: &VertexId) -> Result<VertexRecord, StorageError> {
        let result = self.inner.get(id);
        tokio::task::yield_now().await;
        result
    }

    /// Deferred persist.
    pub async fn put_deferred(
        &mut self,
        vertex: Vertex,
        metadata: VertexMetadata,
    ) -> Result<(), StorageError> {
        let result = self.inner.put(vertex, metadata);
        tokio::task::yield_now().await;
        result
    }

    /// Deferred metadata update.
    pub async fn save_metadata_deferred(
        &mut self,
        id: &VertexId,
        metadata: &VertexMetadata,
    ) -> Result<(), StorageError> {
        let result = self.inner.save_metadata(id, metadata);
        tokio::task::yield_now().await;
        result
    }

    /// Deferred existence probe.
    pub async fn contains_deferred(&self, id: &VertexId) -> Result<bool, StorageError> {
        let result = self.inner.contains(id);
        tokio::task::yield_now().await;
        result
    }

    /// Deferred removal.
    pub async fn remove_deferred(&mut self, id: &VertexId) -> Result<(), StorageError> {
        let result = self.inner.remove(id);
        tokio::task::yield_now().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryVertexStore;
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

    #[tokio::test]
    async fn deferred_roundtrip() {
        let mut store = Deferred::new(MemoryVertexStore::new());
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;

        store
            .put_deferred(v.clone(), VertexMetadata::new(2.0))
            .await
            .expect("put");
        assert!(store.contains_deferred(&id).await.expect("contains"));

        let record = store.get_deferred(&id).await.expect("get");
        assert_eq!(record.vertex, v);

        let mut meta = record.metadata;
        meta.height = 4;
        store
            .save_metadata_deferred(&id, &meta)
            .await
            .expect("save metadata");
        assert_eq!(store.sync().get_metadata(&id).unwrap().height, 4);

        store.remove_deferred(&id).await.expect("remove");
        assert!(!store.contains_deferred(&id).await.expect("contains"));
    }
}
