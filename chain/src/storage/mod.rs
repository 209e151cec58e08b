//! Storage backends for the DAG.
//!
//! Persistence is content-addressed: one record per vertex keyed by its
//! hash, with the mutable consensus metadata co-located. This module
//! provides the [`VertexStore`] trait plus concrete implementations:
//!
//! - an in-memory store ([`mem::MemoryVertexStore`]) for tests and small
//!   devnets,
//! - a RocksDB-backed store ([`rocksdb::RocksDbVertexStore`]) with an
//!   LRU read cache,
//! - a compact JSON-file store ([`compact::CompactVertexStore`]) sharded
//!   by the trailing hex nibbles of the hash,
//! - an async facade ([`deferred::Deferred`]) exposing `*_deferred`
//!   variants over any sync store.
//!
//! Genesis vertices are resident in memory and never written to disk;
//! their metadata is still mutable like any other vertex's.

use std::fmt;

use crate::types::{Vertex, VertexId, VertexMetadata};

pub mod compact;
pub mod deferred;
pub mod mem;
pub mod rocksdb;

pub use compact::{CompactConfig, CompactVertexStore};
pub use deferred::Deferred;
pub use mem::MemoryVertexStore;
pub use rocksdb::{RocksDbConfig, RocksDbVertexStore};

/// A vertex together with its consensus metadata, as stored.
///
/// Reads hand out owned records (copy-on-read), so a traversal holding a
/// record observes a consistent snapshot even while the store mutates.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRecord {
    pub vertex: Vertex,
    pub metadata: VertexMetadata,
}

impl VertexRecord {
    /// Record for a newly-validated vertex with fresh metadata.
    pub fn new(vertex: Vertex) -> Self {
        let metadata = VertexMetadata::new(vertex.weight);
        Self { vertex, metadata }
    }
}

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    /// No vertex with the requested hash exists.
    TransactionDoesNotExist(VertexId),
    /// Underlying I/O failure; fatal for the affected operation.
    Io(String),
    /// On-disk bytes that fail to decode back into a vertex or metadata.
    Corrupted(String),
    /// Genesis vertices cannot be removed.
    GenesisIsImmutable,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::TransactionDoesNotExist(id) => {
                write!(f, "transaction does not exist: {id}")
            }
            StorageError::Io(msg) => write!(f, "storage i/o error: {msg}"),
            StorageError::Corrupted(msg) => write!(f, "corrupted record: {msg}"),
            StorageError::GenesisIsImmutable => write!(f, "genesis vertices cannot be removed"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Abstract vertex store used by validation, consensus, and the indices.
///
/// The interface is deliberately small: content-addressed get/put with
/// co-located metadata, an existence probe, administrative deletion, and
/// a full scan for index rebuilds.
pub trait VertexStore {
    /// Fetches a vertex and its metadata by hash.
    fn get(&self, id: &VertexId) -> Result<VertexRecord, StorageError>;

    /// Persists a vertex together with its metadata.
    fn put(&mut self, vertex: Vertex, metadata: VertexMetadata) -> Result<(), StorageError>;

    /// Updates only the metadata of an existing vertex.
    fn save_metadata(&mut self, id: &VertexId, metadata: &VertexMetadata)
        -> Result<(), StorageError>;

    /// Whether a vertex with this hash exists.
    fn contains(&self, id: &VertexId) -> Result<bool, StorageError>;

    /// Removes a vertex. Administrative use only; genesis refuses.
    fn remove(&mut self, id: &VertexId) -> Result<(), StorageError>;

    /// Scans every stored vertex, genesis included, in no particular
    /// order. Used to rebuild indices deterministically.
    fn iter_all(&self) -> Box<dyn Iterator<Item = VertexRecord> + '_>;

    /// Number of stored vertices, genesis included.
    fn len(&self) -> usize;

    /// Whether the store holds no vertices at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience: fetches only the vertex.
    fn get_vertex(&self, id: &VertexId) -> Result<Vertex, StorageError> {
        self.get(id).map(|r| r.vertex)
    }

    /// Convenience: fetches only the metadata.
    fn get_metadata(&self, id: &VertexId) -> Result<VertexMetadata, StorageError> {
        self.get(id).map(|r| r.metadata)
    }
}

/// Seeds a store with the resident genesis records.
///
/// Shared by every backend constructor; backends enforce the
/// never-written rule themselves.
pub(crate) fn validate_fresh_genesis(genesis: &[VertexRecord]) {
    debug_assert!(
        genesis.iter().all(|g| g.vertex.hash == g.vertex.compute_id()),
        "genesis records must be sealed"
    );
}
