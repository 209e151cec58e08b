//! RocksDB-backed vertex store.
//!
//! Records live in two column families:
//!
//! - `"vertices"`: vertex id (32 bytes) -> canonical vertex bytes,
//! - `"metadata"`: vertex id (32 bytes) -> metadata JSON.
//!
//! Genesis records stay resident in memory and are never written. A
//! small LRU cache in front of the database hands back recently-read
//! records without touching disk; reads still return owned copies.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, Options, DB};

use crate::codec;
use crate::types::{Hash256, Vertex, VertexId, VertexMetadata, HASH_LEN};

use super::{validate_fresh_genesis, StorageError, VertexRecord, VertexStore};

/// Configuration for [`RocksDbVertexStore`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path of the database directory.
    pub path: String,
    /// Whether to create the database and missing column families.
    pub create_if_missing: bool,
    /// Capacity of the in-memory read cache, in records.
    pub cache_capacity: usize,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/chain-db".to_string(),
            create_if_missing: true,
            cache_capacity: 10_000,
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// RocksDB-backed implementation of [`VertexStore`].
pub struct RocksDbVertexStore {
    db: DB,
    genesis: HashMap<VertexId, VertexRecord>,
    cache: Mutex<LruCache<VertexId, VertexRecord>>,
}

impl RocksDbVertexStore {
    /// Opens (or creates) the database and seeds the resident genesis.
    pub fn open(cfg: &RocksDbConfig, genesis: Vec<VertexRecord>) -> Result<Self, StorageError> {
        validate_fresh_genesis(&genesis);
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new("vertices", Options::default()),
            ColumnFamilyDescriptor::new("metadata", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        let capacity = NonZeroUsize::new(cfg.cache_capacity.max(1)).expect("nonzero capacity");

        Ok(Self {
            db,
            genesis: genesis
                .into_iter()
                .map(|record| (record.vertex.hash, record))
                .collect(),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn cf_vertices(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle("vertices")
            .ok_or_else(|| StorageError::Corrupted("missing 'vertices' column family".into()))
    }

    fn cf_metadata(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle("metadata")
            .ok_or_else(|| StorageError::Corrupted("missing 'metadata' column family".into()))
    }

    fn decode_record(
        id: &VertexId,
        vertex_bytes: &[u8],
        meta_bytes: Option<&[u8]>,
    ) -> Result<VertexRecord, StorageError> {
        let vertex = codec::decode(vertex_bytes)
            .map_err(|e| StorageError::Corrupted(format!("vertex {id}: {e}")))?;
        if vertex.hash != *id {
            return Err(StorageError::Corrupted(format!(
                "vertex bytes for {id} hash to {}",
                vertex.hash
            )));
        }
        let metadata = match meta_bytes {
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| StorageError::Corrupted(format!("metadata {id}: {e}")))?,
            None => VertexMetadata::new(vertex.weight),
        };
        Ok(VertexRecord { vertex, metadata })
    }

    fn cache_put(&self, record: &VertexRecord) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(record.vertex.hash, record.clone());
        }
    }
}

impl VertexStore for RocksDbVertexStore {
    fn get(&self, id: &VertexId) -> Result<VertexRecord, StorageError> {
        if let Some(record) = self.genesis.get(id) {
            return Ok(record.clone());
        }
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(record) = cache.get(id) {
                return Ok(record.clone());
            }
        }

        let cf = self.cf_vertices()?;
        let vertex_bytes = self
            .db
            .get_cf(&cf, id.as_bytes())?
            .ok_or(StorageError::TransactionDoesNotExist(*id))?;
        let cf_meta = self.cf_metadata()?;
        let meta_bytes = self.db.get_cf(&cf_meta, id.as_bytes())?;

        let record = Self::decode_record(id, &vertex_bytes, meta_bytes.as_deref())?;
        self.cache_put(&record);
        Ok(record)
    }

    fn put(&mut self, vertex: Vertex, metadata: VertexMetadata) -> Result<(), StorageError> {
        let id = vertex.hash;
        if let Some(resident) = self.genesis.get_mut(&id) {
            resident.metadata = metadata;
            return Ok(());
        }

        let cf = self.cf_vertices()?;
        self.db.put_cf(&cf, id.as_bytes(), codec::encode(&vertex))?;
        let cf_meta = self.cf_metadata()?;
        let meta_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| StorageError::Corrupted(format!("metadata {id}: {e}")))?;
        self.db.put_cf(&cf_meta, id.as_bytes(), meta_bytes)?;

        self.cache_put(&VertexRecord { vertex, metadata });
        Ok(())
    }

    fn save_metadata(
        &mut self,
        id: &VertexId,
        metadata: &VertexMetadata,
    ) -> Result<(), StorageError> {
        if let Some(resident) = self.genesis.get_mut(id) {
            resident.metadata = metadata.clone();
            return Ok(());
        }
        if !self.contains(id)? {
            return Err(StorageError::TransactionDoesNotExist(*id));
        }

        let cf_meta = self.cf_metadata()?;
        let meta_bytes = serde_json::to_vec(metadata)
            .map_err(|e| StorageError::Corrupted(format!("metadata {id}: {e}")))?;
        self.db.put_cf(&cf_meta, id.as_bytes(), meta_bytes)?;

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(record) = cache.get_mut(id) {
                record.metadata = metadata.clone();
            }
        }
        Ok(())
    }

    fn contains(&self, id: &VertexId) -> Result<bool, StorageError> {
        if self.genesis.contains_key(id) {
            return Ok(true);
        }
        if let Ok(cache) = self.cache.lock() {
            if cache.contains(id) {
                return Ok(true);
            }
        }
        let cf = self.cf_vertices()?;
        Ok(self.db.get_cf(&cf, id.as_bytes())?.is_some())
    }

    fn remove(&mut self, id: &VertexId) -> Result<(), StorageError> {
        if self.genesis.contains_key(id) {
            return Err(StorageError::GenesisIsImmutable);
        }
        if !self.contains(id)? {
            return Err(StorageError::TransactionDoesNotExist(*id));
        }
        let cf = self.cf_vertices()?;
        self.db.delete_cf(&cf, id.as_bytes())?;
        let cf_meta = self.cf_metadata()?;
        self.db.delete_cf(&cf_meta, id.as_bytes())?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(id);
        }
        Ok(())
    }

    fn iter_all(&self) -> Box<dyn Iterator<Item = VertexRecord> + '_> {
        let disk: Box<dyn Iterator<Item = VertexRecord> + '_> = match self.cf_vertices() {
            Ok(cf) => {
                let iter = self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
                Box::new(iter.filter_map(|entry| entry.ok()).filter_map(
                    move |(key, value)| {
                        if key.len() != HASH_LEN {
                            return None;
                        }
                        let mut arr = [0u8; HASH_LEN];
                        arr.copy_from_slice(&key);
                        let id = VertexId(Hash256(arr));
                        let meta = self
                            .cf_metadata()
                            .ok()
                            .and_then(|cf_meta| self.db.get_cf(&cf_meta, &key).ok().flatten());
                        Self::decode_record(&id, &value, meta.as_deref()).ok()
                    },
                ))
            }
            Err(_) => Box::new(std::iter::empty()),
        };
        Box::new(self.genesis.values().cloned().chain(disk))
    }

    fn len(&self) -> usize {
        let disk = self
            .cf_vertices()
            .map(|cf| {
                self.db
                    .iterator_cf(&cf, rocksdb::IteratorMode::Start)
                    .filter(|entry| entry.is_ok())
                    .count()
            })
            .unwrap_or(0);
        self.genesis.len() + disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vertex::VertexKind;
    use crate::types::TxOutput;
    use tempfile::TempDir;

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

    fn open_store(tmp: &TempDir, genesis: Vec<VertexRecord>) -> RocksDbVertexStore {
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
            cache_capacity: 4,
        };
        RocksDbVertexStore::open(&cfg, genesis).expect("open RocksDB")
    }

    #[test]
    fn roundtrip_vertex_and_metadata() {
        let tmp = TempDir::new().expect("temp dir");
        let mut store = open_store(&tmp, Vec::new());

        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;
        store.put(v.clone(), VertexMetadata::new(2.0)).expect("put");

        let record = store.get(&id).expect("present");
        assert_eq!(record.vertex, v);

        let mut meta = record.metadata;
        meta.height = 3;
        store.save_metadata(&id, &meta).expect("save metadata");
        assert_eq!(store.get_metadata(&id).unwrap().height, 3);
    }

    #[test]
    fn survives_reopen() {
        let tmp = TempDir::new().expect("temp dir");
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;

        {
            let mut store = open_store(&tmp, Vec::new());
            store.put(v.clone(), VertexMetadata::new(2.0)).expect("put");
        }

        let store = open_store(&tmp, Vec::new());
        let record = store.get(&id).expect("still present after reopen");
        assert_eq!(record.vertex, v);
    }

    #[test]
    fn missing_hash_reports_does_not_exist() {
        let tmp = TempDir::new().expect("temp dir");
        let store = open_store(&tmp, Vec::new());
        let id = dummy_vertex(1).hash;
        match store.get(&id) {
            Err(StorageError::TransactionDoesNotExist(missing)) => assert_eq!(missing, id),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn genesis_is_resident_and_immutable() {
        let tmp = TempDir::new().expect("temp dir");
        let g = dummy_vertex(1_500_000_000);
        let id = g.hash;
        let mut store = open_store(&tmp, vec![VertexRecord::new(g)]);

        assert!(store.contains(&id).unwrap());
        match store.remove(&id) {
            Err(StorageError::GenesisIsImmutable) => {}
            other => panic!("unexpected result: {other:?}"),
        }

        let mut meta = store.get_metadata(&id).unwrap();
        meta.children.insert(dummy_vertex(1).hash);
        store.save_metadata(&id, &meta).expect("genesis metadata");
        assert_eq!(store.get_metadata(&id).unwrap().children.len(), 1);
    }

    #[test]
    fn iter_all_includes_genesis_and_disk() {
        let tmp = TempDir::new().expect("temp dir");
        let g = dummy_vertex(1_500_000_000);
        let mut store = open_store(&tmp, vec![VertexRecord::new(g.clone())]);

        let v = dummy_vertex(1_600_000_000);
        store.put(v.clone(), VertexMetadata::new(2.0)).expect("put");

        let seen: std::collections::HashSet<_> =
            store.iter_all().map(|r| r.vertex.hash).collect();
        assert!(seen.contains(&g.hash));
        assert!(seen.contains(&v.hash));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn cached_reads_return_consistent_records() {
        let tmp = TempDir::new().expect("temp dir");
        let mut store = open_store(&tmp, Vec::new());
        let v = dummy_vertex(1_600_000_000);
        let id = v.hash;
        store.put(v, VertexMetadata::new(2.0)).expect("put");

        let first = store.get(&id).expect("get");
        let second = store.get(&id).expect("cached get");
        assert_eq!(first, second);

        store.remove(&id).expect("remove");
        assert!(store.get(&id).is_err());
    }
}
