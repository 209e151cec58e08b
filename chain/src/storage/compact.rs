//! Compact JSON-file vertex store.
//!
//! Saves each vertex and its metadata in a single JSON file of the form
//! `{"tx": {...}, "meta": {...}}`, sharded into subfolders named by the
//! last two hex nibbles of the hash. Useful for debugging and small
//! deployments where records should stay human-inspectable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use serde_json::Value;

use crate::json::{vertex_from_json, vertex_to_json};
use crate::types::{Vertex, VertexId, VertexMetadata};

use super::{validate_fresh_genesis, StorageError, VertexRecord, VertexStore};

/// Configuration for [`CompactVertexStore`].
#[derive(Clone, Debug)]
pub struct CompactConfig {
    /// Root directory for the vertex files.
    pub path: String,
    /// Number of shard subfolders (`00`, `01`, ...).
    pub subfolders: u16,
    /// Network version byte for decoded P2PKH addresses.
    pub p2pkh_version_byte: u8,
    /// Network version byte for decoded multisig addresses.
    pub multisig_version_byte: u8,
    /// Capacity of the in-memory read cache, in records.
    pub cache_capacity: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            path: "data/chain-files".to_string(),
            subfolders: 256,
            p2pkh_version_byte: 0x28,
            multisig_version_byte: 0x64,
            cache_capacity: 10_000,
        }
    }
}

impl CompactConfig {
    /// Derives the file-store configuration from network settings.
    pub fn from_settings(settings: &crate::config::Settings, path: String) -> Self {
        Self {
            path,
            subfolders: settings.storage_subfolders,
            p2pkh_version_byte: settings.p2pkh_version_byte,
            multisig_version_byte: settings.multisig_version_byte,
            cache_capacity: Self::default().cache_capacity,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// JSON-file implementation of [`VertexStore`].
pub struct CompactVertexStore {
    cfg: CompactConfig,
    genesis: HashMap<VertexId, VertexRecord>,
    cache: Mutex<LruCache<VertexId, VertexRecord>>,
}

impl CompactVertexStore {
    /// Opens the store, creating the shard subfolders as needed.
    pub fn open(cfg: CompactConfig, genesis: Vec<VertexRecord>) -> Result<Self, StorageError> {
        validate_fresh_genesis(&genesis);
        let root = Path::new(&cfg.path);
        fs::create_dir_all(root)?;
        for i in 0..cfg.subfolders {
            fs::create_dir_all(root.join(format!("{:02x}", i % 256)))?;
        }
        let capacity =
            std::num::NonZeroUsize::new(cfg.cache_capacity.max(1)).expect("nonzero capacity");
        Ok(Self {
            cfg,
            genesis: genesis
                .into_iter()
                .map(|record| (record.vertex.hash, record))
                .collect(),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Shard path for a hash: `<root>/<last two nibbles>/tx_<hash>.json`.
    fn file_path(&self, id: &VertexId) -> PathBuf {
        let hash_hex = id.to_string();
        let shard = &hash_hex[hash_hex.len() - 2..];
        Path::new(&self.cfg.path)
            .join(shard)
            .join(format!("tx_{hash_hex}.json"))
    }

    fn encode_record(&self, vertex: &Vertex, metadata: &VertexMetadata) -> Value {
        serde_json::json!({
            "tx": vertex_to_json(
                vertex,
                self.cfg.p2pkh_version_byte,
                self.cfg.multisig_version_byte,
            ),
            "meta": metadata,
        })
    }

    fn decode_record(id: &VertexId, raw: &str) -> Result<VertexRecord, StorageError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StorageError::Corrupted(format!("record {id}: {e}")))?;
        let vertex = vertex_from_json(
            value
                .get("tx")
                .ok_or_else(|| StorageError::Corrupted(format!("record {id}: missing tx")))?,
        )
        .map_err(|e| StorageError::Corrupted(format!("record {id}: {e}")))?;
        let metadata = match value.get("meta") {
            Some(meta) => serde_json::from_value(meta.clone())
                .map_err(|e| StorageError::Corrupted(format!("record {id}: {e}")))?,
            None => VertexMetadata::new(vertex.weight),
        };
        Ok(VertexRecord { vertex, metadata })
    }

    fn write_record(&self, vertex: &Vertex, metadata: &VertexMetadata) -> Result<(), StorageError> {
        let path = self.file_path(&vertex.hash);
        let body = self.encode_record(vertex, metadata).to_string();
        fs::write(path, body)?;
        Ok(())
    }

    fn cache_put(&self, record: &VertexRecord) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(record.vertex.hash, record.clone());
        }
    }
}

impl VertexStore for CompactVertexStore {
    fn get(&self, id: &VertexId) -> Result<VertexRecord, StorageError> {
        if let Some(record) = self.genesis.get(id) {
            return Ok(record.clone());
        }
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(record) = cache.get(id) {
                return Ok(record.clone());
            }
        }

        let path = self.file_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::TransactionDoesNotExist(*id));
            }
            Err(e) => return Err(e.into()),
        };
        let record = Self::decode_record(id, &raw)?;
        self.cache_put(&record);
        Ok(record)
    }

    fn put(&mut self, vertex: Vertex, metadata: VertexMetadata) -> Result<(), StorageError> {
        if let Some(resident) = self.genesis.get_mut(&vertex.hash) {
            resident.metadata = metadata;
            return Ok(());
        }
        self.write_record(&vertex, &metadata)?;
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
        let vertex = self.get(id)?.vertex;
        self.write_record(&vertex, metadata)?;
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
        Ok(self.file_path(id).is_file())
    }

    fn remove(&mut self, id: &VertexId) -> Result<(), StorageError> {
        if self.genesis.contains_key(id) {
            return Err(StorageError::GenesisIsImmutable);
        }
        let path = self.file_path(id);
        match fs::remove_file(path) {
            Ok(()) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.pop(id);
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::TransactionDoesNotExist(*id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn iter_all(&self) -> Box<dyn Iterator<Item = VertexRecord> + '_> {
        let root = PathBuf::from(&self.cfg.path);
        let disk = fs::read_dir(root)
            .into_iter()
            .flatten()
            .filter_map(|shard| shard.ok())
            .filter(|shard| shard.path().is_dir())
            .flat_map(|shard| fs::read_dir(shard.path()).into_iter().flatten())
            .filter_map(|entry| entry.ok())
            .filter_map(move |entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let hash_hex = name.strip_prefix("tx_")?.strip_suffix(".json")?;
                let id = VertexId(crate::types::Hash256::from_hex(hash_hex)?);
                let raw = fs::read_to_string(entry.path()).ok()?;
                Self::decode_record(&id, &raw).ok()
            });
        Box::new(self.genesis.values().cloned().chain(disk))
    }

    fn len(&self) -> usize {
        self.iter_all().count()
    }
}
