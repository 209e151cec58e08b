//! Chain library crate.
//!
//! Core of a full node for a DAG ledger in which blocks and
//! transactions are interleaved vertices:
//!
//! - strongly-typed vertex model and metadata (`types`),
//! - bit-exact wire codec and hashing (`codec`),
//! - a stack-based script VM with oracle-data opcodes (`script`),
//! - difficulty adjustment (`daa`),
//! - content-addressed storage backends (`storage`),
//! - derived indices: tips, addresses, tokens, timelines (`indices`),
//! - DAG traversals over either edge set (`traversal`),
//! - the validation pipeline (`validation`),
//! - weight-based consensus with reorg support (`consensus`),
//! - and the single-writer node core (`node`).
//!
//! Higher-level adapters (HTTP status endpoints, p2p, wallets) compose
//! these pieces; none of them live here.

pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod daa;
pub mod genesis;
pub mod indices;
pub mod json;
pub mod node;
pub mod script;
pub mod storage;
pub mod traversal;
pub mod types;
pub mod validation;

// Re-export the node-facing configuration.
pub use config::{DaaKind, GenesisSettings, Settings};

// Re-export "core" consensus types.
pub use consensus::{ConsensusEngine, ConsensusUpdate, Event};

// Re-export storage backends and the store seam.
pub use storage::{
    CompactConfig, CompactVertexStore, Deferred, MemoryVertexStore, RocksDbConfig,
    RocksDbVertexStore, StorageError, VertexRecord, VertexStore,
};

// Re-export the validation pipeline.
pub use validation::{ValidationError, VertexValidator};

// Re-export the node core.
pub use node::{Node, NodeError};

// Re-export genesis construction.
pub use genesis::{build_genesis, genesis_records, Genesis, GenesisError};

// Re-export domain types at the crate root for convenience.
pub use types::*;
