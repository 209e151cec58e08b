//! The three genesis vertices: one block and two transactions.
//!
//! Genesis is rebuilt deterministically from [`Settings`] at startup and
//! checked against the network's pinned hashes when they are configured.
//! The trio is resident in storage and never written to disk.

use std::fmt;

use crate::config::Settings;
use crate::storage::VertexRecord;
use crate::types::vertex::VertexKind;
use crate::types::{pow_passes, Hash256, TxOutput, Vertex, VertexId, VertexMetadata};

/// Nonce search budget when a development network mines its genesis at
/// startup.
const GENESIS_MINING_ATTEMPTS: u128 = 1 << 24;

/// Errors raised while rebuilding genesis.
#[derive(Debug)]
pub enum GenesisError {
    /// A configured nonce does not satisfy the proof of work.
    PowMismatch(&'static str),
    /// The rebuilt vertex hash differs from the pinned hash.
    HashMismatch {
        which: &'static str,
        expected: Hash256,
        actual: Hash256,
    },
    /// No valid nonce found within the startup mining budget.
    MiningFailed(&'static str),
}

impl fmt::Display for GenesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenesisError::PowMismatch(which) => {
                write!(f, "genesis {which}: configured nonce fails proof of work")
            }
            GenesisError::HashMismatch {
                which,
                expected,
                actual,
            } => write!(
                f,
                "genesis {which}: hash mismatch (expected {expected}, rebuilt {actual})"
            ),
            GenesisError::MiningFailed(which) => {
                write!(f, "genesis {which}: could not find a nonce at startup")
            }
        }
    }
}

impl std::error::Error for GenesisError {}

/// The rebuilt genesis trio.
#[derive(Clone, Debug)]
pub struct Genesis {
    pub block: Vertex,
    pub tx1: Vertex,
    pub tx2: Vertex,
}

impl Genesis {
    /// Ids in canonical order `[block, tx1, tx2]`.
    pub fn ids(&self) -> [VertexId; 3] {
        [self.block.hash, self.tx1.hash, self.tx2.hash]
    }

    /// Network digest: SHA-256 over the three genesis hashes in order.
    ///
    /// A cheap startup identity check between peers of the same network.
    pub fn network_digest(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(96);
        for id in self.ids() {
            buf.extend_from_slice(id.as_bytes());
        }
        Hash256::sha256(&buf)
    }

    /// Whether an id belongs to the trio.
    pub fn contains(&self, id: &VertexId) -> bool {
        self.ids().contains(id)
    }
}

fn seal(
    mut vertex: Vertex,
    nonce: Option<u128>,
    which: &'static str,
) -> Result<Vertex, GenesisError> {
    match nonce {
        Some(n) => {
            vertex.nonce = n;
            vertex.update_hash();
            if !pow_passes(&vertex.hash.0, vertex.weight) {
                return Err(GenesisError::PowMismatch(which));
            }
            Ok(vertex)
        }
        None => {
            if !vertex.resolve(0, GENESIS_MINING_ATTEMPTS) {
                return Err(GenesisError::MiningFailed(which));
            }
            Ok(vertex)
        }
    }
}

/// Rebuilds the genesis trio from settings, verifying proof of work and
/// any pinned hashes.
pub fn build_genesis(settings: &Settings) -> Result<Genesis, GenesisError> {
    let g = &settings.genesis;

    let block = Vertex {
        hash: VertexId(Hash256::ZERO),
        nonce: 0,
        timestamp: g.timestamp,
        weight: g.block_weight,
        parents: Vec::new(),
        inputs: Vec::new(),
        outputs: vec![TxOutput::new(g.tokens, g.output_script.clone())],
        tokens: Vec::new(),
        kind: VertexKind::Block {
            data: Vec::new(),
            aux_pow: None,
        },
    };
    let tx_template = |timestamp: u64| Vertex {
        hash: VertexId(Hash256::ZERO),
        nonce: 0,
        timestamp,
        weight: g.tx_weight,
        parents: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        tokens: Vec::new(),
        kind: VertexKind::Transaction,
    };

    let nonces = g.nonces;
    let block = seal(block, nonces.map(|n| n[0]), "block")?;
    let tx1 = seal(tx_template(g.timestamp + 1), nonces.map(|n| n[1]), "tx1")?;
    let tx2 = seal(tx_template(g.timestamp + 2), nonces.map(|n| n[2]), "tx2")?;

    if let Some(pinned) = &g.pinned_hashes {
        let pairs: [(&'static str, &Vertex, &Hash256); 3] = [
            ("block", &block, &pinned[0]),
            ("tx1", &tx1, &pinned[1]),
            ("tx2", &tx2, &pinned[2]),
        ];
        for (which, vertex, expected) in pairs {
            if vertex.hash.0 != *expected {
                return Err(GenesisError::HashMismatch {
                    which,
                    expected: *expected,
                    actual: vertex.hash.0,
                });
            }
        }
    }

    Ok(Genesis { block, tx1, tx2 })
}

/// Storage records for the trio: the block starts executed at height 0
/// with its own weight as score.
pub fn genesis_records(genesis: &Genesis) -> Vec<VertexRecord> {
    let mut block_meta = VertexMetadata::new(genesis.block.weight);
    block_meta.height = 0;
    block_meta.score = genesis.block.weight;

    vec![
        VertexRecord {
            vertex: genesis.block.clone(),
            metadata: block_meta,
        },
        VertexRecord {
            vertex: genesis.tx1.clone(),
            metadata: VertexMetadata::new(genesis.tx1.weight),
        },
        VertexRecord {
            vertex: genesis.tx2.clone(),
            metadata: VertexMetadata::new(genesis.tx2.weight),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let settings = Settings::unittests();
        let a = build_genesis(&settings).expect("build");
        let b = build_genesis(&settings).expect("build");
        assert_eq!(a.ids(), b.ids());
        assert_eq!(a.network_digest(), b.network_digest());
    }

    #[test]
    fn genesis_vertices_satisfy_pow() {
        let g = build_genesis(&Settings::unittests()).expect("build");
        assert!(pow_passes(&g.block.hash.0, g.block.weight));
        assert!(pow_passes(&g.tx1.hash.0, g.tx1.weight));
        assert!(pow_passes(&g.tx2.hash.0, g.tx2.weight));
    }

    #[test]
    fn pinned_hashes_are_enforced() {
        let mut settings = Settings::unittests();
        let g = build_genesis(&settings).expect("build");

        // Pinning the real hashes passes; the nonces must be pinned too
        // so the rebuild is byte-identical.
        settings.genesis.nonces = Some([g.block.nonce, g.tx1.nonce, g.tx2.nonce]);
        settings.genesis.pinned_hashes = Some([g.block.hash.0, g.tx1.hash.0, g.tx2.hash.0]);
        build_genesis(&settings).expect("pinned rebuild");

        // A wrong pinned hash is refused.
        settings.genesis.pinned_hashes = Some([Hash256::ZERO, g.tx1.hash.0, g.tx2.hash.0]);
        match build_genesis(&settings) {
            Err(GenesisError::HashMismatch { which, .. }) => assert_eq!(which, "block"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn records_seed_block_metadata() {
        let g = build_genesis(&Settings::unittests()).expect("build");
        let records = genesis_records(&g);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].metadata.height, 0);
        assert_eq!(records[0].metadata.score, g.block.weight);
        assert!(records.iter().all(|r| r.metadata.is_executed()));
    }

    #[test]
    fn different_networks_have_different_digests() {
        let unit = build_genesis(&Settings::unittests()).expect("build");
        let test = build_genesis(&Settings::testnet()).expect("build");
        assert_ne!(unit.network_digest(), test.network_digest());
    }
}
