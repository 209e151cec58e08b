//! Node core: the single-writer ingestion loop.
//!
//! All mutations to storage, metadata, and indices funnel through one
//! logical event loop: vertices are totally ordered at ingress and each
//! one finishes validation, persistence, consensus, and index updates
//! before the next is touched. Read-only queries may run elsewhere;
//! observers follow consensus through a broadcast channel.

use std::fmt;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::codec::{self, DecodeError};
use crate::config::{DaaKind, Settings};
use crate::consensus::{ConsensusEngine, Event};
use crate::daa::{Htr, Lwma, NextWeight};
use crate::genesis::Genesis;
use crate::indices::IndexSet;
use crate::storage::{StorageError, VertexStore};
use crate::types::{Vertex, VertexId, VertexMetadata};
use crate::validation::{ValidationError, VertexValidator};

/// Why a pushed vertex was not accepted.
#[derive(Debug)]
pub enum NodeError {
    /// The vertex is already in storage.
    AlreadyKnown(VertexId),
    /// The bytes do not decode into a vertex.
    Decode(DecodeError),
    /// The vertex failed validation; it was not persisted.
    Validation(ValidationError),
    /// Storage failed mid-pipeline; the caller should push again.
    Storage(StorageError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::AlreadyKnown(id) => write!(f, "vertex already known: {id}"),
            NodeError::Decode(e) => write!(f, "{e}"),
            NodeError::Validation(e) => write!(f, "{e}"),
            NodeError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<DecodeError> for NodeError {
    fn from(e: DecodeError) -> Self {
        NodeError::Decode(e)
    }
}

impl From<ValidationError> for NodeError {
    fn from(e: ValidationError) -> Self {
        NodeError::Validation(e)
    }
}

impl From<StorageError> for NodeError {
    fn from(e: StorageError) -> Self {
        NodeError::Storage(e)
    }
}

/// A full-node core over a vertex store.
pub struct Node<S: VertexStore> {
    settings: Settings,
    genesis: Genesis,
    validator: VertexValidator,
    engine: ConsensusEngine<S>,
    indices: IndexSet,
    events: broadcast::Sender<Event>,
}

impl<S: VertexStore> Node<S> {
    /// Wires up a node over a store already seeded with the genesis
    /// records, rebuilding indices from a full scan.
    pub fn new(settings: Settings, store: S, genesis: Genesis) -> Result<Self, StorageError> {
        let validator = VertexValidator::new(settings.clone());
        let engine = ConsensusEngine::new(store, &genesis)?;
        let mut indices =
            IndexSet::new(settings.p2pkh_version_byte, settings.multisig_version_byte);
        indices.rebuild(engine.store())?;
        let (events, _) = broadcast::channel(1024);

        info!(
            network = %settings.network_name,
            digest = %genesis.network_digest(),
            vertices = engine.store().len(),
            "node core initialized"
        );

        Ok(Self {
            settings,
            genesis,
            validator,
            engine,
            indices,
            events,
        })
    }

    /// The node's network settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The genesis trio this node was initialized with.
    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    /// The consensus engine.
    pub fn engine(&self) -> &ConsensusEngine<S> {
        &self.engine
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        self.engine.store()
    }

    /// The derived indices.
    pub fn indices(&self) -> &IndexSet {
        &self.indices
    }

    /// Subscribes to consensus events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Decodes and ingests raw vertex bytes.
    pub fn handle_vertex_bytes(&mut self, bytes: &[u8]) -> Result<VertexId, NodeError> {
        let vertex = codec::decode(bytes)?;
        self.handle_vertex(vertex)
    }

    /// Ingests one vertex: validate, persist, run consensus, refresh
    /// indices, notify observers.
    pub fn handle_vertex(&mut self, vertex: Vertex) -> Result<VertexId, NodeError> {
        let id = vertex.hash;
        if self.engine.store().contains(&id)? {
            return Err(NodeError::AlreadyKnown(id));
        }

        self.validator.validate(self.engine.store(), &vertex)?;

        let metadata = VertexMetadata::new(vertex.weight);
        self.engine.store_mut().put(vertex, metadata)?;
        let update = self.engine.on_new_vertex(&id)?;

        let record = self.engine.store().get(&id)?;
        self.indices.add_vertex(self.engine.store(), &record)?;
        for affected in &update.affected {
            if *affected != id {
                self.indices.update_vertex(self.engine.store(), affected)?;
            }
        }

        debug!(
            vertex = %id,
            affected = update.affected.len(),
            events = update.events.len(),
            "vertex accepted"
        );
        for event in update.events {
            // Nobody listening is fine.
            let _ = self.events.send(event);
        }
        Ok(id)
    }

    /// Minimum weight the next block must carry, per the configured
    /// difficulty-adjustment algorithm.
    pub fn next_block_weight(&self) -> Result<f64, StorageError> {
        match self.settings.daa {
            DaaKind::Htr => {
                let daa = Htr::new(self.settings.min_block_weight);
                let history = self.engine.best_chain_blocks(daa.n)?;
                Ok(daa.next_weight(&mut history.into_iter()))
            }
            DaaKind::Lwma => {
                let daa = Lwma::new(self.settings.min_block_weight);
                let history = self.engine.best_chain_blocks(daa.n + 1)?;
                Ok(daa.next_weight(&mut history.into_iter()))
            }
        }
    }

    /// Runs the ingestion loop over a channel of raw vertex bytes,
    /// yielding to the runtime between vertices.
    pub async fn run(mut self, mut ingress: mpsc::Receiver<Vec<u8>>) {
        while let Some(bytes) = ingress.recv().await {
            match self.handle_vertex_bytes(&bytes) {
                Ok(id) => info!(vertex = %id, "accepted"),
                Err(NodeError::AlreadyKnown(id)) => debug!(vertex = %id, "duplicate ignored"),
                Err(e) => warn!(error = %e, "vertex rejected"),
            }
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::crypto::Address;
    use crate::genesis::{build_genesis, genesis_records};
    use crate::script::standard::P2pkh;
    use crate::script::testkit::sign_digest;
    use crate::storage::MemoryVertexStore;
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxInput, TxOutput};

    fn test_node() -> Node<MemoryVertexStore> {
        let settings = Settings::unittests();
        let genesis = build_genesis(&settings).expect("genesis");
        let store = MemoryVertexStore::with_genesis(genesis_records(&genesis));
        Node::new(settings, store, genesis).expect("node")
    }

    fn dev_address(settings: &Settings) -> Address {
        let (_, pk) = Settings::dev_genesis_keypair();
        Address::from_pubkey(settings.p2pkh_version_byte, &pk.serialize())
    }

    /// A signed, mined transaction spending the genesis block output.
    fn spend_genesis(node: &Node<MemoryVertexStore>, timestamp_offset: u64) -> Vertex {
        let settings = node.settings();
        let genesis = node.genesis();
        let address = dev_address(settings);

        let mut tx = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp: genesis.tx2.timestamp + timestamp_offset,
            weight: 2.0,
            parents: vec![genesis.tx1.hash, genesis.tx2.hash],
            inputs: vec![TxInput::new(genesis.block.hash, 0, Vec::new())],
            outputs: vec![TxOutput::new(
                settings.genesis.tokens,
                P2pkh::create_output_script(&address, None),
            )],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        };
        let (sk, pk) = Settings::dev_genesis_keypair();
        let digest = *tx.sighash_all_digest().as_bytes();
        let signature = sign_digest(&sk, digest);
        tx.inputs[0].script_sig = P2pkh::create_input_data(&pk.serialize(), &signature);
        assert!(tx.resolve(0, 1 << 20));
        tx
    }

    fn mined_block(
        node: &Node<MemoryVertexStore>,
        timestamp_offset: u64,
        tx_parents: [VertexId; 2],
    ) -> Vertex {
        let settings = node.settings();
        let genesis = node.genesis();
        let address = dev_address(settings);
        let head = node.engine().best_head();
        let height = node
            .store()
            .get_metadata(&head)
            .expect("head metadata")
            .height;

        let mut block = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp: genesis.tx2.timestamp + timestamp_offset,
            weight: 2.0,
            parents: vec![head, tx_parents[0], tx_parents[1]],
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(
                settings.subsidy(height + 1),
                P2pkh::create_output_script(&address, None),
            )],
            tokens: Vec::new(),
            kind: VertexKind::Block {
                data: Vec::new(),
                aux_pow: None,
            },
        };
        assert!(block.resolve(0, 1 << 20));
        block
    }

    #[test]
    fn end_to_end_simple_spend() {
        let mut node = test_node();
        let mut events = node.subscribe();

        let tx = spend_genesis(&node, 10);
        let bytes = tx.canonical_bytes();
        let id = node.handle_vertex_bytes(&bytes).expect("accepted");
        assert_eq!(id, tx.hash);

        // Executed but unconfirmed until a block arrives.
        let meta = node.store().get_metadata(&id).expect("metadata");
        assert!(meta.is_executed());
        assert!(meta.first_block.is_none());
        let genesis_meta = node
            .store()
            .get_metadata(&node.genesis().block.hash)
            .expect("genesis metadata");
        assert_eq!(
            genesis_meta.spent_outputs[&0],
            std::collections::BTreeSet::from([id])
        );

        let block = mined_block(&node, 20, [id, node.genesis().tx1.hash]);
        node.handle_vertex(block.clone()).expect("block accepted");
        assert_eq!(node.engine().best_head(), block.hash);

        // Observers saw the confirmation.
        let mut confirmed = false;
        while let Ok(event) = events.try_recv() {
            if event == (Event::VertexConfirmed { tx: id, block: block.hash }) {
                confirmed = true;
            }
        }
        assert!(confirmed);
    }

    #[test]
    fn duplicates_are_reported_as_already_known() {
        let mut node = test_node();
        let tx = spend_genesis(&node, 10);
        node.handle_vertex(tx.clone()).expect("first accepted");
        match node.handle_vertex(tx) {
            Err(NodeError::AlreadyKnown(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_vertices_are_never_persisted() {
        let mut node = test_node();
        let mut tx = spend_genesis(&node, 10);
        tx.outputs[0].value -= 1; // unbalanced
        let (sk, pk) = Settings::dev_genesis_keypair();
        let digest = *tx.sighash_all_digest().as_bytes();
        let signature = sign_digest(&sk, digest);
        tx.inputs[0].script_sig = P2pkh::create_input_data(&pk.serialize(), &signature);
        assert!(tx.resolve(0, 1 << 20));

        match node.handle_vertex(tx.clone()) {
            Err(NodeError::Validation(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!node.store().contains(&tx.hash).unwrap());
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let mut node = test_node();
        match node.handle_vertex_bytes(&[0x00, 0x01, 0xff]) {
            Err(NodeError::Decode(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn indices_track_ingested_vertices() {
        let mut node = test_node();
        let tx = spend_genesis(&node, 10);
        node.handle_vertex(tx.clone()).expect("accepted");

        // The tx is currently a tip.
        assert!(node.indices().tips.tips_at(tx.timestamp).contains(&tx.hash));
        assert_eq!(node.indices().timeline.newest_txs(1), vec![tx.hash]);

        // The dev address saw the movement.
        let address = dev_address(node.settings());
        assert!(node.indices().addresses.history(&address).contains(&tx.hash));
    }

    #[test]
    fn next_block_weight_floors_at_minimum() {
        let mut node = test_node();
        let weight = node.next_block_weight().expect("weight");
        assert!(weight >= node.settings().min_block_weight);

        let genesis = node.genesis();
        let block = mined_block(&node, 20, [genesis.tx1.hash, genesis.tx2.hash]);
        node.handle_vertex(block).expect("accepted");
        let weight = node.next_block_weight().expect("weight");
        assert!(weight >= node.settings().min_block_weight);
    }

    #[tokio::test]
    async fn run_loop_ingests_from_the_channel() {
        let node = test_node();
        let tx = spend_genesis(&node, 10);
        let (sender, receiver) = mpsc::channel(8);

        sender.send(tx.canonical_bytes()).await.expect("send");
        drop(sender);
        node.run(receiver).await;
    }
}
