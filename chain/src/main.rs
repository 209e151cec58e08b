// chain/src/main.rs
//
// Minimal demo node that wires up the chain library:
//
// - RocksDB-backed storage seeded with the testnet genesis
// - full validation pipeline + consensus engine + indices
// - a local miner task producing one block per interval at the weight
//   the DAA demands, pushed through the same ingress channel a network
//   adapter would use.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use chain::crypto::Address;
use chain::script::standard::P2pkh;
use chain::types::vertex::VertexKind;
use chain::{
    build_genesis, genesis_records, Hash256, RocksDbConfig, RocksDbVertexStore, Settings,
    TxOutput, Vertex, VertexId, VertexStore,
};

/// Everything the miner needs from the node to assemble a block.
struct BlockTemplate {
    head: VertexId,
    height: u64,
    tx_parents: [VertexId; 2],
    weight: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "chain=info".to_string()))
        .init();

    if let Err(err) = run_node().await {
        error!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::testnet();

    let genesis = build_genesis(&settings)?;
    info!(digest = %genesis.network_digest(), "genesis rebuilt");

    let store = RocksDbVertexStore::open(&RocksDbConfig::default(), genesis_records(&genesis))?;
    let mut node = chain::Node::new(settings.clone(), store, genesis)?;

    let (ingress, mut receiver) = mpsc::channel::<Vec<u8>>(64);
    let (template_tx, mut template_rx) = mpsc::channel::<oneshot::Sender<BlockTemplate>>(4);

    let reward_address = dev_reward_address(&settings);
    let miner = tokio::spawn(miner_loop(settings, reward_address, ingress, template_tx));

    // Single-writer loop: vertex ingestion and template requests are
    // serialized through the same owner of the node state.
    loop {
        tokio::select! {
            maybe_bytes = receiver.recv() => {
                match maybe_bytes {
                    Some(bytes) => match node.handle_vertex_bytes(&bytes) {
                        Ok(id) => info!(vertex = %id, "accepted"),
                        Err(e) => info!(error = %e, "rejected"),
                    },
                    None => break,
                }
            }
            maybe_req = template_rx.recv() => {
                match maybe_req {
                    Some(reply) => {
                        let template = make_template(&node)?;
                        let _ = reply.send(template);
                    }
                    None => break,
                }
            }
        }
    }

    miner.abort();
    Ok(())
}

fn dev_reward_address(settings: &Settings) -> Address {
    let (_, pk) = Settings::dev_genesis_keypair();
    Address::from_pubkey(settings.p2pkh_version_byte, &pk.serialize())
}

fn make_template<S: VertexStore>(
    node: &chain::Node<S>,
) -> Result<BlockTemplate, chain::StorageError> {
    let head = node.engine().best_head();
    let height = node.store().get_metadata(&head)?.height;
    let genesis = node.genesis();

    // Prefer the two newest transactions; fall back to the genesis txs.
    let newest = node.indices().timeline.newest_txs(2);
    let tx_parents = match newest.as_slice() {
        [a, b] => [*a, *b],
        _ => [genesis.tx1.hash, genesis.tx2.hash],
    };

    Ok(BlockTemplate {
        head,
        height,
        tx_parents,
        weight: node.next_block_weight()?,
    })
}

async fn miner_loop(
    settings: Settings,
    reward_address: Address,
    ingress: mpsc::Sender<Vec<u8>>,
    template_tx: mpsc::Sender<oneshot::Sender<BlockTemplate>>,
) {
    let interval = Duration::from_secs(30);
    loop {
        tokio::time::sleep(interval).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        if template_tx.send(reply_tx).await.is_err() {
            return;
        }
        let Ok(template) = reply_rx.await else { return };

        let mut block = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp: unix_now(),
            weight: template.weight,
            parents: vec![
                template.head,
                template.tx_parents[0],
                template.tx_parents[1],
            ],
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(
                settings.subsidy(template.height + 1),
                P2pkh::create_output_script(&reward_address, None),
            )],
            tokens: Vec::new(),
            kind: VertexKind::Block {
                data: Vec::new(),
                aux_pow: None,
            },
        };

        if !block.resolve(0, 1 << 24) {
            info!("miner gave up on this template");
            continue;
        }
        if ingress.send(block.canonical_bytes()).await.is_err() {
            return;
        }
    }
}

/// Current wall-clock time as seconds since the Unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
