//! Node settings.
//!
//! Network parameters are process-wide in spirit but never global in
//! code: a [`Settings`] value is passed explicitly to every subsystem
//! constructor. Presets exist for the development networks; production
//! deployments construct a `Settings` with pinned genesis material.

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::script::standard::P2pkh;
use crate::types::Hash256;

/// Which difficulty-adjustment algorithm a deployment runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DaaKind {
    /// Log-space total-work algorithm (default).
    Htr,
    /// Linearly-weighted moving average of solvetimes.
    Lwma,
}

/// Genesis material: everything needed to rebuild the three genesis
/// vertices, plus the expected hashes when the network pins them.
#[derive(Clone, Debug)]
pub struct GenesisSettings {
    /// Total supply minted by the genesis block output.
    pub tokens: u64,
    /// Locking script of the genesis block output.
    pub output_script: Vec<u8>,
    /// Timestamp of the genesis block; the two genesis transactions
    /// follow at one-second offsets.
    pub timestamp: u64,
    /// Weight of the genesis block.
    pub block_weight: f64,
    /// Weight of the two genesis transactions.
    pub tx_weight: f64,
    /// Pre-mined nonces `[block, tx1, tx2]`; `None` makes the node mine
    /// them at startup (development networks only).
    pub nonces: Option<[u128; 3]>,
    /// Expected hashes `[block, tx1, tx2]`; when set, the node refuses
    /// to start if the rebuilt genesis does not match.
    pub pinned_hashes: Option<[Hash256; 3]>,
}

/// Network-wide parameters handed to every subsystem.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Human-readable network identifier.
    pub network_name: String,
    /// Version byte of P2PKH addresses.
    pub p2pkh_version_byte: u8,
    /// Version byte of multisig addresses.
    pub multisig_version_byte: u8,

    /// Weight floor for blocks.
    pub min_block_weight: f64,
    /// Weight floor for transactions.
    pub min_tx_weight: f64,
    /// Weight floor for mining shares handed to pools.
    pub min_share_weight: f64,
    /// Slope of the dynamic transaction-weight formula.
    pub min_tx_weight_k: f64,
    /// Intercept of the dynamic transaction-weight formula.
    pub min_tx_weight_coefficient: f64,

    /// Blocks between reward halvings.
    pub blocks_per_halving: u64,
    /// Block subsidy before the first halving.
    pub initial_subsidy: u64,

    /// Maximum inputs per transaction.
    pub max_num_inputs: usize,
    /// Maximum outputs per vertex.
    pub max_num_outputs: usize,
    /// Maximum value of a single output.
    pub max_output_value: u64,
    /// Maximum seconds between a block and its block parent.
    pub max_distance_between_blocks: u64,
    /// Maximum bytes of arbitrary block data.
    pub max_block_data_len: usize,
    /// Upper bound on transactions tracked for mining templates.
    pub max_tx_count: usize,

    /// Shard subfolders used by file-backed storage.
    pub storage_subfolders: u16,
    /// Fraction of a newly-created token's supply that must be
    /// deposited in the native token.
    pub token_deposit_percentage: f64,

    /// Difficulty-adjustment algorithm for this deployment.
    pub daa: DaaKind,

    /// Genesis material.
    pub genesis: GenesisSettings,
}

impl Settings {
    /// Development keypair backing the dev-network genesis output.
    ///
    /// The secret is public by construction; it exists so development
    /// networks have a spendable genesis without external key material.
    pub fn dev_genesis_keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let mut seed = [0x5au8; 32];
        seed[31] = 0x01;
        let sk = SecretKey::from_slice(&seed).expect("fixed dev seed is a valid secret key");
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn dev_genesis_script(p2pkh_version_byte: u8) -> Vec<u8> {
        let (_, pk) = Self::dev_genesis_keypair();
        let address = Address::from_pubkey(p2pkh_version_byte, &pk.serialize());
        P2pkh::create_output_script(&address, None)
    }

    /// Unit-test network: tiny weights so proof-of-work resolves in a
    /// handful of attempts, short halving interval, no pinned genesis.
    pub fn unittests() -> Self {
        let p2pkh_version_byte = 0x28;
        Self {
            network_name: "unittests".to_string(),
            p2pkh_version_byte,
            multisig_version_byte: 0x64,
            min_block_weight: 2.0,
            min_tx_weight: 2.0,
            min_share_weight: 2.0,
            min_tx_weight_k: 0.0,
            min_tx_weight_coefficient: 0.0,
            blocks_per_halving: 2 * 60,
            initial_subsidy: 6400,
            max_num_inputs: 255,
            max_num_outputs: 255,
            max_output_value: i64::MAX as u64,
            max_distance_between_blocks: 30 * 64,
            max_block_data_len: 100,
            max_tx_count: 100_000,
            storage_subfolders: 256,
            token_deposit_percentage: 0.01,
            daa: DaaKind::Htr,
            genesis: GenesisSettings {
                tokens: 1_000_000_000_00,
                output_script: Self::dev_genesis_script(p2pkh_version_byte),
                timestamp: 1_560_920_000,
                block_weight: 2.0,
                tx_weight: 2.0,
                nonces: None,
                pinned_hashes: None,
            },
        }
    }

    /// Test network: realistic limits but a minable low-weight genesis.
    pub fn testnet() -> Self {
        let p2pkh_version_byte = 0x49;
        Self {
            network_name: "testnet".to_string(),
            p2pkh_version_byte,
            multisig_version_byte: 0x87,
            min_block_weight: 2.0,
            min_tx_weight: 2.0,
            min_share_weight: 2.0,
            min_tx_weight_k: 0.0,
            min_tx_weight_coefficient: 0.0,
            blocks_per_halving: 2 * 60 * 24,
            initial_subsidy: 6400,
            max_num_inputs: 255,
            max_num_outputs: 255,
            max_output_value: i64::MAX as u64,
            max_distance_between_blocks: 30 * 64,
            max_block_data_len: 100,
            max_tx_count: 100_000,
            storage_subfolders: 256,
            token_deposit_percentage: 0.01,
            daa: DaaKind::Htr,
            genesis: GenesisSettings {
                tokens: 1_000_000_000_00,
                output_script: Self::dev_genesis_script(p2pkh_version_byte),
                timestamp: 1_560_920_000,
                block_weight: 2.0,
                tx_weight: 2.0,
                nonces: None,
                pinned_hashes: None,
            },
        }
    }

    /// Block subsidy at a given height under the halving schedule.
    pub fn subsidy(&self, height: u64) -> u64 {
        let halvings = height / self.blocks_per_halving;
        if halvings >= 64 {
            return 0;
        }
        self.initial_subsidy >> halvings
    }

    /// Dynamic minimum transaction weight for a given total value moved.
    ///
    /// `min_tx_weight_k * log2(total_value) + min_tx_weight_coefficient`,
    /// floored at `min_tx_weight`.
    pub fn min_tx_weight_for(&self, total_value: u64) -> f64 {
        let value = total_value.max(1) as f64;
        let dynamic = self.min_tx_weight_k * value.log2() + self.min_tx_weight_coefficient;
        dynamic.max(self.min_tx_weight)
    }

    /// Native-token deposit demanded when `created` units of a new
    /// token are minted, rounded up.
    pub fn token_deposit(&self, created: u64) -> u64 {
        (self.token_deposit_percentage * created as f64).ceil() as u64
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::unittests()
    }
}
