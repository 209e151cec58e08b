//! Vertex model: blocks and transactions as interleaved DAG vertices.
//!
//! Every vertex shares the same common fields (nonce, timestamp, weight,
//! parents, inputs, outputs, tokens); what distinguishes a block from a
//! transaction is the [`VertexKind`] payload. This re-expresses the
//! block/transaction/token-creation family as a tagged variant over a
//! shared struct, dispatching on the tag instead of on a class hierarchy.

use serde::{Deserialize, Serialize};

use super::{pow_passes, Hash256, TokenUid, VertexId};
use crate::codec;

/// Wire values of the vertex version field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum VertexVersion {
    /// A plain proof-of-work block.
    RegularBlock = 0,
    /// A regular value-transfer transaction.
    RegularTx = 1,
    /// A transaction that creates a new token.
    TokenCreationTx = 2,
    /// A block mined through merged mining, carrying an aux proof.
    MergeMinedBlock = 3,
}

impl VertexVersion {
    /// Parses a wire version value.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(VertexVersion::RegularBlock),
            1 => Some(VertexVersion::RegularTx),
            2 => Some(VertexVersion::TokenCreationTx),
            3 => Some(VertexVersion::MergeMinedBlock),
            _ => None,
        }
    }
}

/// Number of bytes of the big-endian nonce field.
pub const NONCE_SIZE: usize = 16;

/// High bit of `token_data`: the output is an authority, not an amount.
pub const TOKEN_AUTHORITY_MASK: u8 = 0b1000_0000;
/// Low bits of `token_data`: index into the vertex's token list.
pub const TOKEN_INDEX_MASK: u8 = 0b0111_1111;
/// Authority outputs use the value field as a flag set: mint permission.
pub const TOKEN_MINT_MASK: u64 = 0b01;
/// Authority outputs use the value field as a flag set: melt permission.
pub const TOKEN_MELT_MASK: u64 = 0b10;

/// Transaction input: a reference to an output being spent plus the
/// witness script that proves the right to spend it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the vertex whose output is being spent.
    pub tx_id: VertexId,
    /// Index of the spent output in that vertex.
    pub index: u8,
    /// Witness script (cleared when computing the sighash).
    pub script_sig: Vec<u8>,
}

impl TxInput {
    /// Creates a new input.
    pub fn new(tx_id: VertexId, index: u8, script_sig: Vec<u8>) -> Self {
        Self {
            tx_id,
            index,
            script_sig,
        }
    }
}

/// Transaction output: an amount (or authority flag set) locked by a
/// script, tagged with the token it refers to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units, or authority flags when the authority bit
    /// of `token_data` is set.
    pub value: u64,
    /// Locking script that must be satisfied to spend this output.
    pub script: Vec<u8>,
    /// Token bitfield: low 7 bits index into the token list (0 is the
    /// native token), high bit marks an authority output.
    pub token_data: u8,
}

impl TxOutput {
    /// Creates an output for the native token.
    pub fn new(value: u64, script: Vec<u8>) -> Self {
        Self {
            value,
            script,
            token_data: 0,
        }
    }

    /// Creates an output with an explicit token bitfield.
    pub fn with_token_data(value: u64, script: Vec<u8>, token_data: u8) -> Self {
        Self {
            value,
            script,
            token_data,
        }
    }

    /// Index into the vertex token list (0 means the native token).
    pub fn token_index(&self) -> u8 {
        self.token_data & TOKEN_INDEX_MASK
    }

    /// Whether this output grants an authority instead of carrying value.
    pub fn is_authority(&self) -> bool {
        self.token_data & TOKEN_AUTHORITY_MASK != 0
    }

    /// Whether this is an authority output with mint permission.
    pub fn can_mint(&self) -> bool {
        self.is_authority() && self.value & TOKEN_MINT_MASK != 0
    }

    /// Whether this is an authority output with melt permission.
    pub fn can_melt(&self) -> bool {
        self.is_authority() && self.value & TOKEN_MELT_MASK != 0
    }
}

/// Name and symbol attached to a newly-created token.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
}

/// Opaque auxiliary proof-of-work carried by merge-mined blocks.
///
/// The blob is round-tripped verbatim; interpreting it is the mining
/// adapter's job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuxPow(pub Vec<u8>);

/// Kind-specific payload of a vertex.
#[derive(Clone, Debug, PartialEq)]
pub enum VertexKind {
    /// Block payload: optional arbitrary data and, for merge-mined
    /// blocks, the aux proof.
    Block {
        data: Vec<u8>,
        aux_pow: Option<AuxPow>,
    },
    /// Regular transaction: no extra payload.
    Transaction,
    /// Token creation transaction: the new token's descriptive info.
    TokenCreation { info: TokenInfo },
}

/// A vertex of the ledger DAG: either a block or a transaction.
///
/// `hash` is the double SHA-256 of the canonical serialization and must
/// be refreshed with [`Vertex::update_hash`] after any field changes;
/// equality compares every field including the hash.
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    /// Content id; [`Hash256::ZERO`] until the vertex is sealed.
    pub hash: VertexId,
    /// Proof-of-work solution, encoded as [`NONCE_SIZE`] big-endian bytes.
    pub nonce: u128,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Log2 of the expected work: the PoW target is `2^(256 - weight)`.
    pub weight: f64,
    /// Ordered parent ids: 2 txs for a transaction, 1 block + 2 txs for
    /// a block.
    pub parents: Vec<VertexId>,
    /// Spent outputs; always empty for blocks.
    pub inputs: Vec<TxInput>,
    /// Created outputs; never empty on a valid vertex.
    pub outputs: Vec<TxOutput>,
    /// Token uids referenced by output token data; empty for blocks.
    pub tokens: Vec<TokenUid>,
    /// Kind tag and kind-specific payload.
    pub kind: VertexKind,
}

impl Vertex {
    /// Wire version derived from the kind payload.
    pub fn version(&self) -> VertexVersion {
        match &self.kind {
            VertexKind::Block { aux_pow: None, .. } => VertexVersion::RegularBlock,
            VertexKind::Block {
                aux_pow: Some(_), ..
            } => VertexVersion::MergeMinedBlock,
            VertexKind::Transaction => VertexVersion::RegularTx,
            VertexKind::TokenCreation { .. } => VertexVersion::TokenCreationTx,
        }
    }

    /// Whether this vertex is a block.
    pub fn is_block(&self) -> bool {
        matches!(self.kind, VertexKind::Block { .. })
    }

    /// Whether this vertex creates a token.
    pub fn is_token_creation(&self) -> bool {
        matches!(self.kind, VertexKind::TokenCreation { .. })
    }

    /// Block data payload, if this vertex is a block.
    pub fn block_data(&self) -> Option<&[u8]> {
        match &self.kind {
            VertexKind::Block { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Canonical serialization: funds struct ‖ graph struct ‖ nonce.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        codec::encode(self)
    }

    /// Computes the content id without storing it.
    pub fn compute_id(&self) -> VertexId {
        VertexId(Hash256::sha256d(&self.canonical_bytes()))
    }

    /// Recomputes and stores the content id.
    pub fn update_hash(&mut self) {
        self.hash = self.compute_id();
    }

    /// Sighash-all digest: double SHA-256 of the funds struct with every
    /// input's witness cleared, so signatures commit to what the vertex
    /// moves while remaining valid across parent reorderings.
    pub fn sighash_all_digest(&self) -> Hash256 {
        Hash256::sha256d(&codec::sighash_bytes(self))
    }

    /// Resolves the token uid an output refers to.
    ///
    /// Returns `Ok(None)` for the native token. For token-creation
    /// transactions, index 1 refers to the token being created, whose
    /// uid is this vertex's own id.
    pub fn output_token_uid(&self, output: &TxOutput) -> Result<Option<TokenUid>, u8> {
        let idx = output.token_index();
        if idx == 0 {
            return Ok(None);
        }
        if self.is_token_creation() && idx == 1 {
            return Ok(Some(TokenUid(self.hash.0)));
        }
        self.tokens
            .get(idx as usize - 1)
            .copied()
            .map(Some)
            .ok_or(idx)
    }

    /// Searches for a nonce whose hash satisfies this vertex's weight.
    ///
    /// Scans nonces in `[start, start + max_attempts)`; on success the
    /// nonce and hash are stored and `true` is returned. Intended for
    /// tests and local mining helpers, not for production miners.
    pub fn resolve(&mut self, start: u128, max_attempts: u128) -> bool {
        for nonce in start..start.saturating_add(max_attempts) {
            self.nonce = nonce;
            let id = self.compute_id();
            if pow_passes(&id.0, self.weight) {
                self.hash = id;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_tx() -> Vertex {
        Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp: 1_600_000_000,
            weight: 2.0,
            parents: Vec::new(),
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(1, Vec::new())],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        }
    }

    #[test]
    fn version_follows_kind() {
        let mut v = empty_tx();
        assert_eq!(v.version(), VertexVersion::RegularTx);

        v.kind = VertexKind::TokenCreation {
            info: TokenInfo {
                name: "Test Coin".to_string(),
                symbol: "TST".to_string(),
            },
        };
        assert_eq!(v.version(), VertexVersion::TokenCreationTx);

        v.kind = VertexKind::Block {
            data: Vec::new(),
            aux_pow: None,
        };
        assert_eq!(v.version(), VertexVersion::RegularBlock);

        v.kind = VertexKind::Block {
            data: Vec::new(),
            aux_pow: Some(AuxPow(vec![1, 2, 3])),
        };
        assert_eq!(v.version(), VertexVersion::MergeMinedBlock);
    }

    #[test]
    fn token_data_bitfield() {
        let amount = TxOutput::with_token_data(100, Vec::new(), 0x02);
        assert!(!amount.is_authority());
        assert_eq!(amount.token_index(), 2);

        let authority = TxOutput::with_token_data(
            TOKEN_MINT_MASK | TOKEN_MELT_MASK,
            Vec::new(),
            TOKEN_AUTHORITY_MASK | 0x01,
        );
        assert!(authority.is_authority());
        assert_eq!(authority.token_index(), 1);
        assert!(authority.can_mint());
        assert!(authority.can_melt());

        let mint_only =
            TxOutput::with_token_data(TOKEN_MINT_MASK, Vec::new(), TOKEN_AUTHORITY_MASK | 0x01);
        assert!(mint_only.can_mint());
        assert!(!mint_only.can_melt());
    }

    #[test]
    fn output_token_uid_resolution() {
        let mut v = empty_tx();
        let uid = TokenUid(Hash256::sha256d(b"token"));
        v.tokens.push(uid);

        let native = TxOutput::new(1, Vec::new());
        assert_eq!(v.output_token_uid(&native), Ok(None));

        let custom = TxOutput::with_token_data(1, Vec::new(), 0x01);
        assert_eq!(v.output_token_uid(&custom), Ok(Some(uid)));

        let out_of_range = TxOutput::with_token_data(1, Vec::new(), 0x02);
        assert_eq!(v.output_token_uid(&out_of_range), Err(2));
    }

    #[test]
    fn token_creation_index_one_is_own_id() {
        let mut v = empty_tx();
        v.kind = VertexKind::TokenCreation {
            info: TokenInfo {
                name: "Test Coin".to_string(),
                symbol: "TST".to_string(),
            },
        };
        v.update_hash();
        let out = TxOutput::with_token_data(1, Vec::new(), 0x01);
        assert_eq!(v.output_token_uid(&out), Ok(Some(TokenUid(v.hash.0))));
    }

    #[test]
    fn resolve_finds_low_weight_nonce() {
        let mut v = empty_tx();
        v.weight = 2.0;
        assert!(v.resolve(0, 1_000));
        assert!(pow_passes(&v.hash.0, v.weight));
        assert_eq!(v.hash, v.compute_id());
    }

    #[test]
    fn update_hash_tracks_field_changes() {
        let mut v = empty_tx();
        v.update_hash();
        let before = v.hash;
        v.timestamp += 1;
        v.update_hash();
        assert_ne!(before, v.hash);
    }
}
