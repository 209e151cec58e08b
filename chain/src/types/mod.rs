//! Core domain types used by the chain.
//!
//! This module defines strongly-typed hashes, vertex identifiers, token
//! identifiers, and the log-space weight arithmetic shared across the
//! whole implementation. The goal is to avoid "naked" byte buffers in
//! public APIs and instead use domain-specific newtypes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Vertex model: blocks, transactions, inputs, outputs, token data.
pub mod vertex;
/// Mutable per-vertex metadata maintained by the consensus engine.
pub mod metadata;

pub use metadata::VertexMetadata;
pub use vertex::{AuxPow, TokenInfo, TxInput, TxOutput, Vertex, VertexKind, VertexVersion};

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit hash wrapper (double SHA-256).
///
/// This type is the backing representation for all fixed-size hashes in
/// the chain: vertex identifiers, token identifiers, and the network
/// digest. It is always exactly [`HASH_LEN`] bytes long and orders
/// lexicographically on the big-endian byte string, which is also the
/// numeric order of the hash seen as a 256-bit integer.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// The all-zero hash, used as a placeholder before sealing a vertex.
    pub const ZERO: Hash256 = Hash256([0u8; HASH_LEN]);

    /// Computes a new [`Hash256`] as `SHA256(SHA256(data))`.
    ///
    /// Double hashing is the content-id scheme for every vertex; the
    /// result doubles as the proof-of-work value.
    pub fn sha256d(data: &[u8]) -> Self {
        let once = Sha256::digest(data);
        let twice = Sha256::digest(once);
        Hash256(twice.into())
    }

    /// Computes a single-round SHA-256, used for the network digest.
    pub fn sha256(data: &[u8]) -> Self {
        Hash256(Sha256::digest(data).into())
    }

    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Parses a hash from its 64-character hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Some(Hash256(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

// Hashes travel as hex strings in every JSON form, so serde goes through
// the string representation instead of a byte array.
impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid 256-bit hex hash"))
    }
}

/// Vertex identifier: the double SHA-256 of the canonical serialization.
///
/// Wrapping the underlying [`Hash256`] avoids mixing vertex ids with
/// token ids or other hashes in public APIs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct VertexId(pub Hash256);

impl VertexId {
    /// Returns the underlying 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token identifier.
///
/// The identifier of a custom token is the id of the transaction that
/// created it; the native token has no uid and is addressed by token
/// index 0 in output token data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TokenUid(pub Hash256);

impl TokenUid {
    /// Returns the underlying 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TokenUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Adds two amounts of work expressed as log2 weights.
///
/// Computes `log2(2^a + 2^b)` without leaving log space, so arbitrarily
/// large accumulated weights never overflow an `f64`:
/// `max(a, b) + log2(1 + 2^-|a - b|)`.
pub fn sum_weights(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (1.0 + (lo - hi).exp2()).log2()
}

/// Proof-of-work target for a given weight, as a 256-bit big-endian value.
///
/// The target is `2^(256 - weight)`; a hash passes iff, read as a
/// big-endian integer, it is strictly below the target. The fractional
/// part of the weight is carried through a 52-bit mantissa so integer
/// weights produce exact powers of two.
pub fn pow_target(weight: f64) -> [u8; HASH_LEN] {
    let mut target = [0u8; HASH_LEN];
    let e = 256.0 - weight;
    if e >= 256.0 {
        return [0xff; HASH_LEN];
    }
    if e < 0.0 {
        return target;
    }
    let k = e.floor();
    let mantissa = (e - k).exp2(); // in [1, 2)
    let m52 = (mantissa * (1u64 << 52) as f64) as u64;
    // target = m52 * 2^(k - 52); place the significant bits at bit
    // offset (k - 52) of the 256-bit big-endian buffer.
    let shift = k as i64 - 52;
    for bit in 0..54 {
        if m52 >> bit & 1 == 0 {
            continue;
        }
        let pos = shift + bit;
        if !(0..256).contains(&pos) {
            continue;
        }
        let byte = HASH_LEN - 1 - (pos / 8) as usize;
        target[byte] |= 1 << (pos % 8);
    }
    target
}

/// Returns `true` if `hash` satisfies the proof-of-work for `weight`.
pub fn pow_passes(hash: &Hash256, weight: f64) -> bool {
    hash.as_bytes() < &pow_target(weight)
}
