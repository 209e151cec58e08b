//! Hashing and address helpers.
//!
//! Addresses are base58check strings: a network version byte, the
//! hash160 of the locked data (a public key for P2PKH, a redeem script
//! for multisig), and a 4-byte double-SHA-256 checksum.

use std::fmt;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Length of a hash160 digest.
pub const HASH160_LEN: usize = 20;
/// Length of a decoded address: version byte + hash160 + checksum.
pub const ADDRESS_LEN: usize = 1 + HASH160_LEN + 4;

/// `RIPEMD160(SHA256(data))`, the script-hash primitive.
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Errors raised while parsing a base58 address.
#[derive(Debug, Eq, PartialEq)]
pub enum AddressError {
    /// Not valid base58, or wrong decoded length.
    Malformed,
    /// The 4-byte checksum does not match the payload.
    BadChecksum,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Malformed => write!(f, "malformed base58 address"),
            AddressError::BadChecksum => write!(f, "address checksum mismatch"),
        }
    }
}

impl std::error::Error for AddressError {}

/// A network address: version byte plus hash160 payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Address {
    pub version_byte: u8,
    pub hash: [u8; HASH160_LEN],
}

impl Address {
    /// Builds an address from a public key (P2PKH form).
    pub fn from_pubkey(version_byte: u8, pubkey_bytes: &[u8]) -> Self {
        Self {
            version_byte,
            hash: hash160(pubkey_bytes),
        }
    }

    /// Builds an address from a redeem script (multisig form).
    pub fn from_redeem_script(version_byte: u8, redeem_script: &[u8]) -> Self {
        Self {
            version_byte,
            hash: hash160(redeem_script),
        }
    }

    /// The 25 raw bytes: version ‖ hash160 ‖ checksum.
    pub fn to_bytes(self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        out[0] = self.version_byte;
        out[1..1 + HASH160_LEN].copy_from_slice(&self.hash);
        let checksum = Hash256::sha256d(&out[..1 + HASH160_LEN]);
        out[1 + HASH160_LEN..].copy_from_slice(&checksum.as_bytes()[..4]);
        out
    }

    /// Parses the 25 raw bytes, verifying the checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_LEN {
            return Err(AddressError::Malformed);
        }
        let checksum = Hash256::sha256d(&bytes[..1 + HASH160_LEN]);
        if bytes[1 + HASH160_LEN..] != checksum.as_bytes()[..4] {
            return Err(AddressError::BadChecksum);
        }
        let mut hash = [0u8; HASH160_LEN];
        hash.copy_from_slice(&bytes[1..1 + HASH160_LEN]);
        Ok(Self {
            version_byte: bytes[0],
            hash,
        })
    }

    /// Base58check string form.
    pub fn to_base58(self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    /// Parses the base58check string form.
    pub fn from_base58(s: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::Malformed)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}
