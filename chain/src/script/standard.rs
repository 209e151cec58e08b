//! Standard script templates: P2PKH and multisig, with optional time
//! locks, plus the pattern matchers used by the indices and the JSON
//! vertex form.

use crate::crypto::{hash160, Address, HASH160_LEN};

use super::Opcode;

/// Incremental script assembler.
///
/// Pushes up to 75 bytes with the implicit length-prefixed form and
/// longer payloads (up to 255 bytes) with `OP_PUSHDATA1`.
#[derive(Default)]
pub struct ScriptBuilder {
    data: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a data push.
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        debug_assert!(data.len() <= u8::MAX as usize, "push larger than PUSHDATA1");
        if data.len() > 75 {
            self.data.push(Opcode::OP_PUSHDATA1 as u8);
        }
        self.data.push(data.len() as u8);
        self.data.extend_from_slice(data);
        self
    }

    /// Appends a bare opcode.
    pub fn push_opcode(&mut self, opcode: Opcode) -> &mut Self {
        self.data.push(opcode as u8);
        self
    }

    /// Appends a small-integer opcode for `0..=16`.
    pub fn push_int(&mut self, value: u8) -> &mut Self {
        debug_assert!(value <= 16, "integer opcodes stop at OP_16");
        self.data.push(Opcode::OP_0 as u8 + value);
        self
    }

    /// Finishes the script.
    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// A recognized pay-to-public-key-hash locking script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct P2pkh {
    /// hash160 of the receiving public key.
    pub hash: [u8; HASH160_LEN],
    /// Unlock timestamp, when the output is time-locked.
    pub timelock: Option<u32>,
}

impl P2pkh {
    /// Builds the locking script paying to `address`.
    pub fn create_output_script(address: &Address, timelock: Option<u32>) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        if let Some(lock) = timelock {
            builder.push_data(&lock.to_be_bytes());
            builder.push_opcode(Opcode::OP_GREATERTHAN_TIMESTAMP);
        }
        builder
            .push_opcode(Opcode::OP_DUP)
            .push_opcode(Opcode::OP_HASH160)
            .push_data(&address.hash)
            .push_opcode(Opcode::OP_EQUALVERIFY)
            .push_opcode(Opcode::OP_CHECKSIG);
        builder.build()
    }

    /// Builds the witness: signature then public key.
    pub fn create_input_data(public_key: &[u8], signature: &[u8]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        builder.push_data(signature).push_data(public_key);
        builder.build()
    }
}

/// A recognized multisig (pay-to-script-hash) locking script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiSig {
    /// hash160 of the redeem script.
    pub hash: [u8; HASH160_LEN],
    /// Unlock timestamp, when the output is time-locked.
    pub timelock: Option<u32>,
}

impl MultiSig {
    /// Builds the locking script for a redeem-script address.
    pub fn create_output_script(address: &Address, timelock: Option<u32>) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        if let Some(lock) = timelock {
            builder.push_data(&lock.to_be_bytes());
            builder.push_opcode(Opcode::OP_GREATERTHAN_TIMESTAMP);
        }
        builder
            .push_opcode(Opcode::OP_HASH160)
            .push_data(&address.hash)
            .push_opcode(Opcode::OP_EQUAL);
        builder.build()
    }

    /// Builds the M-of-N redeem script.
    pub fn create_redeem_script(m: u8, public_keys: &[Vec<u8>]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        builder.push_int(m);
        for pk in public_keys {
            builder.push_data(pk);
        }
        builder.push_int(public_keys.len() as u8);
        builder.push_opcode(Opcode::OP_CHECKMULTISIG);
        builder.build()
    }

    /// Builds the witness: the signatures then the redeem script.
    pub fn create_input_data(signatures: &[Vec<u8>], redeem_script: &[u8]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        for sig in signatures {
            builder.push_data(sig);
        }
        builder.push_data(redeem_script);
        builder.build()
    }
}

/// Any locking script the node recognizes as standard.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StandardScript {
    P2pkh(P2pkh),
    MultiSig(MultiSig),
}

impl StandardScript {
    /// The address this script pays to, under the given network version
    /// bytes.
    pub fn address(&self, p2pkh_version_byte: u8, multisig_version_byte: u8) -> Address {
        match self {
            StandardScript::P2pkh(s) => Address {
                version_byte: p2pkh_version_byte,
                hash: s.hash,
            },
            StandardScript::MultiSig(s) => Address {
                version_byte: multisig_version_byte,
                hash: s.hash,
            },
        }
    }

    /// The unlock timestamp, if the script is time-locked.
    pub fn timelock(&self) -> Option<u32> {
        match self {
            StandardScript::P2pkh(s) => s.timelock,
            StandardScript::MultiSig(s) => s.timelock,
        }
    }

    /// Decoded form used by the JSON vertex representation.
    pub fn to_decoded(&self, p2pkh_version_byte: u8, multisig_version_byte: u8) -> DecodedScript {
        let script_type = match self {
            StandardScript::P2pkh(_) => "P2PKH",
            StandardScript::MultiSig(_) => "MultiSig",
        };
        DecodedScript {
            script_type: script_type.to_string(),
            address: self
                .address(p2pkh_version_byte, multisig_version_byte)
                .to_base58(),
            timelock: self.timelock(),
        }
    }
}

/// Human-readable description of a standard script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedScript {
    pub script_type: String,
    pub address: String,
    pub timelock: Option<u32>,
}

/// Strips an optional `push4 OP_GREATERTHAN_TIMESTAMP` prefix.
fn strip_timelock(script: &[u8]) -> (Option<u32>, &[u8]) {
    if script.len() >= 6
        && script[0] == 4
        && script[5] == Opcode::OP_GREATERTHAN_TIMESTAMP as u8
    {
        let lock = u32::from_be_bytes(script[1..5].try_into().expect("4 bytes"));
        (Some(lock), &script[6..])
    } else {
        (None, script)
    }
}

/// Matches a P2PKH locking script, with or without a time lock.
pub fn parse_p2pkh(script: &[u8]) -> Option<P2pkh> {
    let (timelock, rest) = strip_timelock(script);
    if rest.len() != 25 {
        return None;
    }
    if rest[0] != Opcode::OP_DUP as u8
        || rest[1] != Opcode::OP_HASH160 as u8
        || rest[2] != HASH160_LEN as u8
        || rest[23] != Opcode::OP_EQUALVERIFY as u8
        || rest[24] != Opcode::OP_CHECKSIG as u8
    {
        return None;
    }
    let mut hash = [0u8; HASH160_LEN];
    hash.copy_from_slice(&rest[3..23]);
    Some(P2pkh { hash, timelock })
}

/// Matches a multisig locking script, with or without a time lock.
pub fn parse_multisig(script: &[u8]) -> Option<MultiSig> {
    let (timelock, rest) = strip_timelock(script);
    if rest.len() != 23 {
        return None;
    }
    if rest[0] != Opcode::OP_HASH160 as u8
        || rest[1] != HASH160_LEN as u8
        || rest[22] != Opcode::OP_EQUAL as u8
    {
        return None;
    }
    let mut hash = [0u8; HASH160_LEN];
    hash.copy_from_slice(&rest[2..22]);
    Some(MultiSig { hash, timelock })
}

/// Matches any standard locking script.
pub fn parse_standard(script: &[u8]) -> Option<StandardScript> {
    if let Some(p2pkh) = parse_p2pkh(script) {
        return Some(StandardScript::P2pkh(p2pkh));
    }
    parse_multisig(script).map(StandardScript::MultiSig)
}

/// Returns the payload of the last data push in a script, skipping over
/// any earlier pushes. Used to extract the redeem script from a multisig
/// witness.
pub fn last_push(script: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0;
    let mut last = None;
    while pos < script.len() {
        let opcode = script[pos];
        let (start, len) = match opcode {
            1..=75 => (pos + 1, opcode as usize),
            x if x == Opcode::OP_PUSHDATA1 as u8 => {
                let len = *script.get(pos + 1)? as usize;
                (pos + 2, len)
            }
            _ => return None,
        };
        let end = start + len;
        if end > script.len() {
            return None;
        }
        last = Some(script[start..end].to_vec());
        pos = end;
    }
    last
}

/// Builds the address a redeem script is paid through.
pub fn redeem_script_address(multisig_version_byte: u8, redeem_script: &[u8]) -> Address {
    Address {
        version_byte: multisig_version_byte,
        hash: hash160(redeem_script),
    }
}
