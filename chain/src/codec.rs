//! Canonical wire codec for vertices.
//!
//! The byte layout is bit-exact and deterministic; the vertex id is the
//! double SHA-256 of exactly these bytes. Layout:
//!
//! - funds struct: `u16 version | u8 tokens_len | {32B token_uid}* |
//!   u8 inputs_len | {input}* | u8 outputs_len | {output}*`
//! - input: `32B tx_id | u8 index | u16 script_sig_len | bytes`
//! - output: `value (4 or 8 bytes) | u8 token_data | u16 script_len | bytes`
//! - graph struct: `f64 weight | u64 timestamp | u8 parents_len |
//!   {32B parent}*`
//! - blocks append `u8 data_len | data`; token-creation transactions
//!   append `u8 info_version | u8 name_len | name | u8 symbol_len |
//!   symbol`; merge-mined blocks append `u16 aux_pow_len | aux_pow`
//! - nonce: 16 bytes big-endian
//!
//! Output values in `[0, 2^31)` use the 4-byte form; larger values use
//! 8 bytes storing the negated amount so the sign bit distinguishes the
//! two forms. A decoder must reject 8-byte encodings of values that fit
//! in 4 bytes.

use std::fmt;

use crate::types::vertex::{
    AuxPow, TokenInfo, TxInput, TxOutput, VertexKind, VertexVersion, NONCE_SIZE,
};
use crate::types::{Hash256, TokenUid, Vertex, VertexId, HASH_LEN};

/// Largest output value that still uses the 4-byte encoding.
pub const MAX_OUTPUT_VALUE_32: u64 = (1 << 31) - 1;

/// Token-info section version byte.
const TOKEN_INFO_VERSION: u8 = 1;

/// Errors raised while decoding vertex bytes.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The buffer ended before the structure was complete.
    UnexpectedEnd,
    /// The version field does not name a known vertex kind.
    UnknownVersion(u16),
    /// An output value in the 8-byte form would have fit in 4 bytes,
    /// or its sign flag is inconsistent.
    NonCanonicalValue,
    /// A counted field exceeds what a single byte length can describe.
    OversizedField(&'static str),
    /// Token name or symbol is not valid UTF-8.
    InvalidTokenInfo,
    /// Bytes remained after the nonce.
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd => write!(f, "unexpected end of vertex bytes"),
            DecodeError::UnknownVersion(v) => write!(f, "unknown vertex version {v}"),
            DecodeError::NonCanonicalValue => {
                write!(f, "non-canonical output value encoding")
            }
            DecodeError::OversizedField(field) => write!(f, "oversized field: {field}"),
            DecodeError::InvalidTokenInfo => write!(f, "token info is not valid UTF-8"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after nonce"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Cursor over an input buffer with length-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::UnexpectedEnd)?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    fn hash(&mut self) -> Result<Hash256, DecodeError> {
        let b = self.take(HASH_LEN)?;
        Ok(Hash256(b.try_into().expect("32 bytes")))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn push_len_u8(out: &mut Vec<u8>, len: usize, field: &'static str) {
    debug_assert!(len <= u8::MAX as usize, "{field} length exceeds u8");
    out.push(len as u8);
}

/// Encodes an output value using the 4-byte or 8-byte form.
pub fn encode_output_value(out: &mut Vec<u8>, value: u64) {
    if value <= MAX_OUTPUT_VALUE_32 {
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.extend_from_slice(&(-(value as i64)).to_be_bytes());
    }
}

/// Decodes an output value, rejecting non-canonical 8-byte encodings.
fn decode_output_value(r: &mut Reader<'_>) -> Result<u64, DecodeError> {
    // The sign bit of the first byte selects the wide form.
    let first = *r.buf.get(r.pos).ok_or(DecodeError::UnexpectedEnd)?;
    if first & 0x80 == 0 {
        let b = r.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().expect("4 bytes")) as u64)
    } else {
        let b = r.take(8)?;
        let signed = i64::from_be_bytes(b.try_into().expect("8 bytes"));
        if signed >= 0 {
            return Err(DecodeError::NonCanonicalValue);
        }
        let value = signed.unsigned_abs();
        if value <= MAX_OUTPUT_VALUE_32 {
            return Err(DecodeError::NonCanonicalValue);
        }
        Ok(value)
    }
}

fn encode_funds(out: &mut Vec<u8>, vertex: &Vertex, clear_input_data: bool) {
    out.extend_from_slice(&(vertex.version() as u16).to_be_bytes());

    push_len_u8(out, vertex.tokens.len(), "tokens");
    for token in &vertex.tokens {
        out.extend_from_slice(token.as_bytes());
    }

    push_len_u8(out, vertex.inputs.len(), "inputs");
    for input in &vertex.inputs {
        out.extend_from_slice(input.tx_id.as_bytes());
        out.push(input.index);
        if clear_input_data {
            out.extend_from_slice(&0u16.to_be_bytes());
        } else {
            out.extend_from_slice(&(input.script_sig.len() as u16).to_be_bytes());
            out.extend_from_slice(&input.script_sig);
        }
    }

    push_len_u8(out, vertex.outputs.len(), "outputs");
    for output in &vertex.outputs {
        encode_output_value(out, output.value);
        out.push(output.token_data);
        out.extend_from_slice(&(output.script.len() as u16).to_be_bytes());
        out.extend_from_slice(&output.script);
    }
}

fn encode_graph(out: &mut Vec<u8>, vertex: &Vertex) {
    out.extend_from_slice(&vertex.weight.to_be_bytes());
    out.extend_from_slice(&vertex.timestamp.to_be_bytes());
    push_len_u8(out, vertex.parents.len(), "parents");
    for parent in &vertex.parents {
        out.extend_from_slice(parent.as_bytes());
    }
}

fn encode_tail(out: &mut Vec<u8>, vertex: &Vertex) {
    match &vertex.kind {
        VertexKind::Block { data, aux_pow } => {
            push_len_u8(out, data.len(), "block data");
            out.extend_from_slice(data);
            if let Some(AuxPow(blob)) = aux_pow {
                out.extend_from_slice(&(blob.len() as u16).to_be_bytes());
                out.extend_from_slice(blob);
            }
        }
        VertexKind::Transaction => {}
        VertexKind::TokenCreation { info } => {
            out.push(TOKEN_INFO_VERSION);
            push_len_u8(out, info.name.len(), "token name");
            out.extend_from_slice(info.name.as_bytes());
            push_len_u8(out, info.symbol.len(), "token symbol");
            out.extend_from_slice(info.symbol.as_bytes());
        }
    }
}

/// Full canonical serialization: funds ‖ graph ‖ kind tail ‖ nonce.
pub fn encode(vertex: &Vertex) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    encode_funds(&mut out, vertex, false);
    encode_graph(&mut out, vertex);
    encode_tail(&mut out, vertex);
    out.extend_from_slice(&vertex.nonce.to_be_bytes()[16 - NONCE_SIZE..]);
    out
}

/// Serialization used as the signature message: the funds struct with
/// every input witness cleared (plus the token info for token-creation
/// transactions). The graph struct is excluded so twins that differ
/// only in parent order can share witnesses.
pub fn sighash_bytes(vertex: &Vertex) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    encode_funds(&mut out, vertex, true);
    if matches!(vertex.kind, VertexKind::TokenCreation { .. }) {
        encode_tail(&mut out, vertex);
    }
    out
}

/// Decodes a vertex from its canonical serialization.
///
/// The stored id is recomputed from the bytes, so
/// `decode(encode(v)) == v` holds for every sealed vertex.
pub fn decode(bytes: &[u8]) -> Result<Vertex, DecodeError> {
    let mut r = Reader::new(bytes);

    let version =
        VertexVersion::from_u16(r.u16()?).ok_or_else(|| {
            // Re-read for the error value; position is already past it.
            let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
            DecodeError::UnknownVersion(raw)
        })?;

    let tokens_len = r.u8()? as usize;
    let mut tokens = Vec::with_capacity(tokens_len);
    for _ in 0..tokens_len {
        tokens.push(TokenUid(r.hash()?));
    }

    let inputs_len = r.u8()? as usize;
    let mut inputs = Vec::with_capacity(inputs_len);
    for _ in 0..inputs_len {
        let tx_id = VertexId(r.hash()?);
        let index = r.u8()?;
        let sig_len = r.u16()? as usize;
        let script_sig = r.take(sig_len)?.to_vec();
        inputs.push(TxInput {
            tx_id,
            index,
            script_sig,
        });
    }

    let outputs_len = r.u8()? as usize;
    let mut outputs = Vec::with_capacity(outputs_len);
    for _ in 0..outputs_len {
        let value = decode_output_value(&mut r)?;
        let token_data = r.u8()?;
        let script_len = r.u16()? as usize;
        let script = r.take(script_len)?.to_vec();
        outputs.push(TxOutput {
            value,
            script,
            token_data,
        });
    }

    let weight = r.f64()?;
    let timestamp = r.u64()?;
    let parents_len = r.u8()? as usize;
    let mut parents = Vec::with_capacity(parents_len);
    for _ in 0..parents_len {
        parents.push(VertexId(r.hash()?));
    }

    let kind = match version {
        VertexVersion::RegularBlock | VertexVersion::MergeMinedBlock => {
            let data_len = r.u8()? as usize;
            let data = r.take(data_len)?.to_vec();
            let aux_pow = if version == VertexVersion::MergeMinedBlock {
                let aux_len = r.u16()? as usize;
                Some(AuxPow(r.take(aux_len)?.to_vec()))
            } else {
                None
            };
            VertexKind::Block { data, aux_pow }
        }
        VertexVersion::RegularTx => VertexKind::Transaction,
        VertexVersion::TokenCreationTx => {
            let info_version = r.u8()?;
            if info_version != TOKEN_INFO_VERSION {
                return Err(DecodeError::OversizedField("token info version"));
            }
            let name_len = r.u8()? as usize;
            let name = String::from_utf8(r.take(name_len)?.to_vec())
                .map_err(|_| DecodeError::InvalidTokenInfo)?;
            let symbol_len = r.u8()? as usize;
            let symbol = String::from_utf8(r.take(symbol_len)?.to_vec())
                .map_err(|_| DecodeError::InvalidTokenInfo)?;
            VertexKind::TokenCreation {
                info: TokenInfo { name, symbol },
            }
        }
    };

    let nonce_bytes = r.take(NONCE_SIZE)?;
    let mut nonce_buf = [0u8; 16];
    nonce_buf[16 - NONCE_SIZE..].copy_from_slice(nonce_bytes);
    let nonce = u128::from_be_bytes(nonce_buf);

    if !r.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }

    let mut vertex = Vertex {
        hash: VertexId(Hash256::ZERO),
        nonce,
        timestamp,
        weight,
        parents,
        inputs,
        outputs,
        tokens,
        kind,
    };
    vertex.update_hash();
    Ok(vertex)
}
