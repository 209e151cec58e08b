//! Opcode implementations.
//!
//! Each `op_*` function manipulates the stack directly and returns the
//! failure that aborts the calling validator, mirroring the contracts the
//! VM tests pin down. Push opcodes additionally take the script buffer
//! and return the next read position.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use crate::crypto::{hash160, ADDRESS_LEN};

use super::standard::parse_p2pkh;
use super::{Item, ScriptExtras, ScriptFailure, Stack};

/// Pops the top item, failing with `MissingStackItems` when empty.
fn pop(stack: &mut Stack) -> Result<Item, ScriptFailure> {
    stack.pop().ok_or(ScriptFailure::MissingStackItems)
}

/// Reads a big-endian u32 from exactly four bytes.
fn parse_u32(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Implicit push: the opcode byte itself is the length (1..=75).
///
/// Returns the position just past the pushed bytes.
pub fn op_pushdata(pos: usize, script: &[u8], stack: &mut Stack) -> Result<usize, ScriptFailure> {
    let len = *script.get(pos).ok_or(ScriptFailure::OutOfData)? as usize;
    let start = pos + 1;
    let end = start + len;
    if end > script.len() {
        return Err(ScriptFailure::OutOfData);
    }
    stack.push(Item::Bytes(script[start..end].to_vec()));
    Ok(end)
}

/// `OP_PUSHDATA1`: one length byte follows the opcode.
pub fn op_pushdata1(pos: usize, script: &[u8], stack: &mut Stack) -> Result<usize, ScriptFailure> {
    let len = *script.get(pos + 1).ok_or(ScriptFailure::OutOfData)? as usize;
    let start = pos + 2;
    let end = start + len;
    if end > script.len() {
        return Err(ScriptFailure::OutOfData);
    }
    stack.push(Item::Bytes(script[start..end].to_vec()));
    Ok(end)
}

/// `OP_0`..`OP_16`: pushes the small integer named by the opcode.
pub fn op_integer(opcode: u8, stack: &mut Stack) -> Result<(), ScriptFailure> {
    if !(super::Opcode::OP_0 as u8..=super::Opcode::OP_16 as u8).contains(&opcode) {
        return Err(ScriptFailure::ScriptError(opcode));
    }
    stack.push(Item::Int((opcode - super::Opcode::OP_0 as u8) as i64));
    Ok(())
}

/// `OP_DUP`: duplicates the top item.
pub fn op_dup(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let top = stack.last().ok_or(ScriptFailure::MissingStackItems)?.clone();
    stack.push(top);
    Ok(())
}

/// `OP_EQUAL`: pops two items and pushes 1 if equal, 0 otherwise.
pub fn op_equal(stack: &mut Stack) -> Result<(), ScriptFailure> {
    if stack.len() < 2 {
        return Err(ScriptFailure::MissingStackItems);
    }
    let a = pop(stack)?;
    let b = pop(stack)?;
    stack.push(Item::Int(i64::from(a == b)));
    Ok(())
}

/// `OP_EQUALVERIFY`: pops two items, failing unless they are equal.
pub fn op_equalverify(stack: &mut Stack) -> Result<(), ScriptFailure> {
    if stack.len() < 2 {
        return Err(ScriptFailure::MissingStackItems);
    }
    let a = pop(stack)?;
    let b = pop(stack)?;
    if a != b {
        return Err(ScriptFailure::EqualVerifyFailed);
    }
    Ok(())
}

/// `OP_HASH160`: pops bytes, pushes `RIPEMD160(SHA256(bytes))`.
pub fn op_hash160(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let item = pop(stack)?;
    let bytes = item.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    stack.push(Item::Bytes(hash160(bytes).to_vec()));
    Ok(())
}

/// Verifies a DER signature over a 32-byte digest.
fn verify_ecdsa(digest: [u8; 32], sig_bytes: &[u8], pubkey_bytes: &[u8]) -> bool {
    let secp = Secp256k1::verification_only();
    let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_der(sig_bytes) else {
        return false;
    };
    let msg = Message::from_digest(digest);
    secp.verify_ecdsa(&msg, &sig, &pubkey).is_ok()
}

/// `OP_CHECKSIG`: pops pubkey and signature, pushes 1 on a valid
/// signature over the transaction sighash, 0 otherwise.
pub fn op_checksig(stack: &mut Stack, extras: &ScriptExtras<'_>) -> Result<(), ScriptFailure> {
    if stack.len() < 2 {
        return Err(ScriptFailure::MissingStackItems);
    }
    let pubkey = pop(stack)?;
    let signature = pop(stack)?;
    let pubkey = pubkey.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    let signature = signature.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;

    let digest = extras.tx.sighash_all_digest();
    let ok = verify_ecdsa(*digest.as_bytes(), signature, pubkey);
    stack.push(Item::Int(i64::from(ok)));
    Ok(())
}

/// `OP_CHECKMULTISIG`: M-of-N check. Signatures must appear in the same
/// relative order as their matching public keys; an ordering mismatch
/// pushes 0 rather than failing the script.
pub fn op_checkmultisig(stack: &mut Stack, extras: &ScriptExtras<'_>) -> Result<(), ScriptFailure> {
    let n_item = pop(stack)?;
    let n = n_item.as_int().ok_or(ScriptFailure::InvalidStackData)?;
    if n < 0 {
        return Err(ScriptFailure::InvalidStackData);
    }
    let n = n as usize;

    if stack.len() < n {
        return Err(ScriptFailure::MissingStackItems);
    }
    let mut pubkeys = Vec::with_capacity(n);
    for _ in 0..n {
        let item = pop(stack)?;
        pubkeys.push(
            item.as_bytes()
                .ok_or(ScriptFailure::InvalidStackData)?
                .to_vec(),
        );
    }
    pubkeys.reverse();

    let m_item = pop(stack)?;
    let m = m_item.as_int().ok_or(ScriptFailure::InvalidStackData)?;
    if m < 0 || m as usize > n {
        return Err(ScriptFailure::MissingStackItems);
    }
    let m = m as usize;

    if stack.len() < m {
        return Err(ScriptFailure::MissingStackItems);
    }
    let mut signatures = Vec::with_capacity(m);
    for _ in 0..m {
        let item = pop(stack)?;
        signatures.push(
            item.as_bytes()
                .ok_or(ScriptFailure::InvalidStackData)?
                .to_vec(),
        );
    }
    signatures.reverse();

    let digest = *extras.tx.sighash_all_digest().as_bytes();

    // Each signature must match a pubkey strictly after the previous
    // signature's pubkey; out-of-order or duplicate signatures fail.
    let mut key_cursor = 0;
    let mut matched = 0;
    for signature in &signatures {
        let mut found = false;
        while key_cursor < pubkeys.len() {
            let candidate = &pubkeys[key_cursor];
            key_cursor += 1;
            if verify_ecdsa(digest, signature, candidate) {
                found = true;
                break;
            }
        }
        if !found {
            break;
        }
        matched += 1;
    }

    stack.push(Item::Int(i64::from(matched == signatures.len())));
    Ok(())
}

/// `OP_CHECKDATASIG`: oracle signature over arbitrary data. Pops
/// pubkey, signature, and data; on success the data is pushed back.
pub fn op_checkdatasig(stack: &mut Stack) -> Result<(), ScriptFailure> {
    if stack.len() < 3 {
        return Err(ScriptFailure::MissingStackItems);
    }
    let pubkey = pop(stack)?;
    let signature = pop(stack)?;
    let data = pop(stack)?;
    let pubkey = pubkey.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    let signature = signature.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    let data_bytes = data.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;

    // Oracles sign the raw data; ECDSA-over-SHA256 means the verified
    // digest is a single SHA-256 of it.
    let digest: [u8; 32] = Sha256::digest(data_bytes).into();
    if !verify_ecdsa(digest, signature, pubkey) {
        return Err(ScriptFailure::OracleChecksigFailed);
    }
    stack.push(data);
    Ok(())
}

/// Extracts field `index` from a blob of length-prefixed fields.
///
/// Fails with `DataIndexError` when the blob holds fewer fields and with
/// `OutOfData` when the selected field is truncated.
pub fn get_data_value(index: usize, data: &[u8]) -> Result<&[u8], ScriptFailure> {
    let mut pos = 0;
    for _ in 0..index {
        let len = *data.get(pos).ok_or(ScriptFailure::DataIndexError)? as usize;
        pos += 1 + len;
        if pos > data.len() {
            return Err(ScriptFailure::OutOfData);
        }
    }
    let len = *data.get(pos).ok_or(ScriptFailure::DataIndexError)? as usize;
    let start = pos + 1;
    let end = start + len;
    if end > data.len() {
        return Err(ScriptFailure::OutOfData);
    }
    Ok(&data[start..end])
}

/// Pops the `(data, field_index, argument)` triple shared by the
/// two-argument oracle-data opcodes. The field index must be an integer.
fn pop_data_triple(stack: &mut Stack) -> Result<(Vec<u8>, usize, Item), ScriptFailure> {
    if stack.len() < 3 {
        return Err(ScriptFailure::MissingStackItems);
    }
    let arg = pop(stack)?;
    let index = pop(stack)?;
    let data = pop(stack)?;
    let index = index.as_int().ok_or(ScriptFailure::VerifyFailed)?;
    if index < 0 {
        return Err(ScriptFailure::VerifyFailed);
    }
    let data = data
        .as_bytes()
        .ok_or(ScriptFailure::InvalidStackData)?
        .to_vec();
    Ok((data, index as usize, arg))
}

/// `OP_DATA_STREQUAL`: field `k` of the data blob must equal the
/// argument bytes; the blob is pushed back on success.
pub fn op_data_strequal(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let (data, index, arg) = pop_data_triple(stack)?;
    let arg = arg.as_bytes().ok_or(ScriptFailure::VerifyFailed)?;
    let field = get_data_value(index, &data)?;
    if field != arg {
        return Err(ScriptFailure::VerifyFailed);
    }
    stack.push(Item::Bytes(data));
    Ok(())
}

/// `OP_DATA_GREATERTHAN`: field `k`, read as a big-endian u32, must be
/// strictly greater than the argument; the blob is pushed back.
pub fn op_data_greaterthan(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let (data, index, arg) = pop_data_triple(stack)?;
    let arg = arg
        .as_bytes()
        .and_then(parse_u32)
        .ok_or(ScriptFailure::VerifyFailed)?;
    let field = get_data_value(index, &data)?;
    let field = parse_u32(field).ok_or(ScriptFailure::VerifyFailed)?;
    if field <= arg {
        return Err(ScriptFailure::VerifyFailed);
    }
    stack.push(Item::Bytes(data));
    Ok(())
}

/// Pops the pair count used by the key-select opcodes.
fn pop_pair_count(stack: &mut Stack) -> Result<usize, ScriptFailure> {
    let item = pop(stack)?;
    match item {
        Item::Int(n) if n >= 0 => Ok(n as usize),
        Item::Bytes(ref b) if b.len() == 1 => Ok(b[0] as usize),
        _ => Err(ScriptFailure::InvalidStackData),
    }
}

/// `OP_DATA_MATCH_INTERVAL`: selects a key by comparing the data value
/// against ascending thresholds.
///
/// Stack, bottom to top: `data, k, key_1, limit_1, ..., key_n, limit_n,
/// key_overflow, n`. The selected key is the first whose limit the value
/// does not exceed; values above every limit select the overflow key.
pub fn op_data_match_interval(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let n = pop_pair_count(stack)?;
    // overflow key + n (key, limit) pairs + k + data
    if stack.len() < 2 * n + 3 {
        return Err(ScriptFailure::MissingStackItems);
    }

    let mut selected = pop(stack)?;
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let limit = pop(stack)?;
        let key = pop(stack)?;
        pairs.push((limit, key));
    }
    let index = pop(stack)?.as_int().ok_or(ScriptFailure::VerifyFailed)?;
    if index < 0 {
        return Err(ScriptFailure::VerifyFailed);
    }
    let data = pop(stack)?;
    let data = data.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    let value = parse_u32(get_data_value(index as usize, data)?)
        .ok_or(ScriptFailure::VerifyFailed)?;

    // Pairs come off the stack with the highest limit first.
    for (limit, key) in pairs {
        let limit = limit
            .as_bytes()
            .and_then(parse_u32)
            .ok_or(ScriptFailure::VerifyFailed)?;
        if value <= limit {
            selected = key;
        }
    }
    stack.push(selected);
    Ok(())
}

/// `OP_DATA_MATCH_VALUE`: selects the key paired with the value equal to
/// the data value, or the fallback key when nothing matches.
///
/// Stack, bottom to top: `data, k, key_fallback, value_1, key_1, ...,
/// value_n, key_n, n`.
pub fn op_data_match_value(stack: &mut Stack) -> Result<(), ScriptFailure> {
    let n = pop_pair_count(stack)?;
    // n (value, key) pairs + fallback key + k + data
    if stack.len() < 2 * n + 3 {
        return Err(ScriptFailure::MissingStackItems);
    }

    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let key = pop(stack)?;
        let value = pop(stack)?;
        pairs.push((value, key));
    }
    let fallback = pop(stack)?;
    let index = pop(stack)?.as_int().ok_or(ScriptFailure::VerifyFailed)?;
    if index < 0 {
        return Err(ScriptFailure::VerifyFailed);
    }
    let data = pop(stack)?;
    let data = data.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    let wanted = parse_u32(get_data_value(index as usize, data)?)
        .ok_or(ScriptFailure::VerifyFailed)?;

    let mut selected = fallback;
    for (value, key) in pairs {
        let value = value
            .as_bytes()
            .and_then(parse_u32)
            .ok_or(ScriptFailure::VerifyFailed)?;
        if value == wanted {
            selected = key;
            break;
        }
    }
    stack.push(selected);
    Ok(())
}

/// `OP_FIND_P2PKH`: pops an address and requires the current transaction
/// to pay the spent output's full value to it through a P2PKH output.
pub fn op_find_p2pkh(stack: &mut Stack, extras: &ScriptExtras<'_>) -> Result<(), ScriptFailure> {
    let item = pop(stack)?;
    let address = item.as_bytes().ok_or(ScriptFailure::InvalidStackData)?;
    if address.len() != ADDRESS_LEN {
        return Err(ScriptFailure::InvalidStackData);
    }
    let wanted_hash: &[u8] = &address[1..21];

    let spent_output = extras
        .spent_tx
        .outputs
        .get(extras.txin.index as usize)
        .ok_or(ScriptFailure::InvalidStackData)?;

    for output in &extras.tx.outputs {
        let Some(decoded) = parse_p2pkh(&output.script) else {
            continue;
        };
        if decoded.hash.as_slice() == wanted_hash && output.value == spent_output.value {
            stack.push(Item::Int(1));
            return Ok(());
        }
    }
    Err(ScriptFailure::VerifyFailed)
}

/// `OP_GREATERTHAN_TIMESTAMP`: fails while the transaction timestamp has
/// not passed the argument.
pub fn op_greaterthan_timestamp(
    stack: &mut Stack,
    extras: &ScriptExtras<'_>,
) -> Result<(), ScriptFailure> {
    let item = pop(stack)?;
    let arg = item
        .as_bytes()
        .and_then(parse_u32)
        .ok_or(ScriptFailure::InvalidStackData)?;
    if extras.tx.timestamp <= arg as u64 {
        return Err(ScriptFailure::TimeLocked);
    }
    Ok(())
}
