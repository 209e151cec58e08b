//! Stack-based script VM.
//!
//! Outputs are locked by scripts; inputs carry witness scripts. Spending
//! is validated by running the concatenation of witness and locking
//! script on a fresh stack; the run must end with a truthy top item.
//! The opcode set covers P2PKH, M-of-N multisig, time locks, and the
//! oracle-data extensions.

use std::fmt;

use crate::types::{TxInput, Vertex};

pub mod opcodes;
pub mod standard;

pub use opcodes::{
    get_data_value, op_checkdatasig, op_checkmultisig, op_checksig, op_data_greaterthan,
    op_data_match_interval, op_data_match_value, op_data_strequal, op_dup, op_equal,
    op_equalverify, op_find_p2pkh, op_greaterthan_timestamp, op_hash160, op_integer, op_pushdata,
    op_pushdata1,
};
pub use standard::{DecodedScript, MultiSig, P2pkh, ScriptBuilder, StandardScript};

/// Failures raised by script execution. Every variant aborts the
/// calling validator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptFailure {
    /// A push opcode ran past the end of the script.
    OutOfData,
    /// An opcode needed more stack items than were present.
    MissingStackItems,
    /// A stack item had the wrong shape for the opcode consuming it.
    InvalidStackData,
    /// `OP_EQUALVERIFY` compared two different items.
    EqualVerifyFailed,
    /// `OP_CHECKDATASIG` rejected the oracle signature.
    OracleChecksigFailed,
    /// A verification opcode's predicate was false.
    VerifyFailed,
    /// The transaction is still time-locked.
    TimeLocked,
    /// Unknown or malformed opcode.
    ScriptError(u8),
    /// An oracle data blob held fewer fields than the requested index.
    DataIndexError,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFailure::OutOfData => write!(f, "push ran out of script data"),
            ScriptFailure::MissingStackItems => write!(f, "missing stack items"),
            ScriptFailure::InvalidStackData => write!(f, "invalid stack data"),
            ScriptFailure::EqualVerifyFailed => write!(f, "equalverify failed"),
            ScriptFailure::OracleChecksigFailed => write!(f, "oracle checksig failed"),
            ScriptFailure::VerifyFailed => write!(f, "verify failed"),
            ScriptFailure::TimeLocked => write!(f, "output is time-locked"),
            ScriptFailure::ScriptError(op) => write!(f, "invalid opcode 0x{op:02x}"),
            ScriptFailure::DataIndexError => write!(f, "data field index out of range"),
        }
    }
}

impl std::error::Error for ScriptFailure {}

/// A stack item: raw bytes or a small integer.
///
/// Integer items are produced by `OP_0`..`OP_16` and by predicates that
/// push a boolean result; data pushes always produce byte items.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Item {
    Bytes(Vec<u8>),
    Int(i64),
}

impl Item {
    /// Byte view, `None` for integer items.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Item::Bytes(b) => Some(b),
            Item::Int(_) => None,
        }
    }

    /// Integer view, `None` for byte items.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Item::Int(i) => Some(*i),
            Item::Bytes(_) => None,
        }
    }

    /// Script truthiness: zero and empty bytes are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Item::Int(i) => *i != 0,
            Item::Bytes(b) => !b.is_empty() && b.iter().any(|&x| x != 0),
        }
    }
}

/// The execution stack.
pub type Stack = Vec<Item>;

/// Context handed to opcodes that inspect the transaction being
/// validated: the spending tx, the input under evaluation, and the tx
/// whose output it spends.
#[derive(Clone, Copy)]
pub struct ScriptExtras<'a> {
    pub tx: &'a Vertex,
    pub txin: &'a TxInput,
    pub spent_tx: &'a Vertex,
}

/// Script opcodes. Bytes 0x01..=0x4b are implicit pushes of that many
/// bytes and have no named opcode.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    OP_PUSHDATA1 = 0x4c,
    OP_0 = 0x50,
    OP_1 = 0x51,
    OP_2 = 0x52,
    OP_3 = 0x53,
    OP_4 = 0x54,
    OP_5 = 0x55,
    OP_6 = 0x56,
    OP_7 = 0x57,
    OP_8 = 0x58,
    OP_9 = 0x59,
    OP_10 = 0x5a,
    OP_11 = 0x5b,
    OP_12 = 0x5c,
    OP_13 = 0x5d,
    OP_14 = 0x5e,
    OP_15 = 0x5f,
    OP_16 = 0x60,
    OP_GREATERTHAN_TIMESTAMP = 0x6f,
    OP_DUP = 0x76,
    OP_EQUAL = 0x87,
    OP_EQUALVERIFY = 0x88,
    OP_HASH160 = 0xa9,
    OP_CHECKSIG = 0xac,
    OP_CHECKMULTISIG = 0xae,
    OP_DATA_STREQUAL = 0xb0,
    OP_DATA_GREATERTHAN = 0xb1,
    OP_DATA_MATCH_INTERVAL = 0xb2,
    OP_DATA_MATCH_VALUE = 0xb3,
    OP_CHECKDATASIG = 0xba,
    OP_FIND_P2PKH = 0xd0,
}

/// Executes one non-push opcode against the stack.
///
/// This is the opcode dispatch table; it is total over the byte range,
/// mapping unknown bytes to [`ScriptFailure::ScriptError`].
pub fn execute_op(
    opcode: u8,
    stack: &mut Stack,
    extras: &ScriptExtras<'_>,
) -> Result<(), ScriptFailure> {
    const OP_0: u8 = Opcode::OP_0 as u8;
    const OP_16: u8 = Opcode::OP_16 as u8;
    match opcode {
        OP_0..=OP_16 => op_integer(opcode, stack),
        x if x == Opcode::OP_GREATERTHAN_TIMESTAMP as u8 => {
            op_greaterthan_timestamp(stack, extras)
        }
        x if x == Opcode::OP_DUP as u8 => op_dup(stack),
        x if x == Opcode::OP_EQUAL as u8 => op_equal(stack),
        x if x == Opcode::OP_EQUALVERIFY as u8 => op_equalverify(stack),
        x if x == Opcode::OP_HASH160 as u8 => op_hash160(stack),
        x if x == Opcode::OP_CHECKSIG as u8 => op_checksig(stack, extras),
        x if x == Opcode::OP_CHECKMULTISIG as u8 => op_checkmultisig(stack, extras),
        x if x == Opcode::OP_DATA_STREQUAL as u8 => op_data_strequal(stack),
        x if x == Opcode::OP_DATA_GREATERTHAN as u8 => op_data_greaterthan(stack),
        x if x == Opcode::OP_DATA_MATCH_INTERVAL as u8 => op_data_match_interval(stack),
        x if x == Opcode::OP_DATA_MATCH_VALUE as u8 => op_data_match_value(stack),
        x if x == Opcode::OP_CHECKDATASIG as u8 => op_checkdatasig(stack),
        x if x == Opcode::OP_FIND_P2PKH as u8 => op_find_p2pkh(stack, extras),
        other => Err(ScriptFailure::ScriptError(other)),
    }
}

/// Runs a script against an existing stack.
pub fn execute_script(
    script: &[u8],
    stack: &mut Stack,
    extras: &ScriptExtras<'_>,
) -> Result<(), ScriptFailure> {
    let mut pos = 0;
    while pos < script.len() {
        let opcode = script[pos];
        match opcode {
            1..=75 => pos = op_pushdata(pos, script, stack)?,
            x if x == Opcode::OP_PUSHDATA1 as u8 => pos = op_pushdata1(pos, script, stack)?,
            _ => {
                execute_op(opcode, stack, extras)?;
                pos += 1;
            }
        }
    }
    Ok(())
}

/// Full spend evaluation for one input.
///
/// Runs witness ‖ locking script on a fresh stack; for multisig outputs
/// the redeem script embedded in the witness is then run against the
/// remaining signature items. Succeeds iff the final top item is truthy.
pub fn script_eval(
    tx: &Vertex,
    txin: &TxInput,
    spent_tx: &Vertex,
) -> Result<(), ScriptFailure> {
    let output = spent_tx
        .outputs
        .get(txin.index as usize)
        .ok_or(ScriptFailure::InvalidStackData)?;
    let extras = ScriptExtras {
        tx,
        txin,
        spent_tx,
    };

    let mut full = Vec::with_capacity(txin.script_sig.len() + output.script.len());
    full.extend_from_slice(&txin.script_sig);
    full.extend_from_slice(&output.script);

    let mut stack = Stack::new();
    execute_script(&full, &mut stack, &extras)?;

    if standard::parse_multisig(&output.script).is_some() {
        // The hash comparison result is on top; the signatures for the
        // redeem script evaluation sit underneath it.
        let matched = stack.pop().ok_or(ScriptFailure::MissingStackItems)?;
        if !matched.is_truthy() {
            return Err(ScriptFailure::EqualVerifyFailed);
        }
        let redeem =
            standard::last_push(&txin.script_sig).ok_or(ScriptFailure::InvalidStackData)?;
        execute_script(&redeem, &mut stack, &extras)?;
    }

    match stack.last() {
        Some(item) if item.is_truthy() => Ok(()),
        Some(_) => Err(ScriptFailure::VerifyFailed),
        None => Err(ScriptFailure::MissingStackItems),
    }
}
