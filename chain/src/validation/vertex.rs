//! The validation pipeline and its error taxonomy.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::config::Settings;
use crate::script::{script_eval, ScriptFailure};
use crate::storage::{StorageError, VertexStore};
use crate::types::{pow_passes, TokenUid, Vertex, VertexId};

/// Tolerance when comparing weights against their required minimum.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Everything that can make a vertex invalid. Validation failures leave
/// storage untouched and surface verbatim to the caller.
#[derive(Debug)]
pub enum ValidationError {
    /// More inputs than the network permits.
    TooManyInputs(usize),
    /// More outputs than the network permits.
    TooManyOutputs(usize),
    /// Every vertex carries at least one output.
    NoOutputs,
    /// Blocks cannot spend anything.
    BlockWithInputs,
    /// Block data over the size limit.
    BlockDataError(usize),
    /// Wrong parent count or parent kinds.
    IncorrectParents(String),
    /// The same parent listed twice.
    DuplicatedParents,
    /// A parent hash that is not in storage.
    ParentDoesNotExist(VertexId),
    /// A spent output that does not exist (unknown tx or bad index).
    InexistentInput(String),
    /// The same output spent twice within one transaction.
    ConflictingInputs,
    /// Input, output, mint, melt, and deposit amounts do not balance.
    InputOutputMismatch(String),
    /// The hash does not meet the proof-of-work target.
    PowError,
    /// A timestamp ordering rule was broken.
    TimestampError(String),
    /// A witness script failed to validate its input.
    InvalidInputData(ScriptFailure),
    /// The weight is below the demanded minimum.
    WeightError { actual: f64, required: f64 },
    /// Storage gave up mid-validation; the caller should retry.
    Storage(StorageError),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooManyInputs(n) => write!(f, "too many inputs: {n}"),
            ValidationError::TooManyOutputs(n) => write!(f, "too many outputs: {n}"),
            ValidationError::NoOutputs => write!(f, "vertex has no outputs"),
            ValidationError::BlockWithInputs => write!(f, "blocks cannot have inputs"),
            ValidationError::BlockDataError(n) => write!(f, "block data too long: {n} bytes"),
            ValidationError::IncorrectParents(msg) => write!(f, "incorrect parents: {msg}"),
            ValidationError::DuplicatedParents => write!(f, "duplicated parents"),
            ValidationError::ParentDoesNotExist(id) => write!(f, "parent does not exist: {id}"),
            ValidationError::InexistentInput(msg) => write!(f, "inexistent input: {msg}"),
            ValidationError::ConflictingInputs => {
                write!(f, "transaction spends the same output twice")
            }
            ValidationError::InputOutputMismatch(msg) => {
                write!(f, "input/output mismatch: {msg}")
            }
            ValidationError::PowError => write!(f, "hash above proof-of-work target"),
            ValidationError::TimestampError(msg) => write!(f, "timestamp error: {msg}"),
            ValidationError::InvalidInputData(e) => write!(f, "invalid input data: {e}"),
            ValidationError::WeightError { actual, required } => {
                write!(f, "weight {actual} below required {required}")
            }
            ValidationError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<StorageError> for ValidationError {
    fn from(e: StorageError) -> Self {
        ValidationError::Storage(e)
    }
}

/// Per-token running balance while checking sums.
#[derive(Default)]
struct TokenBalance {
    input_amount: u64,
    output_amount: u64,
    can_mint: bool,
    can_melt: bool,
    wants_mint_authority: bool,
    wants_melt_authority: bool,
}

/// The vertex validator: all checks of the ingestion pipeline, in order.
#[derive(Clone, Debug)]
pub struct VertexValidator {
    settings: Settings,
}

impl VertexValidator {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Runs the full pipeline against one vertex.
    pub fn validate<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        self.verify_structure(vertex)?;
        self.verify_pow(vertex)?;
        self.verify_parents(store, vertex)?;
        if vertex.is_block() {
            self.verify_block_weight(vertex)?;
            self.verify_reward(store, vertex)?;
        } else {
            self.verify_inputs(store, vertex)?;
            self.verify_scripts(store, vertex)?;
            self.verify_sum(store, vertex)?;
            self.verify_weight(vertex)?;
        }
        Ok(())
    }

    fn verify_structure(&self, vertex: &Vertex) -> Result<(), ValidationError> {
        if vertex.inputs.len() > self.settings.max_num_inputs {
            return Err(ValidationError::TooManyInputs(vertex.inputs.len()));
        }
        if vertex.outputs.len() > self.settings.max_num_outputs {
            return Err(ValidationError::TooManyOutputs(vertex.outputs.len()));
        }
        if vertex.outputs.is_empty() {
            return Err(ValidationError::NoOutputs);
        }

        if vertex.is_block() {
            if !vertex.inputs.is_empty() {
                return Err(ValidationError::BlockWithInputs);
            }
            let data_len = vertex.block_data().map_or(0, <[u8]>::len);
            if data_len > self.settings.max_block_data_len {
                return Err(ValidationError::BlockDataError(data_len));
            }
            if vertex.parents.len() != 3 {
                return Err(ValidationError::IncorrectParents(format!(
                    "blocks take 3 parents, got {}",
                    vertex.parents.len()
                )));
            }
        } else if vertex.parents.len() != 2 {
            return Err(ValidationError::IncorrectParents(format!(
                "transactions take 2 parents, got {}",
                vertex.parents.len()
            )));
        }

        let unique: HashSet<_> = vertex.parents.iter().collect();
        if unique.len() != vertex.parents.len() {
            return Err(ValidationError::DuplicatedParents);
        }
        Ok(())
    }

    fn verify_pow(&self, vertex: &Vertex) -> Result<(), ValidationError> {
        if vertex.hash != vertex.compute_id() || !pow_passes(&vertex.hash.0, vertex.weight) {
            return Err(ValidationError::PowError);
        }
        Ok(())
    }

    fn verify_parents<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        let mut block_parents = 0usize;
        let mut block_parent_timestamp = None;

        for parent_id in &vertex.parents {
            let parent = match store.get_vertex(parent_id) {
                Ok(parent) => parent,
                Err(StorageError::TransactionDoesNotExist(id)) => {
                    return Err(ValidationError::ParentDoesNotExist(id));
                }
                Err(e) => return Err(e.into()),
            };
            if parent.timestamp >= vertex.timestamp {
                return Err(ValidationError::TimestampError(format!(
                    "parent {parent_id} is not older than the vertex"
                )));
            }
            if parent.is_block() {
                block_parents += 1;
                block_parent_timestamp = Some(parent.timestamp);
            }
        }

        if vertex.is_block() {
            if block_parents != 1 || !store.get_vertex(&vertex.parents[0])?.is_block() {
                return Err(ValidationError::IncorrectParents(
                    "blocks take 1 block parent followed by 2 tx parents".to_string(),
                ));
            }
            let parent_ts = block_parent_timestamp.expect("counted above");
            if vertex.timestamp - parent_ts > self.settings.max_distance_between_blocks {
                return Err(ValidationError::TimestampError(format!(
                    "block is {}s after its block parent, max is {}",
                    vertex.timestamp - parent_ts,
                    self.settings.max_distance_between_blocks
                )));
            }
        } else if block_parents != 0 {
            return Err(ValidationError::IncorrectParents(
                "transactions confirm only transactions".to_string(),
            ));
        }
        Ok(())
    }

    fn verify_inputs<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for input in &vertex.inputs {
            if !seen.insert((input.tx_id, input.index)) {
                return Err(ValidationError::ConflictingInputs);
            }
            let spent = match store.get_vertex(&input.tx_id) {
                Ok(spent) => spent,
                Err(StorageError::TransactionDoesNotExist(id)) => {
                    return Err(ValidationError::InexistentInput(format!(
                        "spent tx {id} not found"
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            if spent.outputs.len() <= input.index as usize {
                return Err(ValidationError::InexistentInput(format!(
                    "output {} of {} does not exist",
                    input.index, input.tx_id
                )));
            }
            if spent.timestamp >= vertex.timestamp {
                return Err(ValidationError::TimestampError(format!(
                    "spent tx {} is not older than the vertex",
                    input.tx_id
                )));
            }
        }
        Ok(())
    }

    fn verify_scripts<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        for input in &vertex.inputs {
            let spent = store.get_vertex(&input.tx_id)?;
            script_eval(vertex, input, &spent).map_err(ValidationError::InvalidInputData)?;
        }
        Ok(())
    }

    fn verify_sum<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        let mut balances: BTreeMap<Option<TokenUid>, TokenBalance> = BTreeMap::new();
        let created_token = vertex
            .is_token_creation()
            .then(|| TokenUid(vertex.hash.0));

        for input in &vertex.inputs {
            let spent = store.get_vertex(&input.tx_id)?;
            let output = &spent.outputs[input.index as usize];
            let uid = spent.output_token_uid(output).map_err(|idx| {
                ValidationError::InputOutputMismatch(format!(
                    "spent output has invalid token index {idx}"
                ))
            })?;
            let balance = balances.entry(uid).or_default();
            if output.is_authority() {
                if uid.is_none() {
                    return Err(ValidationError::InputOutputMismatch(
                        "the native token has no authorities".to_string(),
                    ));
                }
                balance.can_mint |= output.can_mint();
                balance.can_melt |= output.can_melt();
            } else {
                balance.input_amount = balance
                    .input_amount
                    .checked_add(output.value)
                    .ok_or_else(|| {
                        ValidationError::InputOutputMismatch("input overflow".to_string())
                    })?;
            }
        }

        for output in &vertex.outputs {
            let uid = vertex.output_token_uid(output).map_err(|idx| {
                ValidationError::InputOutputMismatch(format!("invalid token index {idx}"))
            })?;
            let balance = balances.entry(uid).or_default();
            if output.is_authority() {
                if uid.is_none() {
                    return Err(ValidationError::InputOutputMismatch(
                        "the native token has no authorities".to_string(),
                    ));
                }
                balance.wants_mint_authority |= output.can_mint();
                balance.wants_melt_authority |= output.can_melt();
            } else {
                if output.value == 0 {
                    return Err(ValidationError::InputOutputMismatch(
                        "zero-value output".to_string(),
                    ));
                }
                if output.value > self.settings.max_output_value {
                    return Err(ValidationError::InputOutputMismatch(format!(
                        "output value {} above maximum",
                        output.value
                    )));
                }
                balance.output_amount = balance
                    .output_amount
                    .checked_add(output.value)
                    .ok_or_else(|| {
                        ValidationError::InputOutputMismatch("output overflow".to_string())
                    })?;
            }
        }

        // Token deposits: minting locks native value, melting frees it.
        let mut deposit = 0u64;
        let mut withdraw = 0u64;

        for (uid, balance) in &balances {
            let Some(uid) = uid else { continue };
            let is_created = created_token == Some(*uid);

            if balance.output_amount > balance.input_amount {
                let minted = balance.output_amount - balance.input_amount;
                if !balance.can_mint && !is_created {
                    return Err(ValidationError::InputOutputMismatch(format!(
                        "minting {minted} of {uid} without mint authority"
                    )));
                }
                deposit += self.settings.token_deposit(minted);
            } else if balance.input_amount > balance.output_amount {
                let melted = balance.input_amount - balance.output_amount;
                if !balance.can_melt {
                    return Err(ValidationError::InputOutputMismatch(format!(
                        "melting {melted} of {uid} without melt authority"
                    )));
                }
                withdraw += self.settings.token_deposit(melted);
            }

            let grants_fresh_authorities = is_created;
            if (balance.wants_mint_authority && !balance.can_mint && !grants_fresh_authorities)
                || (balance.wants_melt_authority && !balance.can_melt && !grants_fresh_authorities)
            {
                return Err(ValidationError::InputOutputMismatch(format!(
                    "authority output for {uid} without matching authority input"
                )));
            }
        }

        let native = balances.remove(&None).unwrap_or_default();
        let available = native.input_amount.checked_add(withdraw).ok_or_else(|| {
            ValidationError::InputOutputMismatch("input overflow".to_string())
        })?;
        let needed = native.output_amount.checked_add(deposit).ok_or_else(|| {
            ValidationError::InputOutputMismatch("output overflow".to_string())
        })?;
        if available != needed {
            return Err(ValidationError::InputOutputMismatch(format!(
                "native inputs {} (+{withdraw} withdrawn) != outputs {} (+{deposit} deposited)",
                native.input_amount, native.output_amount
            )));
        }
        Ok(())
    }

    fn verify_weight(&self, vertex: &Vertex) -> Result<(), ValidationError> {
        let total_value: u64 = vertex
            .outputs
            .iter()
            .filter(|o| !o.is_authority())
            .map(|o| o.value)
            .sum();
        let required = self.settings.min_tx_weight_for(total_value);
        if vertex.weight + WEIGHT_EPSILON < required {
            return Err(ValidationError::WeightError {
                actual: vertex.weight,
                required,
            });
        }
        Ok(())
    }

    fn verify_block_weight(&self, vertex: &Vertex) -> Result<(), ValidationError> {
        if vertex.weight + WEIGHT_EPSILON < self.settings.min_block_weight {
            return Err(ValidationError::WeightError {
                actual: vertex.weight,
                required: self.settings.min_block_weight,
            });
        }
        Ok(())
    }

    fn verify_reward<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        vertex: &Vertex,
    ) -> Result<(), ValidationError> {
        let parent_meta = store.get_metadata(&vertex.parents[0])?;
        let height = parent_meta.height + 1;
        let subsidy = self.settings.subsidy(height);

        let mut total = 0u64;
        for output in &vertex.outputs {
            if output.token_data != 0 {
                return Err(ValidationError::InputOutputMismatch(
                    "block outputs carry only the native token".to_string(),
                ));
            }
            total = total.checked_add(output.value).ok_or_else(|| {
                ValidationError::InputOutputMismatch("output overflow".to_string())
            })?;
        }
        if total != subsidy {
            return Err(ValidationError::InputOutputMismatch(format!(
                "block reward {total} != subsidy {subsidy} at height {height}"
            )));
        }
        Ok(())
    }
}
