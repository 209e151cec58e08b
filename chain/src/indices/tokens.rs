//! By-token index.
//!
//! Tracks, per token uid, its descriptive info and running totals of
//! minted and melted amounts. Only executed vertices contribute;
//! consensus flips apply or revert a vertex's contribution, so the
//! index always reflects the executed ledger state.

use std::collections::{BTreeMap, HashSet};

use crate::storage::{StorageError, VertexRecord, VertexStore};
use crate::types::vertex::VertexKind;
use crate::types::{TokenUid, VertexId};

/// Aggregate state of one token.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenEntry {
    pub name: String,
    pub symbol: String,
    pub minted: u64,
    pub melted: u64,
}

/// Index from token uid to its aggregate state.
#[derive(Default)]
pub struct TokenIndex {
    entries: BTreeMap<TokenUid, TokenEntry>,
    /// Vertices whose mint/melt deltas are currently applied.
    applied: HashSet<VertexId>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied.clear();
    }

    /// Looks up a token.
    pub fn get(&self, uid: &TokenUid) -> Option<&TokenEntry> {
        self.entries.get(uid)
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no token has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-token amount deltas of one vertex: positive mints, negative
    /// melts.
    fn deltas<S: VertexStore + ?Sized>(
        store: &S,
        record: &VertexRecord,
    ) -> Result<BTreeMap<TokenUid, i128>, StorageError> {
        let mut deltas: BTreeMap<TokenUid, i128> = BTreeMap::new();

        for output in &record.vertex.outputs {
            if output.is_authority() {
                continue;
            }
            if let Ok(Some(uid)) = record.vertex.output_token_uid(output) {
                *deltas.entry(uid).or_default() += output.value as i128;
            }
        }
        for input in &record.vertex.inputs {
            let spent = store.get_vertex(&input.tx_id)?;
            let Some(output) = spent.outputs.get(input.index as usize) else {
                continue;
            };
            if output.is_authority() {
                continue;
            }
            if let Ok(Some(uid)) = spent.output_token_uid(output) {
                *deltas.entry(uid).or_default() -= output.value as i128;
            }
        }
        Ok(deltas)
    }

    fn apply<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        record: &VertexRecord,
        revert: bool,
    ) -> Result<(), StorageError> {
        for (uid, delta) in Self::deltas(store, record)? {
            let entry = self.entries.entry(uid).or_default();
            if delta >= 0 {
                let amount = delta as u64;
                entry.minted = if revert {
                    entry.minted.saturating_sub(amount)
                } else {
                    entry.minted.saturating_add(amount)
                };
            } else {
                let amount = (-delta) as u64;
                entry.melted = if revert {
                    entry.melted.saturating_sub(amount)
                } else {
                    entry.melted.saturating_add(amount)
                };
            }
        }
        Ok(())
    }

    /// Registers a vertex, contributing its deltas if it is executed.
    pub fn add_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        record: &VertexRecord,
    ) -> Result<(), StorageError> {
        if let VertexKind::TokenCreation { info } = &record.vertex.kind {
            let uid = TokenUid(record.vertex.hash.0);
            let entry = self.entries.entry(uid).or_default();
            entry.name = info.name.clone();
            entry.symbol = info.symbol.clone();
        }
        self.update_vertex(store, record)
    }

    /// Applies or reverts a vertex's contribution to match its current
    /// executed state.
    pub fn update_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        record: &VertexRecord,
    ) -> Result<(), StorageError> {
        let id = record.vertex.hash;
        let executed = record.metadata.is_executed();
        if executed && !self.applied.contains(&id) {
            self.apply(store, record, false)?;
            self.applied.insert(id);
        } else if !executed && self.applied.contains(&id) {
            self.apply(store, record, true)?;
            self.applied.remove(&id);
        }
        Ok(())
    }
}
