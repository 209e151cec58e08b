//! DAG consensus: accumulated weight, score, voiding, and reorgs.
//!
//! The engine is the only writer of vertex metadata. It never fails on
//! valid input; it only mutates metadata and reports what changed so
//! indices and observers can follow along.

use std::collections::BTreeSet;

use crate::types::VertexId;

pub mod engine;

pub use engine::ConsensusEngine;

/// Observable consensus state changes.
///
/// Reorgs surface as the two-phase voided-then-executed sequence:
/// observers must not assume finality beyond their own confirmation
/// depth.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// The vertex's `voided_by` set became empty.
    VertexExecuted(VertexId),
    /// The vertex's `voided_by` set became non-empty.
    VertexVoided(VertexId),
    /// A best-chain block now confirms the transaction.
    VertexConfirmed { tx: VertexId, block: VertexId },
    /// The block that confirmed the transaction left the best chain.
    ConfirmationReverted(VertexId),
    /// A new best-chain head was elected.
    BestChainUpdated { head: VertexId, height: u64 },
}

/// What one consensus step touched.
#[derive(Clone, Debug, Default)]
pub struct ConsensusUpdate {
    /// Every vertex whose metadata changed, the new vertex included.
    pub affected: BTreeSet<VertexId>,
    /// State transitions in the order they happened.
    pub events: Vec<Event>,
}
