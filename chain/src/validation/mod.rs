//! Vertex validity checks.
//!
//! The validator runs every stateless and storage-contextual check a
//! vertex must pass before it is persisted: structure, proof of work,
//! parent linkage, input resolution, script execution, token sums, the
//! dynamic weight minimum, and block rewards. Validation errors
//! short-circuit and leave storage untouched; consensus only ever sees
//! vertices that passed.

use crate::storage::{StorageError, VertexStore};
use crate::types::Vertex;

pub mod vertex;

pub use vertex::{ValidationError, VertexValidator};

/// Sets a vertex timestamp consistent with its dependencies.
///
/// The timestamp becomes `max(now, latest dependency + 1)`, where the
/// dependencies are every parent and every spent transaction.
pub fn update_timestamp<S: VertexStore + ?Sized>(
    vertex: &mut Vertex,
    store: &S,
    now: u64,
) -> Result<(), StorageError> {
    let mut floor = 0u64;
    for parent in &vertex.parents {
        floor = floor.max(store.get_vertex(parent)?.timestamp);
    }
    for input in &vertex.inputs {
        floor = floor.max(store.get_vertex(&input.tx_id)?.timestamp);
    }
    vertex.timestamp = now.max(floor + 1);
    Ok(())
}
