//! By-address index.
//!
//! Maps every address recognized in a standard output script to the
//! vertices involving it, either as a receiver (outputs) or as a
//! spender (inputs resolve the spent output's script). Entries are
//! ordered by `(timestamp, hash)` for stable pagination.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::crypto::Address;
use crate::script::standard::parse_standard;
use crate::storage::{StorageError, VertexRecord, VertexStore};
use crate::types::VertexId;

/// Index from address to the vertices touching it.
pub struct AddressIndex {
    p2pkh_version_byte: u8,
    multisig_version_byte: u8,
    entries: BTreeMap<Address, BTreeSet<(u64, VertexId)>>,
}

impl AddressIndex {
    pub fn new(p2pkh_version_byte: u8, multisig_version_byte: u8) -> Self {
        Self {
            p2pkh_version_byte,
            multisig_version_byte,
            entries: BTreeMap::new(),
        }
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn script_address(&self, script: &[u8]) -> Option<Address> {
        parse_standard(script)
            .map(|s| s.address(self.p2pkh_version_byte, self.multisig_version_byte))
    }

    fn touch(&mut self, address: Address, timestamp: u64, id: VertexId) {
        self.entries
            .entry(address)
            .or_default()
            .insert((timestamp, id));
    }

    /// Registers a vertex: its outputs directly, its inputs through the
    /// scripts of the outputs they spend.
    pub fn add_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        record: &VertexRecord,
    ) -> Result<(), StorageError> {
        let id = record.vertex.hash;
        let ts = record.vertex.timestamp;

        for output in &record.vertex.outputs {
            if let Some(address) = self.script_address(&output.script) {
                self.touch(address, ts, id);
            }
        }
        for input in &record.vertex.inputs {
            let spent = store.get_vertex(&input.tx_id)?;
            if let Some(output) = spent.outputs.get(input.index as usize) {
                if let Some(address) = self.script_address(&output.script) {
                    self.touch(address, ts, id);
                }
            }
        }
        Ok(())
    }

    /// Full history of an address, oldest first.
    pub fn history(&self, address: &Address) -> Vec<VertexId> {
        self.entries
            .get(address)
            .map(|set| set.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default()
    }

    /// One page of history strictly after the cursor, oldest first.
    pub fn history_after(
        &self,
        address: &Address,
        cursor: (u64, VertexId),
        count: usize,
    ) -> Vec<VertexId> {
        self.entries
            .get(address)
            .map(|set| {
                set.range((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                ))
                .take(count)
                .map(|(_, id)| *id)
                .collect()
            })
            .unwrap_or_default()
    }

    /// Number of addresses currently indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no address has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::standard::P2pkh;
    use crate::storage::MemoryVertexStore;
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxInput, TxOutput, Vertex, VertexMetadata};

    fn address(byte: u8) -> Address {
        Address::from_pubkey(0x28, &[byte; 33])
    }

    fn pay_to(addr: &Address, timestamp: u64, inputs: Vec<TxInput>) -> Vertex {
        let mut v = Vertex {
            hash: VertexId(Hash256::ZERO),
            nonce: 0,
            timestamp,
            weight: 2.0,
            parents: Vec::new(),
            inputs,
            outputs: vec![TxOutput::new(
                10,
                P2pkh::create_output_script(addr, None),
            )],
            tokens: Vec::new(),
            kind: VertexKind::Transaction,
        };
        v.update_hash();
        v
    }

    #[test]
    fn outputs_index_the_receiver() {
        let store = MemoryVertexStore::new();
        let mut index = AddressIndex::new(0x28, 0x64);
        let addr = address(1);
        let v = pay_to(&addr, 100, Vec::new());

        index
            .add_vertex(
                &store,
                &VertexRecord {
                    metadata: VertexMetadata::new(2.0),
                    vertex: v.clone(),
                },
            )
            .unwrap();

        assert_eq!(index.history(&addr), vec![v.hash]);
        assert!(index.history(&address(2)).is_empty());
    }

    #[test]
    fn inputs_index_the_spender_through_the_spent_script() {
        let mut store = MemoryVertexStore::new();
        let mut index = AddressIndex::new(0x28, 0x64);
        let addr = address(1);

        let funding = pay_to(&addr, 100, Vec::new());
        store
            .put(funding.clone(), VertexMetadata::new(2.0))
            .unwrap();

        let other = address(3);
        let spend = {
            let mut v = pay_to(&other, 200, vec![TxInput::new(funding.hash, 0, Vec::new())]);
            v.update_hash();
            v
        };

        index
            .add_vertex(
                &store,
                &VertexRecord {
                    metadata: VertexMetadata::new(2.0),
                    vertex: spend.clone(),
                },
            )
            .unwrap();

        // The spender shows up under the funding address too.
        assert_eq!(index.history(&addr), vec![spend.hash]);
        assert_eq!(index.history(&other), vec![spend.hash]);
    }

    #[test]
    fn history_pagination() {
        let store = MemoryVertexStore::new();
        let mut index = AddressIndex::new(0x28, 0x64);
        let addr = address(1);

        let mut ids = Vec::new();
        for i in 0..4 {
            let v = pay_to(&addr, 100 + i, Vec::new());
            ids.push((v.timestamp, v.hash));
            index
                .add_vertex(
                    &store,
                    &VertexRecord {
                        metadata: VertexMetadata::new(2.0),
                        vertex: v,
                    },
                )
                .unwrap();
        }

        let all = index.history(&addr);
        assert_eq!(all.len(), 4);

        let page = index.history_after(&addr, ids[1], 2);
        assert_eq!(page, vec![ids[2].1, ids[3].1]);
    }
}
