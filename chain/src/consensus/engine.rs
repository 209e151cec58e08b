//! The consensus engine.
//!
//! The engine consumes vertices that already passed validation and were
//! persisted, and maintains every piece of consensus metadata: children
//! linkage, spent outputs, conflicts and twins, accumulated weight,
//! block height and score, voided sets, confirmations, and the best
//! chain. Two mechanisms resolve double-spends:
//!
//! - among unconfirmed transactions, the spender with strictly greatest
//!   accumulated weight wins; ties void every party;
//! - a block whose past cone contains a voided transaction can flip it
//!   to executed, but only by out-scoring the current best chain.
//!
//! Reorgs void every block that fell off the best chain (by its own
//! hash), revert the confirmations those blocks granted, and replay
//! confirmations along the new chain.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};

use tracing::{debug, info};

use crate::genesis::Genesis;
use crate::storage::{StorageError, VertexStore};
use crate::traversal::{BfsWalk, EdgeSet};
use crate::types::{sum_weights, Vertex, VertexId};

use super::{ConsensusUpdate, Event};

/// Two vertices are twins when they differ only by parent order (the
/// nonce is free to differ, since a reordered vertex re-mines).
fn is_twin(a: &Vertex, b: &Vertex) -> bool {
    if a.parents == b.parents {
        return false;
    }
    let mut ap = a.parents.clone();
    let mut bp = b.parents.clone();
    ap.sort();
    bp.sort();
    ap == bp
        && a.version() == b.version()
        && a.timestamp == b.timestamp
        && a.weight == b.weight
        && a.inputs == b.inputs
        && a.outputs == b.outputs
        && a.tokens == b.tokens
}

/// Consensus state over a vertex store.
pub struct ConsensusEngine<S: VertexStore> {
    store: S,
    best_head: VertexId,
    genesis_block: VertexId,
}

impl<S: VertexStore> ConsensusEngine<S> {
    /// Wraps a store, electing the best head among the blocks already
    /// present (the genesis block on a fresh store).
    pub fn new(store: S, genesis: &Genesis) -> Result<Self, StorageError> {
        let mut engine = Self {
            store,
            best_head: genesis.block.hash,
            genesis_block: genesis.block.hash,
        };
        if let Some(best) = engine.scan_best_block() {
            engine.best_head = best;
        }
        Ok(engine)
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store, for tooling and tests.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The current best-chain head.
    pub fn best_head(&self) -> VertexId {
        self.best_head
    }

    /// Best-chain blocks as `(timestamp, weight)`, newest first, capped
    /// at `limit`. This is the history view the DAA consumes.
    pub fn best_chain_blocks(&self, limit: usize) -> Result<Vec<(u64, f64)>, StorageError> {
        let mut out = Vec::new();
        let mut cursor = self.best_head;
        while out.len() < limit {
            let vertex = self.store.get_vertex(&cursor)?;
            out.push((vertex.timestamp, vertex.weight));
            if cursor == self.genesis_block {
                break;
            }
            cursor = vertex.parents[0];
        }
        Ok(out)
    }

    /// Processes a newly persisted vertex. Consensus cannot fail on
    /// valid input; only storage errors propagate.
    pub fn on_new_vertex(&mut self, id: &VertexId) -> Result<ConsensusUpdate, StorageError> {
        let record = self.store.get(id)?;
        let mut up = ConsensusUpdate::default();
        up.affected.insert(*id);

        // Children linkage: keep the inverse of `parents` consistent.
        for parent in &record.vertex.parents {
            let mut meta = self.store.get_metadata(parent)?;
            if meta.children.insert(*id) {
                self.store.save_metadata(parent, &meta)?;
                up.affected.insert(*parent);
            }
        }

        // Accumulated weight: every verification ancestor gains this
        // vertex's weight. Conflict sets met on the way are collected
        // for re-resolution on transaction arrivals.
        let ancestors: Vec<VertexId> = BfsWalk::new(EdgeSet::verifications(), false)
            .run(&self.store, id, true)
            .map(|r| r.vertex.hash)
            .collect();
        let mut conflict_sets: Vec<BTreeSet<VertexId>> = Vec::new();
        for ancestor in ancestors {
            let mut meta = self.store.get_metadata(&ancestor)?;
            meta.accumulated_weight = sum_weights(meta.accumulated_weight, record.vertex.weight);
            if !meta.conflict_with.is_empty() {
                let mut set = meta.conflict_with.clone();
                set.insert(ancestor);
                conflict_sets.push(set);
            }
            self.store.save_metadata(&ancestor, &meta)?;
            up.affected.insert(ancestor);
        }

        if record.vertex.is_block() {
            self.on_new_block(&record.vertex, &mut up)?;
        } else {
            self.on_new_transaction(&record.vertex, conflict_sets, &mut up)?;
        }

        // A conflict flip may have voided the head itself.
        if !self.store.get_metadata(&self.best_head)?.is_executed() {
            self.reelect_best_chain(&mut up)?;
        }

        Ok(up)
    }

    fn on_new_transaction(
        &mut self,
        vertex: &Vertex,
        mut conflict_sets: Vec<BTreeSet<VertexId>>,
        up: &mut ConsensusUpdate,
    ) -> Result<(), StorageError> {
        let id = vertex.hash;

        // Record this tx as a spender of each consumed output and find
        // everyone else spending the same outputs.
        let mut own_conflicts: BTreeSet<VertexId> = BTreeSet::new();
        for input in &vertex.inputs {
            let mut meta = self.store.get_metadata(&input.tx_id)?;
            let others = meta.record_spender(input.index, id);
            self.store.save_metadata(&input.tx_id, &meta)?;
            up.affected.insert(input.tx_id);
            own_conflicts.extend(others);
        }

        if !own_conflicts.is_empty() {
            debug!(tx = %id, conflicts = own_conflicts.len(), "double spend detected");
            let mut my = self.store.get_metadata(&id)?;
            for other in &own_conflicts {
                let other_vertex = self.store.get_vertex(other)?;
                let mut other_meta = self.store.get_metadata(other)?;
                other_meta.conflict_with.insert(id);
                if is_twin(vertex, &other_vertex) {
                    other_meta.twins.insert(id);
                    my.twins.insert(*other);
                }
                self.store.save_metadata(other, &other_meta)?;
                up.affected.insert(*other);
                my.conflict_with.insert(*other);
            }
            self.store.save_metadata(&id, &my)?;
            let mut set = own_conflicts;
            set.insert(id);
            conflict_sets.push(set);
        }

        // Resolve by accumulated weight.
        let mut roots: BTreeSet<VertexId> = BTreeSet::new();
        roots.insert(id);
        for set in conflict_sets {
            roots.extend(self.resolve_conflict_by_weight(&set, up)?);
        }
        self.recompute_voided_down(roots.into_iter().collect(), up)?;
        Ok(())
    }

    fn on_new_block(&mut self, vertex: &Vertex, up: &mut ConsensusUpdate) -> Result<(), StorageError> {
        let id = vertex.hash;

        // Height and score.
        let parent_meta = self.store.get_metadata(&vertex.parents[0])?;
        let mut my = self.store.get_metadata(&id)?;
        my.height = parent_meta.height + 1;
        my.score = self.compute_score(&id)?;
        debug_assert!(
            my.score >= parent_meta.score,
            "score must be non-decreasing along block parents"
        );
        let score = my.score;
        self.store.save_metadata(&id, &my)?;

        // Survey the past cone for conflict losers.
        let cone: Vec<VertexId> = BfsWalk::new(EdgeSet::verifications(), false)
            .run(&self.store, &id, true)
            .map(|r| r.vertex.hash)
            .collect();
        let cone_set: HashSet<VertexId> = cone.iter().copied().collect();

        let mut cone_losers: Vec<VertexId> = Vec::new();
        let mut unresolvable = false;
        for member in &cone {
            let meta = self.store.get_metadata(member)?;
            if meta.conflict_with.iter().any(|rival| cone_set.contains(rival)) {
                // The block confirms both sides of a double spend; no
                // chain weight can ever execute it.
                unresolvable = true;
            }
            if meta.voided_by.contains(member) {
                cone_losers.push(*member);
            }
        }

        let best_score = self.store.get_metadata(&self.best_head)?.score;

        if !unresolvable && !cone_losers.is_empty() && score > best_score {
            // The new chain out-weighs the best chain: the losers this
            // block confirms win their conflicts after all.
            let mut roots: BTreeSet<VertexId> = BTreeSet::new();
            roots.insert(id);
            for loser in &cone_losers {
                let mut meta = self.store.get_metadata(loser)?;
                meta.voided_by.remove(loser);
                self.store.save_metadata(loser, &meta)?;
                up.affected.insert(*loser);
                up.events.push(Event::VertexExecuted(*loser));
                roots.insert(*loser);
                debug!(tx = %loser, block = %id, "conflict flipped by heavier chain");

                for rival in meta.conflict_with.clone() {
                    let mut rival_meta = self.store.get_metadata(&rival)?;
                    let was_executed = rival_meta.is_executed();
                    rival_meta.voided_by.insert(rival);
                    if !rival_meta.is_executed() && rival_meta.first_block.is_some() {
                        rival_meta.first_block = None;
                        up.events.push(Event::ConfirmationReverted(rival));
                    }
                    self.store.save_metadata(&rival, &rival_meta)?;
                    up.affected.insert(rival);
                    if was_executed {
                        up.events.push(Event::VertexVoided(rival));
                    }
                    roots.insert(rival);
                }
            }
            self.recompute_voided_down(roots.into_iter().collect(), up)?;
        } else {
            // Derive the block's own inherited void state.
            self.recompute_voided_down(vec![id], up)?;
        }

        let my = self.store.get_metadata(&id)?;
        if my.is_executed() && my.score > best_score {
            self.reorg_to(id, up)?;
        } else if my.is_executed() {
            // A clean side block is off the best chain: voided by
            // itself until a reorg brings its chain back.
            let mut my = my;
            my.voided_by.insert(id);
            self.store.save_metadata(&id, &my)?;
            up.affected.insert(id);
            up.events.push(Event::VertexVoided(id));
        }
        Ok(())
    }

    /// Elects the winner of one conflict set by accumulated weight:
    /// strictly greatest wins, ties void everyone, and a candidate
    /// voided by anything besides itself cannot win.
    fn resolve_conflict_by_weight(
        &mut self,
        candidates: &BTreeSet<VertexId>,
        up: &mut ConsensusUpdate,
    ) -> Result<Vec<VertexId>, StorageError> {
        let mut metas = Vec::with_capacity(candidates.len());
        for c in candidates {
            metas.push((*c, self.store.get_metadata(c)?));
        }

        let max_acc = metas
            .iter()
            .map(|(_, m)| m.accumulated_weight)
            .fold(f64::NEG_INFINITY, f64::max);
        let at_max: Vec<VertexId> = metas
            .iter()
            .filter(|(_, m)| m.accumulated_weight == max_acc)
            .map(|(c, _)| *c)
            .collect();

        let winner = match at_max.as_slice() {
            [single] => {
                let meta = &metas.iter().find(|(c, _)| c == single).expect("present").1;
                meta.voided_by
                    .iter()
                    .all(|v| v == single)
                    .then_some(*single)
            }
            _ => None,
        };

        let mut changed = Vec::new();
        for (c, mut meta) in metas {
            let marked = meta.voided_by.contains(&c);
            if winner == Some(c) && marked {
                meta.voided_by.remove(&c);
                if meta.is_executed() {
                    up.events.push(Event::VertexExecuted(c));
                }
                self.store.save_metadata(&c, &meta)?;
                up.affected.insert(c);
                changed.push(c);
            } else if winner != Some(c) && !marked {
                let was_executed = meta.is_executed();
                meta.voided_by.insert(c);
                if meta.first_block.is_some() {
                    meta.first_block = None;
                    up.events.push(Event::ConfirmationReverted(c));
                }
                self.store.save_metadata(&c, &meta)?;
                up.affected.insert(c);
                if was_executed {
                    up.events.push(Event::VertexVoided(c));
                }
                changed.push(c);
            }
        }
        Ok(changed)
    }

    /// Recomputes `voided_by` downward from the given roots through
    /// both edge sets, in timestamp order so predecessors settle first.
    ///
    /// A vertex's derived set is its own conflict marker plus the union
    /// of its predecessors' sets; a block parent contributes everything
    /// except its off-chain self-marker, which never flows downward.
    fn recompute_voided_down(
        &mut self,
        roots: Vec<VertexId>,
        up: &mut ConsensusUpdate,
    ) -> Result<(), StorageError> {
        let root_set: HashSet<VertexId> = roots.iter().copied().collect();
        let mut heap: BinaryHeap<(Reverse<u64>, VertexId)> = BinaryHeap::new();
        let mut seen: HashSet<VertexId> = HashSet::new();
        for root in roots {
            if seen.insert(root) {
                let ts = self.store.get_vertex(&root)?.timestamp;
                heap.push((Reverse(ts), root));
            }
        }

        while let Some((_, vid)) = heap.pop() {
            let record = self.store.get(&vid)?;

            let mut new_voided: BTreeSet<VertexId> = BTreeSet::new();
            if record.metadata.voided_by.contains(&vid) {
                new_voided.insert(vid);
            }
            for parent in &record.vertex.parents {
                let parent_record = self.store.get(parent)?;
                for v in &parent_record.metadata.voided_by {
                    if parent_record.vertex.is_block() && v == parent {
                        continue;
                    }
                    new_voided.insert(*v);
                }
            }
            for input in &record.vertex.inputs {
                new_voided.extend(self.store.get_metadata(&input.tx_id)?.voided_by.iter());
            }

            let changed = new_voided != record.metadata.voided_by;
            if changed {
                let was_executed = record.metadata.is_executed();
                let mut meta = record.metadata.clone();
                meta.voided_by = new_voided;
                let now_executed = meta.is_executed();
                if !now_executed && meta.first_block.is_some() {
                    meta.first_block = None;
                    up.events.push(Event::ConfirmationReverted(vid));
                }
                self.store.save_metadata(&vid, &meta)?;
                up.affected.insert(vid);
                if was_executed && !now_executed {
                    up.events.push(Event::VertexVoided(vid));
                } else if !was_executed && now_executed {
                    up.events.push(Event::VertexExecuted(vid));
                }
            }

            // Descendants only need revisiting below a change.
            if changed || root_set.contains(&vid) {
                let mut next: Vec<VertexId> = record.metadata.children.iter().copied().collect();
                for spenders in record.metadata.spent_outputs.values() {
                    next.extend(spenders.iter().copied());
                }
                for n in next {
                    if seen.insert(n) {
                        let ts = self.store.get_vertex(&n)?.timestamp;
                        heap.push((Reverse(ts), n));
                    }
                }
            }
        }
        Ok(())
    }

    /// Log-space sum of the weights of the whole past cone, the block
    /// score. Non-decreasing along a chain of block parents because a
    /// child's cone is a superset of its parent's.
    fn compute_score(&self, id: &VertexId) -> Result<f64, StorageError> {
        let mut score = f64::NEG_INFINITY;
        for record in BfsWalk::new(EdgeSet::verifications(), false).run(&self.store, id, false) {
            score = sum_weights(score, record.vertex.weight);
        }
        Ok(score)
    }

    /// Switches the best chain to `new_head`, voiding the blocks that
    /// fell off and replaying confirmations along the new chain.
    fn reorg_to(&mut self, new_head: VertexId, up: &mut ConsensusUpdate) -> Result<(), StorageError> {
        let old_head = self.best_head;

        let mut new_chain = Vec::new();
        let mut cursor = new_head;
        loop {
            new_chain.push(cursor);
            if cursor == self.genesis_block {
                break;
            }
            cursor = self.store.get_vertex(&cursor)?.parents[0];
        }
        let new_set: HashSet<VertexId> = new_chain.iter().copied().collect();

        let mut old_suffix = Vec::new();
        let mut cursor = old_head;
        while !new_set.contains(&cursor) {
            old_suffix.push(cursor);
            cursor = self.store.get_vertex(&cursor)?.parents[0];
        }
        let fork = cursor;

        for block in &old_suffix {
            let mut meta = self.store.get_metadata(block)?;
            let was_executed = meta.is_executed();
            if meta.voided_by.insert(*block) {
                self.store.save_metadata(block, &meta)?;
                up.affected.insert(*block);
                if was_executed {
                    up.events.push(Event::VertexVoided(*block));
                }
            }
            self.revert_confirmations(*block, up)?;
        }

        let mut new_suffix: Vec<VertexId> = new_chain
            .iter()
            .take_while(|b| **b != fork)
            .copied()
            .collect();
        new_suffix.reverse();
        for block in &new_suffix {
            let mut meta = self.store.get_metadata(block)?;
            if meta.voided_by.remove(block) {
                let now_executed = meta.is_executed();
                self.store.save_metadata(block, &meta)?;
                up.affected.insert(*block);
                if now_executed {
                    up.events.push(Event::VertexExecuted(*block));
                }
            }
            self.assign_first_block(*block, up)?;
        }

        self.best_head = new_head;
        let height = self.store.get_metadata(&new_head)?.height;
        info!(head = %new_head, height, reorged = old_suffix.len(), "best chain updated");
        up.events.push(Event::BestChainUpdated {
            head: new_head,
            height,
        });
        Ok(())
    }

    /// Clears `first_block` for every transaction this block confirmed.
    fn revert_confirmations(
        &mut self,
        block: VertexId,
        up: &mut ConsensusUpdate,
    ) -> Result<(), StorageError> {
        let mut stack = self.store.get_vertex(&block)?.parents;
        let mut seen: HashSet<VertexId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let record = self.store.get(&id)?;
            if record.vertex.is_block() {
                continue;
            }
            match record.metadata.first_block {
                Some(fb) if fb == block => {
                    let mut meta = record.metadata.clone();
                    meta.first_block = None;
                    self.store.save_metadata(&id, &meta)?;
                    up.affected.insert(id);
                    up.events.push(Event::ConfirmationReverted(id));
                    stack.extend(record.vertex.parents);
                }
                // Unconfirmed (e.g. voided) txs still bridge to older
                // parts of the cone this block confirmed.
                None => stack.extend(record.vertex.parents),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Marks this best-chain block as the first block of every executed,
    /// still-unconfirmed transaction in its past cone.
    fn assign_first_block(
        &mut self,
        block: VertexId,
        up: &mut ConsensusUpdate,
    ) -> Result<(), StorageError> {
        let mut stack = self.store.get_vertex(&block)?.parents;
        let mut seen: HashSet<VertexId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let record = self.store.get(&id)?;
            if record.vertex.is_block() || record.metadata.first_block.is_some() {
                continue;
            }
            if record.metadata.is_executed() {
                let mut meta = record.metadata.clone();
                meta.first_block = Some(block);
                self.store.save_metadata(&id, &meta)?;
                up.affected.insert(id);
                up.events.push(Event::VertexConfirmed { tx: id, block });
            }
            stack.extend(record.vertex.parents);
        }
        Ok(())
    }

    fn scan_best_block(&self) -> Option<VertexId> {
        self.store
            .iter_all()
            .filter(|r| r.vertex.is_block() && r.metadata.is_executed())
            .map(|r| (r.metadata.score, r.vertex.hash))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    /// Picks the heaviest executed block as head after the previous
    /// head was voided by a conflict.
    fn reelect_best_chain(&mut self, up: &mut ConsensusUpdate) -> Result<(), StorageError> {
        if let Some(best) = self.scan_best_block() {
            if best != self.best_head {
                self.reorg_to(best, up)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::consensus::Event;
    use crate::genesis::{build_genesis, genesis_records, Genesis};
    use crate::storage::{MemoryVertexStore, VertexStore};
    use crate::types::vertex::VertexKind;
    use crate::types::{Hash256, TxInput, TxOutput, VertexMetadata};

    struct Fixture {
        engine: ConsensusEngine<MemoryVertexStore>,
        genesis: Genesis,
        settings: Settings,
    }

    fn fixture() -> Fixture {
        let settings = Settings::unittests();
        let genesis = build_genesis(&settings).expect("genesis");
        let store = MemoryVertexStore::with_genesis(genesis_records(&genesis));
        let engine = ConsensusEngine::new(store, &genesis).expect("engine");
        Fixture {
            engine,
            genesis,
            settings,
        }
    }

    impl Fixture {
        /// Persists a vertex with fresh metadata and runs consensus.
        fn ingest(&mut self, vertex: &Vertex) -> ConsensusUpdate {
            self.engine
                .store_mut()
                .put(vertex.clone(), VertexMetadata::new(vertex.weight))
                .expect("put");
            self.engine.on_new_vertex(&vertex.hash).expect("consensus")
        }

        fn meta(&self, id: &VertexId) -> VertexMetadata {
            self.engine.store().get_metadata(id).expect("metadata")
        }

        fn tx(
            &self,
            parents: [VertexId; 2],
            inputs: Vec<TxInput>,
            timestamp: u64,
            weight: f64,
        ) -> Vertex {
            let mut v = Vertex {
                hash: VertexId(Hash256::ZERO),
                nonce: 0,
                timestamp,
                weight,
                parents: parents.to_vec(),
                inputs,
                outputs: vec![TxOutput::new(1, Vec::new())],
                tokens: Vec::new(),
                kind: VertexKind::Transaction,
            };
            v.update_hash();
            v
        }

        fn block(
            &self,
            block_parent: VertexId,
            tx_parents: [VertexId; 2],
            timestamp: u64,
            weight: f64,
        ) -> Vertex {
            let mut v = Vertex {
                hash: VertexId(Hash256::ZERO),
                nonce: 0,
                timestamp,
                weight,
                parents: vec![block_parent, tx_parents[0], tx_parents[1]],
                inputs: Vec::new(),
                outputs: vec![TxOutput::new(self.settings.subsidy(1), Vec::new())],
                tokens: Vec::new(),
                kind: VertexKind::Block {
                    data: Vec::new(),
                    aux_pow: None,
                },
            };
            v.update_hash();
            v
        }

        fn ts(&self, offset: u64) -> u64 {
            self.genesis.tx2.timestamp + offset
        }
    }

    fn spend_genesis(f: &Fixture, timestamp: u64, weight: f64) -> Vertex {
        f.tx(
            [f.genesis.tx1.hash, f.genesis.tx2.hash],
            vec![TxInput::new(f.genesis.block.hash, 0, Vec::new())],
            timestamp,
            weight,
        )
    }

    #[test]
    fn simple_spend_is_executed_and_recorded() {
        let mut f = fixture();
        let t = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t);

        let meta = f.meta(&t.hash);
        assert!(meta.is_executed());
        assert!(meta.first_block.is_none());

        let genesis_meta = f.meta(&f.genesis.block.hash);
        assert_eq!(
            genesis_meta.spent_outputs[&0],
            std::collections::BTreeSet::from([t.hash])
        );

        // Children linkage holds for both parents.
        for parent in &t.parents {
            assert!(f.meta(parent).children.contains(&t.hash));
        }
    }

    #[test]
    fn accumulated_weight_reaches_all_ancestors() {
        let mut f = fixture();
        let t1 = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t1);
        let base = f.meta(&t1.hash).accumulated_weight;

        let t2 = f.tx([t1.hash, f.genesis.tx1.hash], Vec::new(), f.ts(20), 2.0);
        f.ingest(&t2);

        let expected = sum_weights(base, 2.0);
        assert!((f.meta(&t1.hash).accumulated_weight - expected).abs() < 1e-12);
        // Grandparents gain it too.
        let gtx1 = f.meta(&f.genesis.tx1.hash);
        assert!(gtx1.accumulated_weight > 2.0);
    }

    #[test]
    fn double_spend_tie_voids_both() {
        let mut f = fixture();
        let t1 = spend_genesis(&f, f.ts(10), 2.0);
        let t2 = spend_genesis(&f, f.ts(11), 2.0);
        f.ingest(&t1);
        f.ingest(&t2);

        let m1 = f.meta(&t1.hash);
        let m2 = f.meta(&t2.hash);
        assert_eq!(m1.conflict_with, std::collections::BTreeSet::from([t2.hash]));
        assert_eq!(m2.conflict_with, std::collections::BTreeSet::from([t1.hash]));
        assert_eq!(m1.voided_by, std::collections::BTreeSet::from([t1.hash]));
        assert_eq!(m2.voided_by, std::collections::BTreeSet::from([t2.hash]));

        // Both spenders stay recorded on the spent output.
        let genesis_meta = f.meta(&f.genesis.block.hash);
        assert_eq!(genesis_meta.spent_outputs[&0].len(), 2);
    }

    #[test]
    fn heavier_first_spender_stays_executed() {
        let mut f = fixture();
        let t1 = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t1);
        // A descendant boosts t1's accumulated weight.
        let child = f.tx([t1.hash, f.genesis.tx1.hash], Vec::new(), f.ts(20), 2.0);
        f.ingest(&child);

        let t2 = spend_genesis(&f, f.ts(30), 2.0);
        let up = f.ingest(&t2);

        assert!(f.meta(&t1.hash).is_executed());
        assert_eq!(
            f.meta(&t2.hash).voided_by,
            std::collections::BTreeSet::from([t2.hash])
        );
        assert!(up.events.contains(&Event::VertexVoided(t2.hash)));
    }

    #[test]
    fn descendants_of_a_voided_tx_are_voided() {
        let mut f = fixture();
        let t1 = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t1);
        let child = f.tx([t1.hash, f.genesis.tx1.hash], Vec::new(), f.ts(20), 2.0);
        f.ingest(&child);

        let t2 = spend_genesis(&f, f.ts(30), 2.0);
        f.ingest(&t2);
        // Build on the loser: the child inherits the void.
        let on_loser = f.tx([t2.hash, f.genesis.tx1.hash], Vec::new(), f.ts(40), 2.0);
        f.ingest(&on_loser);

        let meta = f.meta(&on_loser.hash);
        assert!(!meta.is_executed());
        assert!(meta.voided_by.contains(&t2.hash));
    }

    #[test]
    fn twins_are_recorded_both_ways() {
        let mut f = fixture();
        let t = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t);

        let mut twin = t.clone();
        twin.parents.reverse();
        twin.nonce = 1;
        twin.update_hash();
        assert_ne!(t.hash, twin.hash);
        f.ingest(&twin);

        assert_eq!(
            f.meta(&t.hash).twins,
            std::collections::BTreeSet::from([twin.hash])
        );
        assert_eq!(
            f.meta(&twin.hash).twins,
            std::collections::BTreeSet::from([t.hash])
        );
        // Twins double-spend by construction, and tie.
        assert!(!f.meta(&t.hash).is_executed());
        assert!(!f.meta(&twin.hash).is_executed());
    }

    #[test]
    fn block_confirms_transactions_and_extends_best_chain() {
        let mut f = fixture();
        let t = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t);

        let b = f.block(f.genesis.block.hash, [t.hash, f.genesis.tx1.hash], f.ts(20), 2.0);
        let up = f.ingest(&b);

        assert_eq!(f.engine.best_head(), b.hash);
        let block_meta = f.meta(&b.hash);
        assert_eq!(block_meta.height, 1);
        assert!(block_meta.is_executed());
        assert!(block_meta.score > f.meta(&f.genesis.block.hash).score);

        assert_eq!(f.meta(&t.hash).first_block, Some(b.hash));
        assert!(up.events.contains(&Event::VertexConfirmed {
            tx: t.hash,
            block: b.hash
        }));
        assert!(up.events.iter().any(|e| matches!(
            e,
            Event::BestChainUpdated { head, .. } if *head == b.hash
        )));
    }

    #[test]
    fn score_is_non_decreasing_along_the_best_chain() {
        let mut f = fixture();
        let mut parent = f.genesis.block.hash;
        let mut last_score = f.meta(&parent).score;
        for i in 0..5 {
            let b = f.block(
                parent,
                [f.genesis.tx1.hash, f.genesis.tx2.hash],
                f.ts(10 + i * 10),
                2.0,
            );
            f.ingest(&b);
            let score = f.meta(&b.hash).score;
            assert!(score >= last_score);
            last_score = score;
            parent = b.hash;
        }
        assert_eq!(f.engine.best_head(), parent);
    }

    /// A heavy block confirming the losing side of a double spend
    /// flips it to executed and reorgs the chain.
    #[test]
    fn revert_block_high_weight() {
        let mut f = fixture();

        // A short best chain.
        let b1 = f.block(
            f.genesis.block.hash,
            [f.genesis.tx1.hash, f.genesis.tx2.hash],
            f.ts(10),
            2.0,
        );
        f.ingest(&b1);
        let b2 = f.block(b1.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(20), 2.0);
        f.ingest(&b2);

        // A tied double spend: both voided.
        let t1 = spend_genesis(&f, f.ts(30), 2.0);
        let t2 = spend_genesis(&f, f.ts(31), 2.0);
        f.ingest(&t1);
        f.ingest(&t2);
        assert!(!f.meta(&t1.hash).is_executed());
        assert!(!f.meta(&t2.hash).is_executed());

        // Blocks that will later fall off the best chain.
        let b3 = f.block(b2.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(40), 2.0);
        f.ingest(&b3);
        let b4 = f.block(b3.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(50), 2.0);
        f.ingest(&b4);
        assert_eq!(f.engine.best_head(), b4.hash);

        // A heavy block on b2 confirming t2.
        let heavy = f.block(b2.hash, [t2.hash, t2.parents[0]], f.ts(60), 10.0);
        let up = f.ingest(&heavy);

        assert_eq!(f.engine.best_head(), heavy.hash);
        assert!(f.meta(&t2.hash).is_executed());
        assert_eq!(f.meta(&t2.hash).first_block, Some(heavy.hash));
        assert_eq!(
            f.meta(&t1.hash).voided_by,
            std::collections::BTreeSet::from([t1.hash])
        );

        // The displaced blocks are voided by their own hashes.
        for old in [&b3, &b4] {
            assert_eq!(
                f.meta(&old.hash).voided_by,
                std::collections::BTreeSet::from([old.hash]),
            );
        }

        // Observers saw the two-phase transition.
        assert!(up.events.contains(&Event::VertexExecuted(t2.hash)));
        assert!(up.events.contains(&Event::VertexVoided(b3.hash)));
        assert!(up.events.iter().any(|e| matches!(
            e,
            Event::BestChainUpdated { head, .. } if *head == heavy.hash
        )));
    }

    /// A low-weight block cannot flip the conflict; it inherits the
    /// void instead.
    #[test]
    fn dont_revert_block_low_weight() {
        let mut f = fixture();

        let b1 = f.block(
            f.genesis.block.hash,
            [f.genesis.tx1.hash, f.genesis.tx2.hash],
            f.ts(10),
            2.0,
        );
        f.ingest(&b1);
        let b2 = f.block(b1.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(20), 2.0);
        f.ingest(&b2);

        let t1 = spend_genesis(&f, f.ts(30), 2.0);
        let t2 = spend_genesis(&f, f.ts(31), 2.0);
        f.ingest(&t1);
        f.ingest(&t2);

        let b3 = f.block(b2.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(40), 2.0);
        f.ingest(&b3);
        let b4 = f.block(b3.hash, [f.genesis.tx1.hash, f.genesis.tx2.hash], f.ts(50), 2.0);
        f.ingest(&b4);

        // A light block on b1 confirming t2: its chain cannot compete.
        let light = f.block(b1.hash, [t2.hash, t2.parents[0]], f.ts(60), 2.0);
        f.ingest(&light);

        assert_eq!(f.engine.best_head(), b4.hash);
        assert!(!f.meta(&t1.hash).is_executed());
        assert!(!f.meta(&t2.hash).is_executed());
        assert_eq!(
            f.meta(&light.hash).voided_by,
            std::collections::BTreeSet::from([t2.hash])
        );
        assert!(f.meta(&t2.hash).first_block.is_none());
    }

    /// A block confirming both sides of a double spend can never be
    /// executed, no matter its weight.
    #[test]
    fn block_verifying_both_conflicts_stays_voided() {
        let mut f = fixture();
        let b1 = f.block(
            f.genesis.block.hash,
            [f.genesis.tx1.hash, f.genesis.tx2.hash],
            f.ts(10),
            2.0,
        );
        f.ingest(&b1);

        let t1 = spend_genesis(&f, f.ts(20), 2.0);
        let t2 = spend_genesis(&f, f.ts(21), 2.0);
        f.ingest(&t1);
        f.ingest(&t2);

        let greedy = f.block(b1.hash, [t1.hash, t2.hash], f.ts(30), 10.0);
        f.ingest(&greedy);

        assert_ne!(f.engine.best_head(), greedy.hash);
        let meta = f.meta(&greedy.hash);
        assert!(!meta.is_executed());
        assert!(!f.meta(&t1.hash).is_executed());
        assert!(!f.meta(&t2.hash).is_executed());
    }

    #[test]
    fn reorg_reverts_confirmations_of_displaced_blocks() {
        let mut f = fixture();
        let t = spend_genesis(&f, f.ts(10), 2.0);
        f.ingest(&t);

        // t is confirmed by a block that will lose the chain.
        let loser = f.block(f.genesis.block.hash, [t.hash, f.genesis.tx1.hash], f.ts(20), 2.0);
        f.ingest(&loser);
        assert_eq!(f.meta(&t.hash).first_block, Some(loser.hash));

        // A heavier competing block confirming the same tx.
        let winner = f.block(
            f.genesis.block.hash,
            [t.hash, f.genesis.tx2.hash],
            f.ts(30),
            5.0,
        );
        let up = f.ingest(&winner);

        assert_eq!(f.engine.best_head(), winner.hash);
        assert_eq!(f.meta(&t.hash).first_block, Some(winner.hash));
        assert!(up.events.contains(&Event::ConfirmationReverted(t.hash)));
        assert!(up.events.contains(&Event::VertexConfirmed {
            tx: t.hash,
            block: winner.hash
        }));
        assert_eq!(
            f.meta(&loser.hash).voided_by,
            std::collections::BTreeSet::from([loser.hash])
        );
    }

    #[test]
    fn best_chain_blocks_feed_the_daa_newest_first() {
        let mut f = fixture();
        let mut parent = f.genesis.block.hash;
        for i in 0..3 {
            let b = f.block(
                parent,
                [f.genesis.tx1.hash, f.genesis.tx2.hash],
                f.ts(10 + i * 10),
                2.0,
            );
            f.ingest(&b);
            parent = b.hash;
        }

        let history = f.engine.best_chain_blocks(10).expect("history");
        assert_eq!(history.len(), 4); // three blocks + genesis
        assert!(history.windows(2).all(|w| w[0].0 > w[1].0));

        let capped = f.engine.best_chain_blocks(2).expect("history");
        assert_eq!(capped.len(), 2);
    }
}
