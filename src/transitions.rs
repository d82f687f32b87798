//! Per-block transition storage with lookup by parent hash and by transition id.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, B256, U256};
use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{TrackerError, TrackerResult},
    types::{transition_key, Proof, TransitionState, TransitionStatus},
};

/// What a proof did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofOutcome {
    /// First proof for this parent hash.
    Inserted,
    /// Replaced an uncontested proof at an equal or higher tier.
    Replaced,
    /// A higher tier proof settled an open contest.
    Resolved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct BlockTransitions {
    by_parent: HashMap<B256, u32>,
    by_id: BTreeMap<u32, TransitionState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStore {
    blocks: OrdMap<u64, BlockTransitions>,
}

impl TransitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a proof for `(block_id, parent_hash)` under `transition_id`.
    pub fn record_proof(
        &mut self,
        block_id: u64,
        parent_hash: B256,
        transition_id: u32,
        proof: Proof,
        timestamp: u64,
    ) -> TrackerResult<ProofOutcome> {
        let block = self.block_mut(block_id);

        let outcome = match block.by_parent.get(&parent_hash).and_then(|tid| block.by_id.get(tid)) {
            None => ProofOutcome::Inserted,
            Some(existing) => match existing.status {
                TransitionStatus::Verified => {
                    return Err(TrackerError::desync(format!(
                        "proof for already verified transition of block {block_id}"
                    )));
                }
                TransitionStatus::Contested if proof.tier <= existing.tier => {
                    return Err(TrackerError::TierRegression {
                        block_id,
                        existing: existing.tier,
                        incoming: proof.tier,
                    });
                }
                TransitionStatus::Contested => ProofOutcome::Resolved,
                _ if proof.tier < existing.tier => {
                    return Err(TrackerError::TierRegression {
                        block_id,
                        existing: existing.tier,
                        incoming: proof.tier,
                    });
                }
                _ => ProofOutcome::Replaced,
            },
        };

        let transition_id = match block.by_parent.get(&parent_hash) {
            Some(tid) if *tid != transition_id => {
                return Err(TrackerError::desync(format!(
                    "block {block_id} parent {parent_hash} already has transition id {tid}, got {transition_id}"
                )));
            }
            _ => transition_id,
        };

        let status = match outcome {
            ProofOutcome::Resolved => TransitionStatus::ReProven,
            _ => TransitionStatus::Proven,
        };
        let state = TransitionState {
            key: transition_key(block_id, parent_hash),
            parent_hash,
            block_hash: proof.block_hash,
            state_root: proof.state_root,
            prover: proof.prover,
            validity_bond: proof.validity_bond,
            contester: Address::ZERO,
            contest_bond: U256::ZERO,
            timestamp,
            tier: proof.tier,
            status,
        };

        block.by_parent.insert(parent_hash, transition_id);
        block.by_id.insert(transition_id, state);
        Ok(outcome)
    }

    fn block_mut(&mut self, block_id: u64) -> &mut BlockTransitions {
        self.blocks.entry(block_id).or_insert_with(BlockTransitions::default)
    }

    /// Inserts a transition read back from contract storage.
    pub fn restore(&mut self, block_id: u64, transition_id: u32, state: TransitionState) {
        let block = self.block_mut(block_id);
        block.by_parent.insert(state.parent_hash, transition_id);
        block.by_id.insert(transition_id, state);
    }

    /// Marks the proved transition of `(block_id, parent_hash)` as contested.
    pub fn record_contest(
        &mut self,
        block_id: u64,
        parent_hash: B256,
        contester: Address,
        contest_bond: U256,
    ) -> TrackerResult<()> {
        let state = self
            .blocks
            .get_mut(&block_id)
            .and_then(|b| {
                let tid = *b.by_parent.get(&parent_hash)?;
                b.by_id.get_mut(&tid)
            })
            .filter(|ts| matches!(ts.status, TransitionStatus::Proven | TransitionStatus::ReProven))
            .ok_or(TrackerError::NoSuchTransition { block_id, parent_hash })?;

        state.contester = contester;
        state.contest_bond = contest_bond;
        state.status = TransitionStatus::Contested;
        Ok(())
    }

    pub fn lookup_by_parent_hash(&self, block_id: u64, parent_hash: B256) -> Option<&TransitionState> {
        let block = self.blocks.get(&block_id)?;
        block.by_parent.get(&parent_hash).and_then(|tid| block.by_id.get(tid))
    }

    pub fn lookup_by_id(&self, block_id: u64, transition_id: u32) -> Option<&TransitionState> {
        self.blocks.get(&block_id)?.by_id.get(&transition_id)
    }

    pub fn transition_id_of(&self, block_id: u64, parent_hash: B256) -> Option<u32> {
        self.blocks.get(&block_id)?.by_parent.get(&parent_hash).copied()
    }

    /// Finalizes a transition; it is immutable afterwards.
    pub fn mark_verified(&mut self, block_id: u64, transition_id: u32) -> TrackerResult<()> {
        let state = self
            .blocks
            .get_mut(&block_id)
            .and_then(|b| b.by_id.get_mut(&transition_id))
            .ok_or_else(|| {
                TrackerError::desync(format!(
                    "transition {transition_id} of block {block_id} missing at verification"
                ))
            })?;
        state.status = TransitionStatus::Verified;
        Ok(())
    }

    /// Puts a locally verified transition back to `status` after its predicted
    /// verification was rolled back.
    pub fn revert_verified(
        &mut self,
        block_id: u64,
        transition_id: u32,
        status: TransitionStatus,
    ) -> TrackerResult<()> {
        let state = self
            .blocks
            .get_mut(&block_id)
            .and_then(|b| b.by_id.get_mut(&transition_id))
            .filter(|ts| ts.status == TransitionStatus::Verified)
            .ok_or_else(|| {
                TrackerError::desync(format!(
                    "transition {transition_id} of block {block_id} is not verified"
                ))
            })?;
        state.status = status;
        Ok(())
    }

    /// Drops every transition of a block whose ledger slot was recycled.
    pub fn evict_block(&mut self, block_id: u64) {
        self.blocks.remove(&block_id);
    }

    /// Open contests as `(block_id, transition)` in block order.
    pub fn contested(&self) -> impl Iterator<Item = (u64, &TransitionState)> {
        self.blocks.iter().flat_map(|(id, block)| {
            block.by_id.values().filter(|ts| ts.is_contested()).map(move |ts| (*id, ts))
        })
    }

    pub fn transition_count(&self, block_id: u64) -> usize {
        self.blocks.get(&block_id).map_or(0, |b| b.by_id.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(tier: u16, hash: u8) -> Proof {
        Proof {
            block_hash: B256::repeat_byte(hash),
            state_root: B256::repeat_byte(hash.wrapping_add(1)),
            prover: Address::with_last_byte(0xb0 + tier as u8),
            validity_bond: U256::from(tier) * U256::from(100),
            tier,
        }
    }

    const PARENT: B256 = B256::repeat_byte(0x0a);

    #[test]
    fn dual_lookup_returns_same_transition() {
        let mut store = TransitionStore::new();
        assert_eq!(store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap(), ProofOutcome::Inserted);

        let by_parent = store.lookup_by_parent_hash(5, PARENT).unwrap();
        let by_id = store.lookup_by_id(5, 1).unwrap();
        assert_eq!(by_parent, by_id);
        assert_eq!(by_parent.key, transition_key(5, PARENT));
        assert_eq!(by_parent.status, TransitionStatus::Proven);
        assert!(store.lookup_by_id(5, 2).is_none());
    }

    #[test]
    fn rejects_tier_regression() {
        let mut store = TransitionStore::new();
        store.record_proof(5, PARENT, 1, proof(2, 0x55), 10).unwrap();

        let err = store.record_proof(5, PARENT, 1, proof(1, 0x56), 20).unwrap_err();
        assert!(matches!(err, TrackerError::TierRegression { existing: 2, incoming: 1, .. }));

        assert_eq!(store.record_proof(5, PARENT, 1, proof(2, 0x57), 30).unwrap(), ProofOutcome::Replaced);
        assert_eq!(store.lookup_by_id(5, 1).unwrap().block_hash, B256::repeat_byte(0x57));
    }

    #[test]
    fn contest_requires_higher_tier_reproof() {
        let mut store = TransitionStore::new();
        store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap();
        store.record_contest(5, PARENT, Address::with_last_byte(0xcc), U256::from(500)).unwrap();

        let contested = store.lookup_by_parent_hash(5, PARENT).unwrap();
        assert_eq!(contested.status, TransitionStatus::Contested);
        assert_eq!(store.contested().count(), 1);

        assert!(matches!(
            store.record_proof(5, PARENT, 1, proof(1, 0x56), 20),
            Err(TrackerError::TierRegression { .. })
        ));

        assert_eq!(store.record_proof(5, PARENT, 1, proof(2, 0x56), 20).unwrap(), ProofOutcome::Resolved);
        let reproven = store.lookup_by_parent_hash(5, PARENT).unwrap();
        assert_eq!(reproven.status, TransitionStatus::ReProven);
        assert_eq!(reproven.contester, Address::ZERO);
        assert_eq!(reproven.timestamp, 20);
        assert_eq!(store.contested().count(), 0);
    }

    #[test]
    fn contest_needs_uncontested_proof() {
        let mut store = TransitionStore::new();
        let contester = Address::with_last_byte(0xcc);
        assert!(matches!(
            store.record_contest(5, PARENT, contester, U256::from(1)),
            Err(TrackerError::NoSuchTransition { block_id: 5, .. })
        ));

        store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap();
        store.record_contest(5, PARENT, contester, U256::from(1)).unwrap();
        assert!(matches!(
            store.record_contest(5, PARENT, contester, U256::from(1)),
            Err(TrackerError::NoSuchTransition { .. })
        ));
    }

    #[test]
    fn verified_transition_is_immutable() {
        let mut store = TransitionStore::new();
        store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap();
        store.mark_verified(5, 1).unwrap();

        assert!(matches!(
            store.record_proof(5, PARENT, 1, proof(3, 0x56), 20),
            Err(TrackerError::Desync(_))
        ));
        assert!(matches!(
            store.record_contest(5, PARENT, Address::with_last_byte(1), U256::from(1)),
            Err(TrackerError::NoSuchTransition { .. })
        ));
    }

    #[test]
    fn reverted_transition_accepts_proofs_again() {
        let mut store = TransitionStore::new();
        store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap();
        let before = store.clone();
        store.mark_verified(5, 1).unwrap();
        assert_eq!(before.lookup_by_id(5, 1).unwrap().status, TransitionStatus::Proven);

        store.revert_verified(5, 1, TransitionStatus::Proven).unwrap();
        assert!(matches!(
            store.revert_verified(5, 1, TransitionStatus::Proven),
            Err(TrackerError::Desync(_))
        ));
        assert_eq!(store.record_proof(5, PARENT, 1, proof(2, 0x56), 20).unwrap(), ProofOutcome::Replaced);
    }

    #[test]
    fn eviction_drops_both_indexes() {
        let mut store = TransitionStore::new();
        store.record_proof(5, PARENT, 1, proof(1, 0x55), 10).unwrap();
        store.record_proof(5, B256::repeat_byte(0x0b), 2, proof(1, 0x66), 10).unwrap();
        assert_eq!(store.transition_count(5), 2);

        store.evict_block(5);
        assert!(store.lookup_by_parent_hash(5, PARENT).is_none());
        assert!(store.lookup_by_id(5, 2).is_none());
    }
}
