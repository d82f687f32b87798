//! Local prediction of block verification.
//!
//! Walks forward from the verified head and verifies every block whose canonical
//! transition has cleared its tier's cooldown, halting at the first block that has not.
//! Such verification stays provisional until the chain emits `BlockVerified` for it.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{TrackerError, TrackerResult},
    state::TrackerState,
    types::TransitionStatus,
};

/// A block finalized by [`VerificationEngine::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedTransition {
    pub block_id: u64,
    pub transition_id: u32,
    pub block_hash: B256,
    pub tier: u16,
}

pub type VerifiedBlocks = Vec<VerifiedTransition>;

/// A block verified locally that the chain has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedVerification {
    pub block_id: u64,
    pub transition_id: u32,
    /// Verified head hash before this block.
    pub parent_hash: B256,
    /// Status of the transition before it was marked verified.
    pub prior_status: TransitionStatus,
}

/// Why the walk stopped at a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    NotProved,
    Contested,
    BelowMinTier { tier: u16, min_tier: u16 },
    UnknownTier(u16),
    CoolingDown { until: u64 },
}

pub struct VerificationEngine<'a> {
    state: &'a mut TrackerState,
}

impl<'a> VerificationEngine<'a> {
    pub fn new(state: &'a mut TrackerState) -> Self {
        Self { state }
    }

    /// Verifies up to `max_blocks` consecutive blocks past the verified head.
    ///
    /// Does nothing while proving or the whole contract is paused.
    pub fn advance(&mut self, max_blocks: u64) -> TrackerResult<VerifiedBlocks> {
        let mut verified = VerifiedBlocks::new();
        if self.state.is_paused() {
            debug!("verification skipped while paused");
            return Ok(verified);
        }

        while (verified.len() as u64) < max_blocks {
            let block_id = self.state.last_verified_block_id() + 1;
            if block_id >= self.state.num_blocks() {
                break;
            }

            let next = match self.eligible(block_id)? {
                Ok(next) => next,
                Err(halt) => {
                    debug!(block_id, ?halt, "verification halted");
                    break;
                }
            };

            let prior_status = self
                .state
                .transitions
                .lookup_by_id(block_id, next.transition_id)
                .map_or(TransitionStatus::Proven, |ts| ts.status);
            self.state.ledger.mark_verified(block_id, next.transition_id)?;
            self.state.transitions.mark_verified(block_id, next.transition_id)?;
            self.state.predicted.push_back(PredictedVerification {
                block_id,
                transition_id: next.transition_id,
                parent_hash: self.state.chain.last_verified_block_hash,
                prior_status,
            });
            self.state.chain.last_verified_block_hash = next.block_hash;
            verified.push(next);
        }

        if let Some(last) = verified.last() {
            info!(
                count = verified.len(),
                last_verified_block_id = last.block_id,
                "verified blocks locally"
            );
        }
        Ok(verified)
    }

    fn eligible(&self, block_id: u64) -> TrackerResult<Result<VerifiedTransition, Halt>> {
        let state = &*self.state;
        let block = state.ledger.get_block(block_id).ok_or_else(|| {
            TrackerError::desync(format!("unverified block {block_id} missing from ledger"))
        })?;

        let parent_hash = state.chain.last_verified_block_hash;
        let Some(transition_id) = state.transitions.transition_id_of(block_id, parent_hash) else {
            return Ok(Err(Halt::NotProved));
        };
        let ts = state.transitions.lookup_by_id(block_id, transition_id).ok_or_else(|| {
            TrackerError::desync(format!("transition {transition_id} of block {block_id} not indexed"))
        })?;

        if ts.is_contested() {
            return Ok(Err(Halt::Contested));
        }
        if ts.tier < block.min_tier {
            return Ok(Err(Halt::BelowMinTier { tier: ts.tier, min_tier: block.min_tier }));
        }
        let Some(tier) = state.tiers.get(ts.tier) else {
            return Ok(Err(Halt::UnknownTier(ts.tier)));
        };

        // Cooldown restarts after an unpause.
        let since = ts.timestamp.max(state.chain.slot_b.last_unpaused_at);
        let until = since.saturating_add(tier.cooldown_secs());
        if until > state.chain.l1_timestamp {
            return Ok(Err(Halt::CoolingDown { until }));
        }

        Ok(Ok(VerifiedTransition {
            block_id,
            transition_id,
            block_hash: ts.block_hash,
            tier: ts.tier,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::RollupEvent,
        state::tests::{contested, genesis_state, positioned, proposed, proved, block_hash, T0},
    };

    fn ids(verified: &VerifiedBlocks) -> Vec<u64> {
        verified.iter().map(|v| v.block_id).collect()
    }

    fn proved_chain(n: u64) -> TrackerState {
        let mut state = genesis_state(32);
        for id in 1..=n {
            state.apply(&positioned(proposed(id), id, 0), T0).unwrap();
            state.apply(&positioned(proved(id, 1), id, 1), T0).unwrap();
        }
        state
    }

    #[test]
    fn contest_halts_verification_until_resolved() {
        let state = genesis_state(32);
        let mut batch = Vec::new();
        for id in 1..=5 {
            batch.push(positioned(proposed(id), 1, 2 * id));
            batch.push(positioned(proved(id, 1), 1, 2 * id + 1));
        }
        let (state, summary) = state.apply_batch(&batch, T0).unwrap();
        assert!(summary.verified.is_empty());

        let (state, summary) = state.apply_batch(&[positioned(contested(3), 2, 0)], T0 + 30).unwrap();
        assert!(summary.verified.is_empty());

        let (state, summary) = state.apply_batch(&[], T0 + 61).unwrap();
        assert_eq!(ids(&summary.verified), vec![1, 2]);
        assert_eq!(state.last_verified_block_id(), 2);

        let (state, summary) = state.apply_batch(&[], T0 + 10_000).unwrap();
        assert!(summary.verified.is_empty(), "contested block 3 must block the walk");
        assert!(!state.ledger.get_block(3).unwrap().is_verified());

        let resolved_at = T0 + 10_100;
        let (state, summary) = state.apply_batch(&[positioned(proved(3, 2), 4, 0)], resolved_at).unwrap();
        assert!(summary.verified.is_empty());
        assert_eq!(
            state.transitions.lookup_by_parent_hash(3, block_hash(2)).unwrap().status,
            TransitionStatus::ReProven
        );

        let (state, summary) = state.apply_batch(&[], resolved_at + 3_600).unwrap();
        assert_eq!(ids(&summary.verified), vec![3, 4, 5]);
        assert_eq!(state.last_verified_block_id(), 5);
        assert_eq!(state.chain.last_verified_block_hash, block_hash(5));

        for id in 1..=5 {
            let block = state.ledger.get_block(id).unwrap();
            assert!(block.is_verified());
            let ts = state.transitions.lookup_by_id(id, block.verified_transition_id).unwrap();
            assert_eq!(ts.status, TransitionStatus::Verified);
        }
    }

    #[test]
    fn head_never_regresses_and_marks_exactly_the_prefix() {
        let mut state = genesis_state(32);
        let mut head = state.last_verified_block_id();
        let mut next_id = 1;

        for round in 0..12u64 {
            let l1_block = round + 1;
            let mut batch = vec![positioned(proposed(next_id), l1_block, 0)];
            batch.push(positioned(proved(next_id, 1), l1_block, 1));
            if round % 4 == 1 {
                batch.push(positioned(contested(next_id), l1_block, 2));
            }
            if round % 4 == 3 {
                batch.push(positioned(proved(next_id - 2, 2), l1_block, 3));
            }
            next_id += 1;

            let (next, _) = state.apply_batch(&batch, T0 + round * 1_000).unwrap();
            state = next;

            let last = state.last_verified_block_id();
            assert!(last >= head, "head moved back from {head} to {last}");
            head = last;
            for block in state.ledger.iter() {
                assert_eq!(block.is_verified(), block.block_id <= last, "block {}", block.block_id);
            }
        }
        // Blocks 2, 6 and 10 each held the head until their re-proof cooled down.
        assert_eq!(head, 9);
    }

    #[test]
    fn local_verification_is_recorded_as_predicted() {
        let mut state = proved_chain(3);
        state.chain.l1_timestamp = T0 + 600;

        let verified = VerificationEngine::new(&mut state).advance(10).unwrap();
        assert_eq!(ids(&verified), vec![1, 2, 3]);
        assert_eq!(state.last_verified_block_id(), 3);
        assert_eq!(state.confirmed_block_id(), 0);
        assert_eq!(state.confirmed_block_hash(), block_hash(0));

        let predicted: Vec<_> = state.predicted.iter().map(|p| (p.block_id, p.parent_hash)).collect();
        assert_eq!(predicted, vec![(1, block_hash(0)), (2, block_hash(1)), (3, block_hash(2))]);
        assert!(state.predicted.iter().all(|p| p.prior_status == TransitionStatus::Proven));
    }

    #[test]
    fn paused_advance_is_a_no_op() {
        let mut state = proved_chain(3);
        state.chain.l1_timestamp = T0 + 600;
        state.chain.slot_b.proving_paused = true;
        let before = state.clone();

        let verified = VerificationEngine::new(&mut state).advance(10).unwrap();
        assert!(verified.is_empty());
        assert_eq!(state, before);

        state.chain.slot_b.proving_paused = false;
        state.chain.contract_paused = true;
        assert!(VerificationEngine::new(&mut state).advance(10).unwrap().is_empty());
    }

    #[test]
    fn advance_is_bounded() {
        let mut state = proved_chain(5);
        state.chain.l1_timestamp = T0 + 600;

        let verified = VerificationEngine::new(&mut state).advance(2).unwrap();
        assert_eq!(ids(&verified), vec![1, 2]);
        let verified = VerificationEngine::new(&mut state).advance(10).unwrap();
        assert_eq!(ids(&verified), vec![3, 4, 5]);
        assert!(VerificationEngine::new(&mut state).advance(10).unwrap().is_empty());
    }

    #[test]
    fn proof_below_min_tier_is_not_verified() {
        let mut state = proved_chain(2);
        state.chain.l1_timestamp = T0 + 600;
        state.ledger.get_block_mut(1).unwrap().min_tier = 2;

        assert!(VerificationEngine::new(&mut state).advance(10).unwrap().is_empty());

        state.apply(&positioned(proved(1, 2), 9, 0), T0 + 600).unwrap();
        state.chain.l1_timestamp = T0 + 600 + 3_600;
        assert_eq!(ids(&VerificationEngine::new(&mut state).advance(10).unwrap()), vec![1, 2]);
    }

    #[test]
    fn unknown_tier_halts() {
        let mut state = proved_chain(1);
        state.apply(&positioned(proved(1, 7), 9, 0), T0).unwrap();
        state.chain.l1_timestamp = T0 + 1_000_000;
        assert!(VerificationEngine::new(&mut state).advance(10).unwrap().is_empty());
    }

    #[test]
    fn cooldown_restarts_after_unpause() {
        let mut state = proved_chain(1);
        state.apply(&positioned(RollupEvent::ProvingPaused { paused: true }, 9, 0), T0 + 10).unwrap();
        state.apply(&positioned(RollupEvent::ProvingPaused { paused: false }, 10, 0), T0 + 100).unwrap();

        state.chain.l1_timestamp = T0 + 120;
        assert!(VerificationEngine::new(&mut state).advance(10).unwrap().is_empty());

        state.chain.l1_timestamp = T0 + 160;
        assert_eq!(ids(&VerificationEngine::new(&mut state).advance(10).unwrap()), vec![1]);
    }

    #[test]
    fn missing_block_inside_window_is_desync() {
        let mut state = proved_chain(1);
        state.chain.slot_b.num_blocks = 3;
        state.chain.l1_timestamp = T0 + 600;
        assert!(matches!(
            VerificationEngine::new(&mut state).advance(10),
            Err(TrackerError::Desync(_))
        ));
    }
}
