//! The tracker's in-memory mirror of the rollup contract and how events mutate it.

use std::collections::{BTreeSet, VecDeque};

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    bonds::BondLedger,
    error::{TrackerError, TrackerResult},
    events::{ContestedTransition, DecodedEvent, ProposedBlock, RollupEvent, VerifiedBlock},
    ledger::RingBufferLedger,
    transitions::{ProofOutcome, TransitionStore},
    types::{BlockRecord, Proof, SlotA, SlotB, TierPolicy, TransitionState},
    verifier::{PredictedVerification, VerificationEngine, VerifiedBlocks},
};

/// Chain level state variables plus what the tracker derives from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub slot_a: SlotA,
    /// As last reported by the chain. `last_verified_block_id` here is the confirmed
    /// head, which may trail the locally predicted one.
    pub slot_b: SlotB,
    /// Whole-contract pause, distinct from the proving pause.
    pub contract_paused: bool,
    /// Latest L1 block timestamp applied.
    pub l1_timestamp: u64,
    /// Block hash of the last locally verified block; parent of the next canonical
    /// transition.
    pub last_verified_block_hash: B256,
}

/// Everything the tracker knows, published to readers as an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub chain: ChainState,
    pub ledger: RingBufferLedger,
    pub transitions: TransitionStore,
    pub bonds: BondLedger,
    pub tiers: TierPolicy,
    pub max_blocks_to_verify: u64,
    /// Locally verified blocks past the confirmed head, oldest first.
    pub predicted: VecDeque<PredictedVerification>,
}

/// Counters of what one batch changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub verified: VerifiedBlocks,
}

impl TrackerState {
    /// Empty state anchored at a verified head.
    pub fn new(
        ring_buffer_size: u64,
        max_blocks_to_verify: u64,
        tiers: TierPolicy,
        head: BlockRecord,
        head_hash: B256,
    ) -> TrackerResult<Self> {
        let mut ledger = RingBufferLedger::new(ring_buffer_size, head.block_id);
        let head_id = head.block_id;
        ledger.upsert_block(head)?;

        Ok(Self {
            chain: ChainState {
                slot_b: SlotB {
                    num_blocks: head_id + 1,
                    last_verified_block_id: head_id,
                    ..Default::default()
                },
                last_verified_block_hash: head_hash,
                ..Default::default()
            },
            ledger,
            transitions: TransitionStore::new(),
            bonds: BondLedger::new(),
            tiers,
            max_blocks_to_verify,
            predicted: VecDeque::new(),
        })
    }

    /// Head of the locally verified chain, predictions included.
    pub fn last_verified_block_id(&self) -> u64 {
        self.ledger.last_verified_block_id()
    }

    /// Last block the chain itself has verified.
    pub fn confirmed_block_id(&self) -> u64 {
        self.chain.slot_b.last_verified_block_id
    }

    pub fn confirmed_block_hash(&self) -> B256 {
        self.predicted.front().map_or(self.chain.last_verified_block_hash, |p| p.parent_hash)
    }

    /// Accounts touched by bond events in `events` whose balance is not loaded.
    pub fn unknown_bond_accounts(&self, events: &[DecodedEvent]) -> BTreeSet<Address> {
        events
            .iter()
            .filter_map(|event| match event.event {
                RollupEvent::BondCredited { user, .. } | RollupEvent::BondDebited { user, .. } => {
                    Some(user)
                }
                _ => None,
            })
            .filter(|user| !self.bonds.is_known(*user))
            .collect()
    }

    pub fn num_blocks(&self) -> u64 {
        self.chain.slot_b.num_blocks
    }

    pub fn is_paused(&self) -> bool {
        self.chain.slot_b.proving_paused || self.chain.contract_paused
    }

    /// Transition of `block_id` that extends the canonical chain, if proved.
    pub fn canonical_candidate(&self, block_id: u64) -> Option<&TransitionState> {
        if block_id != self.last_verified_block_id() + 1 {
            return None;
        }
        self.transitions.lookup_by_parent_hash(block_id, self.chain.last_verified_block_hash)
    }

    /// Applies one L1 block worth of events, then advances verification. Works on a
    /// copy so a failure leaves `self` untouched.
    pub fn apply_batch(
        &self,
        events: &[DecodedEvent],
        l1_timestamp: u64,
    ) -> TrackerResult<(Self, BatchSummary)> {
        self.apply_batch_seeded(&[], events, l1_timestamp)
    }

    /// Like [`Self::apply_batch`], first loading `balances` read from the chain as of
    /// the end of the previous L1 block.
    pub fn apply_batch_seeded(
        &self,
        balances: &[(Address, U256)],
        events: &[DecodedEvent],
        l1_timestamp: u64,
    ) -> TrackerResult<(Self, BatchSummary)> {
        let mut next = self.clone();
        for (user, balance) in balances {
            next.bonds.seed(*user, *balance);
        }
        next.chain.l1_timestamp = next.chain.l1_timestamp.max(l1_timestamp);

        let mut summary = BatchSummary::default();
        for event in events {
            next.apply(event, l1_timestamp)?;
            summary.applied += 1;
        }
        summary.verified = VerificationEngine::new(&mut next).advance(self.max_blocks_to_verify)?;

        Ok((next, summary))
    }

    /// Applies a single event.
    pub fn apply(&mut self, event: &DecodedEvent, l1_timestamp: u64) -> TrackerResult<()> {
        let timestamp = event.l1_timestamp.unwrap_or(l1_timestamp);
        debug!(event = event.event.name(), l1_block = event.l1_block, "applying event");

        match &event.event {
            RollupEvent::BlockProposed(block) => self.on_block_proposed(block),
            RollupEvent::TransitionProved { block_id, parent_hash, proof } => {
                self.on_transition_proved(*block_id, *parent_hash, proof.clone(), timestamp)
            }
            RollupEvent::TransitionContested(contest) => self.on_transition_contested(contest),
            RollupEvent::BlockVerified(verified) => self.on_block_verified(verified, timestamp),
            RollupEvent::StateVariablesUpdated(slot_b) => self.on_state_variables_updated(*slot_b),
            RollupEvent::BondCredited { user, amount } => {
                self.bonds.credit(*user, *amount);
                Ok(())
            }
            RollupEvent::BondDebited { user, amount } => self.bonds.debit(*user, *amount),
            RollupEvent::ProvingPaused { paused } => {
                self.set_proving_paused(*paused, timestamp);
                Ok(())
            }
            RollupEvent::Paused { account } => {
                self.set_contract_paused(true, *account, timestamp);
                Ok(())
            }
            RollupEvent::Unpaused { account } => {
                self.set_contract_paused(false, *account, timestamp);
                Ok(())
            }
        }
    }

    fn on_block_proposed(&mut self, block: &ProposedBlock) -> TrackerResult<()> {
        let meta_hash = block.meta.hash();
        let expected = self.num_blocks();

        if block.block_id < expected {
            return match self.ledger.get_block(block.block_id) {
                Some(existing) if existing.meta_hash == meta_hash => {
                    debug!(block_id = block.block_id, "ignoring re-delivered proposal");
                    Ok(())
                }
                _ => Err(TrackerError::desync(format!(
                    "proposal of block {} conflicts with stored block (expected id {expected})",
                    block.block_id
                ))),
            };
        }
        if block.block_id > expected {
            return Err(TrackerError::desync(format!(
                "proposal of block {} skips expected id {expected}",
                block.block_id
            )));
        }

        let record = BlockRecord {
            block_id: block.block_id,
            meta_hash,
            assigned_prover: block.assigned_prover,
            liveness_bond: block.liveness_bond,
            proposed_at: block.proposed_at,
            proposed_in: block.proposed_in,
            next_transition_id: 1,
            liveness_bond_returned: false,
            verified_transition_id: 0,
            min_tier: block.min_tier,
        };
        if let Some(evicted) = self.ledger.upsert_block(record)? {
            self.transitions.evict_block(evicted.block_id);
        }
        self.chain.slot_b.num_blocks = block.block_id + 1;

        info!(block_id = block.block_id, %meta_hash, min_tier = block.min_tier, "block proposed");
        Ok(())
    }

    fn on_transition_proved(
        &mut self,
        block_id: u64,
        parent_hash: B256,
        proof: Proof,
        timestamp: u64,
    ) -> TrackerResult<()> {
        if self.chain.slot_b.proving_paused {
            return Err(TrackerError::desync(format!(
                "transition for block {block_id} proved while proving is paused"
            )));
        }

        let existing = self.transitions.transition_id_of(block_id, parent_hash);
        self.unwind_prediction(block_id, existing)?;

        let block = self.ledger.get_block(block_id).ok_or_else(|| {
            TrackerError::desync(format!("proof for block {block_id} outside the retained window"))
        })?;
        if block.is_verified() && block_id <= self.confirmed_block_id() {
            return Err(TrackerError::desync(format!("proof for verified block {block_id}")));
        }

        let (transition_id, allocated) = match existing {
            Some(tid) => (tid, false),
            None => (block.next_transition_id, true),
        };

        let tier = proof.tier;
        let outcome =
            self.transitions.record_proof(block_id, parent_hash, transition_id, proof, timestamp)?;
        if allocated {
            if let Some(block) = self.ledger.get_block_mut(block_id) {
                block.next_transition_id += 1;
            }
        }

        match outcome {
            ProofOutcome::Resolved => {
                info!(block_id, transition_id, tier, "contest resolved by higher tier proof")
            }
            _ => info!(block_id, transition_id, tier, ?outcome, "transition proved"),
        }
        Ok(())
    }

    fn on_transition_contested(&mut self, contest: &ContestedTransition) -> TrackerResult<()> {
        let existing = self.transitions.transition_id_of(contest.block_id, contest.parent_hash);
        self.unwind_prediction(contest.block_id, existing)?;
        self.transitions.record_contest(
            contest.block_id,
            contest.parent_hash,
            contest.contester,
            contest.contest_bond,
        )?;
        warn!(
            block_id = contest.block_id,
            contester = %contest.contester,
            tier = contest.tier,
            "transition contested"
        );
        Ok(())
    }

    fn on_block_verified(&mut self, verified: &VerifiedBlock, timestamp: u64) -> TrackerResult<()> {
        let confirmed = self.confirmed_block_id();
        let block_id = verified.block_id;

        if block_id <= confirmed {
            let matches = match self.verified_hash(block_id) {
                Some(hash) => hash == verified.block_hash,
                None => block_id != confirmed || self.confirmed_block_hash() == verified.block_hash,
            };
            if !matches {
                return Err(TrackerError::desync(format!(
                    "chain verified block {block_id} with hash {} that differs from local state",
                    verified.block_hash
                )));
            }
        } else {
            if block_id <= self.last_verified_block_id()
                && self.verified_hash(block_id) != Some(verified.block_hash)
            {
                self.rollback_from(block_id)?;
            }

            let head = self.last_verified_block_id();
            if block_id == head + 1 {
                let parent = self.chain.last_verified_block_hash;
                let transition_id = self
                    .transitions
                    .transition_id_of(block_id, parent)
                    .filter(|tid| {
                        self.transitions
                            .lookup_by_id(block_id, *tid)
                            .is_some_and(|ts| ts.block_hash == verified.block_hash)
                    })
                    .ok_or_else(|| {
                        TrackerError::desync(format!(
                            "chain verified block {block_id} without a matching local transition"
                        ))
                    })?;

                self.ledger.mark_verified(block_id, transition_id)?;
                self.transitions.mark_verified(block_id, transition_id)?;
                self.chain.last_verified_block_hash = verified.block_hash;
            } else if block_id > head + 1 {
                return Err(TrackerError::desync(format!(
                    "chain verified block {block_id} ahead of local head {head}"
                )));
            }
            self.confirm_through(block_id);
            info!(block_id, prover = %verified.prover, tier = verified.tier, "block verified on chain");
        }

        if let Some(state_root) = verified.state_root.filter(|root| !root.is_zero()) {
            if block_id > self.chain.slot_a.last_synced_block_id {
                self.chain.slot_a.last_synced_block_id = block_id;
                self.chain.slot_a.last_synced_at = timestamp;
                debug!(block_id, %state_root, "state root synced");
            }
        }
        Ok(())
    }

    fn on_state_variables_updated(&mut self, slot_b: SlotB) -> TrackerResult<()> {
        let current = self.chain.slot_b;
        if slot_b.num_blocks < current.num_blocks {
            return Err(TrackerError::desync(format!(
                "numBlocks regressed from {} to {}",
                current.num_blocks, slot_b.num_blocks
            )));
        }
        if slot_b.last_verified_block_id > self.last_verified_block_id() {
            return Err(TrackerError::desync(format!(
                "chain reports block {} verified, local head is {}",
                slot_b.last_verified_block_id,
                self.last_verified_block_id()
            )));
        }
        if slot_b.num_blocks != current.num_blocks {
            return Err(TrackerError::desync(format!(
                "chain reports {} blocks, tracked {}",
                slot_b.num_blocks, current.num_blocks
            )));
        }

        self.chain.slot_b = SlotB {
            last_verified_block_id: current.last_verified_block_id,
            ..slot_b
        };
        self.confirm_through(slot_b.last_verified_block_id);
        Ok(())
    }

    /// Hash of the transition `block_id` was verified with, locally or on chain.
    fn verified_hash(&self, block_id: u64) -> Option<B256> {
        let block = self.ledger.get_block(block_id).filter(|b| b.is_verified())?;
        self.transitions.lookup_by_id(block_id, block.verified_transition_id).map(|ts| ts.block_hash)
    }

    /// Rolls back a predicted verification of `block_id` if a proof or contest now
    /// targets the transition it was verified with. The chain still accepts both until
    /// it runs its own verification.
    fn unwind_prediction(&mut self, block_id: u64, transition_id: Option<u32>) -> TrackerResult<()> {
        if block_id <= self.confirmed_block_id() || block_id > self.last_verified_block_id() {
            return Ok(());
        }
        let verified_with = self.ledger.get_block(block_id).map(|b| b.verified_transition_id);
        if transition_id.is_some() && transition_id == verified_with {
            self.rollback_from(block_id)?;
        }
        Ok(())
    }

    /// Undoes predicted verification of `block_id` and every block after it.
    fn rollback_from(&mut self, block_id: u64) -> TrackerResult<()> {
        let head = self.last_verified_block_id();
        while let Some(predicted) = self.predicted.pop_back() {
            if predicted.block_id < block_id {
                self.predicted.push_back(predicted);
                break;
            }
            self.ledger.unmark_verified(predicted.block_id)?;
            self.transitions.revert_verified(
                predicted.block_id,
                predicted.transition_id,
                predicted.prior_status,
            )?;
            self.chain.last_verified_block_hash = predicted.parent_hash;
        }

        if self.last_verified_block_id() >= block_id {
            return Err(TrackerError::desync(format!(
                "block {block_id} is verified without a prediction to roll back"
            )));
        }
        warn!(block_id, from = head, to = self.last_verified_block_id(), "rolled back predicted verification");
        Ok(())
    }

    /// Moves the confirmed head to `block_id`, dropping predictions it covers.
    fn confirm_through(&mut self, block_id: u64) {
        while self.predicted.front().is_some_and(|p| p.block_id <= block_id) {
            self.predicted.pop_front();
        }
        let slot_b = &mut self.chain.slot_b;
        slot_b.last_verified_block_id = slot_b.last_verified_block_id.max(block_id);
    }

    fn set_proving_paused(&mut self, paused: bool, timestamp: u64) {
        let slot_b = &mut self.chain.slot_b;
        if slot_b.proving_paused && !paused {
            slot_b.last_unpaused_at = timestamp;
        }
        slot_b.proving_paused = paused;
        warn!(paused, "proving pause toggled");
    }

    fn set_contract_paused(&mut self, paused: bool, account: Address, timestamp: u64) {
        if self.chain.contract_paused && !paused {
            self.chain.slot_b.last_unpaused_at = timestamp;
        }
        self.chain.contract_paused = paused;
        warn!(paused, %account, "contract pause toggled");
    }
}
