//! Domain types mirrored from the rollup contract's storage layout.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::contract::{TaikoL1, TierProvider};

/// A proposed block as stored in the ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_id: u64,
    pub meta_hash: B256,
    pub assigned_prover: Address,
    pub liveness_bond: U256,
    /// L1 timestamp at proposal.
    pub proposed_at: u64,
    /// L1 height at proposal.
    pub proposed_in: u64,
    /// Next transition id to allocate. Transition ids start at 1.
    pub next_transition_id: u32,
    pub liveness_bond_returned: bool,
    /// Zero while the block is unverified.
    pub verified_transition_id: u32,
    /// Lowest tier a transition must carry before this block can be verified.
    pub min_tier: u16,
}

impl BlockRecord {
    pub fn is_verified(&self) -> bool {
        self.verified_transition_id != 0
    }
}

impl From<TaikoL1::BlockV2> for BlockRecord {
    fn from(blk: TaikoL1::BlockV2) -> Self {
        Self {
            block_id: blk.blockId,
            meta_hash: blk.metaHash,
            assigned_prover: blk.assignedProver,
            liveness_bond: U256::from(blk.livenessBond),
            proposed_at: blk.proposedAt,
            proposed_in: blk.proposedIn,
            next_transition_id: blk.nextTransitionId.to::<u32>(),
            liveness_bond_returned: blk.livenessBondReturned,
            verified_transition_id: blk.verifiedTransitionId.to::<u32>(),
            // The contract only accepts proofs at or above the minimum tier, so records
            // rebuilt from storage do not need to re-check it.
            min_tier: 0,
        }
    }
}

/// Lifecycle of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionStatus {
    Proven,
    Contested,
    ReProven,
    Verified,
}

/// A proved transition of a block from a given parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionState {
    pub key: B256,
    pub parent_hash: B256,
    pub block_hash: B256,
    pub state_root: B256,
    pub prover: Address,
    pub validity_bond: U256,
    /// `Address::ZERO` when not contested.
    pub contester: Address,
    pub contest_bond: U256,
    /// L1 timestamp of the latest proof; the cooldown window starts here.
    pub timestamp: u64,
    pub tier: u16,
    pub status: TransitionStatus,
}

impl TransitionState {
    pub fn is_contested(&self) -> bool {
        self.status == TransitionStatus::Contested
    }

    /// Rebuilds a transition read from contract storage. The key is derived the same
    /// way as for replayed proofs.
    pub fn from_chain(block_id: u64, parent_hash: B256, ts: TaikoL1::TransitionState) -> Self {
        let contested = ts.contester != Address::ZERO;
        Self {
            key: transition_key(block_id, parent_hash),
            parent_hash,
            block_hash: ts.blockHash,
            state_root: ts.stateRoot,
            prover: ts.prover,
            validity_bond: U256::from(ts.validityBond),
            contester: ts.contester,
            contest_bond: U256::from(ts.contestBond),
            timestamp: ts.timestamp,
            tier: ts.tier,
            status: if contested { TransitionStatus::Contested } else { TransitionStatus::Proven },
        }
    }
}

/// Derives the storage key of a transition from its block id and parent hash.
pub fn transition_key(block_id: u64, parent_hash: B256) -> B256 {
    keccak256((block_id, parent_hash).abi_encode())
}

/// A proof as carried by a `TransitionProved` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub block_hash: B256,
    pub state_root: B256,
    pub prover: Address,
    pub validity_bond: U256,
    pub tier: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotA {
    pub genesis_height: u64,
    pub genesis_timestamp: u64,
    pub last_synced_block_id: u64,
    pub last_synced_at: u64,
}

impl From<TaikoL1::SlotA> for SlotA {
    fn from(slot: TaikoL1::SlotA) -> Self {
        Self {
            genesis_height: slot.genesisHeight,
            genesis_timestamp: slot.genesisTimestamp,
            last_synced_block_id: slot.lastSyncedBlockId,
            last_synced_at: slot.lastSynecdAt,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotB {
    pub num_blocks: u64,
    pub last_verified_block_id: u64,
    pub proving_paused: bool,
    pub last_unpaused_at: u64,
}

impl From<TaikoL1::SlotB> for SlotB {
    fn from(slot: TaikoL1::SlotB) -> Self {
        Self {
            num_blocks: slot.numBlocks,
            last_verified_block_id: slot.lastVerifiedBlockId,
            proving_paused: slot.provingPaused,
            last_unpaused_at: slot.lastUnpausedAt,
        }
    }
}

/// Block id, hash and state root of a chain head as returned by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub block_id: u64,
    pub block_hash: B256,
    pub state_root: B256,
}

/// Protocol constants read from `getConfig()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub chain_id: u64,
    pub block_max_proposals: u64,
    pub block_ring_buffer_size: u64,
    pub max_blocks_to_verify: u64,
    pub block_max_gas_limit: u32,
    pub liveness_bond: U256,
}

impl From<TaikoL1::Config> for ProtocolConfig {
    fn from(config: TaikoL1::Config) -> Self {
        Self {
            chain_id: config.chainId,
            block_max_proposals: config.blockMaxProposals,
            block_ring_buffer_size: config.blockRingBufferSize,
            max_blocks_to_verify: config.maxBlocksToVerify,
            block_max_gas_limit: config.blockMaxGasLimit,
            liveness_bond: U256::from(config.livenessBond),
        }
    }
}

/// Proof tier parameters from the tier provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub verifier_name: B256,
    pub validity_bond: U256,
    pub contest_bond: U256,
    /// Minutes a proof must stand uncontested before it can be verified.
    pub cooldown_window: u32,
    /// Minutes the assigned prover has to submit the first proof.
    pub proving_window: u16,
    pub max_blocks_to_verify_per_proof: u8,
}

impl TierConfig {
    pub fn cooldown_secs(&self) -> u64 {
        u64::from(self.cooldown_window) * 60
    }
}

impl From<TierProvider::Tier> for TierConfig {
    fn from(tier: TierProvider::Tier) -> Self {
        Self {
            verifier_name: tier.verifierName,
            validity_bond: U256::from(tier.validityBond),
            contest_bond: U256::from(tier.contestBond),
            cooldown_window: tier.cooldownWindow.to::<u32>(),
            proving_window: tier.provingWindow,
            max_blocks_to_verify_per_proof: tier.maxBlocksToVerifyPerProof,
        }
    }
}

/// Known proof tiers keyed by tier id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    tiers: BTreeMap<u16, TierConfig>,
}

impl TierPolicy {
    pub fn new(tiers: impl IntoIterator<Item = (u16, TierConfig)>) -> Self {
        Self { tiers: tiers.into_iter().collect() }
    }

    pub fn get(&self, tier: u16) -> Option<&TierConfig> {
        self.tiers.get(&tier)
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::aliases::{U24, U96};

    #[test]
    fn chain_block_narrows_into_record() {
        let block = TaikoL1::BlockV2 {
            metaHash: B256::repeat_byte(1),
            assignedProver: Address::with_last_byte(2),
            livenessBond: U96::from(5u64),
            blockId: 9,
            proposedAt: 1,
            proposedIn: 2,
            nextTransitionId: U24::from(4u32),
            livenessBondReturned: false,
            verifiedTransitionId: U24::from(3u32),
        };
        let record = BlockRecord::from(block);
        assert_eq!((record.next_transition_id, record.verified_transition_id), (4, 3));
        assert_eq!(record.liveness_bond, U256::from(5));
        assert_eq!(record.min_tier, 0);
        assert!(record.is_verified());
    }

    #[test]
    fn transition_key_depends_on_block_and_parent() {
        let parent = B256::repeat_byte(0x0a);
        assert_eq!(transition_key(3, parent), transition_key(3, parent));
        assert_ne!(transition_key(3, parent), transition_key(4, parent));
        assert_ne!(transition_key(3, parent), transition_key(3, B256::ZERO));
    }

    #[test]
    fn restored_transition_keys_match_replayed_ones() {
        let parent = B256::repeat_byte(0x0a);
        let ts = TaikoL1::TransitionState {
            key: parent,
            blockHash: B256::repeat_byte(0x0b),
            stateRoot: B256::ZERO,
            prover: Address::with_last_byte(1),
            validityBond: U96::from(1u64),
            contester: Address::with_last_byte(2),
            contestBond: U96::from(2u64),
            timestamp: 7,
            tier: 1,
            __reserved1: 0,
        };
        let restored = TransitionState::from_chain(3, parent, ts);
        assert_eq!(restored.key, transition_key(3, parent));
        assert_eq!(restored.status, TransitionStatus::Contested);
    }

    #[test]
    fn cooldown_is_in_minutes() {
        let tier = TierConfig {
            verifier_name: B256::ZERO,
            validity_bond: U256::ZERO,
            contest_bond: U256::ZERO,
            cooldown_window: 1440,
            proving_window: 60,
            max_blocks_to_verify_per_proof: 16,
        };
        assert_eq!(tier.cooldown_secs(), 86_400);
        assert!(TierPolicy::default().get(1).is_none());
        assert_eq!(TierPolicy::new([(1, tier.clone())]).get(1), Some(&tier));
    }
}
