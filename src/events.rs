//! Typed decoding of rollup contract logs.
//!
//! Each event shape registers exactly one decoder under its topic-0 hash. Overloaded
//! events (`BlockVerified` / `BlockVerifiedV2`, the two `BondCredited` shapes, ...) are
//! told apart only by that hash.

use std::collections::HashMap;

use alloy_primitives::{keccak256, Address, LogData, B256, U256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::{SolEvent, SolValue};

use crate::{
    contract::{LibProving, TaikoL1},
    error::DecodeError,
    types::{Proof, SlotB},
};

/// Position of a log in the chain, used for ordering and duplicate detection.
pub type EventId = (B256, u64);

/// Metadata of a proposal in either contract generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalMeta {
    Legacy(Box<TaikoL1::BlockMetadata>),
    V2(Box<TaikoL1::BlockMetadataV2>),
}

impl ProposalMeta {
    /// `keccak256(abi.encode(meta))`, the hash the contract stores for the block.
    pub fn hash(&self) -> B256 {
        match self {
            Self::Legacy(meta) => keccak256(meta.abi_encode()),
            Self::V2(meta) => keccak256(meta.abi_encode()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposedBlock {
    pub block_id: u64,
    pub assigned_prover: Address,
    pub liveness_bond: U256,
    pub proposed_at: u64,
    pub proposed_in: u64,
    pub min_tier: u16,
    pub meta: ProposalMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContestedTransition {
    pub block_id: u64,
    pub parent_hash: B256,
    pub block_hash: B256,
    pub contester: Address,
    pub contest_bond: U256,
    pub tier: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedBlock {
    pub block_id: u64,
    pub prover: Address,
    pub block_hash: B256,
    /// Only present in the legacy shape; non-zero when the state root was synced.
    pub state_root: Option<B256>,
    pub tier: u16,
}

/// A rollup contract event normalized across contract generations.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupEvent {
    BlockProposed(ProposedBlock),
    TransitionProved { block_id: u64, parent_hash: B256, proof: Proof },
    TransitionContested(ContestedTransition),
    BlockVerified(VerifiedBlock),
    StateVariablesUpdated(SlotB),
    BondCredited { user: Address, amount: U256 },
    BondDebited { user: Address, amount: U256 },
    ProvingPaused { paused: bool },
    Paused { account: Address },
    Unpaused { account: Address },
}

impl RollupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockProposed(_) => "BlockProposed",
            Self::TransitionProved { .. } => "TransitionProved",
            Self::TransitionContested(_) => "TransitionContested",
            Self::BlockVerified(_) => "BlockVerified",
            Self::StateVariablesUpdated(_) => "StateVariablesUpdated",
            Self::BondCredited { .. } => "BondCredited",
            Self::BondDebited { .. } => "BondDebited",
            Self::ProvingPaused { .. } => "ProvingPaused",
            Self::Paused { .. } => "Paused",
            Self::Unpaused { .. } => "Unpaused",
        }
    }
}

/// A decoded event together with its position in the L1 chain.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub id: EventId,
    pub l1_block: u64,
    pub l1_timestamp: Option<u64>,
    /// Set when the log was dropped by a reorg.
    pub removed: bool,
    pub event: RollupEvent,
}

type DecodeFn = Box<dyn Fn(&LogData) -> Result<RollupEvent, DecodeError> + Send + Sync>;

/// Topic-hash keyed registry of event decoders.
pub struct EventDecoder {
    decoders: HashMap<B256, (&'static str, DecodeFn)>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.decoders.values().map(|(name, _)| *name).collect();
        f.debug_struct("EventDecoder").field("events", &names).finish()
    }
}

impl EventDecoder {
    /// Creates a decoder for every rollup event shape the tracker consumes.
    pub fn new() -> Self {
        let mut decoder = Self { decoders: HashMap::new() };

        decoder.register(|e: TaikoL1::BlockProposed| {
            Ok(RollupEvent::BlockProposed(ProposedBlock {
                block_id: block_id(e.blockId)?,
                assigned_prover: e.assignedProver,
                liveness_bond: U256::from(e.livenessBond),
                proposed_at: e.meta.timestamp,
                proposed_in: e.meta.l1Height,
                min_tier: e.meta.minTier,
                meta: ProposalMeta::Legacy(Box::new(e.meta)),
            }))
        });
        decoder.register(|e: TaikoL1::BlockProposedV2| {
            Ok(RollupEvent::BlockProposed(ProposedBlock {
                block_id: block_id(e.blockId)?,
                assigned_prover: e.meta.proposer,
                liveness_bond: U256::from(e.meta.livenessBond),
                proposed_at: e.meta.proposedAt,
                proposed_in: e.meta.proposedIn,
                min_tier: e.meta.minTier,
                meta: ProposalMeta::V2(Box::new(e.meta)),
            }))
        });
        decoder.register(|e: TaikoL1::TransitionProved| {
            Ok(RollupEvent::TransitionProved {
                block_id: block_id(e.blockId)?,
                parent_hash: e.tran.parentHash,
                proof: Proof {
                    block_hash: e.tran.blockHash,
                    state_root: e.tran.stateRoot,
                    prover: e.prover,
                    validity_bond: U256::from(e.validityBond),
                    tier: e.tier,
                },
            })
        });
        decoder.register(|e: TaikoL1::TransitionProvedV2| {
            Ok(RollupEvent::TransitionProved {
                block_id: block_id(e.blockId)?,
                parent_hash: e.tran.parentHash,
                proof: Proof {
                    block_hash: e.tran.blockHash,
                    state_root: e.tran.stateRoot,
                    prover: e.prover,
                    validity_bond: U256::from(e.validityBond),
                    tier: e.tier,
                },
            })
        });
        decoder.register(|e: TaikoL1::TransitionContested| {
            Ok(RollupEvent::TransitionContested(ContestedTransition {
                block_id: block_id(e.blockId)?,
                parent_hash: e.tran.parentHash,
                block_hash: e.tran.blockHash,
                contester: e.contester,
                contest_bond: U256::from(e.contestBond),
                tier: e.tier,
            }))
        });
        decoder.register(|e: TaikoL1::TransitionContestedV2| {
            Ok(RollupEvent::TransitionContested(ContestedTransition {
                block_id: block_id(e.blockId)?,
                parent_hash: e.tran.parentHash,
                block_hash: e.tran.blockHash,
                contester: e.contester,
                contest_bond: U256::from(e.contestBond),
                tier: e.tier,
            }))
        });
        decoder.register(|e: TaikoL1::BlockVerified| {
            Ok(RollupEvent::BlockVerified(VerifiedBlock {
                block_id: block_id(e.blockId)?,
                prover: e.prover,
                block_hash: e.blockHash,
                state_root: Some(e.stateRoot),
                tier: e.tier,
            }))
        });
        decoder.register(|e: TaikoL1::BlockVerifiedV2| {
            Ok(RollupEvent::BlockVerified(VerifiedBlock {
                block_id: block_id(e.blockId)?,
                prover: e.prover,
                block_hash: e.blockHash,
                state_root: None,
                tier: e.tier,
            }))
        });
        decoder.register(|e: TaikoL1::StateVariablesUpdated| {
            Ok(RollupEvent::StateVariablesUpdated(SlotB::from(e.slotB)))
        });
        decoder.register(|e: TaikoL1::BondCredited| {
            Ok(RollupEvent::BondCredited { user: e.user, amount: e.amount })
        });
        decoder.register(|e: TaikoL1::BondDebited| {
            Ok(RollupEvent::BondDebited { user: e.user, amount: e.amount })
        });
        decoder.register(|e: LibProving::BondCredited| {
            Ok(RollupEvent::BondCredited { user: e.user, amount: e.amount })
        });
        decoder.register(|e: LibProving::BondDebited| {
            Ok(RollupEvent::BondDebited { user: e.user, amount: e.amount })
        });
        decoder.register(|e: LibProving::BondDeposited| {
            Ok(RollupEvent::BondCredited { user: e.user, amount: e.amount })
        });
        decoder.register(|e: TaikoL1::ProvingPaused| {
            Ok(RollupEvent::ProvingPaused { paused: e.paused })
        });
        decoder.register(|e: TaikoL1::Paused| Ok(RollupEvent::Paused { account: e.account }));
        decoder.register(|e: TaikoL1::Unpaused| Ok(RollupEvent::Unpaused { account: e.account }));

        decoder
    }

    /// Registers `map` as the decoder for the topic hash of `E`.
    pub fn register<E, F>(&mut self, map: F)
    where
        E: SolEvent + 'static,
        F: Fn(E) -> Result<RollupEvent, DecodeError> + Send + Sync + 'static,
    {
        let decode = move |data: &LogData| {
            let event = E::decode_log_data(data)
                .map_err(|source| DecodeError::Abi { event: E::SIGNATURE, source })?;
            map(event)
        };
        self.decoders.insert(E::SIGNATURE_HASH, (E::SIGNATURE, Box::new(decode)));
    }

    /// Topic hashes with a registered decoder, for building log filters.
    pub fn topics(&self) -> Vec<B256> {
        self.decoders.keys().copied().collect()
    }

    /// Decodes a single RPC log into a positioned rollup event.
    pub fn decode(&self, log: &Log) -> Result<DecodedEvent, DecodeError> {
        let topic = log.inner.data.topics().first().ok_or(DecodeError::MissingTopic)?;
        let (_, decode) = self.decoders.get(topic).ok_or(DecodeError::UnknownTopic(*topic))?;

        let event = decode(&log.inner.data)?;
        let tx_hash = log.transaction_hash.ok_or(DecodeError::MissingContext("transaction hash"))?;
        let log_index = log.log_index.ok_or(DecodeError::MissingContext("log index"))?;
        let l1_block = log.block_number.ok_or(DecodeError::MissingContext("block number"))?;

        Ok(DecodedEvent {
            id: (tx_hash, log_index),
            l1_block,
            l1_timestamp: log.block_timestamp,
            removed: log.removed,
            event,
        })
    }
}

fn block_id(id: U256) -> Result<u64, DecodeError> {
    u64::try_from(id).map_err(|_| DecodeError::Overflow(id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::{address, b256, Bytes, Log as PrimitiveLog};
    use alloy_primitives::aliases::U96;

    pub(crate) fn rpc_log(data: LogData, l1_block: u64, tx: u8, index: u64) -> Log {
        Log {
            inner: PrimitiveLog { address: Address::ZERO, data },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(l1_block),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(tx)),
            transaction_index: Some(0),
            log_index: Some(index),
            removed: false,
        }
    }

    pub(crate) fn meta_v2(id: u64) -> TaikoL1::BlockMetadataV2 {
        TaikoL1::BlockMetadataV2 {
            anchorBlockHash: B256::repeat_byte(0x01),
            difficulty: B256::repeat_byte(0x02),
            blobHash: B256::repeat_byte(0x03),
            extraData: B256::ZERO,
            coinbase: address!("0x00000000000000000000000000000000000000c0"),
            id,
            gasLimit: 240_000_000,
            timestamp: 1_700_000_000 + id,
            anchorBlockId: 100 + id,
            minTier: 1,
            blobUsed: true,
            parentMetaHash: B256::repeat_byte(0x04),
            proposer: address!("0x00000000000000000000000000000000000000a1"),
            livenessBond: U96::from(125u64),
            proposedAt: 1_700_000_012 + id,
            proposedIn: 200 + id,
            blobTxListOffset: 0,
            blobTxListLength: 4096,
            blobIndex: 0,
        }
    }

    #[test]
    fn decodes_block_proposed_v2_and_reencodes_identically() {
        let event = TaikoL1::BlockProposedV2 { blockId: U256::from(7), meta: meta_v2(7) };
        let data = event.encode_log_data();
        let decoded = EventDecoder::new().decode(&rpc_log(data.clone(), 10, 1, 0)).unwrap();

        let RollupEvent::BlockProposed(block) = decoded.event else {
            panic!("expected BlockProposed, got {:?}", decoded.event);
        };
        assert_eq!(block.block_id, 7);
        assert_eq!(block.proposed_in, 207);
        assert_eq!(block.min_tier, 1);
        let ProposalMeta::V2(meta) = &block.meta else { panic!("expected V2 metadata") };
        assert_eq!(**meta, meta_v2(7));

        let reencoded = TaikoL1::BlockProposedV2 { blockId: U256::from(7), meta: (**meta).clone() }
            .encode_log_data();
        assert_eq!(reencoded, data);
        assert_eq!(block.meta.hash(), keccak256(meta_v2(7).abi_encode()));
    }

    #[test]
    fn overloaded_shapes_are_selected_by_topic() {
        let decoder = EventDecoder::new();
        let prover = address!("0x00000000000000000000000000000000000000b2");
        let hash = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");

        let v1 = TaikoL1::BlockVerified {
            blockId: U256::from(3),
            prover,
            blockHash: hash,
            stateRoot: B256::repeat_byte(0x22),
            tier: 2,
        };
        let v2 = TaikoL1::BlockVerifiedV2 { blockId: U256::from(3), prover, blockHash: hash, tier: 2 };

        let RollupEvent::BlockVerified(a) =
            decoder.decode(&rpc_log(v1.encode_log_data(), 1, 1, 0)).unwrap().event
        else {
            panic!("expected BlockVerified");
        };
        let RollupEvent::BlockVerified(b) =
            decoder.decode(&rpc_log(v2.encode_log_data(), 1, 1, 1)).unwrap().event
        else {
            panic!("expected BlockVerified");
        };
        assert_eq!(a.state_root, Some(B256::repeat_byte(0x22)));
        assert_eq!(b.state_root, None);

        let with_block = LibProving::BondCredited {
            user: prover,
            blockId: U256::from(3),
            amount: U256::from(50),
        };
        let decoded = decoder.decode(&rpc_log(with_block.encode_log_data(), 1, 1, 2)).unwrap();
        assert_eq!(decoded.event, RollupEvent::BondCredited { user: prover, amount: U256::from(50) });
    }

    #[test]
    fn rejects_unknown_topics_and_truncated_payloads() {
        let decoder = EventDecoder::new();

        let unknown = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Bytes::new());
        assert!(matches!(
            decoder.decode(&rpc_log(unknown, 1, 1, 0)),
            Err(DecodeError::UnknownTopic(_))
        ));

        let empty = LogData::new_unchecked(vec![], Bytes::new());
        assert!(matches!(decoder.decode(&rpc_log(empty, 1, 1, 0)), Err(DecodeError::MissingTopic)));

        let truncated = LogData::new_unchecked(
            vec![TaikoL1::ProvingPaused::SIGNATURE_HASH],
            Bytes::from_static(&[0u8; 4]),
        );
        assert!(matches!(
            decoder.decode(&rpc_log(truncated, 1, 1, 0)),
            Err(DecodeError::Abi { event, .. }) if event == TaikoL1::ProvingPaused::SIGNATURE
        ));
    }

    #[test]
    fn requires_log_position() {
        let mut log = rpc_log(TaikoL1::ProvingPaused { paused: true }.encode_log_data(), 1, 1, 0);
        log.log_index = None;
        assert!(matches!(
            EventDecoder::new().decode(&log),
            Err(DecodeError::MissingContext("log index"))
        ));
    }
}
