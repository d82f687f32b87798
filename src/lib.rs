pub mod bonds;
pub mod checkpoint;
pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod prometheus;
pub mod state;
pub mod tracker;
pub mod transitions;
pub mod types;
pub mod utils;
pub mod verifier;

use alloy_eips::{BlockId, BlockNumberOrTag};
use alloy_primitives::{Address, B256, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{Filter, Log};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    contract::{
        TaikoL1::{self, TaikoL1Instance},
        TierProvider::TierProviderInstance,
    },
    events::EventDecoder,
    types::{BlockRecord, ChainHead, ProtocolConfig, SlotA, SlotB, TierConfig},
};

pub use error::{DecodeError, TrackerError, TrackerResult};
pub use state::TrackerState;
pub use tracker::{RollupTracker, TrackerHandle};

/// Read access to the L1 chain and the rollup contract. Every view call is pinned to an
/// L1 block so a resync observes one consistent state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Get the latest L1 block number.
    async fn block_number(&self) -> Result<u64>;

    /// Get the timestamp of an L1 block.
    async fn block_timestamp(&self, number: u64) -> Result<u64>;

    /// Get the rollup contract logs of the tracked events in `[from, to]`.
    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<Log>>;

    /// Follow rollup contract logs from `from` onwards.
    async fn subscribe_logs(&self, from: u64) -> Result<BoxStream<'static, Log>>;

    async fn get_config(&self, at: u64) -> Result<ProtocolConfig>;

    async fn get_state_variables(&self, at: u64) -> Result<(SlotA, SlotB)>;

    async fn get_block(&self, block_id: u64, at: u64) -> Result<BlockRecord>;

    async fn get_transition_by_id(
        &self,
        block_id: u64,
        transition_id: u32,
        at: u64,
    ) -> Result<TaikoL1::TransitionState>;

    /// Get the transition of a block built on `parent_hash`, if one was proved.
    async fn get_transition_by_parent_hash(
        &self,
        block_id: u64,
        parent_hash: B256,
        at: u64,
    ) -> Result<Option<TaikoL1::TransitionState>>;

    async fn get_last_verified_block(&self, at: u64) -> Result<ChainHead>;

    async fn get_last_synced_block(&self, at: u64) -> Result<ChainHead>;

    async fn bond_balance_of(&self, user: Address, at: u64) -> Result<U256>;

    /// Whether the whole contract is paused.
    async fn paused(&self, at: u64) -> Result<bool>;

    /// Get the ids of all tiers. Empty when no tier provider is configured.
    async fn get_tier_ids(&self, at: u64) -> Result<Vec<u16>>;

    async fn get_tier(&self, tier_id: u16, at: u64) -> Result<TierConfig>;
}

/// [`ChainClient`] backed by an alloy provider.
pub struct L1Client<P>
where
    P: Provider + Clone,
{
    provider: P,
    rollup: TaikoL1Instance<P>,
    tier_provider: Option<TierProviderInstance<P>>,
    topics: Vec<B256>,
}

impl<P> L1Client<P>
where
    P: Provider + Clone,
{
    pub fn new(provider: P, rollup_address: Address, tier_provider_address: Option<Address>) -> Self {
        Self {
            rollup: TaikoL1::new(rollup_address, provider.clone()),
            tier_provider: tier_provider_address
                .map(|address| TierProviderInstance::new(address, provider.clone())),
            topics: EventDecoder::new().topics(),
            provider,
        }
    }

    fn filter(&self) -> Filter {
        Filter::new().address(*self.rollup.address()).event_signature(self.topics.clone())
    }

    fn tier_provider(&self) -> Result<&TierProviderInstance<P>> {
        self.tier_provider.as_ref().context("no tier provider configured")
    }
}

fn pinned(at: u64) -> BlockId {
    BlockId::number(at)
}

#[async_trait]
impl<P> ChainClient for L1Client<P>
where
    P: Provider + Clone,
{
    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?
            .with_context(|| format!("L1 block {number} not found"))?;
        Ok(block.header.timestamp)
    }

    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        let filter = self.filter().from_block(from).to_block(to);
        Ok(self.provider.get_logs(&filter).await?)
    }

    async fn subscribe_logs(&self, from: u64) -> Result<BoxStream<'static, Log>> {
        let filter = self.filter().from_block(from);
        let poller = self.provider.watch_logs(&filter).await?;
        Ok(poller.into_stream().flat_map(stream::iter).boxed())
    }

    async fn get_config(&self, at: u64) -> Result<ProtocolConfig> {
        let config = self.rollup.getConfig().block(pinned(at)).call().await?;
        Ok(config.into())
    }

    async fn get_state_variables(&self, at: u64) -> Result<(SlotA, SlotB)> {
        let vars = self.rollup.getStateVariables().block(pinned(at)).call().await?;
        Ok((vars.slotA.into(), vars.slotB.into()))
    }

    async fn get_block(&self, block_id: u64, at: u64) -> Result<BlockRecord> {
        let block = self.rollup.getBlock(block_id).block(pinned(at)).call().await?;
        Ok(block.into())
    }

    async fn get_transition_by_id(
        &self,
        block_id: u64,
        transition_id: u32,
        at: u64,
    ) -> Result<TaikoL1::TransitionState> {
        Ok(self.rollup.getTransition_0(block_id, transition_id).block(pinned(at)).call().await?)
    }

    async fn get_transition_by_parent_hash(
        &self,
        block_id: u64,
        parent_hash: B256,
        at: u64,
    ) -> Result<Option<TaikoL1::TransitionState>> {
        match self.rollup.getTransition_1(block_id, parent_hash).block(pinned(at)).call().await {
            Ok(ts) if ts.key.is_zero() && ts.blockHash.is_zero() => Ok(None),
            Ok(ts) => Ok(Some(ts)),
            // The contract reverts with L1_TRANSITION_NOT_FOUND for an unknown parent.
            Err(e) if e.as_revert_data().is_some() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_last_verified_block(&self, at: u64) -> Result<ChainHead> {
        let head = self.rollup.getLastVerifiedBlock().block(pinned(at)).call().await?;
        Ok(ChainHead {
            block_id: head.blockId_,
            block_hash: head.blockHash_,
            state_root: head.stateRoot_,
        })
    }

    async fn get_last_synced_block(&self, at: u64) -> Result<ChainHead> {
        let head = self.rollup.getLastSyncedBlock().block(pinned(at)).call().await?;
        Ok(ChainHead {
            block_id: head.blockId_,
            block_hash: head.blockHash_,
            state_root: head.stateRoot_,
        })
    }

    async fn bond_balance_of(&self, user: Address, at: u64) -> Result<U256> {
        Ok(self.rollup.bondBalanceOf(user).block(pinned(at)).call().await?)
    }

    async fn paused(&self, at: u64) -> Result<bool> {
        Ok(self.rollup.paused().block(pinned(at)).call().await?)
    }

    async fn get_tier_ids(&self, at: u64) -> Result<Vec<u16>> {
        match &self.tier_provider {
            Some(tier_provider) => {
                Ok(tier_provider.getTierIds().block(pinned(at)).call().await?)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn get_tier(&self, tier_id: u16, at: u64) -> Result<TierConfig> {
        let tier = self.tier_provider()?.getTier(tier_id).block(pinned(at)).call().await?;
        Ok(tier.into())
    }
}
