//! Error types for the tracker.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// A log that could not be turned into a rollup event. Skipped and counted.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The log carries no topics at all.
    #[error("log has no topics")]
    MissingTopic,

    /// No decoder is registered for this topic hash.
    #[error("unrecognized event topic {0}")]
    UnknownTopic(B256),

    /// The payload does not match the ABI shape registered for the topic.
    #[error("malformed {event} payload: {source}")]
    Abi {
        event: &'static str,
        #[source]
        source: alloy_sol_types::Error,
    },

    /// The log is missing the position data needed to order and deduplicate it.
    #[error("log is missing {0}")]
    MissingContext(&'static str),

    /// A block id does not fit in 64 bits.
    #[error("block id {0} overflows u64")]
    Overflow(U256),
}

/// Main error type for the tracker.
///
/// Every variant other than [`TrackerError::Client`] and [`TrackerError::Checkpoint`]
/// means local state no longer agrees with the chain, and only a full resynchronization
/// can recover.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A ring buffer slot is still held by an unverified block.
    #[error("slot conflict: block {incoming} collides with unverified block {occupant}")]
    SlotConflict { incoming: u64, occupant: u64 },

    /// A proof arrived at a lower tier than the transition it would replace.
    #[error("tier regression for block {block_id}: tier {incoming} below tier {existing}")]
    TierRegression { block_id: u64, existing: u16, incoming: u16 },

    /// A contest referenced a transition that is not proved and uncontested.
    #[error("no contestable transition for block {block_id} with parent {parent_hash}")]
    NoSuchTransition { block_id: u64, parent_hash: B256 },

    /// Local state diverged from the chain.
    #[error("desynchronized: {0}")]
    Desync(String),

    /// A bond debit would make a balance negative.
    #[error("insufficient bond for {user}: balance {balance}, debit {amount}")]
    InsufficientBond { user: Address, balance: U256, amount: U256 },

    /// A block was marked verified out of order.
    #[error("out of order verification: expected block {expected}, got {got}")]
    OutOfOrderVerification { expected: u64, got: u64 },

    /// The chain client failed. Transient; the sync loop may retry.
    #[error(transparent)]
    Client(#[from] anyhow::Error),

    /// A checkpoint could not be written.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] std::io::Error),
}

impl TrackerError {
    /// Whether the error is an invariant violation that requires a resync.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Client(_) | Self::Checkpoint(_))
    }

    pub(crate) fn desync(msg: impl Into<String>) -> Self {
        Self::Desync(msg.into())
    }
}

/// Result type alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
