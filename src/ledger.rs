//! Fixed-capacity block ledger laid out like the contract's block ring buffer.

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{TrackerError, TrackerResult},
    types::BlockRecord,
};

/// Only occupied slots are stored. Clones share structure, so snapshotting the ledger
/// per L1 block does not copy the whole buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBufferLedger {
    size: u64,
    slots: OrdMap<u64, BlockRecord>,
    last_verified_block_id: u64,
}

impl RingBufferLedger {
    /// Creates an empty ledger of `size` slots whose verified frontier is `last_verified`.
    pub fn new(size: u64, last_verified_block_id: u64) -> Self {
        Self { size: size.max(1), slots: OrdMap::new(), last_verified_block_id }
    }

    pub fn capacity(&self) -> u64 {
        self.size
    }

    pub fn last_verified_block_id(&self) -> u64 {
        self.last_verified_block_id
    }

    fn slot(&self, block_id: u64) -> u64 {
        block_id % self.size
    }

    /// Inserts or overwrites the slot of `record.block_id`, returning the evicted
    /// occupant if it was a different block.
    ///
    /// A slot may only be recycled once its occupant is verified, and a record at or
    /// behind the verified frontier must itself be verified.
    pub fn upsert_block(&mut self, record: BlockRecord) -> TrackerResult<Option<BlockRecord>> {
        if record.block_id <= self.last_verified_block_id && !record.is_verified() {
            return Err(TrackerError::SlotConflict {
                incoming: record.block_id,
                occupant: record.block_id,
            });
        }

        let slot = self.slot(record.block_id);
        if let Some(occupant) = self.slots.get(&slot) {
            if occupant.block_id != record.block_id && !occupant.is_verified() {
                return Err(TrackerError::SlotConflict {
                    incoming: record.block_id,
                    occupant: occupant.block_id,
                });
            }
        }

        let incoming = record.block_id;
        let previous = self.slots.insert(slot, record);
        Ok(previous.filter(|prev| prev.block_id != incoming))
    }

    /// Returns the record of `block_id`, or `None` if it is outside the retained window.
    pub fn get_block(&self, block_id: u64) -> Option<&BlockRecord> {
        self.slots.get(&self.slot(block_id)).filter(|r| r.block_id == block_id)
    }

    pub(crate) fn get_block_mut(&mut self, block_id: u64) -> Option<&mut BlockRecord> {
        let slot = self.slot(block_id);
        self.slots.get_mut(&slot).filter(|r| r.block_id == block_id)
    }

    /// Marks the block right after the verified frontier as verified by `transition_id`.
    pub fn mark_verified(&mut self, block_id: u64, transition_id: u32) -> TrackerResult<()> {
        let expected = self.last_verified_block_id + 1;
        if block_id != expected {
            return Err(TrackerError::OutOfOrderVerification { expected, got: block_id });
        }
        if transition_id == 0 {
            return Err(TrackerError::desync(format!(
                "block {block_id} verified with transition id 0"
            )));
        }

        let record = self.get_block_mut(block_id).ok_or_else(|| {
            TrackerError::desync(format!("block {block_id} missing from ledger at verification"))
        })?;
        record.verified_transition_id = transition_id;
        self.last_verified_block_id = block_id;
        Ok(())
    }

    /// Undoes the verification of the frontier block. Only locally predicted
    /// verification may be undone.
    pub fn unmark_verified(&mut self, block_id: u64) -> TrackerResult<()> {
        if block_id != self.last_verified_block_id {
            return Err(TrackerError::desync(format!(
                "cannot unverify block {block_id}, frontier is {}",
                self.last_verified_block_id
            )));
        }
        let record = self.get_block_mut(block_id).ok_or_else(|| {
            TrackerError::desync(format!("block {block_id} left the ledger before unverifying"))
        })?;
        record.verified_transition_id = 0;
        self.last_verified_block_id = block_id - 1;
        Ok(())
    }

    /// Retained records in ascending block id order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockRecord> {
        let mut records: Vec<_> = self.slots.values().collect();
        records.sort_by_key(|r| r.block_id);
        records.into_iter()
    }
}
