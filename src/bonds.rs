use alloy_primitives::{Address, U256};
use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Bond balances of provers and contesters, fed only by bond events.
///
/// Only accounts seeded from the contract or touched by an applied event are known.
/// Callers that resynced mid-chain must seed an account before applying its events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondLedger {
    balances: OrdMap<Address, U256>,
}

impl BondLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, user: Address, amount: U256) {
        let balance = self.balances.get(&user).copied().unwrap_or_default();
        self.balances.insert(user, balance.saturating_add(amount));
    }

    /// Debits `amount`; an underflow means an event was missed or applied twice.
    pub fn debit(&mut self, user: Address, amount: U256) -> TrackerResult<()> {
        let balance = self.balance_of(user).unwrap_or_default();
        let remaining = balance
            .checked_sub(amount)
            .ok_or(TrackerError::InsufficientBond { user, balance, amount })?;
        self.balances.insert(user, remaining);
        Ok(())
    }

    /// The balance of `user`, or `None` if it was never loaded.
    pub fn balance_of(&self, user: Address) -> Option<U256> {
        self.balances.get(&user).copied()
    }

    pub fn is_known(&self, user: Address) -> bool {
        self.balances.contains_key(&user)
    }

    /// Sets a balance read from the contract.
    pub fn seed(&mut self, user: Address, balance: U256) {
        self.balances.insert(user, balance);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &U256)> {
        self.balances.iter()
    }
}
