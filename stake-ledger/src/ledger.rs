//! Per-address staked balances
//!
//! A [`BalanceLedger`] holds one contract domain's view of who has staked how
//! much. Entries appear on the first credit and disappear when their amount
//! reaches exactly zero, so a stored amount is always positive.

use crate::error::LedgerDrift;
use crate::types::{Amount, Snapshot};
use crate::Result;
use std::collections::BTreeMap;

/// Outcome of a debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// Amount reduced, entry kept
    Reduced(Amount),
    /// Amount reached zero, entry removed
    Cleared,
}

/// Address → staked amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceLedger {
    entries: BTreeMap<String, Amount>,
}

impl BalanceLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded from a snapshot; zero and negative entries are dropped
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let entries = snapshot
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero() && !amount.is_negative())
            .collect();
        Self { entries }
    }

    /// Amount held by `address`
    pub fn get(&self, address: &str) -> Option<Amount> {
        self.entries.get(address).copied()
    }

    /// Whether `address` has an entry
    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    /// Number of addresses
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `amount` to `address`, creating the entry if needed.
    ///
    /// Crediting zero to an absent address leaves the ledger unchanged.
    pub fn credit(&mut self, address: &str, amount: Amount) -> Result<()> {
        let current = self.get(address).unwrap_or(Amount::ZERO);
        let next = current.checked_add(amount)?;
        self.store(address, next);
        Ok(())
    }

    /// Subtract `amount` from `address`.
    ///
    /// A missing entry is reported and the ledger is left untouched. A debit
    /// larger than the stored amount removes the entry and is reported.
    pub fn debit(&mut self, address: &str, amount: Amount) -> Result<std::result::Result<Debit, LedgerDrift>> {
        let Some(current) = self.get(address) else {
            return Ok(Err(LedgerDrift::MissingEntry {
                address: address.to_string(),
            }));
        };

        let next = current.checked_sub(amount)?;
        if next.is_negative() {
            self.entries.remove(address);
            return Ok(Err(LedgerDrift::WouldGoNegative {
                address: address.to_string(),
                available: current.to_string(),
                requested: amount.to_string(),
            }));
        }

        self.store(address, next);
        if next.is_zero() {
            Ok(Ok(Debit::Cleared))
        } else {
            Ok(Ok(Debit::Reduced(next)))
        }
    }

    /// Remove `address` when it is present with a zero amount
    pub fn remove_if_zero(&mut self, address: &str) -> bool {
        match self.entries.get(address) {
            Some(amount) if amount.is_zero() => {
                self.entries.remove(address);
                true
            }
            _ => false,
        }
    }

    /// Drop `address`, returning what it held
    pub fn remove(&mut self, address: &str) -> Option<Amount> {
        self.entries.remove(address)
    }

    /// Sum of all entries
    pub fn total(&self) -> Result<Amount> {
        Amount::checked_sum(self.entries.values())
    }

    /// Addresses in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in ascending address order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Amount)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Copy of the entries
    pub fn snapshot(&self) -> Snapshot {
        self.entries.clone()
    }

    fn store(&mut self, address: &str, amount: Amount) {
        if amount.is_zero() {
            self.entries.remove(address);
        } else {
            self.entries.insert(address.to_string(), amount);
        }
    }
}

/// Union of two ledgers with amounts summed for shared addresses
pub fn merge(a: &BalanceLedger, b: &BalanceLedger) -> Result<Snapshot> {
    let mut merged = a.snapshot();
    for (address, amount) in b.iter() {
        let entry = merged.entry(address.to_string()).or_insert(Amount::ZERO);
        *entry = entry.checked_add(amount)?;
    }
    Ok(merged)
}

/// Number of distinct addresses across both ledgers
pub fn unique_users(a: &BalanceLedger, b: &BalanceLedger) -> usize {
    a.len() + b.addresses().filter(|address| !a.contains(address)).count()
}
