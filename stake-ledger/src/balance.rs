//! Contract balances at epoch boundaries

use crate::index::SearchIndex;
use crate::query;
use crate::types::{AccountBalanceRecord, Amount, EpochWindow, IndexedTransaction};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Looks up the newest indexed balance of an address, falling back to the
/// last value seen when the window holds no balance change.
pub struct BalanceSnapshotFetcher {
    index: Arc<dyn SearchIndex>,
    accounts_index: String,
    transactions_index: String,
    metachain_sender: String,
    genesis_time: i64,
    cache: HashMap<String, Amount>,
}

impl BalanceSnapshotFetcher {
    /// Fetcher over the given indices
    pub fn new(
        index: Arc<dyn SearchIndex>,
        accounts_index: impl Into<String>,
        transactions_index: impl Into<String>,
        metachain_sender: impl Into<String>,
        genesis_time: i64,
    ) -> Self {
        Self {
            index,
            accounts_index: accounts_index.into(),
            transactions_index: transactions_index.into(),
            metachain_sender: metachain_sender.into(),
            genesis_time,
            cache: HashMap::new(),
        }
    }

    /// Balance of `address` at the end of `window`
    pub async fn get_balance(&mut self, address: &str, window: EpochWindow) -> Result<Amount> {
        let body = query::latest_balance(address, window);
        let hits = self.index.search(&self.accounts_index, &body).await?;

        let Some(hit) = hits.into_iter().next() else {
            let cached = self.cache.get(address).copied().unwrap_or(Amount::ZERO);
            debug!(address = %address, balance = %cached, "no balance change in window");
            return Ok(cached);
        };

        let record: AccountBalanceRecord = serde_json::from_value(hit)?;
        let balance = Amount::parse(&record.balance)?;
        self.cache.insert(address.to_string(), balance);
        Ok(balance)
    }

    /// Value of the protocol reward transaction paid to `contract` in `window`.
    ///
    /// The genesis epoch has none; any later epoch without one fails.
    pub async fn reward_tx_value(&self, contract: &str, window: EpochWindow) -> Result<Amount> {
        if window.start == self.genesis_time {
            return Ok(Amount::ZERO);
        }

        let body = query::reward_transaction(contract, &self.metachain_sender, window);
        let hits = self.index.search(&self.transactions_index, &body).await?;
        let Some(hit) = hits.into_iter().next() else {
            return Err(Error::Fetch(format!(
                "no reward transaction for {} in [{}, {}]",
                contract, window.start, window.end
            )));
        };

        let tx: IndexedTransaction = serde_json::from_value(hit)?;
        if tx.value.is_empty() {
            return Ok(Amount::ZERO);
        }
        Amount::parse(&tx.value)
    }

    /// Replace the fallback cache
    pub fn restore_cache(&mut self, cache: HashMap<String, Amount>) {
        self.cache = cache;
    }

    /// Copy of the fallback cache
    pub fn cache(&self) -> HashMap<String, Amount> {
        self.cache.clone()
    }
}
