//! Account balance tiers per epoch
//!
//! Follows the balance history index epoch by epoch, keeping the newest
//! wallet balance of every address ever seen. Each epoch's tiers count
//! wallet balance plus staked balance (from that epoch's checkpoint).

use crate::address::AddressCodec;
use crate::checkpoint::CheckpointStore;
use crate::config::TierConfig;
use crate::index::{decode_hits, SearchIndex};
use crate::query;
use crate::reconcile::ReconciliationCorrector;
use crate::tiers::BalanceTierCounts;
use crate::types::{AccountBalanceRecord, Amount, EpochWindow};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Balance tiers of one epoch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressesBalanceEpoch {
    /// Epoch index
    pub epoch: u32,
    /// Addresses with a recorded wallet balance so far
    pub total_addresses: usize,
    /// Contract addresses among them
    pub total_contract_addresses: usize,
    /// Tier counters
    #[serde(flatten)]
    pub tiers: BalanceTierCounts,
}

#[derive(Debug, Clone, Copy)]
struct WalletBalance {
    balance: Amount,
    timestamp: i64,
}

/// Builds [`AddressesBalanceEpoch`] records
pub struct AccountsProcessor {
    index: Arc<dyn SearchIndex>,
    checkpoints: Arc<dyn CheckpointStore>,
    codec: AddressCodec,
    accounts_index: String,
    genesis_time: i64,
    thresholds: TierConfig,
    corrector: ReconciliationCorrector,
    wallets: HashMap<String, WalletBalance>,
    total_contracts: usize,
}

impl AccountsProcessor {
    /// Processor over `accounts_index`
    pub fn new(
        index: Arc<dyn SearchIndex>,
        checkpoints: Arc<dyn CheckpointStore>,
        codec: AddressCodec,
        accounts_index: impl Into<String>,
        genesis_time: i64,
        thresholds: TierConfig,
        corrector: ReconciliationCorrector,
    ) -> Self {
        Self {
            index,
            checkpoints,
            codec,
            accounts_index: accounts_index.into(),
            genesis_time,
            thresholds,
            corrector,
            wallets: HashMap::new(),
            total_contracts: 0,
        }
    }

    /// Process epochs `0..end_epoch`; failed epochs keep a zeroed record
    pub async fn process_epochs(&mut self, end_epoch: u32) -> Vec<AddressesBalanceEpoch> {
        let mut stats = Vec::with_capacity(end_epoch as usize);
        for epoch in 0..end_epoch {
            info!(epoch, "processing accounts history");
            match self.process_epoch(epoch).await {
                Ok(record) => stats.push(record),
                Err(e) => {
                    error!(epoch, error = %e, "cannot process accounts for epoch");
                    stats.push(AddressesBalanceEpoch {
                        epoch,
                        ..AddressesBalanceEpoch::default()
                    });
                }
            }
        }
        stats
    }

    /// Process a single epoch
    pub async fn process_epoch(&mut self, epoch: u32) -> Result<AddressesBalanceEpoch> {
        let window = EpochWindow::for_epoch(self.genesis_time, epoch);
        let body = query::all_in_window(window);

        let index = Arc::clone(&self.index);
        let wallets = &mut self.wallets;
        let total_contracts = &mut self.total_contracts;
        let codec = &self.codec;
        index
            .scroll(&self.accounts_index, &body, &mut |hits| {
                for record in decode_hits::<AccountBalanceRecord>(hits) {
                    observe(wallets, total_contracts, codec, record);
                }
                Ok(())
            })
            .await?;

        let staked = self.checkpoints.get(epoch)?.unwrap_or_default();
        if staked.is_empty() {
            debug!(epoch, "no checkpoint, counting wallet balances only");
        }

        let addresses: BTreeSet<&str> = self
            .wallets
            .keys()
            .map(String::as_str)
            .chain(staked.keys().map(String::as_str))
            .collect();

        let mut tiers = BalanceTierCounts::default();
        for address in addresses {
            let wallet = self
                .wallets
                .get(address)
                .map_or(Amount::ZERO, |w| w.balance);
            let stake = staked.get(address).copied().unwrap_or(Amount::ZERO);
            tiers.add(wallet.checked_add(stake)?, &self.thresholds);
        }
        self.corrector.apply(epoch, &mut tiers);

        Ok(AddressesBalanceEpoch {
            epoch,
            total_addresses: self.wallets.len(),
            total_contract_addresses: self.total_contracts,
            tiers,
        })
    }
}

fn observe(
    wallets: &mut HashMap<String, WalletBalance>,
    total_contracts: &mut usize,
    codec: &AddressCodec,
    record: AccountBalanceRecord,
) {
    let balance = match Amount::parse(&record.balance) {
        Ok(balance) => balance,
        Err(e) => {
            warn!(address = %record.address, error = %e, "skipping balance record");
            return;
        }
    };

    match wallets.get_mut(&record.address) {
        Some(known) => {
            if known.timestamp <= record.timestamp {
                *known = WalletBalance {
                    balance,
                    timestamp: record.timestamp,
                };
            }
        }
        None => {
            if codec.is_smart_contract(&record.address) {
                *total_contracts += 1;
            }
            wallets.insert(
                record.address,
                WalletBalance {
                    balance,
                    timestamp: record.timestamp,
                },
            );
        }
    }
}
