//! Daily transaction statistics
//!
//! Counts, per epoch, transactions, contract calls, active accounts and
//! first-seen addresses. Relayed transactions also count their inner
//! sender and receiver.

use crate::address::{is_smart_contract_pubkey, AddressCodec};
use crate::index::{decode_hits, SearchIndex};
use crate::query;
use crate::types::{EpochWindow, IndexedTransaction, TransactionsEpoch, STATUS_FAIL};
use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Call prefix of relayed transactions
pub const RELAYED_TX_PREFIX: &str = "relayedTx";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerTransaction {
    #[serde(default)]
    snd_addr: Option<String>,
    #[serde(default)]
    rcv_addr: Option<String>,
}

/// Builds [`TransactionsEpoch`] records
pub struct TransactionsProcessor {
    index: Arc<dyn SearchIndex>,
    codec: AddressCodec,
    transactions_index: String,
    metachain_sender: String,
    genesis_time: i64,
    known_addresses: BTreeSet<String>,
}

#[derive(Default)]
struct EpochCounters {
    record: TransactionsEpoch,
    active_accounts: BTreeMap<String, usize>,
    active_contracts: BTreeMap<String, usize>,
}

impl TransactionsProcessor {
    /// Processor seeded with addresses known at genesis
    pub fn new(
        index: Arc<dyn SearchIndex>,
        codec: AddressCodec,
        transactions_index: impl Into<String>,
        metachain_sender: impl Into<String>,
        genesis_time: i64,
        known_addresses: BTreeSet<String>,
    ) -> Self {
        Self {
            index,
            codec,
            transactions_index: transactions_index.into(),
            metachain_sender: metachain_sender.into(),
            genesis_time,
            known_addresses,
        }
    }

    /// Process epochs `0..end_epoch`; failed epochs keep a zeroed record
    pub async fn process_epochs(&mut self, end_epoch: u32) -> Vec<TransactionsEpoch> {
        let mut stats = Vec::with_capacity(end_epoch as usize);
        for epoch in 0..end_epoch {
            info!(epoch, "processing transactions");
            match self.process_epoch(epoch).await {
                Ok(record) => stats.push(record),
                Err(e) => {
                    error!(epoch, error = %e, "cannot process transactions for epoch");
                    stats.push(TransactionsEpoch {
                        epoch,
                        ..TransactionsEpoch::default()
                    });
                }
            }
        }
        stats
    }

    /// Process a single epoch
    pub async fn process_epoch(&mut self, epoch: u32) -> Result<TransactionsEpoch> {
        let window = EpochWindow::for_epoch(self.genesis_time, epoch);
        let body = query::all_in_window(window);

        let mut counters = EpochCounters::default();
        counters.record.epoch = epoch;
        debug!(epoch, day = ?window.start_date(), "counting transactions");

        let index = Arc::clone(&self.index);
        let mut tally = Tally {
            codec: &self.codec,
            metachain_sender: &self.metachain_sender,
            known: &mut self.known_addresses,
            counters: &mut counters,
        };
        index
            .scroll(&self.transactions_index, &body, &mut |hits| {
                for tx in decode_hits::<IndexedTransaction>(hits) {
                    tally.transaction(&tx);
                    tally.relayed(&tx);
                }
                Ok(())
            })
            .await?;

        let EpochCounters {
            mut record,
            active_accounts,
            active_contracts,
        } = counters;
        record.daily_active_accounts = active_accounts.len();
        record.daily_active_contract_accounts = active_contracts.len();
        record.top_active_addresses = active_accounts;
        record.top_active_contracts = active_contracts;
        Ok(record)
    }
}

struct Tally<'a> {
    codec: &'a AddressCodec,
    metachain_sender: &'a str,
    known: &'a mut BTreeSet<String>,
    counters: &'a mut EpochCounters,
}

impl Tally<'_> {
    fn transaction(&mut self, tx: &IndexedTransaction) {
        let from_metachain = tx.sender == self.metachain_sender;
        if !from_metachain {
            *self.counters.active_accounts.entry(tx.sender.clone()).or_default() += 1;
        }

        let to_contract = self.codec.is_smart_contract(&tx.receiver);
        if to_contract {
            *self
                .counters
                .active_contracts
                .entry(tx.receiver.clone())
                .or_default() += 1;
            self.counters.record.daily_contract_calls += 1;
        }
        self.counters.record.daily_transactions += 1;

        if from_metachain {
            return;
        }
        if self.known.insert(tx.sender.clone()) {
            self.counters.record.daily_new_addresses += 1;
        }
        self.note_receiver(&tx.receiver, to_contract);
    }

    fn relayed(&mut self, tx: &IndexedTransaction) {
        if tx.status == STATUS_FAIL {
            return;
        }
        let data = tx.call_data();
        if !data.starts_with(RELAYED_TX_PREFIX) {
            return;
        }
        let Some(payload) = data.split('@').nth(1) else {
            return;
        };
        let Some(inner) = decode_inner(payload) else {
            trace!(sender = %tx.sender, "undecodable relayed payload");
            return;
        };

        let sender = inner.snd_addr.as_deref().and_then(|s| STANDARD.decode(s).ok());
        let receiver = inner.rcv_addr.as_deref().and_then(|s| STANDARD.decode(s).ok());
        let (Some(sender), Some(receiver)) = (sender, receiver) else {
            return;
        };
        let (Ok(sender), Ok(receiver_address)) =
            (self.codec.encode(&sender), self.codec.encode(&receiver))
        else {
            return;
        };

        *self.counters.active_accounts.entry(sender).or_default() += 1;

        let to_contract = is_smart_contract_pubkey(&receiver);
        if to_contract {
            *self
                .counters
                .active_contracts
                .entry(receiver_address.clone())
                .or_default() += 1;
            self.counters.record.daily_contract_calls += 1;
        }
        self.note_receiver(&receiver_address, to_contract);
    }

    fn note_receiver(&mut self, receiver: &str, to_contract: bool) {
        if self.known.insert(receiver.to_string()) {
            self.counters.record.daily_new_addresses += 1;
            if to_contract {
                self.counters.record.daily_new_contract_addresses += 1;
            }
        }
    }
}

/// Relayed payloads are hex-encoded JSON; raw JSON is accepted too
fn decode_inner(payload: &str) -> Option<InnerTransaction> {
    if let Ok(bytes) = hex::decode(payload) {
        if let Ok(inner) = serde_json::from_slice(&bytes) {
            return Some(inner);
        }
    }
    serde_json::from_str(payload).ok()
}
