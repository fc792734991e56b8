//! Transaction replay
//!
//! Replays the transactions received by each contract domain during an
//! epoch window, in timestamp order, against the ledgers in [`ReplayState`].
//!
//! # Domains
//!
//! - **Legacy delegation**: `stake`, `unStake@<hex>`, `unBond`, `claimRewards`
//! - **Staking**: `stake*`, `unJail*`, `unBond*` / `claim` / `unBondTokens`
//! - **Delegation manager**: `delegate`, `withdraw`, `reDelegateRewards` on
//!   every discovered contract, and `createNewDelegationContract@…` on the
//!   manager itself
//!
//! Ledger drift (missing entry, debit past zero) and malformed call
//! arguments are logged, counted and resolved in place. Only transport and
//! discovery errors leave [`ReplayEngine::replay_epoch`].

use crate::address::AddressCodec;
use crate::config::ContractsConfig;
use crate::error::LedgerDrift;
use crate::genesis::GenesisSeed;
use crate::index::{decode_hits, SearchIndex};
use crate::ledger::{BalanceLedger, Debit};
use crate::metrics::Metrics;
use crate::node::{NodeApi, VmValueRequest};
use crate::query;
use crate::types::{Amount, EpochWindow, IndexedTransaction, ScResult};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// View function listing the contracts spawned by the delegation manager
pub const GET_ALL_CONTRACT_ADDRESSES: &str = "getAllContractAddresses";

/// Call on the manager that spawns a contract with an initial delegation
const CREATE_DELEGATION_CONTRACT: &str = "createNewDelegationContract@";

/// Memo of the SCR paying out claimed legacy rewards
const REWARDS_CLAIM_MEMO: &[u8] = b"delegation rewards claim";

/// Contract family whose transactions are replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractDomain {
    /// Legacy delegation contract
    LegacyDelegation,
    /// Staking contract
    Staking,
    /// Delegation manager and the contracts it spawned
    DelegationManager,
}

impl ContractDomain {
    /// Replay order within an epoch
    pub const ALL: [ContractDomain; 3] = [
        ContractDomain::LegacyDelegation,
        ContractDomain::Staking,
        ContractDomain::DelegationManager,
    ];

    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractDomain::LegacyDelegation => "legacy_delegation",
            ContractDomain::Staking => "staking",
            ContractDomain::DelegationManager => "delegation_manager",
        }
    }
}

impl fmt::Display for ContractDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the replay mutates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayState {
    /// Legacy delegation contract depositors
    pub delegation_legacy_users: BalanceLedger,
    /// Staking contract and delegation manager stakers
    pub staking_users: BalanceLedger,
    /// Delegation manager delegators
    pub delegator_delegation_manager: BalanceLedger,
    /// Legacy rewards claimed so far
    pub claimed_rewards: Amount,
    /// Unjail payments received by the staking contract so far
    pub accumulated_unjail: Amount,
    /// Legacy reward transactions received so far
    pub accumulated_reward_delegation: Amount,
    /// Contracts spawned by the delegation manager (last discovery)
    pub manager_contracts: Vec<String>,
}

impl ReplayState {
    /// State seeded from genesis
    pub fn from_genesis(seed: &GenesisSeed) -> Self {
        Self {
            delegation_legacy_users: seed.delegation_legacy_users.clone(),
            staking_users: seed.staking_users.clone(),
            ..Self::default()
        }
    }
}

/// Applies indexed transactions to the ledgers
pub struct ReplayEngine {
    index: Arc<dyn SearchIndex>,
    node: Arc<dyn NodeApi>,
    codec: AddressCodec,
    contracts: ContractsConfig,
    transactions_index: String,
    discovery_epoch: u32,
    metrics: Metrics,
    state: ReplayState,
}

impl ReplayEngine {
    /// Engine starting from `state`
    pub fn new(
        index: Arc<dyn SearchIndex>,
        node: Arc<dyn NodeApi>,
        contracts: ContractsConfig,
        transactions_index: impl Into<String>,
        discovery_epoch: u32,
        metrics: Metrics,
        state: ReplayState,
    ) -> Self {
        Self {
            index,
            node,
            codec: AddressCodec::new(contracts.address_hrp.clone()),
            contracts,
            transactions_index: transactions_index.into(),
            discovery_epoch,
            metrics,
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ReplayState {
        self.state.clone()
    }

    /// Replace the current state with an earlier snapshot
    pub fn rollback_to(&mut self, snapshot: ReplayState) {
        self.state = snapshot;
    }

    /// Add the epoch's legacy reward transaction to the running total
    pub fn accumulate_reward(&mut self, reward: Amount) -> Result<()> {
        self.state.accumulated_reward_delegation =
            self.state.accumulated_reward_delegation.checked_add(reward)?;
        Ok(())
    }

    /// Replay every transaction `domain` received in `window`
    pub async fn replay_epoch(
        &mut self,
        epoch: u32,
        window: EpochWindow,
        domain: ContractDomain,
    ) -> Result<()> {
        let targets = match domain {
            ContractDomain::LegacyDelegation => vec![self.contracts.legacy_delegation.clone()],
            ContractDomain::Staking => vec![self.contracts.staking.clone()],
            ContractDomain::DelegationManager => {
                if epoch < self.discovery_epoch {
                    return Ok(());
                }
                self.state.manager_contracts = self.discover_manager_contracts().await?;
                info!(
                    epoch,
                    contracts = self.state.manager_contracts.len(),
                    "delegation manager contracts discovered"
                );

                let mut targets = vec![self.contracts.delegation_manager.clone()];
                targets.extend(self.state.manager_contracts.iter().cloned());
                targets
            }
        };

        let index = Arc::clone(&self.index);
        for target in targets {
            let body = query::transactions_to(&target, window);
            let mut dispatcher = Dispatcher {
                state: &mut self.state,
                contracts: &self.contracts,
                metrics: &self.metrics,
                domain,
            };
            index
                .scroll(&self.transactions_index, &body, &mut |hits| {
                    let received = hits.len();
                    let transactions = decode_hits::<IndexedTransaction>(hits);
                    dispatcher
                        .metrics
                        .record_anomalies("decode", received - transactions.len());
                    for tx in transactions {
                        dispatcher.dispatch(&tx)?;
                    }
                    Ok(())
                })
                .await?;
        }

        self.metrics
            .set_ledger_size("delegation_legacy_users", self.state.delegation_legacy_users.len());
        self.metrics
            .set_ledger_size("staking_users", self.state.staking_users.len());
        self.metrics.set_ledger_size(
            "delegator_delegation_manager",
            self.state.delegator_delegation_manager.len(),
        );
        Ok(())
    }

    async fn discover_manager_contracts(&self) -> Result<Vec<String>> {
        let manager = &self.contracts.delegation_manager;
        let request = VmValueRequest {
            sc_address: manager.clone(),
            func_name: GET_ALL_CONTRACT_ADDRESSES.to_string(),
            caller: Some(manager.clone()),
            value: None,
            args: Vec::new(),
        };

        let return_data = self
            .node
            .query_vm_values(&request)
            .await
            .map_err(|e| Error::Discovery(format!("{}: {}", GET_ALL_CONTRACT_ADDRESSES, e)))?;

        return_data
            .iter()
            .map(|pubkey| {
                self.codec
                    .encode(pubkey)
                    .map_err(|e| Error::Discovery(format!("contract address: {}", e)))
            })
            .collect()
    }
}

/// Borrowed view of the engine used while a scroll is in flight
struct Dispatcher<'a> {
    state: &'a mut ReplayState,
    contracts: &'a ContractsConfig,
    metrics: &'a Metrics,
    domain: ContractDomain,
}

impl Dispatcher<'_> {
    fn dispatch(&mut self, tx: &IndexedTransaction) -> Result<()> {
        if !tx.is_success() {
            return Ok(());
        }
        self.metrics.record_dispatch(self.domain.as_str());

        let outcome = match self.domain {
            ContractDomain::LegacyDelegation => self.apply_legacy(tx),
            ContractDomain::Staking => self.apply_staking(tx),
            ContractDomain::DelegationManager => self.apply_manager(tx),
        };

        match outcome {
            Err(e) if !e.is_epoch_fatal() => {
                warn!(
                    domain = %self.domain,
                    sender = %tx.sender,
                    data = %tx.call_data(),
                    error = %e,
                    "skipping transaction"
                );
                self.metrics.record_anomaly("decode");
                Ok(())
            }
            other => other,
        }
    }

    fn apply_legacy(&mut self, tx: &IndexedTransaction) -> Result<()> {
        if tx.sender == self.contracts.metachain_sender {
            return Ok(());
        }

        let data = tx.call_data();
        match &*data {
            "stake" => {
                debug!(sender = %tx.sender, value = %tx.value, "legacy stake");
                self.state
                    .delegation_legacy_users
                    .credit(&tx.sender, parse_value(&tx.value)?)
            }
            "unBond" => {
                if !self.state.delegation_legacy_users.contains(&tx.sender) {
                    self.drift(LedgerDrift::MissingEntry {
                        address: tx.sender.clone(),
                    });
                    return Ok(());
                }
                self.state.delegation_legacy_users.remove_if_zero(&tx.sender);
                Ok(())
            }
            "claimRewards" => {
                for scr in &tx.sc_results {
                    if scr.is_value_transfer() && scr.data == REWARDS_CLAIM_MEMO {
                        self.state.claimed_rewards = self
                            .state
                            .claimed_rewards
                            .checked_add(parse_value(&scr.value)?)?;
                    }
                }
                Ok(())
            }
            call if call.starts_with("unStake") => {
                if !self.state.delegation_legacy_users.contains(&tx.sender) {
                    self.drift(LedgerDrift::MissingEntry {
                        address: tx.sender.clone(),
                    });
                    return Ok(());
                }
                let amount = match call_argument(call) {
                    Ok(amount) => amount,
                    Err(Error::Overflow(_)) => {
                        let available = self
                            .state
                            .delegation_legacy_users
                            .remove(&tx.sender)
                            .unwrap_or(Amount::ZERO);
                        self.drift(LedgerDrift::WouldGoNegative {
                            address: tx.sender.clone(),
                            available: available.to_string(),
                            requested: format!("0x{}", call_hex_argument(call)?),
                        });
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                debug!(sender = %tx.sender, amount = %amount, "legacy unStake");
                let outcome = self.state.delegation_legacy_users.debit(&tx.sender, amount)?;
                self.settle(outcome);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_staking(&mut self, tx: &IndexedTransaction) -> Result<()> {
        let data = tx.call_data();
        let call = &*data;
        if call.starts_with("changeRewardAddress") || call.starts_with("unStake") {
            return Ok(());
        }

        if call.starts_with("unJail") {
            self.state.accumulated_unjail = self
                .state
                .accumulated_unjail
                .checked_add(parse_value(&tx.value)?)?;
        } else if call.starts_with("stake") {
            debug!(sender = %tx.sender, value = %tx.value, "stake");
            self.state
                .staking_users
                .credit(&tx.sender, parse_value(&tx.value)?)?;
        } else if call.starts_with("unBond") || call == "claim" || call == "unBondTokens" {
            if let Some(scr) = refund_to_sender(tx) {
                let amount = parse_value(&scr.value)?;
                let outcome = self.state.staking_users.debit(&tx.sender, amount)?;
                self.settle(outcome);
            }
        }
        Ok(())
    }

    fn apply_manager(&mut self, tx: &IndexedTransaction) -> Result<()> {
        let data = tx.call_data();
        let call = &*data;

        if tx.receiver == self.contracts.delegation_manager {
            if call.starts_with(CREATE_DELEGATION_CONTRACT) {
                return self.delegate(&tx.sender, parse_value(&tx.value)?);
            }
            return Ok(());
        }

        match call {
            "delegate" => self.delegate(&tx.sender, parse_value(&tx.value)?),
            "withdraw" => {
                let Some(scr) = refund_to_sender(tx) else {
                    return Ok(());
                };
                let amount = parse_value(&scr.value)?;
                self.for_each_manager_ledger(|ledger| {
                    Ok(ledger.debit(&tx.sender, amount)?.err())
                })
            }
            "reDelegateRewards" => {
                for scr in &tx.sc_results {
                    if !scr.is_value_transfer() || scr.receiver != self.contracts.staking {
                        continue;
                    }
                    let amount = parse_value(&scr.value)?;
                    self.for_each_manager_ledger(|ledger| {
                        if !ledger.contains(&tx.sender) {
                            return Ok(Some(LedgerDrift::MissingEntry {
                                address: tx.sender.clone(),
                            }));
                        }
                        ledger.credit(&tx.sender, amount)?;
                        Ok(None)
                    })?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn delegate(&mut self, sender: &str, amount: Amount) -> Result<()> {
        debug!(sender = %sender, amount = %amount, "delegate");
        self.for_each_manager_ledger(|ledger| {
            ledger.credit(sender, amount)?;
            Ok(None)
        })
    }

    /// Apply `op` to the staking ledger, then to the delegator ledger
    fn for_each_manager_ledger<F>(&mut self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut BalanceLedger) -> Result<Option<LedgerDrift>>,
    {
        for ledger in [
            &mut self.state.staking_users,
            &mut self.state.delegator_delegation_manager,
        ] {
            if let Some(drift) = op(ledger)? {
                report_drift(self.metrics, self.domain, drift);
            }
        }
        Ok(())
    }

    fn settle(&self, outcome: std::result::Result<Debit, LedgerDrift>) {
        if let Err(drift) = outcome {
            self.drift(drift);
        }
    }

    fn drift(&self, drift: LedgerDrift) {
        report_drift(self.metrics, self.domain, drift);
    }
}

fn report_drift(metrics: &Metrics, domain: ContractDomain, drift: LedgerDrift) {
    let kind = match drift {
        LedgerDrift::MissingEntry { .. } => "missing_entry",
        LedgerDrift::WouldGoNegative { .. } => "would_go_negative",
    };
    warn!(domain = %domain, anomaly = kind, "{}", drift);
    metrics.record_anomaly(kind);
}

/// First nonce-zero SCR paying value back to the transaction sender
fn refund_to_sender(tx: &IndexedTransaction) -> Option<&ScResult> {
    tx.sc_results
        .iter()
        .find(|scr| scr.is_value_transfer() && scr.receiver == tx.sender)
}

/// Decimal value field; empty means zero
fn parse_value(value: &str) -> Result<Amount> {
    if value.is_empty() {
        return Ok(Amount::ZERO);
    }
    Amount::parse(value)
}

/// First `@` argument of a call
fn call_hex_argument(call: &str) -> Result<&str> {
    call.split('@')
        .nth(1)
        .ok_or_else(|| Error::Decode(format!("missing argument in {:?}", call)))
}

/// First `@` argument of a call, hex-decoded
fn call_argument(call: &str) -> Result<Amount> {
    Amount::from_hex(call_hex_argument(call)?)
}
