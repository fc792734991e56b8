//! Epoch loop for stake statistics
//!
//! [`EpochDriver`] walks epochs in increasing order. Per epoch it reads the
//! contract balances, replays the three contract domains, derives the
//! [`StakeInfoEpoch`] roll-up and persists the epoch's balance checkpoint.
//! A failed epoch is logged, optionally rolled back, and reported as a
//! zeroed record carrying its index.

use crate::balance::BalanceSnapshotFetcher;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::genesis::GenesisSeed;
use crate::index::SearchIndex;
use crate::ledger;
use crate::metrics::Metrics;
use crate::node::NodeApi;
use crate::replay::{ContractDomain, ReplayEngine, ReplayState};
use crate::types::{Amount, EpochWindow, StakeInfoEpoch};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Drives the replay epoch by epoch
pub struct EpochDriver {
    engine: ReplayEngine,
    fetcher: BalanceSnapshotFetcher,
    checkpoints: Arc<dyn CheckpointStore>,
    legacy_contract: String,
    staking_contract: String,
    genesis_time: i64,
    legacy_active_baseline: Amount,
    rollback_failed_epochs: bool,
    metrics: Metrics,
}

impl EpochDriver {
    /// Driver seeded from `seed`
    pub fn new(
        config: &Config,
        index: Arc<dyn SearchIndex>,
        node: Arc<dyn NodeApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        seed: &GenesisSeed,
        genesis_time: i64,
        metrics: Metrics,
    ) -> Self {
        let engine = ReplayEngine::new(
            Arc::clone(&index),
            node,
            config.contracts.clone(),
            config.elastic.transactions_index.clone(),
            config.replay.discovery_epoch,
            metrics.clone(),
            ReplayState::from_genesis(seed),
        );
        let fetcher = BalanceSnapshotFetcher::new(
            index,
            config.elastic.accounts_history_index.clone(),
            config.elastic.transactions_index.clone(),
            config.contracts.metachain_sender.clone(),
            genesis_time,
        );

        Self {
            engine,
            fetcher,
            checkpoints,
            legacy_contract: config.contracts.legacy_delegation.clone(),
            staking_contract: config.contracts.staking.clone(),
            genesis_time,
            legacy_active_baseline: config.replay.legacy_active_baseline,
            rollback_failed_epochs: config.replay.rollback_failed_epochs,
            metrics,
        }
    }

    /// Replay engine (for inspection)
    pub fn engine(&self) -> &ReplayEngine {
        &self.engine
    }

    /// Process epochs `0..end_epoch`; one record per epoch, in order
    pub async fn process_epochs(&mut self, end_epoch: u32) -> Vec<StakeInfoEpoch> {
        let mut stats = Vec::with_capacity(end_epoch as usize);

        for epoch in 0..end_epoch {
            info!(epoch, "processing stake info");
            let started = Instant::now();

            let engine_snapshot = self.rollback_failed_epochs.then(|| self.engine.snapshot());
            let cache_snapshot = self.rollback_failed_epochs.then(|| self.fetcher.cache());

            match self.process_epoch(epoch).await {
                Ok(record) => {
                    self.metrics
                        .record_epoch_processed(started.elapsed().as_secs_f64());
                    stats.push(record);
                }
                Err(e) => {
                    error!(epoch, error = %e, "cannot process stake info for epoch");
                    self.metrics.record_epoch_failed();
                    if let Some(snapshot) = engine_snapshot {
                        self.engine.rollback_to(snapshot);
                    }
                    if let Some(cache) = cache_snapshot {
                        self.fetcher.restore_cache(cache);
                    }
                    stats.push(StakeInfoEpoch {
                        epoch,
                        ..StakeInfoEpoch::default()
                    });
                }
            }
        }

        stats
    }

    /// Process a single epoch
    pub async fn process_epoch(&mut self, epoch: u32) -> Result<StakeInfoEpoch> {
        let window = EpochWindow::for_epoch(self.genesis_time, epoch);

        let legacy_balance = self.fetcher.get_balance(&self.legacy_contract, window).await?;
        let staking_balance = self.fetcher.get_balance(&self.staking_contract, window).await?;
        let reward = self
            .fetcher
            .reward_tx_value(&self.legacy_contract, window)
            .await?;

        for domain in ContractDomain::ALL {
            self.engine.replay_epoch(epoch, window, domain).await?;
        }

        self.engine.accumulate_reward(reward)?;
        let state = self.engine.state();

        let legacy_no_rewards = legacy_balance
            .checked_sub(state.accumulated_reward_delegation)?
            .checked_add(state.claimed_rewards)?;
        let staking_no_jail = staking_balance.checked_sub(state.accumulated_unjail)?;

        let record = StakeInfoEpoch {
            epoch,
            total_staked: legacy_no_rewards.checked_add(staking_no_jail)?,
            legacy_delegation_users: state.delegation_legacy_users.len(),
            legacy_delegation: legacy_no_rewards,
            staking_users: state.staking_users.len(),
            staking: staking_no_jail,
            total_unique_users: ledger::unique_users(
                &state.delegation_legacy_users,
                &state.staking_users,
            ),
            delegation_manager_users: state.delegator_delegation_manager.len(),
            delegation_manager_staked: state.delegator_delegation_manager.total()?,
            active_legacy_delegation: self.legacy_active_baseline.checked_add(legacy_no_rewards)?,
        };

        let checkpoint = ledger::merge(&state.delegation_legacy_users, &state.staking_users)?;
        if !self.checkpoints.put(epoch, &checkpoint)? {
            debug!(epoch, "checkpoint already present, kept");
        }

        info!(
            epoch,
            day = ?window.start_date(),
            total_staked = %record.total_staked,
            unique_users = record.total_unique_users,
            "stake info computed"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::ContractsConfig;
    use crate::index::MemoryIndex;
    use crate::ledger::BalanceLedger;
    use crate::node::MockNodeApi;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::json;
    use std::collections::BTreeSet;

    const GENESIS: i64 = 1_596_117_600;

    fn config() -> Config {
        let mut config = Config::default();
        config.contracts = ContractsConfig {
            legacy_delegation: "erd1legacy".to_string(),
            staking: "erd1staking".to_string(),
            delegation_manager: "erd1manager".to_string(),
            ..ContractsConfig::default()
        };
        config.replay.legacy_active_baseline = Amount::from(5);
        config
    }

    fn seed() -> GenesisSeed {
        let mut legacy = BalanceLedger::new();
        legacy.credit("erd1a", Amount::from(1000)).unwrap();
        let mut staking = BalanceLedger::new();
        staking.credit("erd1a", Amount::from(2500)).unwrap();
        staking.credit("erd1b", Amount::from(2500)).unwrap();
        GenesisSeed {
            delegation_legacy_users: legacy,
            staking_users: staking,
            addresses: BTreeSet::new(),
            start_time: None,
        }
    }

    fn balance(index: &MemoryIndex, address: &str, value: &str, ts: i64) {
        index.insert(
            "accountshistory",
            json!({ "address": address, "balance": value, "timestamp": ts }),
        );
    }

    fn transaction(index: &MemoryIndex, sender: &str, receiver: &str, data: &str, value: &str, ts: i64) {
        index.insert(
            "transactions",
            json!({
                "sender": sender,
                "receiver": receiver,
                "data": STANDARD.encode(data),
                "value": value,
                "status": "success",
                "timestamp": ts,
            }),
        );
    }

    #[tokio::test]
    async fn test_two_epochs_roll_up() {
        let index = Arc::new(MemoryIndex::default());
        let e0 = EpochWindow::for_epoch(GENESIS, 0);
        let e1 = EpochWindow::for_epoch(GENESIS, 1);

        balance(&index, "erd1legacy", "1000", e0.start + 1);
        balance(&index, "erd1staking", "5000", e0.start + 1);
        balance(&index, "erd1legacy", "1230", e1.start + 9);

        transaction(&index, "4294967295", "erd1legacy", "", "30", e1.start + 2);
        transaction(&index, "erd1c", "erd1legacy", "stake", "200", e1.start + 3);
        transaction(&index, "erd1c", "erd1staking", "unJail@aa", "10", e1.start + 4);

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let mut driver = EpochDriver::new(
            &config(),
            index,
            Arc::new(MockNodeApi::new()),
            checkpoints.clone(),
            &seed(),
            GENESIS,
            Metrics::new().unwrap(),
        );

        let stats = driver.process_epochs(2).await;
        assert_eq!(stats.len(), 2);

        assert_eq!(stats[0].epoch, 0);
        assert_eq!(stats[0].legacy_delegation, Amount::from(1000));
        assert_eq!(stats[0].staking, Amount::from(5000));
        assert_eq!(stats[0].total_unique_users, 2);

        assert_eq!(stats[1].epoch, 1);
        assert_eq!(stats[1].legacy_delegation, Amount::from(1200));
        assert_eq!(stats[1].staking, Amount::from(4990));
        assert_eq!(stats[1].total_staked, Amount::from(6190));
        assert_eq!(stats[1].legacy_delegation_users, 2);
        assert_eq!(stats[1].total_unique_users, 3);
        assert_eq!(stats[1].active_legacy_delegation, Amount::from(1205));

        let checkpoint = checkpoints.get(1).unwrap().unwrap();
        assert_eq!(checkpoint["erd1a"], Amount::from(3500));
        assert_eq!(checkpoint["erd1c"], Amount::from(200));
        assert_eq!(checkpoints.epochs(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_failed_epoch_rolls_back_and_keeps_slot() {
        let index = Arc::new(MemoryIndex::default());
        let e1 = EpochWindow::for_epoch(GENESIS, 1);
        transaction(&index, "4294967295", "erd1legacy", "", "30", e1.start + 2);
        transaction(&index, "erd1c", "erd1legacy", "stake", "200", e1.start + 3);

        // the legacy domain replays, then discovery fails
        let mut config = config();
        config.replay.discovery_epoch = 1;
        let mut node = MockNodeApi::new();
        node.expect_query_vm_values()
            .returning(|_| Err(crate::Error::Fetch("gateway down".to_string())));

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let metrics = Metrics::new().unwrap();
        let mut driver = EpochDriver::new(
            &config,
            index,
            Arc::new(node),
            checkpoints.clone(),
            &seed(),
            GENESIS,
            metrics.clone(),
        );

        let stats = driver.process_epochs(2).await;
        assert_eq!(stats[1], StakeInfoEpoch { epoch: 1, ..StakeInfoEpoch::default() });
        assert!(!driver.engine().state().delegation_legacy_users.contains("erd1c"));
        assert_eq!(checkpoints.epochs(), vec![0]);
        assert_eq!(metrics.epochs_failed.get(), 1);
    }
}
