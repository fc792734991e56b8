//! End-to-end replay scenarios
//!
//! Genesis files are written to a temp folder, transactions go into an
//! in-memory index and the node gateway is a fixed stub.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use stake_ledger::config::{Config, ContractsConfig};
use stake_ledger::node::{NetworkConfig, VmValueRequest};
use stake_ledger::replay::GET_ALL_CONTRACT_ADDRESSES;
use stake_ledger::{
    AccountsProcessor, AddressCodec, Amount, CheckpointStore, ContractDomain, EpochDriver,
    EpochWindow, FileCheckpointStore, GenesisSeed, MemoryCheckpointStore, MemoryIndex, Metrics,
    NodeApi, ReconciliationCorrector, ReplayEngine, ReplayState, Result,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const GENESIS: i64 = 1_596_117_600;
const METACHAIN: &str = "4294967295";
const ALICE: &str = "erd1alice";
const BOB: &str = "erd1bob";
const NODE_OWNER: &str = "erd1nodeowner";

/// Gateway stub returning a fixed contract list
#[derive(Default)]
struct StaticNode {
    contracts: Vec<Vec<u8>>,
    queries: AtomicUsize,
}

#[async_trait]
impl NodeApi for StaticNode {
    async fn query_vm_values(&self, request: &VmValueRequest) -> Result<Vec<Vec<u8>>> {
        assert_eq!(request.func_name, GET_ALL_CONTRACT_ADDRESSES);
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.contracts.clone())
    }

    async fn network_config(&self) -> Result<NetworkConfig> {
        Ok(NetworkConfig {
            erd_start_time: GENESIS,
            erd_chain_id: "1".to_string(),
        })
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.contracts = ContractsConfig {
        legacy_delegation: "erd1legacy".to_string(),
        staking: "erd1staking".to_string(),
        delegation_manager: "erd1manager".to_string(),
        ..ContractsConfig::default()
    };
    config
}

fn write_genesis(dir: &Path, legacy: &[(&str, &str)], nodes: &[&str]) {
    let accounts: Vec<Value> = legacy
        .iter()
        .map(|(address, value)| json!({ "address": address, "delegation": { "value": value } }))
        .collect();
    let initial_nodes: Vec<Value> = nodes.iter().map(|a| json!({ "address": a })).collect();

    std::fs::write(dir.join("genesis.json"), Value::Array(accounts).to_string()).unwrap();
    std::fs::write(
        dir.join("nodesSetup.json"),
        json!({ "startTime": GENESIS, "initialNodes": initial_nodes }).to_string(),
    )
    .unwrap();
}

fn window(epoch: u32) -> EpochWindow {
    EpochWindow::for_epoch(GENESIS, epoch)
}

fn transaction(sender: &str, receiver: &str, data: &str, value: &str, ts: i64, scrs: Value) -> Value {
    json!({
        "sender": sender,
        "receiver": receiver,
        "data": STANDARD.encode(data),
        "value": value,
        "status": "success",
        "timestamp": ts,
        "scResults": scrs,
    })
}

/// One protocol reward transaction per epoch after genesis
fn insert_rewards(index: &MemoryIndex, epochs: u32) {
    for epoch in 1..epochs {
        index.insert(
            "transactions",
            transaction(METACHAIN, "erd1legacy", "", "0", window(epoch).start, Value::Null),
        );
    }
}

fn driver(
    config: &Config,
    index: Arc<MemoryIndex>,
    node: Arc<StaticNode>,
    checkpoints: Arc<dyn CheckpointStore>,
    seed: &GenesisSeed,
    metrics: Metrics,
) -> EpochDriver {
    EpochDriver::new(config, index, node, checkpoints, seed, GENESIS, metrics)
}

#[tokio::test]
async fn test_legacy_lifecycle_from_genesis() {
    let genesis_dir = TempDir::new().unwrap();
    write_genesis(genesis_dir.path(), &[(ALICE, "1000")], &[NODE_OWNER]);
    let seed = GenesisSeed::load(genesis_dir.path(), Amount::from(2500)).unwrap();

    let index = Arc::new(MemoryIndex::default());
    insert_rewards(&index, 8);
    index.insert(
        "transactions",
        transaction(ALICE, "erd1legacy", "stake", "200", window(5).start + 10, Value::Null),
    );
    index.insert(
        "transactions",
        transaction(ALICE, "erd1legacy", "unStake@00C8", "0", window(6).start + 10, Value::Null),
    );
    index.insert(
        "transactions",
        transaction(ALICE, "erd1legacy", "unBond", "0", window(7).start + 10, Value::Null),
    );

    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoints = Arc::new(FileCheckpointStore::open(checkpoint_dir.path()).unwrap());
    let mut driver = driver(
        &config(),
        index,
        Arc::new(StaticNode::default()),
        checkpoints.clone(),
        &seed,
        Metrics::new().unwrap(),
    );

    let stats = driver.process_epochs(8).await;
    assert_eq!(stats.len(), 8);
    for (epoch, record) in stats.iter().enumerate() {
        assert_eq!(record.epoch as usize, epoch);
        assert_eq!(record.legacy_delegation_users, 1);
        assert_eq!(record.staking_users, 1);
        assert_eq!(record.total_unique_users, 2);
    }

    let alice_at = |epoch| checkpoints.get(epoch).unwrap().unwrap()[ALICE];
    assert_eq!(alice_at(4), Amount::from(1000));
    assert_eq!(alice_at(5), Amount::from(1200));
    assert_eq!(alice_at(6), Amount::from(1000));
    assert_eq!(alice_at(7), Amount::from(1000));
    assert_eq!(
        checkpoints.get(7).unwrap().unwrap()[NODE_OWNER],
        Amount::from(2500)
    );
}

#[tokio::test]
async fn test_over_unstake_removes_entry_and_counts_anomaly() {
    let mut legacy = stake_ledger::BalanceLedger::new();
    legacy.credit(ALICE, Amount::from(100)).unwrap();
    let state = ReplayState {
        delegation_legacy_users: legacy,
        ..ReplayState::default()
    };

    let index = Arc::new(MemoryIndex::default());
    index.insert(
        "transactions",
        transaction(ALICE, "erd1legacy", "unStake@00C8", "0", window(3).start, Value::Null),
    );
    index.insert(
        "transactions",
        transaction(BOB, "erd1legacy", "unStake@01", "0", window(3).start + 1, Value::Null),
    );

    let metrics = Metrics::new().unwrap();
    let mut engine = ReplayEngine::new(
        index,
        Arc::new(StaticNode::default()),
        config().contracts,
        "transactions",
        239,
        metrics.clone(),
        state,
    );
    engine
        .replay_epoch(3, window(3), ContractDomain::LegacyDelegation)
        .await
        .unwrap();

    assert!(engine.state().delegation_legacy_users.is_empty());
    assert_eq!(
        metrics
            .ledger_anomalies
            .with_label_values(&["would_go_negative"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .ledger_anomalies
            .with_label_values(&["missing_entry"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_unstake_wider_than_any_amount_clears_entry() {
    let mut legacy = stake_ledger::BalanceLedger::new();
    legacy.credit(ALICE, Amount::from(100)).unwrap();
    legacy.credit(BOB, Amount::from(5)).unwrap();
    let state = ReplayState {
        delegation_legacy_users: legacy,
        ..ReplayState::default()
    };

    // 2^104
    let call = format!("unStake@01{}", "00".repeat(13));
    let index = Arc::new(MemoryIndex::default());
    index.insert(
        "transactions",
        transaction(ALICE, "erd1legacy", &call, "0", window(3).start, Value::Null),
    );

    let metrics = Metrics::new().unwrap();
    let mut engine = ReplayEngine::new(
        index,
        Arc::new(StaticNode::default()),
        config().contracts,
        "transactions",
        239,
        metrics.clone(),
        state,
    );
    engine
        .replay_epoch(3, window(3), ContractDomain::LegacyDelegation)
        .await
        .unwrap();

    let legacy = &engine.state().delegation_legacy_users;
    assert!(!legacy.contains(ALICE));
    assert_eq!(legacy.get(BOB), Some(Amount::from(5)));
    assert_eq!(
        metrics
            .ledger_anomalies
            .with_label_values(&["would_go_negative"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_staking_zero_balance_leaves_no_entry() {
    let index = Arc::new(MemoryIndex::default());
    let w = window(2);
    index.insert(
        "transactions",
        transaction(BOB, "erd1staking", "stake@01@aa", "2500", w.start, Value::Null),
    );
    index.insert(
        "transactions",
        transaction(
            BOB,
            "erd1staking",
            "unBond@aa",
            "0",
            w.start + 5,
            json!([{ "nonce": 0, "receiver": BOB, "value": "2500" }]),
        ),
    );

    let mut engine = ReplayEngine::new(
        index,
        Arc::new(StaticNode::default()),
        config().contracts,
        "transactions",
        239,
        Metrics::new().unwrap(),
        ReplayState::default(),
    );
    engine.replay_epoch(2, w, ContractDomain::Staking).await.unwrap();

    assert!(!engine.state().staking_users.contains(BOB));
    assert_eq!(engine.state().staking_users.total().unwrap(), Amount::ZERO);
}

#[tokio::test]
async fn test_delegate_credits_staking_and_delegator_ledgers() {
    let codec = AddressCodec::new("erd");
    let mut pubkey = [0u8; 32];
    pubkey[31] = 42;
    let spawned = codec.encode(&pubkey).unwrap();

    let index = Arc::new(MemoryIndex::default());
    let w = window(239);
    index.insert(
        "transactions",
        transaction(BOB, &spawned, "delegate", "500", w.start + 1, Value::Null),
    );

    let node = Arc::new(StaticNode {
        contracts: vec![pubkey.to_vec()],
        ..StaticNode::default()
    });
    let mut engine = ReplayEngine::new(
        index,
        node.clone(),
        config().contracts,
        "transactions",
        239,
        Metrics::new().unwrap(),
        ReplayState::default(),
    );
    engine
        .replay_epoch(239, w, ContractDomain::DelegationManager)
        .await
        .unwrap();

    let state = engine.state();
    assert_eq!(state.staking_users.get(BOB), Some(Amount::from(500)));
    assert_eq!(state.delegator_delegation_manager.get(BOB), Some(Amount::from(500)));
    assert_eq!(state.manager_contracts, vec![spawned]);
    assert_eq!(node.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_reward_fails_only_that_epoch() {
    let genesis_dir = TempDir::new().unwrap();
    write_genesis(genesis_dir.path(), &[(ALICE, "1000")], &[ALICE]);
    let seed = GenesisSeed::load(genesis_dir.path(), Amount::from(2500)).unwrap();

    let index = Arc::new(MemoryIndex::default());
    // no reward in epoch 2
    for epoch in [1, 3] {
        index.insert(
            "transactions",
            transaction(METACHAIN, "erd1legacy", "", "0", window(epoch).start, Value::Null),
        );
    }
    index.insert(
        "transactions",
        transaction(BOB, "erd1legacy", "stake", "70", window(2).start + 3, Value::Null),
    );

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let metrics = Metrics::new().unwrap();
    let mut driver = driver(
        &config(),
        index,
        Arc::new(StaticNode::default()),
        checkpoints.clone(),
        &seed,
        metrics.clone(),
    );
    let stats = driver.process_epochs(4).await;

    assert_eq!(stats.len(), 4);
    assert_eq!(stats[2].epoch, 2);
    assert_eq!(stats[2].total_unique_users, 0);
    assert_eq!(stats[3].total_unique_users, 1);
    assert_eq!(checkpoints.epochs(), vec![0, 1, 3]);
    assert_eq!(metrics.epochs_failed.get(), 1);
    assert_eq!(metrics.epochs_processed.get(), 3);
    assert_eq!(
        checkpoints.get(3).unwrap().unwrap()[ALICE],
        Amount::from(3500)
    );
}

#[tokio::test]
async fn test_accounts_tiers_read_stake_checkpoints() {
    let genesis_dir = TempDir::new().unwrap();
    write_genesis(
        genesis_dir.path(),
        &[(ALICE, "900000000000000000000")],
        &[NODE_OWNER],
    );
    let seed = GenesisSeed::load(genesis_dir.path(), Amount::tokens(2500)).unwrap();

    let index = Arc::new(MemoryIndex::default());
    index.insert(
        "accountshistory",
        json!({
            "address": ALICE,
            "balance": Amount::tokens(200).to_string(),
            "timestamp": window(0).start + 1,
        }),
    );

    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::open(checkpoint_dir.path()).unwrap());
    let config = config();

    let mut stake = driver(
        &config,
        index.clone(),
        Arc::new(StaticNode::default()),
        checkpoints.clone(),
        &seed,
        Metrics::new().unwrap(),
    );
    let stake_stats = stake.process_epochs(1).await;
    assert_eq!(stake_stats[0].total_unique_users, 2);

    let mut accounts = AccountsProcessor::new(
        index,
        checkpoints,
        AddressCodec::new("erd"),
        "accountshistory",
        GENESIS,
        config.tiers.clone(),
        ReconciliationCorrector::new(config.reconciliation.clone()),
    );
    let stats = accounts.process_epochs(1).await;
    let record = &stats[0];

    assert_eq!(record.total_addresses, 1);
    // alice: 200 wallet + 900 staked, node owner: 2500 staked
    assert_eq!(record.tiers.as_array(), [2, 2, 2, 2, 2, 2]);
    assert!(record.tiers.is_monotonic());
}
