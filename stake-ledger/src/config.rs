//! Configuration for the stake statistics tool

use crate::types::{Amount, UNITS_PER_TOKEN};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Search index connection
    pub elastic: ElasticConfig,

    /// Node REST API
    pub node: NodeConfig,

    /// Contract and system addresses
    pub contracts: ContractsConfig,

    /// Genesis files
    pub genesis: GenesisConfig,

    /// Replay behaviour
    pub replay: ReplayConfig,

    /// Balance tier thresholds
    pub tiers: TierConfig,

    /// Point corrections for bucket counters
    pub reconciliation: ReconciliationConfig,

    /// Checkpoint storage
    pub checkpoint: CheckpointConfig,
}

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    /// Base URL
    pub url: String,

    /// Basic auth user
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Transactions index
    pub transactions_index: String,

    /// Account balance history index
    pub accounts_history_index: String,

    /// Documents per scroll page
    pub scroll_page_size: usize,

    /// Scroll context keep-alive
    pub scroll_keep_alive: String,

    /// HTTP timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            transactions_index: "transactions".to_string(),
            accounts_history_index: "accountshistory".to_string(),
            scroll_page_size: 9000,
            scroll_keep_alive: "10m".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// Node API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base URL of the gateway
    pub api_url: String,

    /// HTTP timeout (seconds)
    pub request_timeout_secs: u64,

    /// Genesis unix time; fetched from `/network/config` when unset
    pub genesis_time: Option<i64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://gateway.elrond.com".to_string(),
            request_timeout_secs: 60,
            genesis_time: None,
        }
    }
}

/// Contract addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Human-readable address prefix
    pub address_hrp: String,

    /// Legacy delegation contract
    pub legacy_delegation: String,

    /// Staking contract
    pub staking: String,

    /// Delegation manager (factory) contract
    pub delegation_manager: String,

    /// Sender id used by protocol-generated transactions
    pub metachain_sender: String,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            address_hrp: "erd".to_string(),
            legacy_delegation: "erd1qqqqqqqqqqqqqpgqxwakt2g7u9atsnr03gqcgmhcv38pt7mkd94q6shuwt"
                .to_string(),
            staking: "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqplllst77y4l".to_string(),
            delegation_manager: "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqylllslmq6y6"
                .to_string(),
            metachain_sender: u32::MAX.to_string(),
        }
    }
}

/// Genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Folder with `genesis.json` and `nodesSetup.json`
    pub dir: PathBuf,

    /// Stake credited per initial node
    pub node_stake: Amount,

    /// System addresses known at genesis besides accounts and nodes
    pub system_addresses: Vec<String>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let contracts = ContractsConfig::default();
        Self {
            dir: PathBuf::from("./genesis"),
            node_stake: Amount::tokens(2500),
            system_addresses: vec![contracts.staking, contracts.legacy_delegation],
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// First epoch with delegation manager contracts
    pub discovery_epoch: u32,

    /// Restore ledgers to their pre-epoch state when an epoch fails
    pub rollback_failed_epochs: bool,

    /// Externally sourced active legacy stake added to the no-rewards balance
    pub legacy_active_baseline: Amount,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            discovery_epoch: 239,
            rollback_failed_epochs: true,
            legacy_active_baseline: Amount::ZERO,
        }
    }
}

/// Balance tier thresholds (inclusive lower bounds, base units)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// 0.1 token
    pub tenth: Amount,
    /// 1 token
    pub one: Amount,
    /// 10 tokens
    pub ten: Amount,
    /// 100 tokens
    pub hundred: Amount,
    /// 1000 tokens
    pub thousand: Amount,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tenth: Amount::from(UNITS_PER_TOKEN / 10),
            one: Amount::tokens(1),
            ten: Amount::tokens(10),
            hundred: Amount::tokens(100),
            thousand: Amount::tokens(1000),
        }
    }
}

/// Fixed corrections subtracted from bucket counters from `from_epoch` on.
///
/// The values compensate an externally verified event the replay cannot
/// observe; they are versioned data, not derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Correction table version
    pub version: String,
    /// First corrected epoch
    pub from_epoch: u32,
    /// Non-zero counter
    pub non_zero: u64,
    /// ≥ 0.1 counter
    pub tenth: u64,
    /// ≥ 1 counter
    pub one: u64,
    /// ≥ 10 counter
    pub ten: u64,
    /// ≥ 100 counter
    pub hundred: u64,
    /// ≥ 1000 counter
    pub thousand: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            from_epoch: 239,
            non_zero: 3,
            tenth: 3,
            one: 3,
            ten: 3,
            hundred: 2,
            thousand: 1,
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Folder with `epoch{N}.json` files
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./balances"),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn from_env(mut self) -> crate::Result<Self> {
        if let Ok(url) = std::env::var("STAKE_STATS_ELASTIC_URL") {
            self.elastic.url = url;
        }

        if let Ok(username) = std::env::var("STAKE_STATS_ELASTIC_USERNAME") {
            self.elastic.username = Some(username);
        }

        if let Ok(password) = std::env::var("STAKE_STATS_ELASTIC_PASSWORD") {
            self.elastic.password = Some(password);
        }

        if let Ok(url) = std::env::var("STAKE_STATS_API_URL") {
            self.node.api_url = url;
        }

        if let Ok(dir) = std::env::var("STAKE_STATS_CHECKPOINT_DIR") {
            self.checkpoint.dir = PathBuf::from(dir);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations the replay cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.elastic.scroll_page_size == 0 {
            return Err(crate::Error::Config(
                "elastic.scroll_page_size must be positive".to_string(),
            ));
        }

        if self.genesis.node_stake.is_negative() || self.genesis.node_stake.is_zero() {
            return Err(crate::Error::Config(
                "genesis.node_stake must be positive".to_string(),
            ));
        }

        let t = &self.tiers;
        let ordered = Amount::ZERO < t.tenth
            && t.tenth <= t.one
            && t.one <= t.ten
            && t.ten <= t.hundred
            && t.hundred <= t.thousand;
        if !ordered {
            return Err(crate::Error::Config(
                "tier thresholds must be positive and non-decreasing".to_string(),
            ));
        }

        for (name, address) in [
            ("contracts.legacy_delegation", &self.contracts.legacy_delegation),
            ("contracts.staking", &self.contracts.staking),
            ("contracts.delegation_manager", &self.contracts.delegation_manager),
        ] {
            if address.is_empty() {
                return Err(crate::Error::Config(format!("{} must be set", name)));
            }
        }

        Ok(())
    }
}
