//! Genesis ledger seeding
//!
//! Reads `genesis.json` (initial accounts with their legacy delegation) and
//! `nodesSetup.json` (initial validators) from one folder.

use crate::ledger::BalanceLedger;
use crate::types::Amount;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// File with the initial accounts
pub const GENESIS_FILE: &str = "genesis.json";

/// File with the initial validator set
pub const NODES_SETUP_FILE: &str = "nodesSetup.json";

#[derive(Debug, Deserialize)]
struct GenesisAccount {
    address: String,
    #[serde(default)]
    delegation: Option<GenesisDelegation>,
}

#[derive(Debug, Deserialize)]
struct GenesisDelegation {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodesSetup {
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    initial_nodes: Vec<InitialNode>,
}

#[derive(Debug, Deserialize)]
struct InitialNode {
    address: String,
}

/// Ledgers and address sets known before the first epoch
#[derive(Debug, Clone)]
pub struct GenesisSeed {
    /// Legacy delegation contract depositors
    pub delegation_legacy_users: BalanceLedger,
    /// Validator owners, one unit stake per node
    pub staking_users: BalanceLedger,
    /// Every address named by either file
    pub addresses: BTreeSet<String>,
    /// `startTime` from the nodes setup, when present
    pub start_time: Option<i64>,
}

impl GenesisSeed {
    /// Load both files from `dir`, crediting `node_stake` per initial node
    pub fn load(dir: impl AsRef<Path>, node_stake: Amount) -> Result<Self> {
        let dir = dir.as_ref();
        let accounts: Vec<GenesisAccount> = read_json(&dir.join(GENESIS_FILE))?;
        let nodes: NodesSetup = read_json(&dir.join(NODES_SETUP_FILE))?;

        let mut addresses = BTreeSet::new();
        let mut delegation_legacy_users = BalanceLedger::new();
        for account in &accounts {
            addresses.insert(account.address.clone());

            let Some(delegation) = &account.delegation else {
                continue;
            };
            if delegation.value.is_empty() {
                continue;
            }
            let value = Amount::parse(&delegation.value).map_err(|e| {
                Error::GenesisLoad(format!(
                    "delegation value of {}: {}",
                    account.address, e
                ))
            })?;
            if value.is_zero() {
                continue;
            }
            delegation_legacy_users
                .credit(&account.address, value)
                .map_err(|e| Error::GenesisLoad(e.to_string()))?;
        }

        let mut staking_users = BalanceLedger::new();
        for node in &nodes.initial_nodes {
            addresses.insert(node.address.clone());
            staking_users
                .credit(&node.address, node_stake)
                .map_err(|e| Error::GenesisLoad(e.to_string()))?;
        }

        info!(
            accounts = accounts.len(),
            nodes = nodes.initial_nodes.len(),
            legacy_delegators = delegation_legacy_users.len(),
            stakers = staking_users.len(),
            "genesis loaded"
        );

        Ok(Self {
            delegation_legacy_users,
            staking_users,
            addresses,
            start_time: nodes.start_time,
        })
    }

    /// Genesis addresses plus `system_addresses`
    pub fn known_addresses<'a>(
        &self,
        system_addresses: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let mut known = self.addresses.clone();
        known.extend(system_addresses.into_iter().cloned());
        known
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::GenesisLoad(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::GenesisLoad(format!("cannot parse {}: {}", path.display(), e)))
}
