//! Stake Ledger
//!
//! Epoch-by-epoch reconstruction of staking and delegation balances from
//! historical transactions held in a search index.
//!
//! # Architecture
//!
//! - **Replay**: Transactions received by each contract domain are applied
//!   to per-address ledgers in timestamp order
//! - **Checkpoints**: The merged staking view of every epoch is persisted once
//! - **Roll-ups**: Contract balances net of rewards and unjail payouts give
//!   per-epoch stake statistics
//! - **Tiers**: Wallet plus staked balances are bucketed by size
//!
//! # Invariants
//!
//! - Stored ledger amounts are strictly positive; zero entries are removed
//! - Epochs are processed in increasing order and state carries over
//! - Unique users = |legacy ∪ staking|
//! - A checkpoint is never overwritten

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod accounts;
pub mod address;
pub mod balance;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod genesis;
pub mod index;
pub mod ledger;
pub mod metrics;
pub mod node;
pub mod query;
pub mod reconcile;
pub mod replay;
pub mod tiers;
pub mod transactions;
pub mod types;

// Re-exports
pub use accounts::{AccountsProcessor, AddressesBalanceEpoch};
pub use address::AddressCodec;
pub use balance::BalanceSnapshotFetcher;
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::Config;
pub use driver::EpochDriver;
pub use error::{Error, LedgerDrift, Result};
pub use genesis::GenesisSeed;
pub use index::{ElasticClient, MemoryIndex, SearchIndex};
pub use ledger::BalanceLedger;
pub use metrics::Metrics;
pub use node::{HttpNodeApi, NodeApi};
pub use reconcile::ReconciliationCorrector;
pub use replay::{ContractDomain, ReplayEngine, ReplayState};
pub use tiers::BalanceTierCounts;
pub use transactions::TransactionsProcessor;
pub use types::{Amount, EpochWindow, StakeInfoEpoch, TransactionsEpoch};
