//! Stake statistics binary
//!
//! Usage:
//!   stake-stats --config config/stake-stats.toml --stats stake --end-epoch 265

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use stake_ledger::{
    AccountsProcessor, AddressCodec, CheckpointStore, Config, ElasticClient, EpochDriver,
    FileCheckpointStore, GenesisSeed, HttpNodeApi, Metrics, NodeApi, ReconciliationCorrector,
    SearchIndex, TransactionsProcessor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stats {
    /// Daily transaction counters
    Transactions,
    /// Balance tiers per epoch (reads stake checkpoints)
    Accounts,
    /// Staking and delegation roll-ups (writes stake checkpoints)
    Stake,
}

#[derive(Debug, Parser)]
#[command(name = "stake-stats", about = "Replays indexed transactions into per-epoch stake statistics")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Folder with genesis.json and nodesSetup.json (overrides the config)
    #[arg(long)]
    genesis_dir: Option<PathBuf>,

    /// Number of epochs to process, starting from 0
    #[arg(long)]
    end_epoch: u32,

    /// Which statistics to compute
    #[arg(long, value_enum, default_value_t = Stats::Stake)]
    stats: Stats,

    /// Report path
    #[arg(long, default_value = "report.json")]
    output_file: PathBuf,

    /// Write the Prometheus text exposition here when done
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(stats = ?args.stats, end_epoch = args.end_epoch, "Starting stake statistics");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    }
    .from_env()?;
    if let Some(dir) = &args.genesis_dir {
        config.genesis.dir = dir.clone();
    }

    let seed = GenesisSeed::load(&config.genesis.dir, config.genesis.node_stake)
        .context("loading genesis")?;

    let index: Arc<dyn SearchIndex> = Arc::new(ElasticClient::new(&config.elastic)?);
    let node: Arc<dyn NodeApi> = Arc::new(HttpNodeApi::new(&config.node)?);
    let genesis_time = resolve_genesis_time(&config, &seed, node.as_ref()).await?;
    let codec = AddressCodec::new(config.contracts.address_hrp.clone());
    let metrics = Metrics::new()?;

    match args.stats {
        Stats::Stake => {
            let checkpoints: Arc<dyn CheckpointStore> =
                Arc::new(FileCheckpointStore::open(&config.checkpoint.dir)?);
            let mut driver = EpochDriver::new(
                &config,
                index,
                node,
                checkpoints,
                &seed,
                genesis_time,
                metrics.clone(),
            );
            let stats = driver.process_epochs(args.end_epoch).await;
            write_report(&args.output_file, &stats)?;
        }
        Stats::Accounts => {
            let checkpoints: Arc<dyn CheckpointStore> =
                Arc::new(FileCheckpointStore::open(&config.checkpoint.dir)?);
            let mut processor = AccountsProcessor::new(
                index,
                checkpoints,
                codec,
                config.elastic.accounts_history_index.clone(),
                genesis_time,
                config.tiers.clone(),
                ReconciliationCorrector::new(config.reconciliation.clone()),
            );
            let stats = processor.process_epochs(args.end_epoch).await;
            write_report(&args.output_file, &stats)?;
        }
        Stats::Transactions => {
            let known = seed.known_addresses(&config.genesis.system_addresses);
            let mut processor = TransactionsProcessor::new(
                index,
                codec,
                config.elastic.transactions_index.clone(),
                config.contracts.metachain_sender.clone(),
                genesis_time,
                known,
            );
            let stats = processor.process_epochs(args.end_epoch).await;
            write_report(&args.output_file, &stats)?;
        }
    }

    if let Some(path) = &args.metrics_file {
        std::fs::write(path, metrics.render())
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    tracing::info!(output = %args.output_file.display(), "Done");
    Ok(())
}

/// Configured time, then the nodes setup, then the gateway
async fn resolve_genesis_time(config: &Config, seed: &GenesisSeed, node: &dyn NodeApi) -> Result<i64> {
    if let Some(time) = config.node.genesis_time.or(seed.start_time) {
        return Ok(time);
    }
    let network = node
        .network_config()
        .await
        .context("fetching genesis time from /network/config")?;
    Ok(network.erd_start_time)
}

fn write_report<T: Serialize>(path: &Path, stats: &[T]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(stats)?;
    std::fs::write(path, bytes).with_context(|| format!("writing report to {}", path.display()))?;
    tracing::info!(records = stats.len(), path = %path.display(), "report written");
    Ok(())
}
