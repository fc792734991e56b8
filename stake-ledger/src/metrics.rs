//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `stake_stats_epochs_processed_total` - Epochs completed
//! - `stake_stats_epochs_failed_total` - Epochs aborted by a fetch or discovery error
//! - `stake_stats_transactions_dispatched_total{domain}` - Transactions handed to a domain handler
//! - `stake_stats_ledger_anomalies_total{kind}` - Drift and decode anomalies resolved in place
//! - `stake_stats_ledger_entries{ledger}` - Current ledger sizes
//! - `stake_stats_epoch_duration_seconds` - Histogram of per-epoch processing time

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Epochs completed
    pub epochs_processed: IntCounter,

    /// Epochs failed
    pub epochs_failed: IntCounter,

    /// Transactions dispatched per domain
    pub transactions_dispatched: IntCounterVec,

    /// Anomalies per kind
    pub ledger_anomalies: IntCounterVec,

    /// Ledger sizes
    pub ledger_entries: IntGaugeVec,

    /// Epoch duration histogram
    pub epoch_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("epochs_processed", &self.epochs_processed.get())
            .field("epochs_failed", &self.epochs_failed.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let epochs_processed = IntCounter::new(
            "stake_stats_epochs_processed_total",
            "Number of epochs processed",
        )?;
        registry.register(Box::new(epochs_processed.clone()))?;

        let epochs_failed = IntCounter::new(
            "stake_stats_epochs_failed_total",
            "Number of epochs that failed",
        )?;
        registry.register(Box::new(epochs_failed.clone()))?;

        let transactions_dispatched = IntCounterVec::new(
            Opts::new(
                "stake_stats_transactions_dispatched_total",
                "Transactions handed to a domain handler",
            ),
            &["domain"],
        )?;
        registry.register(Box::new(transactions_dispatched.clone()))?;

        let ledger_anomalies = IntCounterVec::new(
            Opts::new(
                "stake_stats_ledger_anomalies_total",
                "Ledger drift and decode anomalies",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(ledger_anomalies.clone()))?;

        let ledger_entries = IntGaugeVec::new(
            Opts::new("stake_stats_ledger_entries", "Addresses held per ledger"),
            &["ledger"],
        )?;
        registry.register(Box::new(ledger_entries.clone()))?;

        let epoch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "stake_stats_epoch_duration_seconds",
                "Histogram of epoch processing time",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(epoch_duration.clone()))?;

        Ok(Self {
            epochs_processed,
            epochs_failed,
            transactions_dispatched,
            ledger_anomalies,
            ledger_entries,
            epoch_duration,
            registry,
        })
    }

    /// Record a completed epoch
    pub fn record_epoch_processed(&self, duration_seconds: f64) {
        self.epochs_processed.inc();
        self.epoch_duration.observe(duration_seconds);
    }

    /// Record a failed epoch
    pub fn record_epoch_failed(&self) {
        self.epochs_failed.inc();
    }

    /// Record a dispatched transaction
    pub fn record_dispatch(&self, domain: &str) {
        self.transactions_dispatched
            .with_label_values(&[domain])
            .inc();
    }

    /// Record an anomaly resolved in place
    pub fn record_anomaly(&self, kind: &str) {
        self.ledger_anomalies.with_label_values(&[kind]).inc();
    }

    /// Record `count` anomalies of one kind
    pub fn record_anomalies(&self, kind: &str, count: usize) {
        if count > 0 {
            self.ledger_anomalies
                .with_label_values(&[kind])
                .inc_by(count as u64);
        }
    }

    /// Update a ledger size gauge
    pub fn set_ledger_size(&self, ledger: &str, entries: usize) {
        self.ledger_entries
            .with_label_values(&[ledger])
            .set(entries as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.epochs_processed.get(), 0);
        assert_eq!(metrics.epochs_failed.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_epoch_failed();
        assert_eq!(first.epochs_failed.get(), 1);
        assert_eq!(second.epochs_failed.get(), 0);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dispatch("staking");
        metrics.record_dispatch("staking");
        metrics.record_anomaly("missing_entry");
        metrics.set_ledger_size("staking_users", 42);

        assert_eq!(
            metrics
                .transactions_dispatched
                .with_label_values(&["staking"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .ledger_entries
                .with_label_values(&["staking_users"])
                .get(),
            42
        );
        assert!(metrics.render().contains("stake_stats_ledger_anomalies_total"));
    }
}
