//! Point corrections for balance tier counters

use crate::config::ReconciliationConfig;
use crate::tiers::BalanceTierCounts;
use tracing::debug;

/// Subtracts a fixed, versioned correction from the tier counters of every
/// epoch at or after the configured starting epoch.
#[derive(Debug, Clone)]
pub struct ReconciliationCorrector {
    table: ReconciliationConfig,
}

impl ReconciliationCorrector {
    /// Corrector applying `table`
    pub fn new(table: ReconciliationConfig) -> Self {
        Self { table }
    }

    /// Correct `counts` in place. Counters saturate at zero and stay
    /// non-increasing across tiers.
    pub fn apply(&self, epoch: u32, counts: &mut BalanceTierCounts) {
        if epoch < self.table.from_epoch {
            return;
        }

        let t = &self.table;
        let corrections = [t.non_zero, t.tenth, t.one, t.ten, t.hundred, t.thousand];
        let fields = [
            &mut counts.non_zero,
            &mut counts.b01,
            &mut counts.b1,
            &mut counts.b10,
            &mut counts.b100,
            &mut counts.b1k,
        ];

        let mut ceiling = usize::MAX;
        for (field, correction) in fields.into_iter().zip(corrections) {
            let correction = usize::try_from(correction).unwrap_or(usize::MAX);
            *field = field.saturating_sub(correction).min(ceiling);
            ceiling = *field;
        }

        debug!(epoch, version = %t.version, "tier counters corrected");
    }
}
