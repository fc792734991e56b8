//! Balance tier counters

use crate::config::TierConfig;
use crate::types::Amount;
use serde::{Deserialize, Serialize};

/// Number of addresses at or above each balance threshold.
///
/// Tiers are cumulative, so counts never increase from `non_zero` to `b1k`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTierCounts {
    /// Balance > 0
    #[serde(rename = "nonZero")]
    pub non_zero: usize,
    /// Balance ≥ 0.1 token
    #[serde(rename = "b01EGLD")]
    pub b01: usize,
    /// Balance ≥ 1 token
    #[serde(rename = "b1EGLD")]
    pub b1: usize,
    /// Balance ≥ 10 tokens
    #[serde(rename = "b10EGLD")]
    pub b10: usize,
    /// Balance ≥ 100 tokens
    #[serde(rename = "b100EGLD")]
    pub b100: usize,
    /// Balance ≥ 1000 tokens
    #[serde(rename = "b1KEGLD")]
    pub b1k: usize,
}

impl BalanceTierCounts {
    /// Count `amounts` into tiers
    pub fn from_amounts<'a>(
        amounts: impl IntoIterator<Item = &'a Amount>,
        thresholds: &TierConfig,
    ) -> Self {
        let mut counts = Self::default();
        for amount in amounts {
            counts.add(*amount, thresholds);
        }
        counts
    }

    /// Count one balance
    pub fn add(&mut self, amount: Amount, thresholds: &TierConfig) {
        if amount > Amount::ZERO {
            self.non_zero += 1;
        }
        if amount >= thresholds.tenth {
            self.b01 += 1;
        }
        if amount >= thresholds.one {
            self.b1 += 1;
        }
        if amount >= thresholds.ten {
            self.b10 += 1;
        }
        if amount >= thresholds.hundred {
            self.b100 += 1;
        }
        if amount >= thresholds.thousand {
            self.b1k += 1;
        }
    }

    /// Counts from the smallest tier to the largest
    pub fn as_array(&self) -> [usize; 6] {
        [
            self.non_zero,
            self.b01,
            self.b1,
            self.b10,
            self.b100,
            self.b1k,
        ]
    }

    /// Whether counts never grow with the tier
    pub fn is_monotonic(&self) -> bool {
        self.as_array().windows(2).all(|pair| pair[0] >= pair[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNITS_PER_TOKEN;

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        let thresholds = TierConfig::default();
        let amounts = vec![
            Amount::ZERO,
            Amount::from(1),
            Amount::from(UNITS_PER_TOKEN / 10),
            Amount::tokens(1),
            Amount::tokens(10),
            Amount::tokens(100),
            Amount::tokens(1000),
        ];
        let counts = BalanceTierCounts::from_amounts(&amounts, &thresholds);
        assert_eq!(counts.as_array(), [6, 5, 4, 3, 2, 1]);
        assert!(counts.is_monotonic());
    }

    #[test]
    fn test_wire_names() {
        let counts = BalanceTierCounts {
            non_zero: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["nonZero"], 1);
        assert_eq!(json["b1KEGLD"], 0);
    }
}
