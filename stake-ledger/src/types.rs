//! Core types for the stake ledger replay
//!
//! All amounts are exact integers in the chain's base unit (10^-18 of a
//! native token). They are carried as `rust_decimal::Decimal` with scale 0
//! and checked arithmetic, and serialized as decimal strings.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Length of one epoch in seconds
pub const SECONDS_PER_EPOCH: i64 = 24 * 3600;

/// Base units per native token
pub const UNITS_PER_TOKEN: u64 = 1_000_000_000_000_000_000;

/// Status string the index stores for executed transactions
pub const STATUS_SUCCESS: &str = "success";

/// Status string the index stores for failed transactions
pub const STATUS_FAIL: &str = "fail";

/// Integer amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(Decimal);

impl Amount {
    /// Zero
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Parse a base-10 integer string (optionally negative)
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s.strip_prefix('-').unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Decode(format!("invalid amount {:?}", s)));
        }
        Ok(Self(Decimal::from_str_exact(s)?))
    }

    /// Decode an unsigned big-endian byte string
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self> {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[first..];
        if significant.len() > 16 {
            return Err(Error::Overflow(format!(
                "{}-byte value does not fit an amount",
                significant.len()
            )));
        }

        let mut buf = [0u8; 16];
        buf[16 - significant.len()..].copy_from_slice(significant);
        let value = u128::from_be_bytes(buf);

        Decimal::from_u128(value)
            .map(Self)
            .ok_or_else(|| Error::Overflow(format!("{} exceeds the amount range", value)))
    }

    /// Decode a hex-encoded call argument (`unStake@<hex>`)
    pub fn from_hex(arg: &str) -> Result<Self> {
        let bytes = hex::decode(arg)
            .map_err(|e| Error::Decode(format!("invalid hex argument {:?}: {}", arg, e)))?;
        Self::from_be_bytes(&bytes)
    }

    /// `n` whole tokens in base units
    pub fn tokens(n: u32) -> Self {
        // u32::MAX * 10^18 stays below the 96-bit mantissa
        Self(Decimal::from(n) * Decimal::from(UNITS_PER_TOKEN))
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| Error::Overflow(format!("{} + {}", self, other)))
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| Error::Overflow(format!("{} - {}", self, other)))
    }

    /// Sum of an iterator of amounts
    pub fn checked_sum<'a>(amounts: impl IntoIterator<Item = &'a Amount>) -> Result<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(*amount))
    }

    /// Exactly zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Strictly below zero
    pub fn is_negative(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_negative()
    }

    /// Underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            return f.write_str("0");
        }
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AmountVisitor;

        impl serde::de::Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer amount as a decimal string or number")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                Amount::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Amount, E> {
                Ok(Amount::from(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Amount, E> {
                Ok(Amount(Decimal::from(v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Address → amount snapshot, ordered for deterministic output
pub type Snapshot = BTreeMap<String, Amount>;

/// Inclusive timestamp bounds of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochWindow {
    /// First second of the epoch
    pub start: i64,
    /// Last second of the epoch
    pub end: i64,
}

impl EpochWindow {
    /// Window of `epoch` counted from `genesis_time`
    pub fn for_epoch(genesis_time: i64, epoch: u32) -> Self {
        let start = genesis_time + i64::from(epoch) * SECONDS_PER_EPOCH;
        Self {
            start,
            end: start + SECONDS_PER_EPOCH - 1,
        }
    }

    /// UTC day the window starts on
    pub fn start_date(&self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp(self.start, 0).map(|dt| dt.date_naive())
    }
}

/// Transaction document from the `transactions` index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexedTransaction {
    /// Sender nonce
    #[serde(default)]
    pub nonce: u64,
    /// Sender address (or shard id for system transactions)
    #[serde(default)]
    pub sender: String,
    /// Receiver address
    #[serde(default)]
    pub receiver: String,
    /// Call data
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Transferred value
    #[serde(default)]
    pub value: String,
    /// Execution status
    #[serde(default)]
    pub status: String,
    /// Unix timestamp (seconds)
    #[serde(default)]
    pub timestamp: i64,
    /// Smart contract results produced by the call
    #[serde(default, rename = "scResults", deserialize_with = "null_as_default")]
    pub sc_results: Vec<ScResult>,
}

impl IndexedTransaction {
    /// Call data as text
    pub fn call_data(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Executed successfully
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Smart contract result attached to a transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScResult {
    /// Result nonce
    #[serde(default)]
    pub nonce: u64,
    /// Emitting address
    #[serde(default)]
    pub sender: String,
    /// Receiving address
    #[serde(default)]
    pub receiver: String,
    /// Transferred value (empty when none)
    #[serde(default)]
    pub value: String,
    /// Memo
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ScResult {
    /// Nonce-zero result carrying a value
    pub fn is_value_transfer(&self) -> bool {
        self.nonce == 0 && !self.value.is_empty()
    }
}

/// Balance record from the `accountshistory` index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBalanceRecord {
    /// Account address
    #[serde(default)]
    pub address: String,
    /// Balance after the change
    #[serde(default)]
    pub balance: String,
    /// Unix timestamp (seconds)
    #[serde(default)]
    pub timestamp: i64,
}

/// Stake statistics for one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfoEpoch {
    /// Epoch index
    pub epoch: u32,
    /// Legacy delegation plus staking, net of rewards and unjail payouts
    pub total_staked: Amount,
    /// Addresses in the legacy delegation ledger
    pub legacy_delegation_users: usize,
    /// Legacy delegation contract balance without rewards
    pub legacy_delegation: Amount,
    /// Addresses in the staking ledger
    pub staking_users: usize,
    /// Staking contract balance without unjail payouts
    pub staking: Amount,
    /// Addresses present in either primary ledger
    pub total_unique_users: usize,
    /// Addresses delegating through manager contracts
    pub delegation_manager_users: usize,
    /// Amount delegated through manager contracts
    pub delegation_manager_staked: Amount,
    /// Legacy delegation baseline plus the no-rewards balance
    pub active_legacy_delegation: Amount,
}

/// Daily transaction statistics for one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsEpoch {
    /// Epoch index
    pub epoch: u32,
    /// Transactions in the window
    pub daily_transactions: usize,
    /// Transactions addressed to contracts
    pub daily_contract_calls: usize,
    /// Distinct senders
    pub daily_active_accounts: usize,
    /// Distinct contracts called
    pub daily_active_contract_accounts: usize,
    /// Addresses seen for the first time
    pub daily_new_addresses: usize,
    /// Contract addresses seen for the first time
    pub daily_new_contract_addresses: usize,
    /// Sender → transaction count
    #[serde(rename = "topActiveAccounts")]
    pub top_active_addresses: BTreeMap<String, usize>,
    /// Contract → call count
    pub top_active_contracts: BTreeMap<String, usize>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Byte fields the index stores as base64 strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_parse() {
        let amount = Amount::parse("2500000000000000000000").unwrap();
        assert_eq!(amount.to_string(), "2500000000000000000000");
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("1.5").is_err());
        assert!(Amount::parse("12a").is_err());
        assert!(Amount::parse("-7").unwrap().is_negative());
    }

    #[test]
    fn test_amount_from_hex() {
        assert_eq!(Amount::from_hex("00C8").unwrap(), Amount::from(200));
        assert_eq!(Amount::from_hex("").unwrap(), Amount::ZERO);
        assert!(Amount::from_hex("zz").is_err());
        // 1000 tokens in base units
        assert_eq!(
            Amount::from_hex("3635c9adc5dea00000").unwrap(),
            Amount::parse("1000000000000000000000").unwrap()
        );
    }

    #[test]
    fn test_amount_from_hex_too_wide() {
        let wide = "01".repeat(17);
        assert!(matches!(Amount::from_hex(&wide), Err(Error::Overflow(_))));
    }

    #[test]
    fn test_amount_tokens() {
        assert_eq!(Amount::tokens(1), Amount::from(UNITS_PER_TOKEN));
        assert_eq!(Amount::tokens(2500).to_string(), "2500000000000000000000");
    }

    #[test]
    fn test_amount_zero_display() {
        let diff = Amount::from(5).checked_sub(Amount::from(5)).unwrap();
        assert!(diff.is_zero());
        assert!(!diff.is_negative());
        assert_eq!(diff.to_string(), "0");
    }

    #[test]
    fn test_amount_serde_as_string() {
        let json = serde_json::to_string(&Amount::from(1200)).unwrap();
        assert_eq!(json, "\"1200\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Amount::from(1200));
        let from_number: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, Amount::from(42));
    }

    #[test]
    fn test_epoch_window() {
        let window = EpochWindow::for_epoch(1_596_117_600, 2);
        assert_eq!(window.start, 1_596_117_600 + 2 * SECONDS_PER_EPOCH);
        assert_eq!(window.end, window.start + SECONDS_PER_EPOCH - 1);
        let next = EpochWindow::for_epoch(1_596_117_600, 3);
        assert_eq!(next.start, window.end + 1);
        assert_eq!(
            window.start_date(),
            chrono::NaiveDate::from_ymd_opt(2020, 8, 1)
        );
    }

    #[test]
    fn test_transaction_document_decoding() {
        let doc = serde_json::json!({
            "sender": "erd1sender",
            "receiver": "erd1contract",
            "data": "dW5TdGFrZUAwMEM4",
            "value": "0",
            "status": "success",
            "timestamp": 1596200000,
            "scResults": null
        });
        let tx: IndexedTransaction = serde_json::from_value(doc).unwrap();
        assert_eq!(tx.call_data(), "unStake@00C8");
        assert!(tx.is_success());
        assert!(tx.sc_results.is_empty());
    }
}
