//! Error types for the stake ledger replay

use thiserror::Error;

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Search index or node transport failure (epoch-fatal)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Malformed payload (hex argument, JSON document, amount string)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Expected ledger entry missing or debit would go negative
    #[error("Ledger drift: {0}")]
    LedgerDrift(#[from] LedgerDrift),

    /// Delegation manager contract lookup failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Genesis files missing or malformed
    #[error("Genesis load error: {0}")]
    GenesisLoad(String),

    /// Checkpoint store error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Amount arithmetic overflowed the representable range
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ledger inconsistency detected while applying a transition.
///
/// Never propagated out of the replay engine: the handler logs it and
/// resolves it by skipping or removing the entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerDrift {
    /// No entry for the address
    #[error("no ledger entry for {address}")]
    MissingEntry {
        /// Address that was expected in the ledger
        address: String,
    },

    /// Debit larger than the stored amount; the entry was removed
    #[error("debit of {requested} exceeds balance {available} for {address}")]
    WouldGoNegative {
        /// Address whose entry was removed
        address: String,
        /// Amount held before the debit
        available: String,
        /// Amount requested
        requested: String,
    },
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Fetch(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(err: rust_decimal::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

#[cfg(feature = "rocksdb-store")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Checkpoint(err.to_string())
    }
}

impl Error {
    /// Whether the error aborts the current epoch
    pub fn is_epoch_fatal(&self) -> bool {
        !matches!(self, Error::Decode(_) | Error::LedgerDrift(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_is_not_epoch_fatal() {
        let err: Error = LedgerDrift::MissingEntry {
            address: "erd1abc".to_string(),
        }
        .into();
        assert!(!err.is_epoch_fatal());
        assert!(err.to_string().contains("erd1abc"));
    }

    #[test]
    fn test_fetch_is_epoch_fatal() {
        assert!(Error::Fetch("timeout".to_string()).is_epoch_fatal());
        assert!(Error::Discovery("bad".to_string()).is_epoch_fatal());
    }
}
