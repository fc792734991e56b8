//! Search DSL bodies
//!
//! Every query is bounded by an [`EpochWindow`] on `timestamp` (inclusive on
//! both ends). Scans sort ascending so hits arrive in chain order; balance
//! lookups sort descending and keep only the newest hit.

use crate::types::{EpochWindow, STATUS_SUCCESS};
use serde_json::{json, Value};

fn time_range(window: EpochWindow) -> Value {
    json!({
        "range": {
            "timestamp": {
                "gte": window.start,
                "lte": window.end,
            }
        }
    })
}

fn match_field(field: &str, value: &str) -> Value {
    json!({ "match": { field: value } })
}

/// All documents in the window, oldest first
pub fn all_in_window(window: EpochWindow) -> Value {
    json!({
        "query": time_range(window),
        "sort": [{ "timestamp": { "order": "asc" } }],
    })
}

/// Transactions received by `receiver` in the window, oldest first
pub fn transactions_to(receiver: &str, window: EpochWindow) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [time_range(window), match_field("receiver", receiver)]
            }
        },
        "sort": [{ "timestamp": { "order": "asc" } }],
    })
}

/// Newest balance record of `address` in the window
pub fn latest_balance(address: &str, window: EpochWindow) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [time_range(window), match_field("address", address)]
            }
        },
        "sort": [{ "timestamp": { "order": "desc" } }],
        "size": 1,
    })
}

/// Successful protocol transaction from `sender` to `receiver` in the window
pub fn reward_transaction(receiver: &str, sender: &str, window: EpochWindow) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    time_range(window),
                    match_field("receiver", receiver),
                    match_field("sender", sender),
                    match_field("status", STATUS_SUCCESS),
                ]
            }
        },
        "size": 1,
    })
}
