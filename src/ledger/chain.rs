//! Hash-Linked Track-Record Events
//!
//! Event types, payload canonicalization, and the link-hash computation for
//! the append-only ledger. The chain is an array indexed by a monotonic
//! sequence number, never a mutable linked structure: a single head hash
//! gates all writes.
//!
//! # Link invariant
//!
//! ```text
//! hash[i]      = SHA256(canonicalize(payload[i]) || prev_hash[i] || sequence[i])
//! prev_hash[0] = GENESIS_HASH (64 hex zeros)
//! ```
//!
//! Canonicalization sorts JSON object keys recursively and uses compact
//! separators, so the digest is independent of caller key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// prev_hash of the first event in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kinds of live-instance events the telemetry pipeline appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackEventType {
    Heartbeat,
    Trade,
    ReEvaluation,
}

impl TrackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackEventType::Heartbeat => "heartbeat",
            TrackEventType::Trade => "trade",
            TrackEventType::ReEvaluation => "re_evaluation",
        }
    }
}

impl std::fmt::Display for TrackEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable event in an instance's ledger.
///
/// Created once, never mutated, never deleted. Owned exclusively by its
/// instance's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecordEvent {
    /// Monotonic per instance, starting at 0, no gaps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: TrackEventType,
    pub payload: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

/// Canonical JSON rendering: object keys sorted recursively, compact
/// separators, so hashing is independent of the serializer's key order.
pub fn canonicalize(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Compute an event's link hash from its payload, predecessor hash, and
/// sequence number.
pub fn compute_hash(payload: &serde_json::Value, prev_hash: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(payload).as_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Build the event that extends a chain whose head is (`prev_hash`,
/// sequence `sequence - 1`).
pub fn make_event(
    sequence: u64,
    timestamp: DateTime<Utc>,
    event_type: TrackEventType,
    payload: serde_json::Value,
    prev_hash: &str,
) -> TrackRecordEvent {
    let hash = compute_hash(&payload, prev_hash, sequence);
    TrackRecordEvent {
        sequence,
        timestamp,
        event_type,
        payload,
        prev_hash: prev_hash.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn hash_is_independent_of_key_order() {
        let a = json!({"pnl": 12.5, "pair": "EURUSD"});
        let b = json!({"pair": "EURUSD", "pnl": 12.5});
        assert_eq!(
            compute_hash(&a, GENESIS_HASH, 0),
            compute_hash(&b, GENESIS_HASH, 0)
        );
    }

    #[test]
    fn hash_depends_on_payload_prev_hash_and_sequence() {
        let payload = json!({"beat": 1});
        let base = compute_hash(&payload, GENESIS_HASH, 0);
        assert_ne!(base, compute_hash(&json!({"beat": 2}), GENESIS_HASH, 0));
        assert_ne!(base, compute_hash(&payload, &base, 0));
        assert_ne!(base, compute_hash(&payload, GENESIS_HASH, 1));
    }

    #[test]
    fn make_event_links_to_prev() {
        let e0 = make_event(0, Utc::now(), TrackEventType::Heartbeat, json!({}), GENESIS_HASH);
        let e1 = make_event(1, Utc::now(), TrackEventType::Trade, json!({"pnl": 1.0}), &e0.hash);
        assert_eq!(e1.prev_hash, e0.hash);
        assert_eq!(e1.hash, compute_hash(&e1.payload, &e0.hash, 1));
    }

    #[test]
    fn genesis_constant_is_64_hex_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}
