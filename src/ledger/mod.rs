//! Tamper-Evident Track-Record Ledger
//!
//! Append-only, hash-linked log of live-instance events with periodic
//! HMAC-authenticated checkpoints and a verifier that proves (or disproves)
//! that history has not been altered.
//!
//! ```text
//! telemetry ──▶ EventChain.append ──▶ TrackRecordStore (SQLite)
//!                     │                      │
//!                     ▼                      ▼
//!              CheckpointSigner       ChainVerifier.verify /
//!              (every N events)       verify_checkpoints (on demand)
//! ```

pub mod chain;
pub mod checkpoint;
pub mod event_chain;
pub mod store;
pub mod verifier;

pub use chain::{TrackEventType, TrackRecordEvent, GENESIS_HASH};
pub use checkpoint::{Checkpoint, CheckpointSigner};
pub use event_chain::{AppendError, AppendOutcome, EventChain};
pub use store::{InstanceInfo, TrackRecordStore, TrackRecordStoreError};
pub use verifier::{ChainVerificationResult, ChainVerifier, CheckpointVerification};

use crate::models::Trade;

/// Extract the closed-trade series recorded in a chain's trade events.
///
/// Trade payloads that fail to decode as a `Trade` are skipped: the
/// metrics surface is total, and one malformed payload must not take the
/// whole endpoint down (the chain verifier is the integrity authority,
/// not the metrics path).
pub fn trades_from_events(events: &[TrackRecordEvent]) -> Vec<Trade> {
    events
        .iter()
        .filter(|e| e.event_type == TrackEventType::Trade)
        .filter_map(|e| serde_json::from_value::<Trade>(e.payload.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn trades_from_events_skips_non_trades_and_malformed() {
        let trade_payload = serde_json::to_value(Trade {
            pair: "EURUSD".to_string(),
            pnl: 12.5,
            entry_time: Utc::now(),
            close_time: Some(Utc::now()),
        })
        .unwrap();

        let events = vec![
            chain::make_event(0, Utc::now(), TrackEventType::Heartbeat, json!({}), GENESIS_HASH),
            chain::make_event(1, Utc::now(), TrackEventType::Trade, trade_payload, "x"),
            chain::make_event(2, Utc::now(), TrackEventType::Trade, json!({"bad": true}), "y"),
        ];

        let trades = trades_from_events(&events);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].pair, "EURUSD");
    }
}
