//! Track-Record Storage
//!
//! SQLite-backed storage for live-instance ledgers: instance registry,
//! hash-linked events, and checkpoints. Events are append-only - the
//! public contract exposes no update or delete. WAL mode, a
//! schema_version table, and an `Arc<Mutex<Connection>>` guard follow the
//! same shape as the rest of the persistence layer.

use crate::ledger::chain::{TrackEventType, TrackRecordEvent};
use crate::ledger::checkpoint::Checkpoint;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: u32 = 1;

/// Registry row for a live instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    /// Expert-advisor / strategy display name reported by the terminal.
    pub ea_name: String,
    /// Account mode the instance runs in (e.g. "live", "demo").
    pub mode: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum TrackRecordStoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
}

impl std::fmt::Display for TrackRecordStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackRecordStoreError::Database(e) => write!(f, "database error: {}", e),
            TrackRecordStoreError::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for TrackRecordStoreError {}

impl From<rusqlite::Error> for TrackRecordStoreError {
    fn from(e: rusqlite::Error) -> Self {
        TrackRecordStoreError::Database(e)
    }
}

impl From<serde_json::Error> for TrackRecordStoreError {
    fn from(e: serde_json::Error) -> Self {
        TrackRecordStoreError::Serialization(e)
    }
}

/// Storage for track-record chains.
pub struct TrackRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl TrackRecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, TrackRecordStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self, TrackRecordStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), TrackRecordStoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match current_version {
            None => {
                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS instances (
                        instance_id TEXT PRIMARY KEY,
                        ea_name TEXT NOT NULL,
                        mode TEXT NOT NULL,
                        created_at TEXT NOT NULL
                    ) WITHOUT ROWID;

                    CREATE TABLE IF NOT EXISTS track_record_events (
                        instance_id TEXT NOT NULL,
                        sequence INTEGER NOT NULL,
                        timestamp TEXT NOT NULL,
                        event_type TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        prev_hash TEXT NOT NULL,
                        hash TEXT NOT NULL,
                        PRIMARY KEY (instance_id, sequence)
                    ) WITHOUT ROWID;

                    CREATE TABLE IF NOT EXISTS checkpoints (
                        instance_id TEXT NOT NULL,
                        start_seq INTEGER NOT NULL,
                        end_seq INTEGER NOT NULL,
                        hmac TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        PRIMARY KEY (instance_id, start_seq)
                    ) WITHOUT ROWID;
                "#,
                )?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    [SCHEMA_VERSION],
                )?;
                info!("Created track-record store schema v{}", SCHEMA_VERSION);
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!("Track-record store schema at v{}", SCHEMA_VERSION);
            }
            Some(v) => {
                warn!(
                    "Track-record store schema version mismatch: expected {}, got {}",
                    SCHEMA_VERSION, v
                );
            }
        }

        Ok(())
    }

    /// Register an instance if it is not already known.
    pub fn register_instance(
        &self,
        instance_id: &str,
        ea_name: &str,
        mode: &str,
    ) -> Result<(), TrackRecordStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO instances (instance_id, ea_name, mode, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![instance_id, ea_name, mode, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let info = conn
            .query_row(
                "SELECT instance_id, ea_name, mode, created_at FROM instances WHERE instance_id = ?1",
                params![instance_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(info.map(|(instance_id, ea_name, mode, created_at)| InstanceInfo {
            instance_id,
            ea_name,
            mode,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Current head of an instance's chain: (sequence, hash) of the last
    /// event, or None for an empty chain.
    pub fn head(&self, instance_id: &str) -> Result<Option<(u64, String)>, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let head = conn
            .query_row(
                "SELECT sequence, hash FROM track_record_events
                 WHERE instance_id = ?1 ORDER BY sequence DESC LIMIT 1",
                params![instance_id],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(head)
    }

    pub fn event_count(&self, instance_id: &str) -> Result<u64, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM track_record_events WHERE instance_id = ?1",
            params![instance_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Persist one event. Callers hold the per-instance append lock; the
    /// primary key rejects a duplicate sequence as a final backstop.
    pub fn insert_event(
        &self,
        instance_id: &str,
        event: &TrackRecordEvent,
    ) -> Result<(), TrackRecordStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO track_record_events
             (instance_id, sequence, timestamp, event_type, payload, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                instance_id,
                event.sequence as i64,
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.payload.to_string(),
                event.prev_hash,
                event.hash,
            ],
        )?;
        Ok(())
    }

    /// Events with sequence in `[start, end]`, ordered by sequence.
    pub fn events_range(
        &self,
        instance_id: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<TrackRecordEvent>, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sequence, timestamp, event_type, payload, prev_hash, hash
             FROM track_record_events
             WHERE instance_id = ?1 AND sequence >= ?2 AND sequence <= ?3
             ORDER BY sequence ASC",
        )?;

        let rows = stmt.query_map(params![instance_id, start as i64, end as i64], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (sequence, timestamp, event_type, payload, prev_hash, hash) = row?;
            events.push(TrackRecordEvent {
                sequence,
                timestamp: timestamp
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                event_type: parse_event_type(&event_type),
                payload: serde_json::from_str(&payload)?,
                prev_hash,
                hash,
            });
        }
        Ok(events)
    }

    pub fn insert_checkpoint(
        &self,
        instance_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), TrackRecordStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checkpoints (instance_id, start_seq, end_seq, hmac, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                instance_id,
                checkpoint.covered_range.0 as i64,
                checkpoint.covered_range.1 as i64,
                checkpoint.hmac,
                checkpoint.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All checkpoints for an instance, ordered by covered range.
    pub fn checkpoints(&self, instance_id: &str) -> Result<Vec<Checkpoint>, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT start_seq, end_seq, hmac, created_at FROM checkpoints
             WHERE instance_id = ?1 ORDER BY start_seq ASC",
        )?;

        let rows = stmt.query_map(params![instance_id], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let (start, end, hmac, created_at) = row?;
            checkpoints.push(Checkpoint {
                hmac,
                covered_range: (start, end),
                created_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(checkpoints)
    }

    /// End of the last checkpointed range, if any.
    pub fn last_checkpoint_end(&self, instance_id: &str) -> Result<Option<u64>, TrackRecordStoreError> {
        let conn = self.conn.lock();
        let end: Option<i64> = conn
            .query_row(
                "SELECT MAX(end_seq) FROM checkpoints WHERE instance_id = ?1",
                params![instance_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(end.map(|e| e as u64))
    }

    /// Test-only tampering hook used to prove the verifier catches
    /// mutation. Deliberately absent from the public contract.
    #[cfg(test)]
    pub(crate) fn tamper_payload(
        &self,
        instance_id: &str,
        sequence: u64,
        payload: &serde_json::Value,
    ) -> Result<(), TrackRecordStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE track_record_events SET payload = ?1
             WHERE instance_id = ?2 AND sequence = ?3",
            params![payload.to_string(), instance_id, sequence as i64],
        )?;
        Ok(())
    }
}

fn parse_event_type(raw: &str) -> TrackEventType {
    match raw {
        "trade" => TrackEventType::Trade,
        "re_evaluation" => TrackEventType::ReEvaluation,
        _ => TrackEventType::Heartbeat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::chain::{self, GENESIS_HASH};
    use serde_json::json;

    #[test]
    fn register_and_fetch_instance() {
        let store = TrackRecordStore::in_memory().unwrap();
        store.register_instance("inst-1", "trend_rider", "live").unwrap();
        let info = store.get_instance("inst-1").unwrap().unwrap();
        assert_eq!(info.ea_name, "trend_rider");
        assert_eq!(info.mode, "live");
        assert!(store.get_instance("missing").unwrap().is_none());
    }

    #[test]
    fn head_tracks_latest_event() {
        let store = TrackRecordStore::in_memory().unwrap();
        assert!(store.head("inst-1").unwrap().is_none());

        let e0 = chain::make_event(
            0,
            Utc::now(),
            TrackEventType::Heartbeat,
            json!({"n": 0}),
            GENESIS_HASH,
        );
        store.insert_event("inst-1", &e0).unwrap();
        let e1 = chain::make_event(1, Utc::now(), TrackEventType::Trade, json!({"n": 1}), &e0.hash);
        store.insert_event("inst-1", &e1).unwrap();

        let (seq, hash) = store.head("inst-1").unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(hash, e1.hash);
        assert_eq!(store.event_count("inst-1").unwrap(), 2);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let store = TrackRecordStore::in_memory().unwrap();
        let e0 = chain::make_event(
            0,
            Utc::now(),
            TrackEventType::Heartbeat,
            json!({}),
            GENESIS_HASH,
        );
        store.insert_event("inst-1", &e0).unwrap();
        assert!(store.insert_event("inst-1", &e0).is_err());
    }

    #[test]
    fn events_range_round_trips() {
        let store = TrackRecordStore::in_memory().unwrap();
        let mut prev = GENESIS_HASH.to_string();
        for i in 0..5u64 {
            let e = chain::make_event(
                i,
                Utc::now(),
                TrackEventType::Trade,
                json!({"i": i}),
                &prev,
            );
            prev = e.hash.clone();
            store.insert_event("inst-1", &e).unwrap();
        }

        let events = store.events_range("inst-1", 1, 3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[2].sequence, 3);
        assert_eq!(events[1].payload, json!({"i": 2}));
    }

    #[test]
    fn checkpoints_round_trip() {
        let store = TrackRecordStore::in_memory().unwrap();
        let cp = Checkpoint {
            hmac: "aa".repeat(32),
            covered_range: (0, 99),
            created_at: Utc::now(),
        };
        store.insert_checkpoint("inst-1", &cp).unwrap();

        let loaded = store.checkpoints("inst-1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].covered_range, (0, 99));
        assert_eq!(store.last_checkpoint_end("inst-1").unwrap(), Some(99));
        assert_eq!(store.last_checkpoint_end("other").unwrap(), None);
    }
}
