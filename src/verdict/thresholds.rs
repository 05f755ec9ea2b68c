//! Versioned Verdict Thresholds
//!
//! The numeric gates a verdict is computed against. A threshold set is
//! immutable once published under a `config_version`; its `thresholds_hash`
//! pins the exact bar applied so any verdict can be re-audited later.
//!
//! Resolution order:
//! 1. SQLite store (`config_source = "db"`), under a bounded timeout
//! 2. Compiled-in fallback (`config_source = "fallback"`)
//! 3. Neither (`config_source = "missing"`) - callers MUST refuse to
//!    compute a verdict. Fail closed, not open.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Schema version for migrations.
const SCHEMA_VERSION: u32 = 1;

/// The numeric gates for one published config version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub config_version: String,
    /// Stable hash of the canonicalized field set below. Recomputed on
    /// load; a mismatch means the stored row was altered and is ignored.
    pub thresholds_hash: String,
    pub min_trade_count: u64,
    pub ready_confidence_threshold: f64,
    pub not_deployable_threshold: f64,
    pub max_sharpe_degradation_pct: f64,
    pub extreme_sharpe_degradation_pct: f64,
    pub min_oos_trade_count: u64,
    pub ruin_probability_ceiling: f64,
    pub monte_carlo_iterations: u32,
}

impl ThresholdsConfig {
    /// The compiled-in fallback set. Used when the store is unavailable.
    pub fn fallback() -> Self {
        let mut config = Self {
            config_version: "fallback-v1".to_string(),
            thresholds_hash: String::new(),
            min_trade_count: 30,
            ready_confidence_threshold: 0.7,
            not_deployable_threshold: 0.3,
            max_sharpe_degradation_pct: 20.0,
            extreme_sharpe_degradation_pct: 50.0,
            min_oos_trade_count: 30,
            ruin_probability_ceiling: 0.05,
            monte_carlo_iterations: 1000,
        };
        config.thresholds_hash = config.compute_hash();
        config
    }

    /// Canonical representation hashed into `thresholds_hash`.
    ///
    /// Fixed field order, floats rendered at fixed precision so the hash
    /// is byte-stable across serializer versions.
    fn canonical_string(&self) -> String {
        format!(
            "v={};min_trades={};ready={:.6};not_deployable={:.6};max_deg={:.6};extreme_deg={:.6};min_oos={};ruin_ceiling={:.6};mc_iters={}",
            self.config_version,
            self.min_trade_count,
            self.ready_confidence_threshold,
            self.not_deployable_threshold,
            self.max_sharpe_degradation_pct,
            self.extreme_sharpe_degradation_pct,
            self.min_oos_trade_count,
            self.ruin_probability_ceiling,
            self.monte_carlo_iterations,
        )
    }

    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Seal the config: compute and pin its hash. Call before publishing.
    pub fn sealed(mut self) -> Self {
        self.thresholds_hash = self.compute_hash();
        self
    }

    pub fn reference(&self) -> crate::models::ThresholdsRef {
        crate::models::ThresholdsRef {
            config_version: self.config_version.clone(),
            thresholds_hash: self.thresholds_hash.clone(),
        }
    }
}

/// Where a resolved threshold set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Db,
    Fallback,
    Missing,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Db => "db",
            ConfigSource::Fallback => "fallback",
            ConfigSource::Missing => "missing",
        }
    }
}

/// Outcome of threshold resolution. `config` is None only when
/// `source == Missing`.
#[derive(Debug, Clone)]
pub struct ResolvedThresholds {
    pub config: Option<ThresholdsConfig>,
    pub source: ConfigSource,
}

// =============================================================================
// STORE
// =============================================================================

/// SQLite-backed store of published threshold sets.
pub struct ThresholdStore {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug)]
pub enum ThresholdStoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    AlreadyPublished(String),
}

impl std::fmt::Display for ThresholdStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdStoreError::Database(e) => write!(f, "database error: {}", e),
            ThresholdStoreError::Serialization(e) => write!(f, "serialization error: {}", e),
            ThresholdStoreError::AlreadyPublished(v) => {
                write!(f, "config version '{}' is already published and immutable", v)
            }
        }
    }
}

impl std::error::Error for ThresholdStoreError {}

impl From<rusqlite::Error> for ThresholdStoreError {
    fn from(e: rusqlite::Error) -> Self {
        ThresholdStoreError::Database(e)
    }
}

impl From<serde_json::Error> for ThresholdStoreError {
    fn from(e: serde_json::Error) -> Self {
        ThresholdStoreError::Serialization(e)
    }
}

impl ThresholdStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ThresholdStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self, ThresholdStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), ThresholdStoreError> {
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
                    CREATE TABLE IF NOT EXISTS thresholds_configs (
                        config_version TEXT PRIMARY KEY,
                        thresholds_hash TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        published_at INTEGER NOT NULL
                    ) WITHOUT ROWID;
                "#,
                )?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    [SCHEMA_VERSION],
                )?;
                info!("Created threshold store schema v{}", SCHEMA_VERSION);
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!("Threshold store schema at v{}", SCHEMA_VERSION);
            }
            Some(v) => {
                warn!(
                    "Threshold store schema version mismatch: expected {}, got {}",
                    SCHEMA_VERSION, v
                );
            }
        }

        Ok(())
    }

    /// Publish a config version. Immutable: publishing the same version
    /// twice is an error, never an overwrite.
    pub fn publish(&self, config: &ThresholdsConfig) -> Result<(), ThresholdStoreError> {
        let sealed = config.clone().sealed();
        let payload = serde_json::to_string(&sealed)?;
        let conn = self.conn.lock();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO thresholds_configs
             (config_version, thresholds_hash, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sealed.config_version,
                sealed.thresholds_hash,
                payload,
                chrono::Utc::now().timestamp()
            ],
        )?;

        if inserted == 0 {
            return Err(ThresholdStoreError::AlreadyPublished(
                sealed.config_version.clone(),
            ));
        }

        info!(
            config_version = %sealed.config_version,
            thresholds_hash = %sealed.thresholds_hash,
            "Published thresholds config"
        );
        Ok(())
    }

    /// Load a published config. A row whose recomputed hash no longer
    /// matches its pinned hash is treated as corrupt and not returned.
    pub fn get(&self, config_version: &str) -> Result<Option<ThresholdsConfig>, ThresholdStoreError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM thresholds_configs WHERE config_version = ?1",
                params![config_version],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let config: ThresholdsConfig = serde_json::from_str(&payload)?;
        if config.compute_hash() != config.thresholds_hash {
            warn!(
                config_version = %config_version,
                "Stored thresholds hash mismatch, treating row as corrupt"
            );
            return Ok(None);
        }
        Ok(Some(config))
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Resolves the active thresholds for a config version, with bounded
/// lookup time and a fail-closed terminal state.
pub struct ThresholdResolver {
    store: Option<Arc<ThresholdStore>>,
    fallback: Option<ThresholdsConfig>,
    lookup_timeout: Duration,
}

impl ThresholdResolver {
    pub fn new(
        store: Option<Arc<ThresholdStore>>,
        fallback: Option<ThresholdsConfig>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fallback,
            lookup_timeout,
        }
    }

    /// Resolver with the compiled-in fallback set.
    pub fn with_default_fallback(store: Option<Arc<ThresholdStore>>, lookup_timeout: Duration) -> Self {
        Self::new(store, Some(ThresholdsConfig::fallback()), lookup_timeout)
    }

    /// Resolve the thresholds for `config_version`.
    ///
    /// The store lookup runs on the blocking pool under a timeout so a
    /// stalled database can never hang a verdict computation. Timeout,
    /// store error, and unknown version all fall through to the fallback;
    /// with no fallback configured the result is Missing and the caller
    /// must refuse to compute a verdict.
    pub async fn resolve(&self, config_version: &str) -> ResolvedThresholds {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let version = config_version.to_string();
            let lookup = tokio::task::spawn_blocking(move || store.get(&version));

            match tokio::time::timeout(self.lookup_timeout, lookup).await {
                Ok(Ok(Ok(Some(config)))) => {
                    debug!(config_version, "Resolved thresholds from store");
                    return ResolvedThresholds {
                        config: Some(config),
                        source: ConfigSource::Db,
                    };
                }
                Ok(Ok(Ok(None))) => {
                    debug!(config_version, "Unknown thresholds version in store");
                }
                Ok(Ok(Err(e))) => {
                    warn!(config_version, error = %e, "Threshold store lookup failed");
                }
                Ok(Err(e)) => {
                    warn!(config_version, error = %e, "Threshold store task panicked");
                }
                Err(_) => {
                    warn!(
                        config_version,
                        timeout_ms = self.lookup_timeout.as_millis() as u64,
                        "Threshold store lookup timed out"
                    );
                }
            }
        }

        match &self.fallback {
            Some(fallback) => ResolvedThresholds {
                config: Some(fallback.clone()),
                source: ConfigSource::Fallback,
            },
            None => ResolvedThresholds {
                config: None,
                source: ConfigSource::Missing,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_hash_is_stable() {
        let a = ThresholdsConfig::fallback();
        let b = ThresholdsConfig::fallback();
        assert_eq!(a.thresholds_hash, b.thresholds_hash);
        assert_eq!(a.thresholds_hash.len(), 64);
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = ThresholdsConfig::fallback();
        let mut bumped = base.clone();
        bumped.ruin_probability_ceiling = 0.10;
        assert_ne!(base.compute_hash(), bumped.compute_hash());
    }

    #[test]
    fn publish_then_get_round_trips() {
        let store = ThresholdStore::in_memory().unwrap();
        let mut config = ThresholdsConfig::fallback();
        config.config_version = "2024.1".to_string();
        store.publish(&config).unwrap();

        let loaded = store.get("2024.1").unwrap().unwrap();
        assert_eq!(loaded.config_version, "2024.1");
        assert_eq!(loaded.compute_hash(), loaded.thresholds_hash);
    }

    #[test]
    fn publish_same_version_twice_is_rejected() {
        let store = ThresholdStore::in_memory().unwrap();
        let mut config = ThresholdsConfig::fallback();
        config.config_version = "2024.1".to_string();
        store.publish(&config).unwrap();

        let mut altered = config.clone();
        altered.min_trade_count = 10;
        match store.publish(&altered) {
            Err(ThresholdStoreError::AlreadyPublished(v)) => assert_eq!(v, "2024.1"),
            other => panic!("expected AlreadyPublished, got {:?}", other.err()),
        }

        // Original row untouched.
        let loaded = store.get("2024.1").unwrap().unwrap();
        assert_eq!(loaded.min_trade_count, 30);
    }

    #[tokio::test]
    async fn resolve_prefers_store() {
        let store = Arc::new(ThresholdStore::in_memory().unwrap());
        let mut config = ThresholdsConfig::fallback();
        config.config_version = "2024.2".to_string();
        config.min_trade_count = 50;
        store.publish(&config).unwrap();

        let resolver =
            ThresholdResolver::with_default_fallback(Some(store), Duration::from_millis(500));
        let resolved = resolver.resolve("2024.2").await;
        assert_eq!(resolved.source, ConfigSource::Db);
        assert_eq!(resolved.config.unwrap().min_trade_count, 50);
    }

    #[tokio::test]
    async fn resolve_unknown_version_falls_back() {
        let store = Arc::new(ThresholdStore::in_memory().unwrap());
        let resolver =
            ThresholdResolver::with_default_fallback(Some(store), Duration::from_millis(500));
        let resolved = resolver.resolve("no-such-version").await;
        assert_eq!(resolved.source, ConfigSource::Fallback);
        assert!(resolved.config.is_some());
    }

    #[tokio::test]
    async fn resolve_without_store_or_fallback_is_missing() {
        let resolver = ThresholdResolver::new(None, None, Duration::from_millis(100));
        let resolved = resolver.resolve("anything").await;
        assert_eq!(resolved.source, ConfigSource::Missing);
        assert!(resolved.config.is_none());
    }
}
