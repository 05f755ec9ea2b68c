//! Strategy Trust Verdict Pipeline
//!
//! Deterministic classification of a strategy version's deployability.
//!
//! # Architecture
//!
//! ```text
//! trade history ──┬──▶ MetricsCalculator (pure)
//!                 ├──▶ WalkForwardAnalyzer (degradation tiers)
//!                 └──▶ MonteCarloSimulator (seeded ruin estimate)
//!                               │
//!                               ▼
//!       ThresholdResolver ──▶ VerdictEngine ──▶ VerdictResult
//!       (db / fallback /        │
//!        missing = refuse)      ▼
//!                        LifecycleStateMachine ──▶ Decision
//! ```
//!
//! # Determinism Guarantees
//!
//! - Thresholds are an explicit parameter to every computation
//! - RNG: seeded `ChaCha8Rng` only, seed derived from
//!   (strategy_id, strategy_version, thresholds_hash)
//! - Identical inputs produce a byte-identical `VerdictResult`

pub mod engine;
pub mod lifecycle;
pub mod metrics;
pub mod monte_carlo;
pub mod thresholds;
pub mod walk_forward;

pub use engine::{EngineOutcome, VerdictEngine, VerdictRequest};
pub use lifecycle::{ExternalEvent, LifecycleConfig};
pub use monte_carlo::{MonteCarloAnalysis, MonteCarloParams};
pub use thresholds::{ConfigSource, ResolvedThresholds, ThresholdResolver, ThresholdStore, ThresholdsConfig};
pub use walk_forward::{WalkForwardAnalysis, WalkForwardTier};
