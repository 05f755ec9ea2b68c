//! Monte Carlo Ruin Simulation
//!
//! Resamples the closed-trade P&L sequence with replacement and walks a
//! simulated equity curve per iteration, tallying how many paths breach the
//! ruin floor. Resampling is a block bootstrap (fixed block length,
//! wrap-around) so short-range serial correlation between sequential trades
//! survives the shuffle.
//!
//! # Determinism
//!
//! The seed is derived from (strategy_id, strategy_version,
//! thresholds_hash) and reported back to the caller, so a verdict run is
//! exactly reproducible. Each iteration's RNG is a pure function of
//! (seed, iteration index) - never of scheduling - so the rayon-parallel
//! tally produces the same count as a serial run.
//!
//! # Ruin definition
//!
//! Relative floor: a path is ruined when equity falls to or below
//! `ruin_fraction * starting_balance`. This choice is part of the
//! versioned threshold semantics; changing it requires a config_version
//! bump.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Block length for the block bootstrap.
pub const BLOCK_LENGTH: usize = 5;

/// Iterations processed per budget check.
const BATCH_SIZE: u32 = 256;

/// Simulation parameters beyond the thresholds themselves.
#[derive(Debug, Clone)]
pub struct MonteCarloParams {
    pub starting_balance: f64,
    /// Ruin floor as a fraction of starting balance.
    pub ruin_fraction: f64,
    pub iterations: u32,
    /// Wall-clock budget. Exceeding it reduces the iteration count; the
    /// actual count used is reported, never an error.
    pub budget: Duration,
}

impl Default for MonteCarloParams {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            ruin_fraction: 0.5,
            iterations: 1000,
            budget: Duration::from_secs(2),
        }
    }
}

/// Simulation outcome. `ruin_probability` is None when the run was skipped
/// (NOT_EVALUATED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloAnalysis {
    pub ruin_probability: Option<f64>,
    pub iterations_used: u32,
    pub seed: u64,
}

impl MonteCarloAnalysis {
    pub fn skipped(seed: u64) -> Self {
        Self {
            ruin_probability: None,
            iterations_used: 0,
            seed,
        }
    }

    pub fn evaluated(&self) -> bool {
        self.ruin_probability.is_some()
    }
}

/// Derive the simulation seed from the verdict identity.
///
/// First 8 bytes of SHA-256(strategy_id || strategy_version ||
/// thresholds_hash), big-endian. Reported back to the caller for audit.
pub fn derive_seed(strategy_id: &str, strategy_version: &str, thresholds_hash: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(strategy_id.as_bytes());
    hasher.update(strategy_version.as_bytes());
    hasher.update(thresholds_hash.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Run the simulation over a closed-trade P&L sequence.
///
/// Fewer than `min_trade_count` trades: skip and mark NOT_EVALUATED. The
/// iteration loop runs in parallel batches; after each batch the wall-clock
/// budget is checked and the run stops early if exceeded, reporting the
/// count actually processed.
pub fn simulate(
    pnls: &[f64],
    params: &MonteCarloParams,
    seed: u64,
    min_trade_count: u64,
) -> MonteCarloAnalysis {
    if (pnls.len() as u64) < min_trade_count {
        debug!(
            trades = pnls.len(),
            min_trade_count, "Monte Carlo skipped: insufficient sample"
        );
        return MonteCarloAnalysis::skipped(seed);
    }

    let floor = params.starting_balance * params.ruin_fraction;
    let started = Instant::now();

    let mut ruin_count: u64 = 0;
    let mut completed: u32 = 0;

    while completed < params.iterations {
        let batch = BATCH_SIZE.min(params.iterations - completed);
        let batch_start = completed;

        ruin_count += (batch_start..batch_start + batch)
            .into_par_iter()
            .filter(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(*i as u64));
                path_is_ruined(pnls, params.starting_balance, floor, &mut rng)
            })
            .count() as u64;

        completed += batch;

        if started.elapsed() > params.budget && completed < params.iterations {
            warn!(
                requested = params.iterations,
                completed,
                budget_ms = params.budget.as_millis() as u64,
                "Monte Carlo budget exceeded, reducing iteration count"
            );
            break;
        }
    }

    let ruin_probability = if completed == 0 {
        None
    } else {
        Some(ruin_count as f64 / completed as f64)
    };

    MonteCarloAnalysis {
        ruin_probability,
        iterations_used: completed,
        seed,
    }
}

/// Walk one resampled equity path; true if it touches the floor.
///
/// Block bootstrap: sample random block starts, replay `BLOCK_LENGTH`
/// consecutive trades per block (wrapping), until the path is as long as
/// the original series.
fn path_is_ruined(pnls: &[f64], starting_balance: f64, floor: f64, rng: &mut ChaCha8Rng) -> bool {
    let n = pnls.len();
    let mut equity = starting_balance;
    let mut produced = 0usize;

    while produced < n {
        let start = rng.gen_range(0..n);
        let take = BLOCK_LENGTH.min(n - produced);
        for offset in 0..take {
            equity += pnls[(start + offset) % n];
            if equity <= floor {
                return true;
            }
        }
        produced += take;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(iterations: u32) -> MonteCarloParams {
        MonteCarloParams {
            starting_balance: 10_000.0,
            ruin_fraction: 0.5,
            iterations,
            budget: Duration::from_secs(30),
        }
    }

    #[test]
    fn seed_is_deterministic_and_sensitive() {
        let a = derive_seed("strat-1", "1.0.0", "abc");
        let b = derive_seed("strat-1", "1.0.0", "abc");
        let c = derive_seed("strat-1", "1.0.1", "abc");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn insufficient_sample_is_skipped() {
        let result = simulate(&[100.0; 10], &params(100), 42, 30);
        assert!(!result.evaluated());
        assert_eq!(result.iterations_used, 0);
    }

    #[test]
    fn all_winning_series_never_ruins() {
        let pnls = vec![50.0; 40];
        let result = simulate(&pnls, &params(500), 42, 30);
        assert_eq!(result.ruin_probability, Some(0.0));
        assert_eq!(result.iterations_used, 500);
    }

    #[test]
    fn catastrophic_series_always_ruins() {
        // Every trade loses 20% of starting balance: ruin within 3 trades.
        let pnls = vec![-2_000.0; 40];
        let result = simulate(&pnls, &params(500), 42, 30);
        assert_eq!(result.ruin_probability, Some(1.0));
    }

    #[test]
    fn same_seed_same_probability() {
        let pnls: Vec<f64> = (0..60)
            .map(|i| if i % 3 == 0 { -400.0 } else { 150.0 })
            .collect();
        let a = simulate(&pnls, &params(400), 7, 30);
        let b = simulate(&pnls, &params(400), 7, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_may_differ_but_is_reported() {
        let pnls: Vec<f64> = (0..60)
            .map(|i| if i % 3 == 0 { -400.0 } else { 150.0 })
            .collect();
        let a = simulate(&pnls, &params(400), 7, 30);
        let b = simulate(&pnls, &params(400), 8, 30);
        assert_eq!(a.seed, 7);
        assert_eq!(b.seed, 8);
    }

    #[test]
    fn budget_exhaustion_reports_actual_count() {
        let pnls = vec![10.0; 100];
        let tight = MonteCarloParams {
            iterations: 1_000_000,
            budget: Duration::from_millis(0),
            ..params(0)
        };
        let result = simulate(&pnls, &tight, 42, 30);
        assert!(result.iterations_used >= 1);
        assert!(result.iterations_used < 1_000_000);
        assert!(result.evaluated());
    }
}
