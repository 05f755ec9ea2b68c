//! Verdict Engine - Single Authoritative Source for Deployability
//!
//! This module is the SOLE pathway for classifying a strategy version as
//! READY / UNCERTAIN / NOT_DEPLOYABLE. It combines the caller-supplied
//! composite robustness score, the walk-forward tier, the Monte Carlo
//! ruin outcome, and the sample size, against an explicitly passed
//! threshold set.
//!
//! # Invariants
//!
//! 1. Total: every input produces a structured result. Missing optional
//!    data degrades to NOT_EVALUATED tiers plus a warning, never an error.
//! 2. Deterministic: identical inputs (including thresholds and derived
//!    seed) produce a byte-identical VerdictResult.
//! 3. Thresholds are a parameter, never ambient configuration.
//!
//! # Precedence
//!
//! - Insufficient sample overrides everything: NOT_DEPLOYABLE +
//!   INSUFFICIENT_SAMPLE.
//! - Extreme walk-forward degradation, a breached ruin ceiling,
//!   or a composite at/below the floor each force NOT_DEPLOYABLE.
//! - READY requires a composite at/above the confidence bar AND a clean
//!   walk-forward and ruin slate.
//! - Everything else is UNCERTAIN.

use crate::models::{
    IntermediateResults, ReasonCode, Trade, Verdict, VerdictResult, VerdictScores,
};
use crate::verdict::monte_carlo::{self, MonteCarloAnalysis, MonteCarloParams};
use crate::verdict::thresholds::ThresholdsConfig;
use crate::verdict::walk_forward::{self, WalkForwardTier};
use tracing::debug;

/// Everything the engine needs for one evaluation.
#[derive(Debug, Clone)]
pub struct VerdictRequest {
    pub strategy_id: String,
    pub strategy_version: String,
    pub trade_history: Vec<Trade>,
    pub intermediate_results: Option<IntermediateResults>,
}

/// Engine output: the verdict plus the simulation seed when the ruin
/// simulation actually ran
/// (reported for audit reproducibility).
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub result: VerdictResult,
    pub monte_carlo_seed: Option<u64>,
}

/// The verdict engine. Stateless and safe to share across requests; the
/// Monte Carlo parameters are fixed at construction.
pub struct VerdictEngine {
    mc_params: MonteCarloParams,
}

impl Default for VerdictEngine {
    fn default() -> Self {
        Self {
            mc_params: MonteCarloParams::default(),
        }
    }
}

impl VerdictEngine {
    pub fn new(mc_params: MonteCarloParams) -> Self {
        Self { mc_params }
    }

    /// Evaluate a strategy version against a threshold set.
    pub fn evaluate(&self, request: &VerdictRequest, thresholds: &ThresholdsConfig) -> EngineOutcome {
        let mut reason_codes: Vec<ReasonCode> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let intermediate = request.intermediate_results.clone().unwrap_or_default();
        let scores_in = &intermediate.robustness_scores;

        let closed_pnls: Vec<f64> = request
            .trade_history
            .iter()
            .filter(|t| t.is_closed())
            .map(|t| t.pnl)
            .collect();

        let sample_size = intermediate
            .sample_size
            .unwrap_or(closed_pnls.len() as u64);

        // Walk-forward degradation tier.
        let wf = walk_forward::classify(
            scores_in.walk_forward_degradation_pct,
            scores_in.walk_forward_oos_sample_size,
            thresholds,
        );
        if wf.tier == WalkForwardTier::NotEvaluated {
            warnings.push("no walk-forward data supplied".to_string());
        }

        // Ruin probability. Caller-supplied value wins; otherwise run
        // the seeded simulation over the closed-trade P&L sequence.
        let (ruin_probability, mc_analysis) = match scores_in.monte_carlo_ruin_probability {
            Some(supplied) => (Some(supplied), None),
            None => {
                let seed = monte_carlo::derive_seed(
                    &request.strategy_id,
                    &request.strategy_version,
                    &thresholds.thresholds_hash,
                );
                // Iteration count is part of the versioned threshold
                // semantics, not engine construction.
                let params = MonteCarloParams {
                    iterations: thresholds.monte_carlo_iterations,
                    ..self.mc_params.clone()
                };
                let analysis = monte_carlo::simulate(
                    &closed_pnls,
                    &params,
                    seed,
                    thresholds.min_trade_count,
                );
                if !analysis.evaluated() {
                    warnings.push("Monte Carlo skipped: insufficient sample".to_string());
                }
                (analysis.ruin_probability, Some(analysis))
            }
        };

        let ruin_breached = ruin_probability
            .map(|p| p > thresholds.ruin_probability_ceiling)
            .unwrap_or(false);

        let composite = scores_in.composite;
        if composite.is_none() {
            warnings.push("no composite robustness score supplied".to_string());
        }

        // Verdict precedence. Reason codes are collected in a fixed order
        // (sample, walk-forward, ruin, composite) so the result is deterministic and
        // the first code is always the dominant cause.
        let verdict = if sample_size < thresholds.min_trade_count {
            reason_codes.push(ReasonCode::InsufficientSample);
            Verdict::NotDeployable
        } else {
            if let Some(code) = wf.tier.reason_code() {
                reason_codes.push(code);
            }
            if ruin_breached {
                reason_codes.push(ReasonCode::RuinProbabilityExceeded);
            }

            let composite_floor_breached = composite
                .map(|c| c <= thresholds.not_deployable_threshold)
                .unwrap_or(false);
            if composite_floor_breached {
                reason_codes.push(ReasonCode::CompositeScoreBelowFloor);
            }

            if wf.tier.is_extreme() || ruin_breached || composite_floor_breached {
                Verdict::NotDeployable
            } else {
                let ready = composite
                    .map(|c| c >= thresholds.ready_confidence_threshold)
                    .unwrap_or(false);

                if ready && !wf.tier.flags_uncertain() {
                    Verdict::Ready
                } else {
                    Verdict::Uncertain
                }
            }
        };

        let (mc_ruin, mc_iters, mc_seed) = match &mc_analysis {
            Some(a) => (a.ruin_probability, evaluated_iterations(a), Some(a.seed)),
            None => (ruin_probability, None, None),
        };

        let result = VerdictResult {
            strategy_id: request.strategy_id.clone(),
            strategy_version: request.strategy_version.clone(),
            verdict,
            reason_codes,
            scores: VerdictScores {
                composite,
                sample_size,
                walk_forward_degradation_pct: wf.degradation_pct,
                walk_forward_oos_sample_size: wf.oos_sample_size,
                monte_carlo_ruin_probability: mc_ruin,
                monte_carlo_iterations_used: mc_iters,
            },
            thresholds_used: thresholds.reference(),
            warnings,
        };

        debug!(
            strategy_id = %result.strategy_id,
            strategy_version = %result.strategy_version,
            verdict = %result.verdict,
            reasons = result.reason_codes.len(),
            "Verdict computed"
        );

        EngineOutcome {
            result,
            monte_carlo_seed: mc_seed,
        }
    }
}

fn evaluated_iterations(analysis: &MonteCarloAnalysis) -> Option<u32> {
    if analysis.evaluated() {
        Some(analysis.iterations_used)
    } else {
        None
    }
}
