//! Walk-Forward Degradation Analysis
//!
//! Classifies the drop between in-sample and out-of-sample performance into
//! pass / moderate / extreme tiers. Degradation and OOS sample size come
//! either directly from caller-supplied intermediate results or are derived
//! from an explicit IS/OOS trade split. Absent data is a NOT_EVALUATED
//! tier, not an error.

use crate::models::{ReasonCode, Trade};
use crate::verdict::metrics;
use crate::verdict::thresholds::ThresholdsConfig;
use serde::{Deserialize, Serialize};

/// Walk-forward classification tiers.
///
/// Moderate degradation splits on evidence quality: with a sufficient
/// out-of-sample trade count the flag is conclusive; below the floor the
/// same degradation is only suggestive. Extreme degradation condemns the
/// strategy regardless of sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalkForwardTier {
    NotEvaluated,
    Pass,
    /// Moderate degradation, sufficient OOS evidence.
    ModerateConclusive,
    /// Moderate degradation, inconclusive OOS evidence.
    ModerateInconclusive,
    /// Extreme degradation.
    Extreme,
}

impl WalkForwardTier {
    /// Reason code this tier emits, if any.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            WalkForwardTier::NotEvaluated | WalkForwardTier::Pass => None,
            WalkForwardTier::ModerateConclusive => {
                Some(ReasonCode::WalkForwardDegradationExtreme)
            }
            WalkForwardTier::ModerateInconclusive => {
                Some(ReasonCode::WalkForwardFlaggedNotConclusive)
            }
            WalkForwardTier::Extreme => Some(ReasonCode::WalkForwardDegradationExtreme),
        }
    }

    /// True for the tiers that push the verdict toward UNCERTAIN.
    pub fn flags_uncertain(&self) -> bool {
        matches!(
            self,
            WalkForwardTier::ModerateConclusive | WalkForwardTier::ModerateInconclusive
        )
    }

    /// True for the tier that forces NOT_DEPLOYABLE.
    pub fn is_extreme(&self) -> bool {
        matches!(self, WalkForwardTier::Extreme)
    }
}

/// Walk-forward analysis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardAnalysis {
    pub tier: WalkForwardTier,
    pub degradation_pct: Option<f64>,
    pub oos_sample_size: Option<u64>,
}

impl WalkForwardAnalysis {
    pub fn not_evaluated() -> Self {
        Self {
            tier: WalkForwardTier::NotEvaluated,
            degradation_pct: None,
            oos_sample_size: None,
        }
    }
}

/// Classify a supplied degradation percentage.
///
/// Tier boundaries, with T1 = `max_sharpe_degradation_pct`,
/// T2 = `extreme_sharpe_degradation_pct` (T2 > T1),
/// N = `min_oos_trade_count`:
///
/// - `deg <= T1` -> Pass
/// - `T1 < deg <= T2`, `oos >= N` -> ModerateConclusive
/// - `T1 < deg <= T2`, `oos < N` or unknown -> ModerateInconclusive
/// - `deg > T2` -> Extreme, OOS sample size irrelevant
pub fn classify(
    degradation_pct: Option<f64>,
    oos_sample_size: Option<u64>,
    thresholds: &ThresholdsConfig,
) -> WalkForwardAnalysis {
    let Some(degradation) = degradation_pct else {
        return WalkForwardAnalysis::not_evaluated();
    };

    let t1 = thresholds.max_sharpe_degradation_pct;
    let t2 = thresholds.extreme_sharpe_degradation_pct;
    let n = thresholds.min_oos_trade_count;

    let tier = if degradation <= t1 {
        WalkForwardTier::Pass
    } else if degradation <= t2 {
        match oos_sample_size {
            Some(oos) if oos >= n => WalkForwardTier::ModerateConclusive,
            _ => WalkForwardTier::ModerateInconclusive,
        }
    } else {
        WalkForwardTier::Extreme
    };

    WalkForwardAnalysis {
        tier,
        degradation_pct: Some(degradation),
        oos_sample_size,
    }
}

/// Derive degradation from an explicit in-sample / out-of-sample split,
/// then classify.
///
/// Degradation is the percentage drop in Sharpe from IS to OOS. A
/// non-positive in-sample Sharpe gives no meaningful baseline, so the
/// analysis degrades to NOT_EVALUATED rather than manufacturing a number.
pub fn classify_split(
    in_sample: &[Trade],
    out_of_sample: &[Trade],
    thresholds: &ThresholdsConfig,
) -> WalkForwardAnalysis {
    let is_returns: Vec<f64> = in_sample
        .iter()
        .filter(|t| t.is_closed())
        .map(|t| t.pnl)
        .collect();
    let oos_returns: Vec<f64> = out_of_sample
        .iter()
        .filter(|t| t.is_closed())
        .map(|t| t.pnl)
        .collect();

    let is_sharpe = metrics::sharpe_ratio(&is_returns, metrics::DEFAULT_ANNUALIZATION_FACTOR);
    if is_sharpe <= 0.0 {
        return WalkForwardAnalysis::not_evaluated();
    }
    let oos_sharpe = metrics::sharpe_ratio(&oos_returns, metrics::DEFAULT_ANNUALIZATION_FACTOR);

    let degradation_pct = (is_sharpe - oos_sharpe) / is_sharpe * 100.0;
    classify(
        Some(degradation_pct),
        Some(oos_returns.len() as u64),
        thresholds,
    )
}
