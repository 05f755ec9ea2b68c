use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single trade in a strategy's history.
///
/// A trade is closed iff `close_time` is present. Open trades are excluded
/// from P&L-based statistics but still count toward raw history length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub pair: String,
    /// Signed money amount. Positive = profit.
    pub pnl: f64,
    pub entry_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.close_time.is_some()
    }
}

/// Deployability classification of a strategy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ready,
    Uncertain,
    NotDeployable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ready => "READY",
            Verdict::Uncertain => "UNCERTAIN",
            Verdict::NotDeployable => "NOT_DEPLOYABLE",
        }
    }

    /// Severity rank used by the monotonicity tests: higher is worse.
    pub fn severity(&self) -> u8 {
        match self {
            Verdict::Ready => 0,
            Verdict::Uncertain => 1,
            Verdict::NotDeployable => 2,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reasons attached to a verdict.
///
/// This is a CLOSED enum: every reason the engine can emit is enumerated
/// here so downstream consumers can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    InsufficientSample,
    WalkForwardDegradationExtreme,
    WalkForwardFlaggedNotConclusive,
    RuinProbabilityExceeded,
    CompositeScoreBelowFloor,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InsufficientSample => "INSUFFICIENT_SAMPLE",
            ReasonCode::WalkForwardDegradationExtreme => "WALK_FORWARD_DEGRADATION_EXTREME",
            ReasonCode::WalkForwardFlaggedNotConclusive => "WALK_FORWARD_FLAGGED_NOT_CONCLUSIVE",
            ReasonCode::RuinProbabilityExceeded => "RUIN_PROBABILITY_EXCEEDED",
            ReasonCode::CompositeScoreBelowFloor => "COMPOSITE_SCORE_BELOW_FLOOR",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied robustness signals computed upstream of the engine.
///
/// Every field except `composite` is optional: absence degrades to a
/// NOT_EVALUATED tier, never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobustnessScores {
    pub composite: Option<f64>,
    pub walk_forward_degradation_pct: Option<f64>,
    pub walk_forward_oos_sample_size: Option<u64>,
    pub monte_carlo_ruin_probability: Option<f64>,
}

/// Optional caller-supplied intermediate results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntermediateResults {
    #[serde(default)]
    pub robustness_scores: RobustnessScores,
    pub sample_size: Option<u64>,
}

/// Scores section of a verdict result. Sentinel `None` = NOT_EVALUATED.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerdictScores {
    pub composite: Option<f64>,
    pub sample_size: u64,
    pub walk_forward_degradation_pct: Option<f64>,
    pub walk_forward_oos_sample_size: Option<u64>,
    pub monte_carlo_ruin_probability: Option<f64>,
    /// Iterations the simulator actually ran (may be below the configured
    /// count under a wall-clock budget).
    pub monte_carlo_iterations_used: Option<u32>,
}

/// The verdict engine's complete output.
///
/// Pure function of its inputs: identical inputs always produce an
/// identical result, which is what makes verdicts auditable after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictResult {
    pub strategy_id: String,
    pub strategy_version: String,
    pub verdict: Verdict,
    pub reason_codes: Vec<ReasonCode>,
    pub scores: VerdictScores,
    /// Pins the exact threshold set applied (config_version + hash).
    pub thresholds_used: ThresholdsRef,
    pub warnings: Vec<String>,
}

/// Reference to the threshold set a verdict was computed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsRef {
    pub config_version: String,
    pub thresholds_hash: String,
}

/// Trust/deployment stage of a strategy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Draft,
    Backtested,
    Verified,
    LiveMonitoring,
    EdgeAtRisk,
    Invalidated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "DRAFT",
            LifecycleState::Backtested => "BACKTESTED",
            LifecycleState::Verified => "VERIFIED",
            LifecycleState::LiveMonitoring => "LIVE_MONITORING",
            LifecycleState::EdgeAtRisk => "EDGE_AT_RISK",
            LifecycleState::Invalidated => "INVALIDATED",
        }
    }

    /// INVALIDATED is terminal: no automatic transition out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Invalidated)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the lifecycle machine decided to do with a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Advance,
    Hold,
    Revert,
    Terminate,
}

/// A lifecycle transition decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<LifecycleState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<LifecycleState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn hold(state: LifecycleState, reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Hold,
            from: Some(state),
            to: Some(state),
            reason: Some(reason.into()),
        }
    }

    pub fn advance(from: LifecycleState, to: LifecycleState) -> Self {
        Self {
            kind: DecisionKind::Advance,
            from: Some(from),
            to: Some(to),
            reason: None,
        }
    }

    pub fn revert(from: LifecycleState, to: LifecycleState, reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Revert,
            from: Some(from),
            to: Some(to),
            reason: Some(reason.into()),
        }
    }

    pub fn terminate(from: LifecycleState, reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Terminate,
            from: Some(from),
            to: Some(LifecycleState::Invalidated),
            reason: Some(reason.into()),
        }
    }
}

/// Application configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub api_key: String,
    /// HMAC key for track-record checkpoints. Must come from the
    /// environment: it lives outside the trust boundary that can write
    /// events.
    pub checkpoint_key: String,
    /// Cut a checkpoint every this many appended events.
    pub checkpoint_interval: u64,
    /// Bounded timeout for threshold store lookups, in milliseconds.
    pub thresholds_timeout_ms: u64,
    /// Wall-clock budget for a Monte Carlo run, in milliseconds.
    pub monte_carlo_budget_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./edgeaudit.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let api_key = std::env::var("API_KEY")
            .map_err(|_| anyhow::anyhow!("API_KEY must be set"))?;

        let checkpoint_key = std::env::var("CHECKPOINT_HMAC_KEY")
            .map_err(|_| anyhow::anyhow!("CHECKPOINT_HMAC_KEY must be set"))?;

        let checkpoint_interval = std::env::var("CHECKPOINT_INTERVAL")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .unwrap_or(100);

        let thresholds_timeout_ms = std::env::var("THRESHOLDS_TIMEOUT_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        let monte_carlo_budget_ms = std::env::var("MONTE_CARLO_BUDGET_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        Ok(Self {
            database_path,
            port,
            api_key,
            checkpoint_key,
            checkpoint_interval,
            thresholds_timeout_ms,
            monte_carlo_budget_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_severity_is_ordered() {
        assert!(Verdict::Ready.severity() < Verdict::Uncertain.severity());
        assert!(Verdict::Uncertain.severity() < Verdict::NotDeployable.severity());
    }

    #[test]
    fn verdict_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&Verdict::NotDeployable).unwrap(),
            "\"NOT_DEPLOYABLE\""
        );
        assert_eq!(serde_json::to_string(&Verdict::Ready).unwrap(), "\"READY\"");
    }

    #[test]
    fn invalidated_is_terminal() {
        assert!(LifecycleState::Invalidated.is_terminal());
        assert!(!LifecycleState::EdgeAtRisk.is_terminal());
    }

    #[test]
    fn decision_constructors() {
        let d = Decision::advance(LifecycleState::Backtested, LifecycleState::Verified);
        assert_eq!(d.kind, DecisionKind::Advance);
        assert_eq!(d.from, Some(LifecycleState::Backtested));
        assert_eq!(d.to, Some(LifecycleState::Verified));

        let t = Decision::terminate(LifecycleState::Backtested, "not deployable");
        assert_eq!(t.to, Some(LifecycleState::Invalidated));
    }
}
