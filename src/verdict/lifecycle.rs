//! Strategy Lifecycle State Machine
//!
//! Maps (current state, verdict, recent verdict history) to a transition
//! decision. Pure: no I/O, no clocks, no ambient configuration - the
//! recovery window is an explicit parameter. External events (a backtest
//! completing, a user deploying live) move the machine through the edges
//! a verdict cannot.

use crate::models::{Decision, LifecycleState, Verdict};
use serde::{Deserialize, Serialize};

/// Configuration for the verdict-driven edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Consecutive re-evaluations required to leave EDGE_AT_RISK in either
    /// direction (recovery to LIVE_MONITORING or termination).
    pub recovery_evaluations: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            recovery_evaluations: 3,
        }
    }
}

/// Events originating outside the verdict loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalEvent {
    BacktestCompleted,
    DeployedLive,
}

/// Apply an external event. Returns None when the event is not valid from
/// the current state (callers surface that as a validation error).
pub fn apply_external(state: LifecycleState, event: ExternalEvent) -> Option<LifecycleState> {
    match (state, event) {
        (LifecycleState::Draft, ExternalEvent::BacktestCompleted) => {
            Some(LifecycleState::Backtested)
        }
        (LifecycleState::Verified, ExternalEvent::DeployedLive) => {
            Some(LifecycleState::LiveMonitoring)
        }
        _ => None,
    }
}

/// Decide what a verdict does to the lifecycle.
///
/// `recent` is the trailing window of re-evaluation verdicts, oldest
/// first, with the current verdict as the last element. Only the
/// EDGE_AT_RISK edges consult it.
pub fn decide(
    state: LifecycleState,
    verdict: Verdict,
    recent: &[Verdict],
    config: &LifecycleConfig,
) -> Decision {
    match state {
        LifecycleState::Backtested => match verdict {
            Verdict::Ready => Decision::advance(state, LifecycleState::Verified),
            Verdict::Uncertain => Decision::hold(state, "verdict uncertain, awaiting stronger evidence"),
            Verdict::NotDeployable => Decision::terminate(state, "verdict not deployable"),
        },

        LifecycleState::LiveMonitoring => match verdict {
            Verdict::NotDeployable => Decision::revert(
                state,
                LifecycleState::EdgeAtRisk,
                "live re-evaluation verdict not deployable",
            ),
            _ => Decision::hold(state, "live re-evaluation passed"),
        },

        LifecycleState::EdgeAtRisk => {
            let window = config.recovery_evaluations;
            if recent.len() >= window {
                let tail = &recent[recent.len() - window..];
                if tail.iter().all(|v| *v != Verdict::NotDeployable) {
                    return Decision::advance(state, LifecycleState::LiveMonitoring);
                }
                if tail.iter().all(|v| *v == Verdict::NotDeployable) {
                    return Decision::terminate(
                        state,
                        format!("verdict not deployable across {} consecutive re-evaluations", window),
                    );
                }
            }
            Decision::hold(state, "edge at risk, collecting re-evaluations")
        }

        // DRAFT and VERIFIED only move on external events; INVALIDATED is
        // terminal.
        LifecycleState::Draft | LifecycleState::Verified | LifecycleState::Invalidated => {
            Decision::hold(state, "no verdict-driven transition from this state")
        }
    }
}
