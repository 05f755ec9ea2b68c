//! Strategy Verification Endpoint
//!
//! `POST /api/v1/verify` - turns trade history, backtest parameters, and
//! optional robustness signals into a verdict plus a lifecycle decision.
//!
//! The loosely-typed JSON body is decoded into a validated internal
//! representation at this boundary; malformed input is rejected with
//! field-level detail before any engine logic runs. "Maybe present"
//! fields never propagate as implicit nulls into the math.

use crate::api::error::{ApiError, FieldError};
use crate::api::AppState;
use crate::models::{
    Decision, IntermediateResults, LifecycleState, Trade, Verdict, VerdictResult,
};
use crate::verdict::lifecycle;
use crate::verdict::VerdictRequest;
use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Loose request shape. Required fields are Options here so absence is
/// reported as a field error, not a serde parse failure.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub strategy_id: Option<String>,
    pub strategy_version: Option<String>,
    pub current_lifecycle_state: Option<String>,
    #[serde(default)]
    pub trade_history: Vec<TradeDto>,
    #[serde(default)]
    pub backtest_parameters: BacktestParameters,
    pub intermediate_results: Option<IntermediateResults>,
    /// Trailing re-evaluation verdicts the platform has stored for this
    /// strategy version, oldest first. Only the EDGE_AT_RISK edges read it.
    #[serde(default)]
    pub recent_verdicts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BacktestParameters {
    pub config_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TradeDto {
    pub pair: Option<String>,
    pub pnl: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verdict_result: VerdictResult,
    pub lifecycle_state: LifecycleState,
    pub decision: Decision,
    pub config_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monte_carlo_seed: Option<u64>,
}

struct ValidatedRequest {
    strategy_id: String,
    strategy_version: String,
    current_state: LifecycleState,
    trades: Vec<Trade>,
    config_version: String,
    intermediate_results: Option<IntermediateResults>,
    recent_verdicts: Vec<Verdict>,
}

/// POST /api/v1/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let validated = validate(request)?;

    let resolved = state.resolver.resolve(&validated.config_version).await;
    let thresholds = match (&resolved.config, resolved.source) {
        (Some(config), _) => config.clone(),
        // Fail closed: no threshold source means no verdict.
        (None, _) => return Err(ApiError::ThresholdsMissing),
    };

    let engine_request = VerdictRequest {
        strategy_id: validated.strategy_id,
        strategy_version: validated.strategy_version,
        trade_history: validated.trades,
        intermediate_results: validated.intermediate_results,
    };
    let outcome = state.engine.evaluate(&engine_request, &thresholds);

    let mut recent = validated.recent_verdicts;
    recent.push(outcome.result.verdict);
    let decision = lifecycle::decide(
        validated.current_state,
        outcome.result.verdict,
        &recent,
        &state.lifecycle_config,
    );
    let lifecycle_state = decision.to.unwrap_or(validated.current_state);

    info!(
        strategy_id = %outcome.result.strategy_id,
        strategy_version = %outcome.result.strategy_version,
        verdict = %outcome.result.verdict,
        decision = ?decision.kind,
        config_source = resolved.source.as_str(),
        "Verification complete"
    );

    Ok(Json(VerifyResponse {
        verdict_result: outcome.result,
        lifecycle_state,
        decision,
        config_source: resolved.source.as_str().to_string(),
        monte_carlo_seed: outcome.monte_carlo_seed,
    }))
}

fn validate(request: VerifyRequest) -> Result<ValidatedRequest, ApiError> {
    let mut errors: Vec<FieldError> = Vec::new();

    let strategy_id = match request.strategy_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => {
            errors.push(FieldError::new("strategy_id", "required non-empty string"));
            String::new()
        }
    };

    let strategy_version = match request.strategy_version.as_deref() {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => {
            errors.push(FieldError::new(
                "strategy_version",
                "required non-empty string",
            ));
            String::new()
        }
    };

    let current_state = match request.current_lifecycle_state.as_deref() {
        Some(raw) => match parse_lifecycle_state(raw) {
            Some(state) => state,
            None => {
                errors.push(FieldError::new(
                    "current_lifecycle_state",
                    format!("unknown lifecycle state '{}'", raw),
                ));
                LifecycleState::Draft
            }
        },
        None => {
            errors.push(FieldError::new(
                "current_lifecycle_state",
                "required lifecycle state",
            ));
            LifecycleState::Draft
        }
    };

    let mut trades = Vec::with_capacity(request.trade_history.len());
    for (i, dto) in request.trade_history.into_iter().enumerate() {
        match validate_trade(i, dto, &mut errors) {
            Some(trade) => trades.push(trade),
            None => {}
        }
    }

    if let Some(intermediate) = &request.intermediate_results {
        if let Some(p) = intermediate.robustness_scores.monte_carlo_ruin_probability {
            if !(0.0..=1.0).contains(&p) {
                errors.push(FieldError::new(
                    "intermediate_results.robustness_scores.monte_carlo_ruin_probability",
                    "must be within [0, 1]",
                ));
            }
        }
    }

    let mut recent_verdicts = Vec::with_capacity(request.recent_verdicts.len());
    for (i, raw) in request.recent_verdicts.iter().enumerate() {
        match parse_verdict(raw) {
            Some(v) => recent_verdicts.push(v),
            None => errors.push(FieldError::new(
                format!("recent_verdicts[{}]", i),
                format!("unknown verdict '{}'", raw),
            )),
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    Ok(ValidatedRequest {
        strategy_id,
        strategy_version,
        current_state,
        trades,
        config_version: request
            .backtest_parameters
            .config_version
            .unwrap_or_else(|| "fallback-v1".to_string()),
        intermediate_results: request.intermediate_results,
        recent_verdicts,
    })
}

fn validate_trade(index: usize, dto: TradeDto, errors: &mut Vec<FieldError>) -> Option<Trade> {
    let mut ok = true;

    let pair = match dto.pair.as_deref() {
        Some(p) if !p.trim().is_empty() => p.to_string(),
        _ => {
            errors.push(FieldError::new(
                format!("trade_history[{}].pair", index),
                "required non-empty string",
            ));
            ok = false;
            String::new()
        }
    };

    let pnl = match dto.pnl {
        Some(pnl) if pnl.is_finite() => pnl,
        Some(_) => {
            errors.push(FieldError::new(
                format!("trade_history[{}].pnl", index),
                "must be a finite number",
            ));
            ok = false;
            0.0
        }
        None => {
            errors.push(FieldError::new(
                format!("trade_history[{}].pnl", index),
                "required number",
            ));
            ok = false;
            0.0
        }
    };

    let entry_time = match dto.entry_time {
        Some(t) => t,
        None => {
            errors.push(FieldError::new(
                format!("trade_history[{}].entry_time", index),
                "required timestamp",
            ));
            ok = false;
            Utc::now()
        }
    };

    if let Some(close_time) = dto.close_time {
        if close_time < entry_time {
            errors.push(FieldError::new(
                format!("trade_history[{}].close_time", index),
                "must not precede entry_time",
            ));
            ok = false;
        }
    }

    if ok {
        Some(Trade {
            pair,
            pnl,
            entry_time,
            close_time: dto.close_time,
        })
    } else {
        None
    }
}

fn parse_lifecycle_state(raw: &str) -> Option<LifecycleState> {
    match raw {
        "DRAFT" => Some(LifecycleState::Draft),
        "BACKTESTED" => Some(LifecycleState::Backtested),
        "VERIFIED" => Some(LifecycleState::Verified),
        "LIVE_MONITORING" => Some(LifecycleState::LiveMonitoring),
        "EDGE_AT_RISK" => Some(LifecycleState::EdgeAtRisk),
        "INVALIDATED" => Some(LifecycleState::Invalidated),
        _ => None,
    }
}

fn parse_verdict(raw: &str) -> Option<Verdict> {
    match raw {
        "READY" => Some(Verdict::Ready),
        "UNCERTAIN" => Some(Verdict::Uncertain),
        "NOT_DEPLOYABLE" => Some(Verdict::NotDeployable),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> VerifyRequest {
        VerifyRequest {
            strategy_id: Some("strat-1".to_string()),
            strategy_version: Some("1.0.0".to_string()),
            current_lifecycle_state: Some("BACKTESTED".to_string()),
            trade_history: vec![],
            backtest_parameters: BacktestParameters::default(),
            intermediate_results: None,
            recent_verdicts: vec![],
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        let validated = validate(base_request()).unwrap();
        assert_eq!(validated.strategy_id, "strat-1");
        assert_eq!(validated.current_state, LifecycleState::Backtested);
        assert_eq!(validated.config_version, "fallback-v1");
    }

    #[test]
    fn missing_required_fields_report_each_field() {
        let request = VerifyRequest {
            strategy_id: None,
            strategy_version: Some("  ".to_string()),
            current_lifecycle_state: Some("LIMBO".to_string()),
            ..base_request()
        };
        match validate(request) {
            Err(ApiError::Validation(fields)) => {
                let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert!(names.contains(&"strategy_id"));
                assert!(names.contains(&"strategy_version"));
                assert!(names.contains(&"current_lifecycle_state"));
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn malformed_trade_reports_indexed_field() {
        let mut request = base_request();
        request.trade_history = vec![TradeDto {
            pair: Some("EURUSD".to_string()),
            pnl: None,
            entry_time: Some(Utc::now()),
            close_time: None,
        }];
        match validate(request) {
            Err(ApiError::Validation(fields)) => {
                assert!(fields.iter().any(|f| f.field == "trade_history[0].pnl"));
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn close_before_entry_is_rejected() {
        let now = Utc::now();
        let mut request = base_request();
        request.trade_history = vec![TradeDto {
            pair: Some("EURUSD".to_string()),
            pnl: Some(5.0),
            entry_time: Some(now),
            close_time: Some(now - chrono::Duration::hours(1)),
        }];
        assert!(matches!(validate(request), Err(ApiError::Validation(_))));
    }

    #[test]
    fn ruin_probability_out_of_range_is_rejected() {
        let mut request = base_request();
        request.intermediate_results = Some(IntermediateResults {
            robustness_scores: crate::models::RobustnessScores {
                monte_carlo_ruin_probability: Some(1.5),
                ..Default::default()
            },
            sample_size: None,
        });
        assert!(matches!(validate(request), Err(ApiError::Validation(_))));
    }

    #[test]
    fn unknown_recent_verdict_is_rejected() {
        let mut request = base_request();
        request.recent_verdicts = vec!["READY".to_string(), "MAYBE".to_string()];
        match validate(request) {
            Err(ApiError::Validation(fields)) => {
                assert!(fields.iter().any(|f| f.field == "recent_verdicts[1]"));
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }
}
