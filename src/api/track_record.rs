//! Track-Record Endpoints
//!
//! Read surface over an instance's hash-linked ledger plus the internal
//! ingestion endpoint the live-telemetry pipeline appends through.
//!
//! - `GET  /api/v1/track-record/:instance_id/verify`  - chain + checkpoint proof
//! - `GET  /api/v1/track-record/:instance_id/metrics` - performance metrics
//! - `GET  /api/v1/track-record/:instance_id/export`  - offline-audit snapshot
//! - `POST /api/v1/track-record/:instance_id/events`  - append an event

use crate::api::error::{ApiError, FieldError};
use crate::api::AppState;
use crate::ledger::{
    self, AppendError, ChainVerificationResult, Checkpoint, CheckpointVerification,
    TrackEventType, TrackRecordEvent,
};
use crate::verdict::metrics::{self, DEFAULT_ANNUALIZATION_FACTOR};
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// VERIFY
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TrackRecordVerifyResponse {
    pub instance_id: String,
    pub ea_name: String,
    pub mode: String,
    pub chain: ChainVerificationResult,
    pub checkpoints: CheckpointVerification,
    /// Overall proof: chain intact AND every checkpoint authentic.
    pub verified: bool,
}

/// GET /api/v1/track-record/:instance_id/verify
pub async fn verify_track_record(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<TrackRecordVerifyResponse>, ApiError> {
    let instance = state
        .track_store
        .get_instance(&instance_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("unknown instance '{}'", instance_id)))?;

    let chain = state
        .verifier
        .verify(&instance_id)
        .map_err(ApiError::internal)?;
    let checkpoints = state
        .verifier
        .verify_checkpoints(&instance_id, &state.signer)
        .map_err(ApiError::internal)?;

    let verified = chain.valid && checkpoints.verified;
    Ok(Json(TrackRecordVerifyResponse {
        instance_id: instance.instance_id,
        ea_name: instance.ea_name,
        mode: instance.mode,
        chain,
        checkpoints,
        verified,
    }))
}

// =============================================================================
// METRICS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TrackRecordMetricsResponse {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub profit_factor: f64,
    /// Longest below-peak span in seconds.
    pub drawdown_duration: i64,
}

/// GET /api/v1/track-record/:instance_id/metrics
pub async fn track_record_metrics(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<TrackRecordMetricsResponse>, ApiError> {
    let trades = load_trades(&state, &instance_id)?;
    let computed = metrics::compute(&trades, DEFAULT_ANNUALIZATION_FACTOR);

    Ok(Json(TrackRecordMetricsResponse {
        sharpe_ratio: computed.sharpe_ratio,
        sortino_ratio: computed.sortino_ratio,
        calmar_ratio: computed.calmar_ratio,
        profit_factor: computed.profit_factor,
        drawdown_duration: computed.drawdown_duration_secs,
    }))
}

// =============================================================================
// EXPORT
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TrackRecordExportResponse {
    pub instance_id: String,
    pub ea_name: String,
    pub mode: String,
    pub exported_at: chrono::DateTime<Utc>,
    pub events: Vec<TrackRecordEvent>,
    pub checkpoints: Vec<Checkpoint>,
    pub chain: ChainVerificationResult,
    pub metrics: TrackRecordMetricsResponse,
}

/// GET /api/v1/track-record/:instance_id/export
///
/// Full downloadable snapshot - everything an independent auditor needs to
/// re-run verification offline.
pub async fn export_track_record(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<TrackRecordExportResponse>, ApiError> {
    let instance = state
        .track_store
        .get_instance(&instance_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("unknown instance '{}'", instance_id)))?;

    let chain = state
        .verifier
        .verify(&instance_id)
        .map_err(ApiError::internal)?;

    let head = state
        .track_store
        .head(&instance_id)
        .map_err(ApiError::internal)?;
    let events = match head {
        Some((upper, _)) => state
            .track_store
            .events_range(&instance_id, 0, upper)
            .map_err(ApiError::internal)?,
        None => Vec::new(),
    };
    let checkpoints = state
        .track_store
        .checkpoints(&instance_id)
        .map_err(ApiError::internal)?;

    let trades = ledger::trades_from_events(&events);
    let computed = metrics::compute(&trades, DEFAULT_ANNUALIZATION_FACTOR);

    Ok(Json(TrackRecordExportResponse {
        instance_id: instance.instance_id,
        ea_name: instance.ea_name,
        mode: instance.mode,
        exported_at: Utc::now(),
        events,
        checkpoints,
        chain,
        metrics: TrackRecordMetricsResponse {
            sharpe_ratio: computed.sharpe_ratio,
            sortino_ratio: computed.sortino_ratio,
            calmar_ratio: computed.calmar_ratio,
            profit_factor: computed.profit_factor,
            drawdown_duration: computed.drawdown_duration_secs,
        },
    }))
}

// =============================================================================
// INGESTION
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct IngestEventRequest {
    /// Registered on first append; ignored afterwards.
    pub ea_name: Option<String>,
    pub mode: Option<String>,
    pub event_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    /// The head hash the sender read before building this append
    /// (GENESIS_HASH for an empty chain).
    pub prev_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestEventResponse {
    pub sequence: u64,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

/// POST /api/v1/track-record/:instance_id/events
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    Json(request): Json<IngestEventRequest>,
) -> Result<Json<IngestEventResponse>, ApiError> {
    let mut errors = Vec::new();

    let event_type = match request.event_type.as_deref() {
        Some("heartbeat") => TrackEventType::Heartbeat,
        Some("trade") => TrackEventType::Trade,
        Some("re_evaluation") => TrackEventType::ReEvaluation,
        Some(other) => {
            errors.push(FieldError::new(
                "event_type",
                format!("unknown event type '{}'", other),
            ));
            TrackEventType::Heartbeat
        }
        None => {
            errors.push(FieldError::new("event_type", "required"));
            TrackEventType::Heartbeat
        }
    };

    let payload = match request.payload {
        Some(payload) => payload,
        None => {
            errors.push(FieldError::new("payload", "required JSON value"));
            serde_json::Value::Null
        }
    };

    let prev_hash = match request.prev_hash.as_deref() {
        Some(hash) if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            hash.to_string()
        }
        Some(_) => {
            errors.push(FieldError::new("prev_hash", "must be 64 hex characters"));
            String::new()
        }
        None => {
            errors.push(FieldError::new("prev_hash", "required"));
            String::new()
        }
    };

    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    state
        .track_store
        .register_instance(
            &instance_id,
            request.ea_name.as_deref().unwrap_or("unknown"),
            request.mode.as_deref().unwrap_or("live"),
        )
        .map_err(ApiError::internal)?;

    let outcome = state
        .event_chain
        .append(&instance_id, event_type, payload, &prev_hash, Utc::now())
        .map_err(|e| match e {
            AppendError::Conflict {
                current_head,
                current_sequence,
            } => ApiError::Conflict {
                current_head,
                current_sequence,
            },
            AppendError::Store(e) => ApiError::internal(e),
        })?;

    info!(
        instance_id = %instance_id,
        sequence = outcome.event.sequence,
        event_type = %outcome.event.event_type,
        "Appended track-record event"
    );

    Ok(Json(IngestEventResponse {
        sequence: outcome.event.sequence,
        hash: outcome.event.hash,
        checkpoint: outcome.checkpoint,
    }))
}

// =============================================================================
// HELPERS
// =============================================================================

fn load_trades(state: &AppState, instance_id: &str) -> Result<Vec<crate::models::Trade>, ApiError> {
    state
        .track_store
        .get_instance(instance_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("unknown instance '{}'", instance_id)))?;

    let head = state
        .track_store
        .head(instance_id)
        .map_err(ApiError::internal)?;
    let events = match head {
        Some((upper, _)) => state
            .track_store
            .events_range(instance_id, 0, upper)
            .map_err(ApiError::internal)?,
        None => Vec::new(),
    };
    Ok(ledger::trades_from_events(&events))
}
