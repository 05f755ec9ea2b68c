//! HTTP API
//!
//! Shared application state and the route handlers for the verification
//! and track-record surfaces. Routing and middleware layering live in
//! `main.rs`.

pub mod error;
pub mod track_record;
pub mod verify;

use crate::ledger::{ChainVerifier, CheckpointSigner, EventChain, TrackRecordStore};
use crate::models::Config;
use crate::verdict::{LifecycleConfig, ThresholdResolver, VerdictEngine};
use std::sync::Arc;

/// Shared state behind every handler.
pub struct AppState {
    pub config: Config,
    pub engine: VerdictEngine,
    pub resolver: ThresholdResolver,
    pub lifecycle_config: LifecycleConfig,
    pub track_store: Arc<TrackRecordStore>,
    pub event_chain: EventChain,
    pub verifier: ChainVerifier,
    pub signer: CheckpointSigner,
}
