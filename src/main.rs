//! EdgeAudit - Strategy Trust Verification Backend
//!
//! Serves two engines: the deterministic verdict pipeline that gates
//! strategy deployment, and the tamper-evident track-record ledger that
//! proves live history has not been altered.

use anyhow::{Context, Result};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgeaudit_backend::{
    api::{self, AppState},
    auth::{api_key_middleware, AuthState},
    ledger::{ChainVerifier, CheckpointSigner, EventChain, TrackRecordStore},
    middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimiter},
    models::Config,
    verdict::{
        LifecycleConfig, MonteCarloParams, ThresholdResolver, ThresholdStore, VerdictEngine,
    },
};

#[derive(Parser)]
#[command(name = "edgeaudit", about = "Strategy trust verification backend")]
struct Cli {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database path (overrides DATABASE_PATH).
    #[arg(long)]
    database_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(path) = cli.database_path {
        config.database_path = path;
    }

    let state = build_state(config.clone()).context("Failed to build application state")?;
    let app = build_router(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(port = config.port, db = %config.database_path, "EdgeAudit backend listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn build_state(config: Config) -> Result<Arc<AppState>> {
    let threshold_store =
        Arc::new(ThresholdStore::new(&config.database_path).context("Opening threshold store")?);
    let resolver = ThresholdResolver::with_default_fallback(
        Some(threshold_store),
        Duration::from_millis(config.thresholds_timeout_ms),
    );

    let engine = VerdictEngine::new(MonteCarloParams {
        budget: Duration::from_millis(config.monte_carlo_budget_ms),
        ..MonteCarloParams::default()
    });

    let track_store =
        Arc::new(TrackRecordStore::new(&config.database_path).context("Opening track-record store")?);
    let signer = CheckpointSigner::new(config.checkpoint_key.as_bytes());
    let event_chain = EventChain::new(
        Arc::clone(&track_store),
        signer.clone(),
        config.checkpoint_interval,
    );
    let verifier = ChainVerifier::new(Arc::clone(&track_store));

    Ok(Arc::new(AppState {
        config,
        engine,
        resolver,
        lifecycle_config: LifecycleConfig::default(),
        track_store,
        event_chain,
        verifier,
        signer,
    }))
}

fn build_router(state: Arc<AppState>) -> Router {
    let auth_state = AuthState::new(state.config.api_key.clone());
    let rate_limiter = RateLimiter::new(RateLimitConfig::default());
    spawn_rate_limit_cleanup(rate_limiter.clone());

    // Internal surface: verdict computation and telemetry ingestion.
    let internal_routes = Router::new()
        .route("/api/v1/verify", post(api::verify::verify))
        .route(
            "/api/v1/track-record/:instance_id/events",
            post(api::track_record::ingest_event),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            api_key_middleware,
        ));

    // Audit surface: anyone holding an instance id may check its proof.
    let audit_routes = Router::new()
        .route(
            "/api/v1/track-record/:instance_id/verify",
            get(api::track_record::verify_track_record),
        )
        .route(
            "/api/v1/track-record/:instance_id/metrics",
            get(api::track_record::track_record_metrics),
        )
        .route(
            "/api/v1/track-record/:instance_id/export",
            get(api::track_record::export_track_record),
        );

    let public_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(internal_routes)
        .merge(audit_routes)
        .merge(public_routes)
        .layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn spawn_rate_limit_cleanup(limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            limiter.cleanup();
        }
    });
}

async fn health_check() -> &'static str {
    "ok"
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeaudit_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
