//! HTTP API: snapshot/alert reads, exports, simulation, health, metrics
//!
//! Read endpoints serve the latest completed poll cycle from shared state
//! and return 503 until the first cycle lands.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parksense_core::cycle::SharedState;
use parksense_core::export;
use parksense_core::health::{ComponentStatus, HealthRegistry};
use parksense_core::policy::{PolicyScenario, PolicySimulator, ScenarioComparison, SimulationResult};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine_state: SharedState,
    pub simulator: Arc<PolicySimulator>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        engine_state: SharedState,
        simulator: Arc<PolicySimulator>,
    ) -> Self {
        Self {
            health_registry,
            engine_state,
            simulator,
        }
    }
}

#[derive(Serialize)]
struct ApiError {
    error: &'static str,
}

fn no_cycle_yet() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError {
            error: "no completed poll cycle yet",
        }),
    )
}

/// Liveness: 200 while operational, 503 when a component has failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness: 200 once the first poll cycle has completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

#[derive(Serialize)]
struct SnapshotResponse {
    scored: parksense_core::models::ScoredSnapshot,
    narrative: Option<String>,
}

/// Latest scored snapshot with the optional narrative
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine_state.read().await;
    match &engine.latest {
        Some(output) => (
            StatusCode::OK,
            Json(SnapshotResponse {
                scored: output.scored.clone(),
                narrative: output.narrative.clone(),
            }),
        )
            .into_response(),
        None => no_cycle_yet().into_response(),
    }
}

/// Alerts from the latest cycle, most severe first
async fn alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine_state.read().await;
    match &engine.latest {
        Some(output) => (StatusCode::OK, Json(output.alerts.clone())).into_response(),
        None => no_cycle_yet().into_response(),
    }
}

/// All carpark records as CSV
async fn export_csv(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine_state.read().await;
    match &engine.latest {
        Some(output) => (
            StatusCode::OK,
            [("content-type", "text/csv; charset=utf-8")],
            export::to_csv(&output.scored),
        )
            .into_response(),
        None => no_cycle_yet().into_response(),
    }
}

/// Machine-readable cycle report
async fn export_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine_state.read().await;
    match &engine.latest {
        Some(output) => {
            let report = export::JsonReport::build(&output.scored, &output.alerts, &engine.history);
            (StatusCode::OK, Json(report)).into_response()
        }
        None => no_cycle_yet().into_response(),
    }
}

/// Operator-facing plain-text report
async fn export_report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine_state.read().await;
    match &engine.latest {
        Some(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            export::to_text_report(&output.scored, &output.alerts, &engine.history),
        )
            .into_response(),
        None => no_cycle_yet().into_response(),
    }
}

#[derive(Serialize)]
struct SimulateResponse {
    results: Vec<SimulationResult>,
    comparison: ScenarioComparison,
}

/// Simulate what-if policy scenarios against the latest snapshot
async fn simulate(
    State(state): State<Arc<AppState>>,
    Json(scenarios): Json<Vec<PolicyScenario>>,
) -> impl IntoResponse {
    if scenarios.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "at least one scenario is required",
            }),
        )
            .into_response();
    }

    let engine = state.engine_state.read().await;
    let Some(output) = &engine.latest else {
        return no_cycle_yet().into_response();
    };

    let results: Vec<SimulationResult> = scenarios
        .iter()
        .map(|scenario| state.simulator.simulate(&output.scored, scenario))
        .collect();
    let comparison = state.simulator.compare(&results);

    (
        StatusCode::OK,
        Json(SimulateResponse {
            results,
            comparison,
        }),
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/snapshot", get(snapshot))
        .route("/alerts", get(alerts))
        .route("/export/csv", get(export_csv))
        .route("/export/json", get(export_json))
        .route("/export/report", get(export_report))
        .route("/simulate", post(simulate))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
