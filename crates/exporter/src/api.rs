//! HTTP API for health checks, Prometheus metrics and curve inspection

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use exporter_lib::{
    health::{ComponentStatus, HealthRegistry},
    model::CurveReport,
    ExporterError, PowerModel, Resource,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub model: Arc<PowerModel>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, model: Arc<PowerModel>) -> Self {
        Self {
            health_registry,
            model,
        }
    }
}

/// Fitted curves of one instance type
#[derive(Debug, Serialize)]
struct ModelCurves {
    instance_type: String,
    cpu: CurveReport,
    mem: CurveReport,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the backend is connected
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
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Coefficients, calibration points and samples for an instance type
async fn model_curves(
    State(state): State<Arc<AppState>>,
    Path(instance_type): Path<String>,
) -> Response {
    let curves = state
        .model
        .curve(&instance_type, Resource::Cpu)
        .and_then(|cpu| Ok((cpu, state.model.curve(&instance_type, Resource::Mem)?)));

    match curves {
        Ok((cpu, mem)) => Json(ModelCurves {
            instance_type,
            cpu,
            mem,
        })
        .into_response(),
        Err(e) => {
            let status_code = match e {
                ExporterError::UnknownModel(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status_code,
                Json(serde_json::json!({ "error": e.to_string(), "code": e.code() })),
            )
                .into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/models/:instance_type", get(model_curves))
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
