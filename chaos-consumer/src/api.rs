use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::control::{ControlService, LifecycleStatus, LifecycleTransition};
use crate::fault::FaultSettings;

const APPLIED: &str = "applied";

pub fn router(control: ControlService) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/lifecycle/pause", post(pause))
        .route("/lifecycle/resume", post(resume))
        .route("/lifecycle/status", get(status))
        .route("/fault", get(faults))
        .route("/fault/processing-delay", put(set_processing_delay))
        .route("/fault/error-rate", put(set_error_rate))
        .route("/fault/commit-delay", put(set_commit_delay))
        .route("/fault/poll-timeout", put(set_poll_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

pub async fn index() -> &'static str {
    "chaos consumer"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRequest {
    pub delay_ms: u64,
}

/// Any integer is accepted; out-of-range rates are clamped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRateRequest {
    pub error_rate_percent: i64,
}

#[derive(Debug, Deserialize)]
pub struct PollTimeoutRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayApplied {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub delay_ms: u64,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRateApplied {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error_rate_percent: u8,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PollTimeoutApplied {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub enabled: bool,
    pub status: &'static str,
}

// pause and resume call into the broker client, which may block.
async fn pause(
    State(control): State<ControlService>,
) -> Result<Json<LifecycleTransition>, StatusCode> {
    tokio::task::spawn_blocking(move || control.pause())
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "Pause task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn resume(
    State(control): State<ControlService>,
) -> Result<Json<LifecycleTransition>, StatusCode> {
    tokio::task::spawn_blocking(move || control.resume())
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "Resume task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn status(State(control): State<ControlService>) -> Json<LifecycleStatus> {
    Json(control.status())
}

async fn faults(State(control): State<ControlService>) -> Json<FaultSettings> {
    Json(control.faults())
}

async fn set_processing_delay(
    State(control): State<ControlService>,
    Json(request): Json<DelayRequest>,
) -> Json<DelayApplied> {
    Json(DelayApplied {
        kind: "processing-delay",
        delay_ms: control.set_processing_delay_ms(request.delay_ms),
        status: APPLIED,
    })
}

async fn set_error_rate(
    State(control): State<ControlService>,
    Json(request): Json<ErrorRateRequest>,
) -> Json<ErrorRateApplied> {
    Json(ErrorRateApplied {
        kind: "error-rate",
        error_rate_percent: control.set_error_rate_percent(request.error_rate_percent),
        status: APPLIED,
    })
}

async fn set_commit_delay(
    State(control): State<ControlService>,
    Json(request): Json<DelayRequest>,
) -> Json<DelayApplied> {
    Json(DelayApplied {
        kind: "commit-delay",
        delay_ms: control.set_commit_delay_ms(request.delay_ms),
        status: APPLIED,
    })
}

async fn set_poll_timeout(
    State(control): State<ControlService>,
    Json(request): Json<PollTimeoutRequest>,
) -> Json<PollTimeoutApplied> {
    Json(PollTimeoutApplied {
        kind: "poll-timeout-exceed",
        enabled: control.set_poll_timeout_exceed(request.enabled),
        status: APPLIED,
    })
}
