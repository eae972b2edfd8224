use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use crate::health::{HealthMonitor, HealthReport};
use crate::models::SchedulerStatus;
use crate::scheduler::{Scheduler, SchedulerError};

use super::responses::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub monitor: Arc<HealthMonitor>,
    /// How long a control call may block the request before answering 202
    pub control_timeout: Duration,
}

/// Errors surfaced by the control surface
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
        }
    }
}

/// Run a control call in its own task
///
/// The transition completes even if the request gives up waiting; in that
/// case the caller gets 202 with the status as of now.
async fn control(
    state: AppState,
    action: ControlAction,
) -> Result<(StatusCode, Json<SchedulerStatus>), ApiError> {
    let scheduler = state.scheduler.clone();
    let task = tokio::spawn(async move {
        match action {
            ControlAction::Start => scheduler.start().await,
            ControlAction::Stop => scheduler.stop().await,
            ControlAction::Restart => scheduler.restart().await,
        }
    });

    match tokio::time::timeout(state.control_timeout, task).await {
        Ok(Ok(Ok(status))) => Ok((StatusCode::OK, Json(status))),
        Ok(Ok(Err(e))) => {
            log_rejected(action, &e);
            Ok((StatusCode::OK, Json(state.scheduler.status())))
        }
        Ok(Err(join_error)) => {
            error!("❌ Control task for {} crashed: {}", action.as_str(), join_error);
            Err(ApiError::Unavailable(format!(
                "{} did not complete: {}",
                action.as_str(),
                join_error
            )))
        }
        Err(_) => {
            warn!(
                "{} still in progress after {:?}, answering 202",
                action.as_str(),
                state.control_timeout
            );
            Ok((StatusCode::ACCEPTED, Json(state.scheduler.status())))
        }
    }
}

fn log_rejected(action: ControlAction, e: &SchedulerError) {
    warn!("{} rejected by scheduler: {}", action.as_str(), e);
}

/// Start the scheduler
#[utoipa::path(
    post,
    path = "/api/v1/start",
    tag = "Control",
    responses(
        (status = 200, description = "Scheduler status after the call", body = SchedulerStatus),
        (status = 202, description = "Transition still in progress", body = SchedulerStatus),
        (status = 503, description = "Scheduler unavailable", body = ErrorResponse)
    )
)]
pub async fn start_scheduler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SchedulerStatus>), ApiError> {
    control(state, ControlAction::Start).await
}

/// Stop the scheduler, letting an in-flight cycle finish within the grace period
#[utoipa::path(
    post,
    path = "/api/v1/stop",
    tag = "Control",
    responses(
        (status = 200, description = "Scheduler status after the call", body = SchedulerStatus),
        (status = 202, description = "Transition still in progress", body = SchedulerStatus),
        (status = 503, description = "Scheduler unavailable", body = ErrorResponse)
    )
)]
pub async fn stop_scheduler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SchedulerStatus>), ApiError> {
    control(state, ControlAction::Stop).await
}

/// Restart the scheduler and reset the auto-restart budget
#[utoipa::path(
    post,
    path = "/api/v1/restart",
    tag = "Control",
    responses(
        (status = 200, description = "Scheduler status after the call", body = SchedulerStatus),
        (status = 202, description = "Transition still in progress", body = SchedulerStatus),
        (status = 503, description = "Scheduler unavailable", body = ErrorResponse)
    )
)]
pub async fn restart_scheduler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SchedulerStatus>), ApiError> {
    control(state, ControlAction::Restart).await
}

/// Scheduler status with the last cycle and counters
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "Status",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let runner = state.scheduler.runner();
    Json(StatusResponse {
        scheduler: state.scheduler.status(),
        runner_degraded: runner.is_degraded(),
        last_cycle_summary: runner.last_cycle().as_ref().map(CycleSummary::from),
        counters: runner.counters(),
    })
}

/// Health score, components, active alerts and recent trend
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Status",
    responses(
        (status = 200, description = "Latest health report", body = HealthReport)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.monitor.report().await)
}

/// Recent cycle results, newest first
#[utoipa::path(
    get,
    path = "/api/v1/cycles",
    tag = "Status",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of cycles (default 20)")
    ),
    responses(
        (status = 200, description = "Recent cycles", body = CycleListResponse)
    )
)]
pub async fn get_cycles(
    State(state): State<AppState>,
    Query(query): Query<CycleQuery>,
) -> Json<CycleListResponse> {
    let runner = state.scheduler.runner();
    let cycles = runner.recent_cycles(query.limit);
    Json(CycleListResponse {
        count: cycles.len(),
        cycles,
        latency: runner.latency_stats(),
    })
}

/// Sync state of every symbol
#[utoipa::path(
    get,
    path = "/api/v1/symbols",
    tag = "Status",
    responses(
        (status = 200, description = "Per-symbol sync state", body = SymbolListResponse)
    )
)]
pub async fn get_symbols(State(state): State<AppState>) -> Json<SymbolListResponse> {
    let symbols = state.scheduler.runner().sync_states();
    let demoted = symbols.iter().filter(|s| s.is_demoted()).count();
    Json(SymbolListResponse {
        count: symbols.len(),
        demoted,
        symbols,
    })
}
