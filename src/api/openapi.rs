use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::calendar::SessionPhase;
use crate::health::HealthReport;
use crate::metrics::LatencyStats;
use crate::models::{
    Alert, AlertCode, AlertSeverity, ComponentScore, CycleResult, CycleStatus, HealthComponents,
    HealthScore, PipelineCounters, PriorityTier, SchedulerState, SchedulerStatus, ScorePoint,
    SymbolSyncState, TransitionReason,
};

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Market Sync API",
        version = "1.0.0",
        description = "Control and observe the market data sync scheduler",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::start_scheduler,
        handlers::stop_scheduler,
        handlers::restart_scheduler,
        handlers::get_status,
        handlers::get_health,
        handlers::get_cycles,
        handlers::get_symbols,
    ),
    components(
        schemas(
            SchedulerState,
            SchedulerStatus,
            TransitionReason,
            SessionPhase,
            StatusResponse,
            CycleSummary,
            CycleResult,
            CycleStatus,
            CycleListResponse,
            LatencyStats,
            PipelineCounters,
            SymbolListResponse,
            SymbolSyncState,
            PriorityTier,
            HealthReport,
            HealthScore,
            HealthComponents,
            ComponentScore,
            ScorePoint,
            Alert,
            AlertCode,
            AlertSeverity,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Control", description = "Scheduler lifecycle control"),
        (name = "Status", description = "Scheduler, pipeline and health status"),
    )
)]
pub struct ApiDoc;
