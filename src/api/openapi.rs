use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::metrics::LatencyStats;
use crate::pipeline::PipelineStatsSnapshot;
use crate::source::SessionState;
use crate::subscriber::SubscriberStatsSnapshot;

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CTP Tick Relay API",
        version = "1.0.0",
        description = "Health and counters for the tick relay and recorder processes",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::get_health,
        handlers::get_stats,
    ),
    components(
        schemas(
            HealthResponse,
            StatsResponse,
            RelayStats,
            RecorderStats,
            PipelineStatsSnapshot,
            SubscriberStatsSnapshot,
            LatencyStats,
            SessionState,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Stats", description = "Pipeline counter endpoints"),
    )
)]
pub struct ApiDocV1;
