use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::metrics::LatencyStats;
use crate::pipeline::PipelineStatsSnapshot;
use crate::source::SessionState;
use crate::subscriber::SubscriberStatsSnapshot;

/// Liveness summary
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
    /// Vendor session state; relay only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
}

/// Publisher-side counters
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelayStats {
    pub pipeline: PipelineStatsSnapshot,
    pub send_latency: LatencyStats,
    pub session_state: SessionState,
    /// Wall-clock cutoff computed at startup
    pub cutoff: Option<String>,
    pub stopped: bool,
}

/// Subscriber-side counters
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecorderStats {
    pub subscriber: SubscriberStatsSnapshot,
}

/// Body of `GET /api/v1/stats`
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum StatsResponse {
    Relay(RelayStats),
    Recorder(RecorderStats),
}
