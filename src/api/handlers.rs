use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::monitor::StatsSource;
use super::responses::*;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub source: Arc<dyn StatsSource>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(source: Arc<dyn StatsSource>) -> Self {
        Self {
            source,
            started_at: Utc::now(),
        }
    }
}

/// Get service health
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse),
    ),
    tag = "Health"
)]
pub async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let status = if state.source.is_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        service: state.source.service_name().to_string(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now,
        session_state: state.source.session_state(),
    })
}

/// Get pipeline counters
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses(
        (status = 200, description = "Current counter snapshot", body = StatsResponse),
    ),
    tag = "Stats"
)]
pub async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(state.source.stats())
}
