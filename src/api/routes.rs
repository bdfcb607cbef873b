use axum::{routing::get, Router};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{get_health, get_stats, ApiState};
use super::monitor::StatsSource;
use super::openapi::ApiDocV1;

/// Create the monitoring router with Swagger UI
pub fn create_router(source: Arc<dyn StatsSource>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/v1/openapi.json", ApiDocV1::openapi()))
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/stats", get(get_stats))
        .with_state(ApiState::new(source))
}

/// Bind and serve until the process exits
pub async fn serve(addr: &str, source: Arc<dyn StatsSource>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("📊 Monitoring API listening on http://{}", listener.local_addr()?);
    tracing::info!("📚 Swagger UI at http://{}/swagger-ui", listener.local_addr()?);
    axum::serve(listener, create_router(source)).await
}
