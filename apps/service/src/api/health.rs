use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::routes::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    database: String,
    redis: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Check database connection
    let database = match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => "up",
        Err(_) => "down",
    };

    let redis = match state.queue.ping().await {
        Ok(()) => "up",
        Err(_) => "down",
    };

    let status = if database == "up" && redis == "up" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        redis: redis.to_string(),
    })
}
