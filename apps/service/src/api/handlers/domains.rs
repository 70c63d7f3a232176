use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::routes::AppState;
use crate::utils::error::AppError;

pub async fn get_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let profile = state
        .profiles
        .find(&domain)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No rate profile for {}", domain)))?;

    Ok(Json(serde_json::json!({
        "profile": profile,
        "_links": {
            "self": { "href": format!("/api/domains/{}", profile.domain) }
        }
    })))
}
