use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::routes::AppState;
use crate::utils::error::AppError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct DueQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DueTarget {
    id: Uuid,
    product_id: Uuid,
    seller_name: String,
    url: String,
    domain: String,
    has_site_config: bool,
    frequency_override: Option<String>,
    effective_frequency_secs: i64,
    last_scraped: Option<DateTime<Utc>>,
    next_scrape: Option<DateTime<Utc>>,
}

/// Targets the next dispatch cycle would look at.
pub async fn list_due(
    State(state): State<AppState>,
    Query(params): Query<DueQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::InvalidInput(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }

    let targets = state.scheduler.due_targets(limit).await?;
    let due: Vec<DueTarget> = targets
        .iter()
        .map(|t| DueTarget {
            id: t.id,
            product_id: t.product_id,
            seller_name: t.seller_name.clone(),
            url: t.url.clone(),
            domain: t.domain(),
            has_site_config: t.site_config.is_some(),
            frequency_override: t.frequency_override.clone(),
            effective_frequency_secs: state.scheduler.effective_frequency(t).num_seconds(),
            last_scraped: t.last_scraped,
            next_scrape: t.next_scrape,
        })
        .collect();

    Ok(Json(serde_json::json!({
        "count": due.len(),
        "targets": due,
        "_links": {
            "self": { "href": "/api/targets/due" }
        }
    })))
}
