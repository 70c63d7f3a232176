use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::domain_profile::{HeaderSet, Identity};
use crate::domain::scrape_target::ScrapeTarget;

/// Instruction for the scraping engine to fetch one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeCommand {
    pub target_id: Uuid,
    pub product_id: Uuid,
    pub seller_name: String,
    pub url: String,
    pub selectors: serde_json::Value,
    pub user_agent: String,
    pub header_profile: String,
    pub headers: HeaderSet,
    pub dispatched_at: DateTime<Utc>,
}

impl ScrapeCommand {
    pub fn new(
        target: &ScrapeTarget,
        selectors: serde_json::Value,
        identity: Identity,
        dispatched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id: target.id,
            product_id: target.product_id,
            seller_name: target.seller_name.clone(),
            url: target.url.clone(),
            selectors,
            user_agent: identity.user_agent,
            header_profile: identity.header_profile,
            headers: identity.headers,
            dispatched_at,
        }
    }
}

/// Outcome reported back by the scraping engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub target_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}
