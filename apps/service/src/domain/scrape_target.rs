use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Bucket for targets whose URL has no usable hostname. All of them share
/// one rate profile.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Site extraction configuration referenced by a target. The selectors are
/// handed to the scraping engine untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub id: Uuid,
    pub selectors: serde_json::Value,
}

/// One (product, seller, url) pairing that is periodically re-scraped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeTarget {
    pub id: Uuid,
    pub product_id: Uuid,
    pub seller_name: String,
    pub url: String,
    pub site_config: Option<SiteConfig>,
    pub active: bool,
    /// Duration token such as `PT4H`, `P1D` or `90m`.
    pub frequency_override: Option<String>,
    pub last_scraped: Option<DateTime<Utc>>,
    /// `None` means due immediately.
    pub next_scrape: Option<DateTime<Utc>>,
}

impl ScrapeTarget {
    pub fn new(product_id: Uuid, seller_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            seller_name: seller_name.into(),
            url: url.into(),
            site_config: None,
            active: true,
            frequency_override: None,
            last_scraped: None,
            next_scrape: None,
        }
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_scrape.map_or(true, |next| next <= now)
    }

    /// Rate-limiting key for this target.
    pub fn domain(&self) -> String {
        extract_domain(&self.url)
    }
}

/// Lowercase hostname of `url`, or [`UNKNOWN_DOMAIN`] when it cannot be parsed.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}
