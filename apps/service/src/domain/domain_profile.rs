use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header name to value, sent alongside a user agent.
pub type HeaderSet = BTreeMap<String, String>;

/// Per-hostname identity pool and request gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainRateProfile {
    pub domain: String,
    pub user_agents: Vec<String>,
    /// Named header combinations keyed by persona, e.g. `chrome_windows`.
    pub header_profiles: BTreeMap<String, HeaderSet>,
    pub min_delay_ms: i64,
    pub max_delay_ms: i64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub next_allowed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A request slot taken on a domain's gate, with the state it replaced so
/// the slot can be handed back if the request never goes out.
#[derive(Debug, Clone, PartialEq)]
pub struct GateClaim {
    pub domain: String,
    pub at: DateTime<Utc>,
    pub next_allowed_at: DateTime<Utc>,
    pub previous_request_at: Option<DateTime<Utc>>,
    pub previous_allowed_at: Option<DateTime<Utc>>,
}

/// The fingerprint chosen for a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub user_agent: String,
    pub header_profile: String,
    pub headers: HeaderSet,
}

impl DomainRateProfile {
    /// New profile carrying the built-in persona pool. The delay window is
    /// normalised so that `0 <= min <= max`.
    pub fn with_defaults(domain: impl Into<String>, min_delay_ms: i64, max_delay_ms: i64) -> Self {
        let now = Utc::now();
        let min = min_delay_ms.max(0);
        let max = max_delay_ms.max(min);
        Self {
            domain: domain.into().to_ascii_lowercase(),
            user_agents: default_user_agents(),
            header_profiles: default_header_profiles(),
            min_delay_ms: min,
            max_delay_ms: max,
            last_request_at: None,
            next_allowed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_request_at(&self, now: DateTime<Utc>) -> bool {
        self.next_allowed_at.map_or(true, |allowed| allowed <= now)
    }

    /// Uniform draw from `[min_delay_ms, max_delay_ms]`.
    pub fn draw_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.min_delay_ms.max(0);
        let max = self.max_delay_ms.max(min);
        Duration::milliseconds(rng.random_range(min..=max))
    }

    /// Applies a dispatched request: stamps `last_request_at` and pushes the
    /// gate out by a fresh random delay. Returns the new `next_allowed_at`.
    pub fn record_request_at<R: Rng + ?Sized>(&mut self, now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
        let next = now + self.draw_delay(rng);
        self.last_request_at = Some(now);
        self.next_allowed_at = Some(next);
        self.updated_at = now;
        next
    }

    /// User agent and header set are drawn independently of each other.
    pub fn pick_identity<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Identity> {
        let user_agent = self.user_agents.choose(rng)?.clone();
        let names: Vec<&String> = self.header_profiles.keys().collect();
        let name = (*names.choose(rng)?).clone();
        let headers = self.header_profiles.get(&name).cloned().unwrap_or_default();
        Some(Identity {
            user_agent,
            header_profile: name,
            headers,
        })
    }
}

const CHROME_WINDOWS_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const CHROME_MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const FIREFOX_WINDOWS_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0";
const SAFARI_MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
const EDGE_WINDOWS_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0";

pub fn default_user_agents() -> Vec<String> {
    [
        CHROME_WINDOWS_UA,
        CHROME_MAC_UA,
        FIREFOX_WINDOWS_UA,
        SAFARI_MAC_UA,
        EDGE_WINDOWS_UA,
    ]
    .iter()
    .map(|ua| ua.to_string())
    .collect()
}

fn headers(pairs: &[(&str, &str)]) -> HeaderSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn default_header_profiles() -> BTreeMap<String, HeaderSet> {
    let chromium_accept = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

    let mut profiles = BTreeMap::new();
    profiles.insert(
        "chrome_windows".to_string(),
        headers(&[
            ("Accept", chromium_accept),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Sec-Ch-Ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
            ("Sec-Ch-Ua-Mobile", "?0"),
            ("Sec-Ch-Ua-Platform", "\"Windows\""),
            ("Upgrade-Insecure-Requests", "1"),
        ]),
    );
    profiles.insert(
        "chrome_mac".to_string(),
        headers(&[
            ("Accept", chromium_accept),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Sec-Ch-Ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
            ("Sec-Ch-Ua-Mobile", "?0"),
            ("Sec-Ch-Ua-Platform", "\"macOS\""),
            ("Upgrade-Insecure-Requests", "1"),
        ]),
    );
    profiles.insert(
        "firefox_windows".to_string(),
        headers(&[
            ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("DNT", "1"),
            ("Upgrade-Insecure-Requests", "1"),
        ]),
    );
    profiles.insert(
        "safari_mac".to_string(),
        headers(&[
            ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Accept-Encoding", "gzip, deflate, br"),
        ]),
    );
    profiles.insert(
        "edge_windows".to_string(),
        headers(&[
            ("Accept", chromium_accept),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Sec-Ch-Ua", "\"Chromium\";v=\"124\", \"Microsoft Edge\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
            ("Sec-Ch-Ua-Mobile", "?0"),
            ("Sec-Ch-Ua-Platform", "\"Windows\""),
        ]),
    );
    profiles
}
