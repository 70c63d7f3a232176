use chrono::{DateTime, Duration, Utc};

use crate::domain::messages::ScrapeResult;

/// Why a scrape attempt failed, as far as retry timing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Captcha,
    RateLimited,
    ServerError,
    Parsing,
    Unclassified,
}

const CAPTCHA_CODES: &[&str] = &["CAPTCHA", "CAPTCHA_DETECTED", "BOT_CHALLENGE", "BOT_DETECTED"];
const PARSING_CODES: &[&str] = &["PARSE_ERROR", "PARSING_ERROR", "EXTRACTION_ERROR", "SELECTOR_NOT_FOUND"];

impl FailureClass {
    /// Bot challenges win over status codes; a 429 wins over a 5xx.
    pub fn classify(error_code: Option<&str>, http_status: Option<u16>) -> Self {
        let code = error_code.map(|c| c.trim().to_ascii_uppercase());
        let code = code.as_deref();
        let has_code = |codes: &[&str]| code.is_some_and(|c| codes.contains(&c));

        if has_code(CAPTCHA_CODES) {
            FailureClass::Captcha
        } else if http_status == Some(429) || code == Some("RATE_LIMITED") {
            FailureClass::RateLimited
        } else if http_status.is_some_and(|s| (500..=599).contains(&s)) || code == Some("SERVER_ERROR") {
            FailureClass::ServerError
        } else if has_code(PARSING_CODES) {
            FailureClass::Parsing
        } else {
            FailureClass::Unclassified
        }
    }

    pub fn retry_delay(self) -> Duration {
        match self {
            FailureClass::Captcha => Duration::hours(2),
            FailureClass::RateLimited => Duration::hours(1),
            FailureClass::ServerError => Duration::minutes(30),
            FailureClass::Parsing => Duration::minutes(15),
            FailureClass::Unclassified => Duration::minutes(30),
        }
    }
}

/// Retry time for a failed result, computed from the result's own timestamp
/// so redelivery yields the same answer. `None` for successful results.
pub fn next_retry_at(result: &ScrapeResult) -> Option<(FailureClass, DateTime<Utc>)> {
    if result.success {
        return None;
    }
    let class = FailureClass::classify(result.error_code.as_deref(), result.http_status);
    Some((class, result.timestamp + class.retry_delay()))
}
