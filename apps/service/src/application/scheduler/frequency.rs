use chrono::Duration;
use regex::Regex;
use std::sync::OnceLock;

/// Override tokens the administration UI offers.
const KNOWN_FREQUENCIES: &[(&str, i64)] = &[
    ("PT1H", 1),
    ("PT2H", 2),
    ("PT4H", 4),
    ("PT6H", 6),
    ("PT12H", 12),
    ("P1D", 24),
    ("P2D", 48),
    ("P7D", 168),
];

fn iso_duration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
            .expect("static regex")
    })
}

fn shorthand_duration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*([smhd])$").expect("static regex"))
}

/// Parses a frequency token. Known tokens are looked up first, then generic
/// ISO-8601 durations (`P[n]DT[n]H[n]M[n]S`), then `<n>s|m|h|d`.
/// Returns `None` for anything unparseable or not strictly positive.
pub fn parse_frequency(token: &str) -> Option<Duration> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if let Some((_, hours)) = KNOWN_FREQUENCIES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(token))
    {
        return Some(Duration::hours(*hours));
    }

    parse_iso(token)
        .or_else(|| parse_shorthand(token))
        .filter(|d| *d > Duration::zero())
}

fn parse_iso(token: &str) -> Option<Duration> {
    let caps = iso_duration().captures(token)?;
    // "P" and "PT" alone match the pattern but carry no components
    if caps.iter().skip(1).all(|c| c.is_none()) {
        return None;
    }
    let part = |i: usize| -> Option<i64> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let seconds = part(1)?
        .checked_mul(86_400)?
        .checked_add(part(2)?.checked_mul(3_600)?)?
        .checked_add(part(3)?.checked_mul(60)?)?
        .checked_add(part(4)?)?;
    Duration::try_seconds(seconds)
}

fn parse_shorthand(token: &str) -> Option<Duration> {
    let caps = shorthand_duration().captures(token)?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = match caps[2].to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return None,
    };
    Duration::try_seconds(amount.checked_mul(unit)?)
}
