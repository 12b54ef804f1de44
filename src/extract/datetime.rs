//! Loose datetime recovery for published-at inference: an ISO attempt first,
//! then a battery of regex patterns tolerating `.`, `-`, `/` separators,
//! two-digit years, and optional time.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

static PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("paren pattern"));

static Y4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<y4>\d{4})[./-](?P<m>\d{1,2})[./-](?P<d>\d{1,2})(?:\s+(?P<h>\d{1,2}):(?P<min>\d{2})(?::(?P<s>\d{2}))?)?",
    )
    .expect("y4 datetime pattern")
});

static Y2_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<y2>\d{2})[./-](?P<m>\d{1,2})[./-](?P<d>\d{1,2})(?:\s+(?P<h>\d{1,2}):(?P<min>\d{2})(?::(?P<s>\d{2}))?)?",
    )
    .expect("y2 datetime pattern")
});

static COMPACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<y>\d{4})(?P<m>\d{2})(?P<d>\d{2})T(?P<h>\d{2})(?P<min>\d{2})(?P<s>\d{2})Z?")
        .expect("compact datetime pattern")
});

fn group_int(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn expand_two_digit_year(year: i32) -> i32 {
    if year < 70 {
        year + 2000
    } else {
        year + 1900
    }
}

fn from_groups(caps: &regex::Captures<'_>, year: i32) -> Option<NaiveDateTime> {
    let month = group_int(caps, "m")?;
    let day = group_int(caps, "d")?;
    let hour = group_int(caps, "h").unwrap_or(0);
    let minute = group_int(caps, "min").unwrap_or(0);
    let second = group_int(caps, "s").unwrap_or(0);
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Parse one datetime-ish string. Accepts ISO forms directly; otherwise
/// scans for the first recognizable date pattern.
pub fn parse_datetime_loose(raw: &str) -> Option<NaiveDateTime> {
    if raw.is_empty() {
        return None;
    }
    let cleaned = PAREN_RE.replace_all(raw, " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned.replace("Z", "+00:00")) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    if let Some(caps) = Y4_RE.captures(&cleaned) {
        if let Some(year) = group_int(&caps, "y4") {
            if let Some(dt) = from_groups(&caps, year as i32) {
                return Some(dt);
            }
        }
    }
    if let Some(caps) = Y2_RE.captures(&cleaned) {
        if let Some(year) = group_int(&caps, "y2") {
            if let Some(dt) = from_groups(&caps, expand_two_digit_year(year as i32)) {
                return Some(dt);
            }
        }
    }
    if let Some(caps) = COMPACT_RE.captures(&cleaned) {
        if let Some(year) = group_int(&caps, "y") {
            if let Some(dt) = from_groups(&caps, year as i32) {
                return Some(dt);
            }
        }
    }
    None
}

/// Every datetime token found in free text, with a flag for whether the
/// token carried a time component. Deduplicated.
pub fn scan_datetimes(text: &str) -> Vec<(NaiveDateTime, bool)> {
    if text.is_empty() {
        return Vec::new();
    }
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut results = Vec::new();
    let mut seen: std::collections::HashSet<(NaiveDateTime, bool)> =
        std::collections::HashSet::new();

    for (re, year_group, two_digit) in [(&*Y4_RE, "y4", false), (&*Y2_RE, "y2", true)] {
        for caps in re.captures_iter(&cleaned) {
            let Some(year_raw) = group_int(&caps, year_group) else {
                continue;
            };
            let year = if two_digit {
                expand_two_digit_year(year_raw as i32)
            } else {
                year_raw as i32
            };
            let Some(dt) = from_groups(&caps, year) else {
                continue;
            };
            let has_time = caps.name("h").is_some();
            if seen.insert((dt, has_time)) {
                results.push((dt, has_time));
            }
        }
    }
    results
}

/// Normalize an extractor-provided published-at into a bare ISO-8601 string.
pub fn normalize_published_at(value: &str) -> Option<String> {
    parse_datetime_loose(value).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}
