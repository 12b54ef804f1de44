use sha1::{Digest, Sha1};
use url::Url;

/// Tracking parameters stripped during normalization. Exactly these keys and
/// no others.
const UTM_KEYS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// Canonicalize a URL for deduplication.
///
/// Lower-cases scheme and host, drops default ports 80/443, defaults the path
/// to `/`, sorts query parameters, strips UTM parameters, and drops the
/// fragment. Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let mut netloc = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if let Some(port) = parsed.port() {
        if port != 80 && port != 443 {
            netloc = format!("{netloc}:{port}");
        }
    }

    let path = if parsed.path().is_empty() {
        "/"
    } else {
        parsed.path()
    };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !UTM_KEYS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        format!("{scheme}://{netloc}{path}")
    } else {
        format!("{scheme}://{netloc}{path}?{query}")
    }
}

/// Hex SHA-1 digest; document ids are `sha1_hex(normalize_url(url))`.
pub fn sha1_hex(value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
