use chrono::Utc;
use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::types::{Candidate, FetchResult};
use crate::net::{self, RetryPolicy, RobotsCache};

/// Charset declared in an HTML `<meta>` tag, scanned over the first 4 KiB.
static META_CHARSET_RE: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#)
        .expect("static charset pattern")
});

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Global minimum pause between fetches (seconds).
    pub pause_seconds: f64,
    pub obey_robots: bool,
    /// Per-host minimum pause overrides; keys match exactly or as `.domain`
    /// suffixes.
    pub per_host_pause_sec: BTreeMap<String, f64>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: net::user_agent(),
            pause_seconds: 0.5,
            obey_robots: false,
            per_host_pause_sec: BTreeMap::new(),
        }
    }
}

/// The only component that issues requests to target sites' resource URLs.
///
/// Enforces robots.txt (with the per-candidate override), per-host pacing
/// under a per-host lock, and the shared retry policy; decodes bytes through
/// the heuristic charset chain.
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    retry: RetryPolicy,
    robots: Option<RobotsCache>,
    hosts: StdMutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, config: FetcherConfig, retry: RetryPolicy) -> Self {
        let robots = config
            .obey_robots
            .then(|| RobotsCache::new(client.clone(), config.user_agent.clone()));
        Self {
            client,
            config,
            retry,
            robots,
            hosts: StdMutex::new(HashMap::new()),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    /// Fetch one candidate. `None` means "skip this one": robots disallow,
    /// exhausted retries, or a non-success status. Never aborts the run.
    pub async fn fetch(&self, candidate: &Candidate) -> Option<FetchResult> {
        let host = normalize_host(&candidate.url);
        let host_pause = host
            .as_deref()
            .and_then(|h| host_pause(&self.config.per_host_pause_sec, h))
            .unwrap_or(0.0);
        let pause = self.config.pause_seconds.max(host_pause);

        if host_pause > 0.0 {
            if let Some(host) = host {
                let slot = {
                    let mut hosts = self.hosts.lock().expect("host pacing map");
                    hosts
                        .entry(host)
                        .or_insert_with(|| Arc::new(Mutex::new(None)))
                        .clone()
                };
                // The host lock is held across the pause and the request so
                // concurrent fetches to the same host cannot interleave.
                let mut last = slot.lock().await;
                if let Some(prev) = *last {
                    let wait = Duration::from_secs_f64(pause).saturating_sub(prev.elapsed());
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                let result = self.fetch_live(candidate).await;
                *last = Some(Instant::now());
                return result;
            }
        }

        let result = self.fetch_live(candidate).await;
        if result.is_some() && pause > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
        }
        result
    }

    async fn fetch_live(&self, candidate: &Candidate) -> Option<FetchResult> {
        if let Some(robots) = &self.robots {
            if !candidate.robots_override() && !robots.allowed(&candidate.url).await {
                debug!("live fetch disallowed by robots: {}", candidate.url);
                return None;
            }
        }

        let body = match net::send_with_retry(&self.retry, || {
            self.client
                .get(&candidate.url)
                .header(reqwest::header::USER_AGENT, &self.config.user_agent)
        })
        .await
        {
            Ok(body) => body,
            Err(e) => {
                debug!("live fetch failed: {} ({})", candidate.url, e);
                return None;
            }
        };
        if !body.status.is_success() {
            debug!(
                "live fetch non-success status {} for {}",
                body.status, candidate.url
            );
            return None;
        }

        let (html, encoding) = decode_bytes(&body.bytes, body.content_type.as_deref());
        Some(FetchResult {
            url: candidate.url.clone(),
            fetched_from: "live".to_string(),
            status_code: body.status.as_u16(),
            html,
            snapshot_url: Some(candidate.url.clone()),
            encoding: Some(encoding),
            fetched_at: Utc::now(),
        })
    }
}

/// Host key for pacing: lower-cased, port and `www.` stripped.
pub(crate) fn normalize_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

pub(crate) fn host_pause(pause_map: &BTreeMap<String, f64>, host: &str) -> Option<f64> {
    if let Some(pause) = pause_map.get(host) {
        return Some(*pause);
    }
    pause_map
        .iter()
        .find(|(key, _)| host.ends_with(&format!(".{key}")))
        .map(|(_, pause)| *pause)
}

/// Decode a response body choosing the encoding in priority: Content-Type
/// charset → meta charset in the first 4 KiB → utf-8 → cp949 → euc-kr →
/// latin-1. Strict decode first; the last resort is utf-8 with replacement.
pub fn decode_bytes(body: &[u8], content_type: Option<&str>) -> (String, String) {
    let header_enc = content_type.and_then(|ct| {
        let lower = ct.to_lowercase();
        lower.split("charset=").nth(1).map(|rest| {
            rest.split(';')
                .next()
                .unwrap_or(rest)
                .trim()
                .trim_matches('"')
                .to_string()
        })
    });

    let head = &body[..body.len().min(4096)];
    let meta_enc = META_CHARSET_RE
        .captures(head)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).to_lowercase());

    let mut candidates: Vec<String> = Vec::new();
    candidates.extend(header_enc);
    candidates.extend(meta_enc);
    candidates.extend(
        ["utf-8", "cp949", "euc-kr", "latin-1"]
            .iter()
            .map(|s| s.to_string()),
    );

    for label in &candidates {
        let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        let (text, had_errors) = encoding.decode_without_bom_handling(body);
        if !had_errors {
            return (text.into_owned(), label.clone());
        }
    }

    // Last resort; should rarely be reached since latin-1 cannot fail.
    let (text, _, _) = encoding_rs::UTF_8.decode(body);
    (text.into_owned(), "utf-8".to_string())
}
