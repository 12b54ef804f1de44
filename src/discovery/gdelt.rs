//! GDELT DOC 2.0 discoverer: keyword-by-window article queries fanned out
//! over a bounded worker pool, deduplicated through a shared seen-URL set.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::GdeltSourceConfig;
use crate::core::types::{Candidate, DiscoveredVia, DiscoveryWindow};
use crate::net::{self, RetryPolicy};

const API_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";

pub struct GdeltDiscoverer {
    client: reqwest::Client,
    keywords: Vec<String>,
    languages: Vec<String>,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    config: GdeltSourceConfig,
    retry: RetryPolicy,
}

impl GdeltDiscoverer {
    pub fn new(
        client: reqwest::Client,
        keywords: Vec<String>,
        languages: Vec<String>,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        config: GdeltSourceConfig,
    ) -> Self {
        let mut config = config;
        if config.chunk_days <= 0 {
            config.chunk_days = 30;
        }
        if config.max_records_per_keyword == 0 {
            config.max_records_per_keyword = 75;
        }
        if config.pause_between_requests < 0.0 {
            config.pause_between_requests = 0.0;
        }
        if config.max_attempts == 0 {
            config.max_attempts = 1;
        }
        if config.rate_limit_backoff_sec < 0.0 {
            config.rate_limit_backoff_sec = 0.0;
        }
        let retry = RetryPolicy::new(config.max_attempts, config.rate_limit_backoff_sec);
        Self {
            client,
            keywords: keywords.into_iter().filter(|k| !k.trim().is_empty()).collect(),
            languages: languages.iter().map(|l| l.to_lowercase()).collect(),
            start_date,
            end_date,
            config,
            retry,
        }
    }

    /// Consecutive chunks of `chunk_days` with optional overlap, clamped by
    /// `max_days_back` from the window end.
    fn windows(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let end = self.end_date.unwrap_or(now);
        let mut start = self.start_date;
        if let Some(max_back) = self.config.max_days_back.filter(|d| *d > 0) {
            let clamp_start = end - ChronoDuration::days(max_back);
            if clamp_start > start {
                start = clamp_start;
            }
        }
        let chunk = ChronoDuration::days(self.config.chunk_days);
        let overlap = ChronoDuration::days(self.config.overlap_days.max(0));

        let mut windows = Vec::new();
        let mut current_start = start;
        while current_start < end {
            let window_end = (current_start + chunk).min(end);
            windows.push((current_start, window_end));
            let mut next_start = window_end - overlap;
            if next_start <= current_start {
                next_start = window_end;
            }
            current_start = next_start;
        }
        windows
    }

    fn build_params(
        &self,
        keyword: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let query_term = if keyword.trim().contains(' ') {
            format!("\"{keyword}\"")
        } else {
            keyword.to_string()
        };

        let mut query = query_term;
        if !self.languages.is_empty() {
            let clauses: Vec<String> = self
                .languages
                .iter()
                .map(|lang| match lang.as_str() {
                    "ko" => "sourcelang:KOREAN".to_string(),
                    "en" => "sourcelang:ENGLISH".to_string(),
                    other => format!("lang:{}", other.to_uppercase()),
                })
                .collect();
            let clause = if clauses.len() == 1 {
                clauses[0].clone()
            } else {
                format!("({})", clauses.join(" OR "))
            };
            query = format!("{query} {clause}");
        }

        // enddatetime is inclusive; subtract one second to keep [start, end).
        let mut end_inclusive = window_end - ChronoDuration::seconds(1);
        if end_inclusive < window_start {
            end_inclusive = window_start;
        }

        vec![
            ("query".to_string(), query),
            ("mode".to_string(), "ArtList".to_string()),
            ("format".to_string(), "json".to_string()),
            (
                "maxrecords".to_string(),
                self.config.max_records_per_keyword.to_string(),
            ),
            ("sort".to_string(), "DateDesc".to_string()),
            (
                "startdatetime".to_string(),
                window_start.format("%Y%m%d%H%M%S").to_string(),
            ),
            (
                "enddatetime".to_string(),
                end_inclusive.format("%Y%m%d%H%M%S").to_string(),
            ),
        ]
    }

    pub async fn discover(&self) -> Vec<Candidate> {
        let windows = self.windows(Utc::now());
        let mut tasks: Vec<(String, DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        for keyword in &self.keywords {
            // Very short keywords flood the API with noise.
            if keyword.trim().chars().count() < 3 {
                continue;
            }
            for (window_start, window_end) in &windows {
                tasks.push((keyword.clone(), *window_start, *window_end));
            }
        }

        let seen_urls: Arc<StdMutex<HashSet<String>>> = Arc::new(StdMutex::new(HashSet::new()));
        let max_workers = self.config.max_concurrency.max(1);

        let batches: Vec<Vec<Candidate>> = stream::iter(tasks)
            .map(|(keyword, ws, we)| {
                let seen = Arc::clone(&seen_urls);
                async move { self.worker(&keyword, ws, we, &seen).await }
            })
            .buffer_unordered(max_workers)
            .collect()
            .await;

        let results: Vec<Candidate> = batches.into_iter().flatten().collect();
        info!("gdelt discovered {} candidates", results.len());
        results
    }

    async fn worker(
        &self,
        keyword: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        seen_urls: &StdMutex<HashSet<String>>,
    ) -> Vec<Candidate> {
        let params = self.build_params(keyword, window_start, window_end);
        let response = net::send_with_retry(&self.retry, || {
            self.client.get(API_URL).query(&params)
        })
        .await;

        let body = match response {
            Ok(body) if body.status.is_success() => body,
            Ok(body) => {
                warn!(
                    "gdelt request failed: kw={} window={}–{} status={}",
                    keyword,
                    window_start.date_naive(),
                    window_end.date_naive(),
                    body.status
                );
                return Vec::new();
            }
            Err(e) => {
                warn!(
                    "gdelt request failed: kw={} window={}–{} error={}",
                    keyword,
                    window_start.date_naive(),
                    window_end.date_naive(),
                    e
                );
                return Vec::new();
            }
        };

        let payload: serde_json::Value = match serde_json::from_slice(&body.bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "gdelt JSON decode failed: kw={} window={}–{} error={}",
                    keyword,
                    window_start.date_naive(),
                    window_end.date_naive(),
                    e
                );
                return Vec::new();
            }
        };

        let mut batch = Vec::new();
        for article in payload
            .get("articles")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let Some(url) = article.get("url").and_then(|v| v.as_str()) else {
                continue;
            };
            {
                let mut seen = seen_urls.lock().expect("gdelt seen-url set");
                if !seen.insert(url.to_string()) {
                    continue;
                }
            }
            let seendate = article.get("seendate").and_then(|v| v.as_str());
            let mut extra = serde_json::Map::new();
            extra.insert("gdelt".to_string(), article.clone());
            batch.push(Candidate {
                url: url.to_string(),
                source: "gdelt".to_string(),
                discovered_via: DiscoveredVia::News {
                    keyword: keyword.to_string(),
                    seendate: seendate.map(str::to_string),
                    window: DiscoveryWindow {
                        start: window_start.to_rfc3339(),
                        end: window_end.to_rfc3339(),
                    },
                },
                hinted_timestamp: seendate.and_then(parse_seendate),
                title: article
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                extra,
            });
        }

        if self.config.pause_between_requests > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(self.config.pause_between_requests)).await;
        }
        batch
    }
}

/// `seendate` arrives as `YYYYMMDDTHHMMSSZ` (preferred) or bare `YYYYMMDD`;
/// both are interpreted as UTC.
pub(crate) fn parse_seendate(seendate: &str) -> Option<DateTime<Utc>> {
    if seendate.contains('T') {
        NaiveDateTime::parse_from_str(seendate, "%Y%m%dT%H%M%SZ")
            .ok()
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
    } else {
        chrono::NaiveDate::parse_from_str(seendate, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn discoverer(config: GdeltSourceConfig) -> GdeltDiscoverer {
        GdeltDiscoverer::new(
            reqwest::Client::new(),
            vec!["전기차".to_string(), "ab".to_string()],
            vec!["ko".to_string()],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            config,
        )
    }

    #[test]
    fn seendate_full_timestamp_parsed_as_utc() {
        let ts = parse_seendate("20251123T143000Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-11-23T14:30:00+00:00");
    }

    #[test]
    fn seendate_date_only_fallback() {
        let ts = parse_seendate("20251123").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-11-23T00:00:00+00:00");
        assert!(parse_seendate("not-a-date").is_none());
    }

    #[test]
    fn windows_chunk_the_time_range() {
        let d = discoverer(GdeltSourceConfig {
            chunk_days: 30,
            ..Default::default()
        });
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let windows = d.windows(now);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].0, d.start_date);
        assert_eq!(windows[0].1, windows[1].0);
        assert_eq!(windows[1].1, d.end_date.unwrap());
    }

    #[test]
    fn max_days_back_clamps_start() {
        let d = discoverer(GdeltSourceConfig {
            chunk_days: 30,
            max_days_back: Some(10),
            ..Default::default()
        });
        let windows = d.windows(Utc::now());
        assert_eq!(
            windows[0].0,
            d.end_date.unwrap() - ChronoDuration::days(10)
        );
    }

    #[test]
    fn params_carry_language_clause_and_window() {
        let d = discoverer(GdeltSourceConfig::default());
        let ws = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let we = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let params = d.build_params("전기차", ws, we);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("query"), "전기차 sourcelang:KOREAN");
        assert_eq!(get("startdatetime"), "20250101000000");
        assert_eq!(get("enddatetime"), "20250130235959");
        assert_eq!(get("mode"), "ArtList");
        assert_eq!(get("format"), "json");
    }

    #[test]
    fn multi_word_keywords_are_quoted() {
        let d = GdeltDiscoverer::new(
            reqwest::Client::new(),
            vec![],
            vec![],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            None,
            GdeltSourceConfig::default(),
        );
        let ws = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let params = d.build_params("electric car", ws, ws);
        let query = &params.iter().find(|(k, _)| k == "query").unwrap().1;
        assert_eq!(query, "\"electric car\"");
    }
}
