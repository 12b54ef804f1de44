//! Video-API discoverer: one search request per keyword, then a details
//! request for the returned video ids. Without an API key it yields nothing.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::core::types::{Candidate, DiscoveredVia};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

pub struct YouTubeDiscoverer {
    client: reqwest::Client,
    api_key: Option<String>,
    keywords: Vec<String>,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    max_results_per_keyword: u32,
}

impl YouTubeDiscoverer {
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        keywords: Vec<String>,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            keywords: keywords.into_iter().filter(|k| !k.trim().is_empty()).collect(),
            start_date,
            end_date,
            max_results_per_keyword: 25,
        }
    }

    pub async fn discover(&self) -> Vec<Candidate> {
        let Some(api_key) = &self.api_key else {
            info!("skipping youtube discoverer because API key is missing");
            return Vec::new();
        };

        let published_after = self.start_date.to_rfc3339_opts(SecondsFormat::Secs, true);
        let published_before = self
            .end_date
            .map(|end| end.to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut candidates = Vec::new();
        for keyword in &self.keywords {
            let mut params = vec![
                ("key".to_string(), api_key.clone()),
                ("part".to_string(), "snippet".to_string()),
                ("type".to_string(), "video".to_string()),
                ("order".to_string(), "date".to_string()),
                ("q".to_string(), keyword.clone()),
                (
                    "maxResults".to_string(),
                    self.max_results_per_keyword.to_string(),
                ),
                ("publishedAfter".to_string(), published_after.clone()),
            ];
            if let Some(before) = &published_before {
                params.push(("publishedBefore".to_string(), before.clone()));
            }

            let search: serde_json::Value = match self
                .client
                .get(SEARCH_URL)
                .query(&params)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(resp) => match resp.json().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("youtube search response not JSON: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("youtube search request failed: {}", e);
                    continue;
                }
            };

            let items: Vec<serde_json::Value> = search
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let video_ids: Vec<String> = items
                .iter()
                .filter_map(|item| item.pointer("/id/videoId"))
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
            if video_ids.is_empty() {
                continue;
            }

            let details: serde_json::Value = match self
                .client
                .get(VIDEOS_URL)
                .query(&[
                    ("key", api_key.as_str()),
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", video_ids.join(",").as_str()),
                ])
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(resp) => match resp.json().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("youtube details response not JSON: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("youtube video details failed: {}", e);
                    continue;
                }
            };

            let mut details_by_id = std::collections::HashMap::new();
            for item in details
                .get("items")
                .and_then(|v| v.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                if let Some(id) = item.get("id").and_then(|v| v.as_str()) {
                    details_by_id.insert(id.to_string(), item.clone());
                }
            }

            for item in &items {
                let Some(video_id) = item.pointer("/id/videoId").and_then(|v| v.as_str()) else {
                    continue;
                };
                let detail = details_by_id.get(video_id);
                let snippet = detail
                    .and_then(|d| d.get("snippet"))
                    .or_else(|| item.get("snippet"));
                let published_at = snippet
                    .and_then(|s| s.get("publishedAt"))
                    .and_then(|v| v.as_str());
                let mut extra = serde_json::Map::new();
                extra.insert(
                    "youtube".to_string(),
                    detail.cloned().unwrap_or(serde_json::Value::Null),
                );
                candidates.push(Candidate {
                    url: format!("https://www.youtube.com/watch?v={video_id}"),
                    source: "youtube".to_string(),
                    discovered_via: DiscoveredVia::Video {
                        keyword: keyword.clone(),
                    },
                    hinted_timestamp: published_at
                        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    title: snippet
                        .and_then(|s| s.get("title"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    extra,
                });
            }
        }
        info!("youtube discovered {} candidates", candidates.len());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn missing_api_key_yields_nothing() {
        let d = YouTubeDiscoverer::new(
            reqwest::Client::new(),
            None,
            vec!["전기차".to_string()],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            None,
        );
        assert!(d.discover().await.is_empty());

        let blank = YouTubeDiscoverer::new(
            reqwest::Client::new(),
            Some("  ".to_string()),
            vec!["전기차".to_string()],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            None,
        );
        assert!(blank.discover().await.is_empty());
    }
}
