//! Forum board discoverer: paginates listing pages per configured site and
//! board, honoring robots, board cursors, a time window, and an `until_date`
//! stop rule. Only listing pages are requested here; thread pages go through
//! the main fetcher.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::core::config::ForumSiteConfig;
use crate::core::types::{Candidate, DiscoveredVia};
use crate::core::urlnorm::normalize_url;
use crate::net::RobotsCache;
use crate::sites;

pub struct ForumsDiscoverer {
    client: reqwest::Client,
    robots: RobotsCache,
    sites_config: BTreeMap<String, ForumSiteConfig>,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
    until_date: Option<DateTime<Utc>>,
    board_cursors: HashMap<String, u32>,
}

/// Discovery output plus the last listing page visited per board, so the
/// auto-crawler can advance its cursors.
#[derive(Debug, Default)]
pub struct ForumDiscovery {
    pub per_site: BTreeMap<String, Vec<Candidate>>,
    pub last_board_pages: HashMap<String, u32>,
}

impl ForumsDiscoverer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        user_agent: String,
        sites_config: BTreeMap<String, ForumSiteConfig>,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        until_date: Option<DateTime<Utc>>,
        board_cursors: HashMap<String, u32>,
    ) -> Self {
        let robots = RobotsCache::new(client.clone(), user_agent);
        Self {
            client,
            robots,
            sites_config,
            window_start,
            window_end,
            until_date,
            board_cursors,
        }
    }

    pub async fn discover(&self) -> ForumDiscovery {
        let mut out = ForumDiscovery::default();
        for (site_key, cfg) in &self.sites_config {
            if !cfg.enabled {
                continue;
            }
            let Some(site) = sites::site(site_key) else {
                debug!("no parser for forum site={}", site_key);
                continue;
            };
            let mut site_candidates = Vec::new();
            for board_url in &cfg.boards {
                if board_url.is_empty() {
                    continue;
                }
                self.crawl_board(site, cfg, board_url, &mut site_candidates, &mut out)
                    .await;
            }
            info!(
                "forums discoverer site={} discovered={}",
                site_key,
                site_candidates.len()
            );
            out.per_site.insert(site_key.clone(), site_candidates);
        }
        out
    }

    async fn crawl_board(
        &self,
        site: &'static sites::ForumSite,
        cfg: &ForumSiteConfig,
        board_url: &str,
        site_candidates: &mut Vec<Candidate>,
        out: &mut ForumDiscovery,
    ) {
        let mut seen_norm: HashSet<String> = HashSet::new();
        let start_page = *self.board_cursors.get(board_url).unwrap_or(&1).max(&1);
        let mut last_page_visited = start_page.saturating_sub(1);
        let mut board_count = 0usize;

        'pages: for page in start_page..start_page + cfg.max_pages.max(1) {
            let page_url = build_page_url(site.page_param, board_url, page);
            if cfg.obey_robots && !self.robots.allowed(&page_url).await {
                debug!("discovery robots disallow: {}", page_url);
                continue;
            }
            let html = match self.client.get(&page_url).send().await {
                Ok(resp) if resp.status().as_u16() < 400 => {
                    resp.text().await.unwrap_or_default()
                }
                Ok(resp) => {
                    debug!("listing fetch failed {} status={}", page_url, resp.status());
                    break;
                }
                Err(e) => {
                    debug!("listing request error: url={} error={}", page_url, e);
                    break;
                }
            };
            let posts = (site.parse_listing)(board_url, &html);

            let mut page_oldest_ts: Option<DateTime<Utc>> = None;
            for post in posts {
                if post.url.is_empty() {
                    continue;
                }
                let norm = normalize_url(&post.url);
                if !seen_norm.insert(norm) {
                    continue;
                }

                let mut ts_aware = post
                    .published_at_raw
                    .as_deref()
                    .and_then(parse_datetime_guess)
                    .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc));
                // Window filtering drops the timestamp but keeps the
                // candidate; extraction may still infer a usable one.
                if let (Some(ts), Some(start)) = (ts_aware, self.window_start) {
                    if ts < start {
                        ts_aware = None;
                    }
                }
                if let (Some(ts), Some(end)) = (ts_aware, self.window_end) {
                    if ts >= end {
                        ts_aware = None;
                    }
                }

                let mut extra = serde_json::Map::new();
                extra.insert(
                    "forum".to_string(),
                    serde_json::json!({"site": site.key, "board": board_url}),
                );
                if !cfg.obey_robots {
                    // Discovery already skipped robots for this site; let the
                    // fetcher do the same for its thread pages.
                    extra.insert("robots_override".to_string(), serde_json::Value::Bool(true));
                }

                site_candidates.push(Candidate {
                    url: post.url,
                    source: site.key.to_string(),
                    discovered_via: DiscoveredVia::Forum {
                        site: site.key.to_string(),
                        board: board_url.to_string(),
                        page,
                    },
                    hinted_timestamp: ts_aware,
                    title: post.title,
                    extra,
                });
                board_count += 1;

                if let Some(ts) = ts_aware {
                    if page_oldest_ts.map(|oldest| ts < oldest).unwrap_or(true) {
                        page_oldest_ts = Some(ts);
                    }
                }
                if board_count >= cfg.per_board_limit {
                    last_page_visited = page;
                    break 'pages;
                }
            }

            last_page_visited = page;
            // Stop paging this board once we scrolled past the until_date.
            if let (Some(until), Some(oldest)) = (self.until_date, page_oldest_ts) {
                if oldest < until {
                    break;
                }
            }
            if cfg.pause_between_requests > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(cfg.pause_between_requests)).await;
            }
        }

        out.last_board_pages.insert(
            board_url.to_string(),
            last_page_visited.max(start_page.saturating_sub(1)),
        );
    }
}

pub(crate) fn build_page_url(page_param: &str, base_url: &str, page: u32) -> String {
    if page <= 1 {
        return base_url.to_string();
    }
    update_query_param(base_url, page_param, &page.to_string())
}

fn update_query_param(url: &str, key: &str, value: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(pair) => pair.1 = value.to_string(),
        None => pairs.push((key.to_string(), value.to_string())),
    }
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    parsed.to_string()
}

/// Board listing timestamps come in many shapes; try the explicit format
/// chain first, then a digits-only fallback. The year width picks between
/// four-digit and two-digit formats so `25/11/20` lands in 2025.
pub(crate) fn parse_datetime_guess(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let leading_digits = s.chars().take_while(char::is_ascii_digit).count();
    let (datetime_formats, date_formats): (&[&str], &[&str]) = if leading_digits == 2 {
        (
            &[
                "%y-%m-%d %H:%M:%S",
                "%y-%m-%d %H:%M",
                "%y.%m.%d %H:%M:%S",
                "%y.%m.%d %H:%M",
                "%y/%m/%d %H:%M:%S",
                "%y/%m/%d %H:%M",
            ],
            &["%y-%m-%d", "%y.%m.%d", "%y/%m/%d"],
        )
    } else {
        (
            &[
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%d %H:%M",
                "%Y.%m.%d %H:%M:%S",
                "%Y.%m.%d %H:%M",
                "%Y/%m/%d %H:%M:%S",
                "%Y/%m/%d %H:%M",
            ],
            &["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"],
        )
    };
    for format in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
    for format in ["%Y%m%d%H%M%S", "%Y%m%d%H%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&digits, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(&digits, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_updates_site_param() {
        assert_eq!(
            build_page_url("page", "https://gall.dcinside.com/board/lists/?id=car_new1", 3),
            "https://gall.dcinside.com/board/lists/?id=car_new1&page=3"
        );
        assert_eq!(
            build_page_url("p", "https://mlbpark.donga.com/mp/b.php?b=bullpen&p=1", 2),
            "https://mlbpark.donga.com/mp/b.php?b=bullpen&p=2"
        );
        // Page 1 keeps the base URL untouched.
        assert_eq!(
            build_page_url("page", "https://theqoo.net/square", 1),
            "https://theqoo.net/square"
        );
    }

    #[test]
    fn datetime_guess_handles_site_formats() {
        assert_eq!(
            parse_datetime_guess("2025-11-20 09:15:00").unwrap().to_string(),
            "2025-11-20 09:15:00"
        );
        assert_eq!(
            parse_datetime_guess("2025.11.20 09:15").unwrap().to_string(),
            "2025-11-20 09:15:00"
        );
        assert_eq!(
            parse_datetime_guess("25/11/20").unwrap().to_string(),
            "2025-11-20 00:00:00"
        );
        assert_eq!(
            parse_datetime_guess("20251120143000").unwrap().to_string(),
            "2025-11-20 14:30:00"
        );
        assert!(parse_datetime_guess("어제").is_none());
    }

    #[test]
    fn digits_fallback_strips_separators() {
        // "2025년11월20일" style labels collapse to a digit run.
        assert_eq!(
            parse_datetime_guess("2025년11월20일").unwrap().to_string(),
            "2025-11-20 00:00:00"
        );
    }
}
