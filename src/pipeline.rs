//! One discovery→fetch→extract→store pass. Discoverers run first (each with
//! its own internal concurrency), candidates merge into a normalized-URL
//! keyed set, and the fetch loop walks them in fixed source priority.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::CrawlerConfig;
use crate::core::types::{Candidate, Document, PipelineStats};
use crate::core::urlnorm::normalize_url;
use crate::discovery::forums::ForumsDiscoverer;
use crate::discovery::gdelt::GdeltDiscoverer;
use crate::discovery::youtube::YouTubeDiscoverer;
use crate::extract::{Extractor, ExtractorOptions, Rejection};
use crate::fetch::{Fetcher, FetcherConfig};
use crate::net::{self, RetryPolicy};
use crate::sites;
use crate::storage::{DocumentIndex, MultiSourceJsonlWriter};

/// Invoked once per stored document; the auto-crawler hooks this to keep its
/// per-month counts current without coupling to the pipeline.
pub type StoreObserver = Box<dyn Fn(&Document, &Candidate) + Send + Sync>;

#[derive(Default)]
pub struct PipelineOptions {
    /// Restrict to a subset of {"gdelt", "youtube", "forums"}.
    pub include_sources: Option<HashSet<String>>,
    /// Within forums, restrict to these site keys.
    pub forum_sites_filter: Option<HashSet<String>>,
    /// Cap on fetch attempts for this run.
    pub max_fetch: Option<usize>,
    /// Planner-chosen keyword subset for the video source.
    pub youtube_keywords: Option<Vec<String>>,
    pub forums_time_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub forums_until_date: Option<DateTime<Utc>>,
    pub forums_board_cursors: HashMap<String, u32>,
}

pub struct Pipeline {
    config: CrawlerConfig,
    options: PipelineOptions,
    client: reqwest::Client,
    fetcher: Fetcher,
    extractor: Extractor,
    storage: MultiSourceJsonlWriter,
    index: DocumentIndex,
    store_observer: Option<StoreObserver>,
    /// Last listing page visited per board in this run.
    pub last_forums_pages: HashMap<String, u32>,
}

impl Pipeline {
    pub fn new(config: CrawlerConfig, mut options: PipelineOptions) -> Result<Self> {
        options.max_fetch = options.max_fetch.filter(|n| *n > 0);

        let user_agent = net::user_agent();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.limits.request_timeout_sec))
            .user_agent(user_agent.clone())
            .build()?;

        let fetcher = Fetcher::new(
            client.clone(),
            FetcherConfig {
                user_agent,
                pause_seconds: config.fetch.pause_seconds,
                obey_robots: config.fetch.obey_robots,
                per_host_pause_sec: config.fetch.per_host_pause_sec.clone(),
            },
            RetryPolicy::default(),
        );
        let extractor = Extractor::new(
            &config.keywords,
            &config.lang,
            config.quality.min_keyword_hits,
            ExtractorOptions::from_env(),
        );
        let storage = MultiSourceJsonlWriter::new(&config.output.root)?;
        let index = DocumentIndex::open(storage.output_dir());

        Ok(Self {
            config,
            options,
            client,
            fetcher,
            extractor,
            storage,
            index,
            store_observer: None,
            last_forums_pages: HashMap::new(),
        })
    }

    pub fn with_observer(mut self, observer: StoreObserver) -> Self {
        self.store_observer = Some(observer);
        self
    }

    fn should_run(&self, key: &str) -> bool {
        self.options
            .include_sources
            .as_ref()
            .map(|set| set.contains(key))
            .unwrap_or(true)
    }

    fn trim(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let max_total = self.config.limits.max_candidates_per_source;
        if candidates.len() > max_total {
            candidates.truncate(max_total);
        }
        candidates
    }

    async fn discover(&mut self) -> BTreeMap<String, Vec<Candidate>> {
        let mut discoveries: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();

        if self.should_run("gdelt") && self.config.gdelt.enabled {
            let gdelt = GdeltDiscoverer::new(
                self.client.clone(),
                self.config.keywords.clone(),
                self.config.lang.clone(),
                self.config.time_window.start_date,
                self.config.time_window.end_date,
                self.config.gdelt.clone(),
            );
            discoveries.insert("gdelt".to_string(), self.trim(gdelt.discover().await));
        }

        if self.should_run("youtube") {
            let keywords = self
                .options
                .youtube_keywords
                .clone()
                .unwrap_or_else(|| self.config.keywords.clone());
            let youtube = YouTubeDiscoverer::new(
                self.client.clone(),
                std::env::var("YOUTUBE_API_KEY").ok(),
                keywords,
                self.config.time_window.start_date,
                self.config.time_window.end_date,
            );
            discoveries.insert("youtube".to_string(), self.trim(youtube.discover().await));
        }

        if self.should_run("forums") {
            let mut sites_config = self.config.forums.clone();
            if let Some(filter) = &self.options.forum_sites_filter {
                sites_config.retain(|key, _| filter.contains(key));
            }
            let (window_start, window_end) = match self.options.forums_time_window {
                Some((start, end)) => (Some(start), Some(end)),
                None => (None, None),
            };
            let forums = ForumsDiscoverer::new(
                self.client.clone(),
                self.fetcher.user_agent().to_string(),
                sites_config,
                window_start,
                window_end,
                self.options.forums_until_date,
                self.options.forums_board_cursors.clone(),
            );
            let discovery = forums.discover().await;
            self.last_forums_pages = discovery.last_board_pages;
            for (site, candidates) in discovery.per_site {
                discoveries.insert(site, self.trim(candidates));
            }
        }

        discoveries
    }

    pub async fn run(&mut self) -> Result<PipelineStats> {
        info!("starting pipeline run_id={}", self.config.run_id);
        let discovered = self.discover().await;
        let candidates = merge_candidates(&discovered);
        info!("total unique candidates: {}", candidates.len());

        let mut stats = PipelineStats {
            discovered: discovered
                .iter()
                .map(|(source, candidates)| (source.clone(), candidates.len()))
                .collect(),
            ..Default::default()
        };

        let mut attempted = 0usize;
        for mut candidate in candidates {
            if let Some(max_fetch) = self.options.max_fetch {
                if attempted >= max_fetch {
                    break;
                }
            }
            attempted += 1;

            let Some(fetch_result) = self.fetcher.fetch(&candidate).await else {
                stats.failed_fetch += 1;
                continue;
            };
            if fetch_result.html.is_empty() {
                stats.failed_fetch += 1;
                continue;
            }
            stats.fetched += 1;

            let mut document = match self
                .extractor
                .build_document(&mut candidate, &fetch_result, &self.config.run_id)
                .await
            {
                Ok(document) => document,
                Err(Rejection::Quality(_)) => {
                    stats.quality_rejected += 1;
                    continue;
                }
                Err(Rejection::ExtractFailed) => {
                    stats.extraction_failed += 1;
                    continue;
                }
            };

            document.extra.insert(
                "fetch".to_string(),
                serde_json::json!({
                    "encoding": fetch_result.encoding,
                    "status_code": fetch_result.status_code,
                    "fetched_from": fetch_result.fetched_from,
                }),
            );

            // Exactly-once storage: the id/url twin-set is the gate.
            if self.index.contains(&document.id) || self.index.contains_url(&document.url) {
                stats.duplicates_skipped += 1;
                stats.index_duplicates += 1;
                continue;
            }

            self.storage.append(&document)?;
            self.index.add(&document.id);
            self.index.add_url(&document.url);
            if let Some(observer) = &self.store_observer {
                observer(&document, &candidate);
            }
            stats.stored += 1;
        }

        if let Err(e) = self.index.flush() {
            warn!("index flush failed: {}", e);
        }
        info!(
            "pipeline completed stored={} fetched={} duplicates={} failed_fetch={}",
            stats.stored, stats.fetched, stats.duplicates_skipped, stats.failed_fetch
        );
        Ok(stats)
    }
}

/// Merge per-source discoveries into one list: drop robots.txt and bare
/// domain/homepage URLs, dedupe on normalized URL, and order by fixed source
/// priority (forum sites first, then news, then video).
pub(crate) fn merge_candidates(discovered: &BTreeMap<String, Vec<Candidate>>) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<Candidate> = Vec::new();
    for candidates in discovered.values() {
        for candidate in candidates {
            if candidate.url.is_empty() {
                continue;
            }
            if candidate.url.to_lowercase().ends_with("robots.txt") {
                continue;
            }
            let norm = normalize_url(&candidate.url);
            if norm.ends_with('/') || norm.matches('/').count() <= 2 {
                // Bare domain/homepage captures carry no article.
                continue;
            }
            if seen.insert(norm) {
                unique.push(candidate.clone());
            }
        }
    }

    let mut priority: Vec<&str> = sites::priority_order().collect();
    priority.push("gdelt");
    priority.push("youtube");

    let mut ordered = Vec::with_capacity(unique.len());
    for source in &priority {
        ordered.extend(
            unique
                .iter()
                .filter(|c| c.source == *source)
                .cloned(),
        );
    }
    ordered.extend(
        unique
            .iter()
            .filter(|c| !priority.contains(&c.source.as_str()))
            .cloned(),
    );
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DiscoveredVia;

    fn candidate(url: &str, source: &str) -> Candidate {
        Candidate {
            url: url.to_string(),
            source: source.to_string(),
            discovered_via: match source {
                "gdelt" => DiscoveredVia::News {
                    keyword: "kw".to_string(),
                    seendate: None,
                    window: crate::core::types::DiscoveryWindow {
                        start: "s".to_string(),
                        end: "e".to_string(),
                    },
                },
                "youtube" => DiscoveredVia::Video {
                    keyword: "kw".to_string(),
                },
                site => DiscoveredVia::Forum {
                    site: site.to_string(),
                    board: "b".to_string(),
                    page: 1,
                },
            },
            hinted_timestamp: None,
            title: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn merge_skips_robots_and_bare_domains() {
        let mut discovered = BTreeMap::new();
        discovered.insert(
            "gdelt".to_string(),
            vec![
                candidate("https://example.com/robots.txt", "gdelt"),
                candidate("https://example.com/", "gdelt"),
                candidate("https://example.com", "gdelt"),
                candidate("https://example.com/news/article-1", "gdelt"),
            ],
        );
        let merged = merge_candidates(&discovered);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].url, "https://example.com/news/article-1");
    }

    #[test]
    fn merge_dedupes_on_normalized_url() {
        let mut discovered = BTreeMap::new();
        discovered.insert(
            "gdelt".to_string(),
            vec![
                candidate("https://example.com/a/b?x=1&utm_source=s", "gdelt"),
                candidate("https://EXAMPLE.com/a/b?x=1", "gdelt"),
            ],
        );
        assert_eq!(merge_candidates(&discovered).len(), 1);
    }

    #[test]
    fn merge_orders_forums_before_news_before_video() {
        let mut discovered = BTreeMap::new();
        discovered.insert(
            "gdelt".to_string(),
            vec![candidate("https://news.example.com/a/1", "gdelt")],
        );
        discovered.insert(
            "youtube".to_string(),
            vec![candidate("https://www.youtube.com/watch?v=x", "youtube")],
        );
        discovered.insert(
            "theqoo".to_string(),
            vec![candidate("https://theqoo.net/square/100", "theqoo")],
        );
        discovered.insert(
            "dcinside".to_string(),
            vec![candidate(
                "https://gall.dcinside.com/board/view/?id=a&no=1",
                "dcinside",
            )],
        );
        let order: Vec<String> = merge_candidates(&discovered)
            .into_iter()
            .map(|c| c.source)
            .collect();
        assert_eq!(order, vec!["dcinside", "theqoo", "gdelt", "youtube"]);
    }
}
