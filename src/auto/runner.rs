//! AutoCrawler: run the pipeline in planner-driven rounds, one sub-pipeline
//! per (source, month window), feeding outcomes back into cooldowns, forum
//! cursors, and the persistent state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::auto::scheduler::{plan_round, PlanParams, RoundPlan};
use crate::auto::state::{AutoState, CooldownPolicy};
use crate::core::config::{CrawlerConfig, TimeWindow};
use crate::core::types::PipelineStats;
use crate::pipeline::{Pipeline, PipelineOptions, StoreObserver};

#[derive(Debug, Default, Clone, Serialize)]
pub struct RoundTotals {
    pub stored: usize,
    pub fetched: usize,
    pub discovered: usize,
}

pub struct AutoCrawler {
    base_config: CrawlerConfig,
    state_path: PathBuf,
    pub state: Arc<Mutex<AutoState>>,
}

fn clone_with_time_window(
    config: &CrawlerConfig,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CrawlerConfig {
    let mut config = config.clone();
    config.time_window = TimeWindow {
        start_date: start,
        end_date: Some(end),
    };
    config
}

impl AutoCrawler {
    pub fn new(base_config: CrawlerConfig) -> Self {
        let state_path = base_config.output.root.join("_auto_state.json");
        let state = AutoState::load(&state_path);
        Self {
            base_config,
            state_path,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    /// Seed the quota budget from config; the persisted `used_today` wins.
    pub fn apply_quota_defaults(&self) {
        let mut state = self.state.lock().expect("auto state lock");
        state.youtube.daily_quota = self.base_config.autocrawl.youtube.daily_quota;
        state.youtube.reserve_quota = self.base_config.autocrawl.youtube.reserve_quota;
    }

    fn observer(&self) -> StoreObserver {
        let state = Arc::clone(&self.state);
        Box::new(move |document, candidate| {
            if let Ok(mut state) = state.lock() {
                state.record_stored(document, candidate, Utc::now());
            }
        })
    }

    fn accumulate(totals: &mut RoundTotals, stats: &PipelineStats) {
        totals.stored += stats.stored;
        totals.fetched += stats.fetched;
        totals.discovered += stats.discovered.values().sum::<usize>();
    }

    pub fn plan(&self, params: &PlanParams, now: DateTime<Utc>) -> RoundPlan {
        let mut state = self.state.lock().expect("auto state lock");
        plan_round(&self.base_config.keywords, &mut state, now, params)
    }

    pub async fn run_round(&self, params: &PlanParams) -> Result<RoundTotals> {
        // Auto rounds skip video comment pagination unless explicitly
        // requested; the quota belongs to discovery.
        if std::env::var("YOUTUBE_COMMENTS_PAGES").is_err() {
            std::env::set_var("YOUTUBE_COMMENTS_PAGES", "0");
        }

        let now = Utc::now();
        let plan = {
            let mut state = self.state.lock().expect("auto state lock");
            state.tick_cooldowns();
            plan_round(&self.base_config.keywords, &mut state, now, params)
        };
        info!(
            "auto plan: gdelt={:?} youtube={:?} yt_keywords={:?} forums={} max_fetch={:?}",
            plan.windows.get("gdelt"),
            plan.windows.get("youtube"),
            plan.youtube_keywords,
            plan.include_forums,
            plan.max_fetch
        );

        let mut totals = RoundTotals::default();

        for (start, end) in plan.windows.get("gdelt").cloned().unwrap_or_default() {
            let config = clone_with_time_window(&self.base_config, start, end);
            let mut pipeline = Pipeline::new(
                config,
                PipelineOptions {
                    include_sources: Some(HashSet::from(["gdelt".to_string()])),
                    max_fetch: plan.max_fetch,
                    ..Default::default()
                },
            )?
            .with_observer(self.observer());
            let stats = pipeline.run().await?;
            Self::accumulate(&mut totals, &stats);
            self.apply_cooldown(&start, "gdelt", &stats);
        }

        for (start, end) in plan.windows.get("youtube").cloned().unwrap_or_default() {
            let config = clone_with_time_window(&self.base_config, start, end);
            let mut pipeline = Pipeline::new(
                config,
                PipelineOptions {
                    include_sources: Some(HashSet::from(["youtube".to_string()])),
                    max_fetch: plan.max_fetch,
                    youtube_keywords: Some(plan.youtube_keywords.clone()),
                    ..Default::default()
                },
            )?
            .with_observer(self.observer());
            let stats = pipeline.run().await?;
            Self::accumulate(&mut totals, &stats);
            self.apply_cooldown(&start, "youtube", &stats);
        }

        for (start, end) in plan.windows.get("forums").cloned().unwrap_or_default() {
            let cursors = {
                let state = self.state.lock().expect("auto state lock");
                state
                    .forum_cursors
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect()
            };
            let mut pipeline = Pipeline::new(
                self.base_config.clone(),
                PipelineOptions {
                    include_sources: Some(HashSet::from(["forums".to_string()])),
                    max_fetch: plan.max_fetch,
                    forums_time_window: Some((start, end)),
                    forums_until_date: Some(start),
                    forums_board_cursors: cursors,
                    ..Default::default()
                },
            )?
            .with_observer(self.observer());
            let stats = pipeline.run().await?;
            Self::accumulate(&mut totals, &stats);
            {
                let mut state = self.state.lock().expect("auto state lock");
                for (board_url, last_page) in &pipeline.last_forums_pages {
                    state
                        .forum_cursors
                        .insert(board_url.clone(), last_page + 1);
                }
            }
            self.apply_cooldown(&start, "forums", &stats);
        }

        {
            let mut state = self.state.lock().expect("auto state lock");
            // Bounded rotation cursor; 120 months of lookback is far beyond
            // any real months_back.
            state.bucket_cursor = (state.bucket_cursor + 1) % 120;
            state.save(&self.state_path)?;
        }
        Ok(totals)
    }

    fn apply_cooldown(&self, window_start: &DateTime<Utc>, source: &str, stats: &PipelineStats) {
        let bucket = window_start.format("%Y-%m").to_string();
        let mut state = self.state.lock().expect("auto state lock");
        state.apply_cooldown(
            &bucket,
            source,
            stats.stored,
            stats.fetched,
            stats.duplicates_skipped,
            CooldownPolicy::default(),
        );
    }
}
