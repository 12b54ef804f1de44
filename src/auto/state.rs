//! Persistent auto-crawler state: per-month stored counts, the video API
//! quota budget, cooldowns, and rotation cursors. Loaded at construction,
//! mutated per stored document and per sub-run, persisted at round end.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::core::types::{Candidate, Document};

/// `YYYY-MM` bucket key for a UTC instant.
pub fn month_bucket(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m").to_string()
}

fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value.replace("Z", "+00:00")) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

/// Daily unit budget for the video API. `used_today` resets whenever the
/// UTC day key moves past `period_start_utc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeQuota {
    pub daily_quota: i64,
    pub reserve_quota: i64,
    pub used_today: i64,
    pub period_start_utc: String,
}

impl Default for YouTubeQuota {
    fn default() -> Self {
        Self {
            daily_quota: 1000,
            reserve_quota: 200,
            used_today: 0,
            period_start_utc: String::new(),
        }
    }
}

impl YouTubeQuota {
    fn ensure_day(&mut self, today: &str) {
        if self.period_start_utc != today {
            self.period_start_utc = today.to_string();
            self.used_today = 0;
        }
    }

    pub fn available(&mut self, today: &str) -> i64 {
        self.ensure_day(today);
        (self.daily_quota - self.reserve_quota - self.used_today).max(0)
    }

    pub fn consume(&mut self, units: i64, today: &str) {
        self.ensure_day(today);
        self.used_today += units.max(0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoState {
    pub version: u32,
    /// counts["YYYY-MM"]["source"] = stored count
    pub counts: BTreeMap<String, BTreeMap<String, i64>>,
    /// cumulative per source
    pub stored_by_source: BTreeMap<String, i64>,
    pub youtube: YouTubeQuota,
    pub youtube_kw_cursor: usize,
    pub last_updated: String,
    /// cooldowns["YYYY-MM"]["source"] = rounds remaining
    pub cooldowns: BTreeMap<String, BTreeMap<String, u32>>,
    /// rotation cursor over ranked month buckets
    pub bucket_cursor: usize,
    /// board_url -> next listing page to start from
    pub forum_cursors: BTreeMap<String, u32>,
}

impl Default for AutoState {
    fn default() -> Self {
        Self {
            version: 1,
            counts: BTreeMap::new(),
            stored_by_source: BTreeMap::new(),
            youtube: YouTubeQuota::default(),
            youtube_kw_cursor: 0,
            last_updated: String::new(),
            cooldowns: BTreeMap::new(),
            bucket_cursor: 0,
            forum_cursors: BTreeMap::new(),
        }
    }
}

/// Cooldown decision thresholds for one sub-run outcome.
#[derive(Debug, Clone, Copy)]
pub struct CooldownPolicy {
    pub min_stored_threshold: usize,
    pub max_dup_ratio: f64,
    pub cooldown_rounds: u32,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            min_stored_threshold: 1,
            max_dup_ratio: 0.8,
            cooldown_rounds: 3,
        }
    }
}

impl AutoState {
    /// Corrupt or missing state files yield a fresh state; the crawl can
    /// always proceed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => state,
                Err(e) => {
                    warn!("auto state {} corrupt ({}); starting fresh", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("auto state {} unreadable ({}); starting fresh", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        self.last_updated = Utc::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Bucket attribution: document published_at, else the discovery hint,
    /// else now.
    pub fn record_stored(&mut self, document: &Document, candidate: &Candidate, now: DateTime<Utc>) {
        let dt = document
            .published_at
            .as_deref()
            .and_then(parse_iso)
            .or(candidate.hinted_timestamp)
            .unwrap_or(now);
        let bucket = month_bucket(dt);
        *self
            .counts
            .entry(bucket)
            .or_default()
            .entry(candidate.source.clone())
            .or_insert(0) += 1;
        *self
            .stored_by_source
            .entry(candidate.source.clone())
            .or_insert(0) += 1;
        self.last_updated = now.to_rfc3339();
    }

    /// Decrement every cooldown by one round, dropping expired entries.
    pub fn tick_cooldowns(&mut self) {
        let mut empty_buckets = Vec::new();
        for (bucket, by_source) in self.cooldowns.iter_mut() {
            by_source.retain(|_, remaining| {
                if *remaining <= 1 {
                    false
                } else {
                    *remaining -= 1;
                    true
                }
            });
            if by_source.is_empty() {
                empty_buckets.push(bucket.clone());
            }
        }
        for bucket in empty_buckets {
            self.cooldowns.remove(&bucket);
        }
    }

    /// Low yield or a high duplicate ratio puts a (bucket, source) pair on
    /// cooldown so the planner stops re-picking exhausted months.
    pub fn apply_cooldown(
        &mut self,
        bucket: &str,
        source: &str,
        stored: usize,
        fetched: usize,
        duplicates_skipped: usize,
        policy: CooldownPolicy,
    ) {
        let total = (fetched + duplicates_skipped).max(1);
        let dup_ratio = duplicates_skipped as f64 / total as f64;
        if stored < policy.min_stored_threshold || dup_ratio >= policy.max_dup_ratio {
            let entry = self
                .cooldowns
                .entry(bucket.to_string())
                .or_default()
                .entry(source.to_string())
                .or_insert(0);
            *entry = (*entry).max(policy.cooldown_rounds);
        }
    }

    pub fn in_cooldown(&self, bucket: &str, source: &str) -> bool {
        self.cooldowns
            .get(bucket)
            .and_then(|by_source| by_source.get(source))
            .map(|remaining| *remaining > 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CrawlMeta, DiscoveredVia, Quality};
    use chrono::TimeZone;

    fn document(published_at: Option<&str>) -> Document {
        Document {
            id: "id".to_string(),
            source: "gdelt".to_string(),
            url: "https://example.com/a/1".to_string(),
            snapshot_url: None,
            title: None,
            text: String::new(),
            lang: "kor".to_string(),
            published_at: published_at.map(str::to_string),
            authors: vec![],
            discovered_via: DiscoveredVia::News {
                keyword: "kw".to_string(),
                seendate: None,
                window: crate::core::types::DiscoveryWindow {
                    start: "s".to_string(),
                    end: "e".to_string(),
                },
            },
            quality: Quality {
                score: 0.5,
                reasons: vec![],
                keyword_coverage: 0.0,
                length: 0,
                keyword_hits: 1,
            },
            crawl: CrawlMeta {
                run_id: "r".to_string(),
                fetched_at: "t".to_string(),
                fetched_from: "live".to_string(),
            },
            extra: serde_json::Map::new(),
        }
    }

    fn candidate() -> Candidate {
        Candidate {
            url: "https://example.com/a/1".to_string(),
            source: "gdelt".to_string(),
            discovered_via: DiscoveredVia::News {
                keyword: "kw".to_string(),
                seendate: None,
                window: crate::core::types::DiscoveryWindow {
                    start: "s".to_string(),
                    end: "e".to_string(),
                },
            },
            hinted_timestamp: None,
            title: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn record_stored_buckets_by_published_at() {
        let mut state = AutoState::default();
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        state.record_stored(&document(Some("2025-10-15T12:00:00")), &candidate(), now);
        state.record_stored(&document(None), &candidate(), now);
        assert_eq!(state.counts["2025-10"]["gdelt"], 1);
        assert_eq!(state.counts["2025-12"]["gdelt"], 1);
        assert_eq!(state.stored_by_source["gdelt"], 2);
    }

    #[test]
    fn quota_resets_on_day_rollover() {
        let mut quota = YouTubeQuota::default();
        quota.consume(300, "2025-11-20");
        assert_eq!(quota.available("2025-11-20"), 500);
        // New UTC day: the budget is whole again.
        assert_eq!(quota.available("2025-11-21"), 800);
        assert_eq!(quota.used_today, 0);
    }

    #[test]
    fn quota_never_exceeds_reserve_line() {
        let mut quota = YouTubeQuota {
            daily_quota: 1000,
            reserve_quota: 200,
            ..Default::default()
        };
        let today = "2025-11-20";
        let mut consumed = 0;
        // Greedy plan loop: consume whatever is reported available.
        for _ in 0..5 {
            let available = quota.available(today);
            quota.consume(available, today);
            consumed += available;
        }
        assert!(consumed <= 1000 - 200);
        assert_eq!(quota.available(today), 0);
    }

    #[test]
    fn cooldown_tick_and_expiry() {
        let mut state = AutoState::default();
        state.apply_cooldown("2025-10", "gdelt", 0, 10, 0, CooldownPolicy::default());
        assert!(state.in_cooldown("2025-10", "gdelt"));
        state.tick_cooldowns();
        state.tick_cooldowns();
        assert!(state.in_cooldown("2025-10", "gdelt"));
        state.tick_cooldowns();
        assert!(!state.in_cooldown("2025-10", "gdelt"));
        assert!(state.cooldowns.is_empty());
    }

    #[test]
    fn cooldown_triggers_on_duplicate_ratio() {
        let mut state = AutoState::default();
        // 10 stored but 90% duplicates: still cooled down.
        state.apply_cooldown("2025-11", "forums", 10, 1, 9, CooldownPolicy::default());
        assert!(state.in_cooldown("2025-11", "forums"));

        let mut healthy = AutoState::default();
        healthy.apply_cooldown("2025-11", "forums", 10, 8, 2, CooldownPolicy::default());
        assert!(!healthy.in_cooldown("2025-11", "forums"));
    }

    #[test]
    fn load_tolerates_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_auto_state.json");
        std::fs::write(&path, "{{{{").unwrap();
        let state = AutoState::load(&path);
        assert_eq!(state.version, 1);
        assert!(state.counts.is_empty());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_auto_state.json");
        let mut state = AutoState::default();
        state.bucket_cursor = 7;
        state.forum_cursors.insert("https://b".to_string(), 4);
        state.save(&path).unwrap();

        let reloaded = AutoState::load(&path);
        assert_eq!(reloaded.bucket_cursor, 7);
        assert_eq!(reloaded.forum_cursors["https://b"], 4);
        assert!(!reloaded.last_updated.is_empty());
    }
}
