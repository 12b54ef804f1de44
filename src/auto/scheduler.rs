//! Round planner: derive monthly deficits, rank buckets by deficit with a
//! recency bias, rotate across rounds, and allocate quota-priced keywords to
//! the video source. Deterministic given a frozen `now` and state.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::collections::BTreeMap;

use crate::auto::state::AutoState;

pub const PLANNED_SOURCES: [&str; 3] = ["gdelt", "youtube", "forums"];

/// Estimated API cost per keyword: search.list (100 units) + videos.list (1).
const UNITS_PER_KEYWORD: i64 = 101;

#[derive(Debug, Clone)]
pub struct RoundPlan {
    /// Half-open month windows per source, clamped to now.
    pub windows: BTreeMap<String, Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    /// Keyword subset for the video source this round, quota-bounded.
    pub youtube_keywords: Vec<String>,
    pub include_forums: bool,
    pub max_fetch: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PlanParams {
    pub months_back: usize,
    pub monthly_target_per_source: i64,
    pub round_max_fetch: Option<usize>,
    pub max_gdelt_windows: usize,
    pub max_youtube_windows: usize,
    pub max_forums_windows: usize,
    pub max_youtube_keywords: usize,
    pub include_forums: bool,
}

fn month_start_utc(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn next_month(dt: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    month_start_utc(year, month)
}

/// The last `n` `YYYY-MM` bucket keys, most recent first.
pub fn recent_month_buckets(n: usize, now: DateTime<Utc>) -> Vec<String> {
    let mut buckets = Vec::with_capacity(n);
    let mut cursor = month_start_utc(now.year(), now.month());
    for _ in 0..n {
        buckets.push(cursor.format("%Y-%m").to_string());
        let (year, month) = if cursor.month() == 1 {
            (cursor.year() - 1, 12)
        } else {
            (cursor.year(), cursor.month() - 1)
        };
        cursor = month_start_utc(year, month);
    }
    buckets
}

fn bucket_window(bucket: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month) = bucket.split_once('-')?;
    let start = month_start_utc(year.parse().ok()?, month.parse().ok()?);
    let end = next_month(start).min(now);
    (end > start).then_some((start, end))
}

/// Deficits per recent bucket and source against the monthly target.
pub fn compute_deficits(
    state: &AutoState,
    now: DateTime<Utc>,
    months_back: usize,
    monthly_target_per_source: i64,
) -> (Vec<String>, BTreeMap<String, BTreeMap<String, i64>>) {
    let recent_buckets = recent_month_buckets(months_back, now);
    let mut deficits = BTreeMap::new();
    for bucket in &recent_buckets {
        let by_source = state.counts.get(bucket);
        let mut d = BTreeMap::new();
        for source in PLANNED_SOURCES {
            let current = by_source
                .and_then(|counts| counts.get(source))
                .copied()
                .unwrap_or(0);
            d.insert(
                source.to_string(),
                (monthly_target_per_source - current).max(0),
            );
        }
        deficits.insert(bucket.clone(), d);
    }
    (recent_buckets, deficits)
}

pub fn plan_round(
    keywords: &[String],
    state: &mut AutoState,
    now: DateTime<Utc>,
    params: &PlanParams,
) -> RoundPlan {
    let (recent_buckets, deficits) = compute_deficits(
        state,
        now,
        params.months_back,
        params.monthly_target_per_source,
    );

    // Rank buckets by total deficit with a slight recency bias (3% decay per
    // month back), then rotate by the bucket cursor so successive rounds do
    // not hammer the same month.
    let score = |bucket: &String| -> f64 {
        let age_index = recent_buckets
            .iter()
            .position(|b| b == bucket)
            .unwrap_or(0);
        let total_deficit: i64 = deficits
            .get(bucket)
            .map(|d| d.values().sum())
            .unwrap_or(0);
        total_deficit as f64 * (1.0 - age_index as f64 * 0.03)
    };
    let mut ranked = recent_buckets.clone();
    ranked.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let cursor = if ranked.is_empty() {
        0
    } else {
        state.bucket_cursor % ranked.len()
    };
    ranked.rotate_left(cursor);

    let mut windows: BTreeMap<String, Vec<(DateTime<Utc>, DateTime<Utc>)>> = BTreeMap::new();
    // How many sources already claimed a bucket this round, to prevent every
    // source dogpiling the same month.
    let mut bucket_use: BTreeMap<String, usize> = BTreeMap::new();
    let source_offsets: BTreeMap<&str, usize> =
        [("gdelt", 0), ("youtube", 1), ("forums", 2)].into();

    for (source, max_windows, include) in [
        ("gdelt", params.max_gdelt_windows, true),
        ("youtube", params.max_youtube_windows, true),
        ("forums", params.max_forums_windows, params.include_forums),
    ] {
        let chosen = pick_windows_for_source(
            source,
            max_windows,
            include,
            &ranked,
            cursor,
            *source_offsets.get(source).unwrap_or(&0),
            &deficits,
            state,
            now,
            &mut bucket_use,
        );
        windows.insert(source.to_string(), chosen);
    }

    // Video keyword subset under quota: round-robin from the cursor,
    // consumed upfront so parallel plans in a day cannot overdraw.
    let all_keywords: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).collect();
    let today = now.format("%Y-%m-%d").to_string();
    let youtube_keywords = if all_keywords.is_empty() {
        Vec::new()
    } else {
        let affordable = (state.youtube.available(&today) / UNITS_PER_KEYWORD).max(0) as usize;
        let limit = params.max_youtube_keywords.min(affordable);
        if limit == 0 {
            Vec::new()
        } else {
            let start_idx = state.youtube_kw_cursor % all_keywords.len();
            let chosen: Vec<String> = all_keywords
                .iter()
                .cycle()
                .skip(start_idx)
                .take(limit)
                .map(|k| (*k).clone())
                .collect();
            state.youtube_kw_cursor = (start_idx + chosen.len()) % all_keywords.len();
            state
                .youtube
                .consume(chosen.len() as i64 * UNITS_PER_KEYWORD, &today);
            chosen
        }
    };

    RoundPlan {
        windows,
        youtube_keywords,
        include_forums: params.include_forums,
        max_fetch: params.round_max_fetch,
    }
}

#[allow(clippy::too_many_arguments)]
fn pick_windows_for_source(
    source: &str,
    max_windows: usize,
    include: bool,
    ranked: &[String],
    cursor: usize,
    offset: usize,
    deficits: &BTreeMap<String, BTreeMap<String, i64>>,
    state: &AutoState,
    now: DateTime<Utc>,
    bucket_use: &mut BTreeMap<String, usize>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if !include || max_windows == 0 || ranked.is_empty() {
        return Vec::new();
    }
    let start_idx = (cursor + offset) % ranked.len();
    let mut rotated = ranked.to_vec();
    let rotated_len = rotated.len().max(1);
    rotated.rotate_left(start_idx % rotated_len);

    let eligible = |bucket: &String| -> bool {
        deficits
            .get(bucket)
            .and_then(|d| d.get(source))
            .map(|deficit| *deficit > 0)
            .unwrap_or(false)
            && !state.in_cooldown(bucket, source)
    };

    let mut chosen = Vec::new();
    // First pass: avoid sharing a bucket across sources this round.
    for bucket in &rotated {
        if chosen.len() >= max_windows {
            return chosen;
        }
        if !eligible(bucket) || bucket_use.get(bucket).copied().unwrap_or(0) >= 1 {
            continue;
        }
        if let Some(window) = bucket_window(bucket, now) {
            chosen.push(window);
            *bucket_use.entry(bucket.clone()).or_insert(0) += 1;
        }
    }
    // Second pass: allow reuse to fill remaining slack.
    for bucket in &rotated {
        if chosen.len() >= max_windows {
            break;
        }
        if !eligible(bucket) {
            continue;
        }
        if let Some(window) = bucket_window(bucket, now) {
            if chosen.contains(&window) {
                continue;
            }
            chosen.push(window);
            *bucket_use.entry(bucket.clone()).or_insert(0) += 1;
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_gdelt_windows: usize) -> PlanParams {
        PlanParams {
            months_back: 3,
            monthly_target_per_source: 10,
            round_max_fetch: None,
            max_gdelt_windows,
            max_youtube_windows: 1,
            max_forums_windows: 1,
            max_youtube_keywords: 2,
            include_forums: true,
        }
    }

    fn frozen_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn recent_buckets_most_recent_first() {
        let buckets = recent_month_buckets(3, frozen_now());
        assert_eq!(buckets, vec!["2025-12", "2025-11", "2025-10"]);
    }

    #[test]
    fn deficits_subtract_stored_counts() {
        let mut state = AutoState::default();
        state
            .counts
            .entry("2025-11".to_string())
            .or_default()
            .insert("gdelt".to_string(), 9);
        let (_, deficits) = compute_deficits(&state, frozen_now(), 3, 10);
        assert_eq!(deficits["2025-11"]["gdelt"], 1);
        assert_eq!(deficits["2025-12"]["gdelt"], 10);
        assert_eq!(deficits["2025-11"]["youtube"], 10);
    }

    #[test]
    fn plan_prefers_higher_deficit_bucket_and_spreads_sources() {
        let mut state = AutoState::default();
        // 2025-10: gdelt has 3 stored (deficit 7); 2025-11: gdelt has 9
        // (deficit 1); 2025-12 untouched (deficit 10 but youngest by
        // construction below).
        state
            .counts
            .entry("2025-10".to_string())
            .or_default()
            .insert("gdelt".to_string(), 3);
        state
            .counts
            .entry("2025-11".to_string())
            .or_default()
            .insert("gdelt".to_string(), 9);
        // Saturate 2025-12 so only October and November compete.
        for source in PLANNED_SOURCES {
            state
                .counts
                .entry("2025-12".to_string())
                .or_default()
                .insert(source.to_string(), 10);
        }

        let plan = plan_round(
            &["전기차".to_string()],
            &mut state,
            frozen_now(),
            &params(2),
        );
        let gdelt = &plan.windows["gdelt"];
        assert_eq!(gdelt.len(), 2);
        // Higher-deficit October outranks November despite being older.
        assert_eq!(gdelt[0].0, Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(gdelt[1].0, Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap());
        // Pass one keeps other sources off October while gdelt holds it.
        let youtube = &plan.windows["youtube"];
        assert_eq!(youtube.len(), 1);
        assert_ne!(youtube[0].0, gdelt[0].0);
    }

    #[test]
    fn plan_skips_cooled_down_buckets() {
        let mut state = AutoState::default();
        state
            .cooldowns
            .entry("2025-12".to_string())
            .or_default()
            .insert("gdelt".to_string(), 2);
        let plan = plan_round(&[], &mut state, frozen_now(), &params(3));
        assert!(!plan.windows["gdelt"]
            .iter()
            .any(|(start, _)| start.month() == 12));
    }

    #[test]
    fn plan_is_deterministic_under_frozen_clock() {
        let make_state = || {
            let mut state = AutoState::default();
            state
                .counts
                .entry("2025-11".to_string())
                .or_default()
                .insert("gdelt".to_string(), 4);
            state.bucket_cursor = 1;
            state
        };
        let keywords = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let plan1 = plan_round(&keywords, &mut make_state(), frozen_now(), &params(2));
        let plan2 = plan_round(&keywords, &mut make_state(), frozen_now(), &params(2));
        assert_eq!(plan1.windows, plan2.windows);
        assert_eq!(plan1.youtube_keywords, plan2.youtube_keywords);
    }

    #[test]
    fn keyword_subset_respects_quota_and_cursor() {
        let keywords: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut state = AutoState::default();
        state.youtube_kw_cursor = 2;
        let plan = plan_round(&keywords, &mut state, frozen_now(), &params(1));
        // Cursor 2 starts at "c", wraps to "a".
        assert_eq!(plan.youtube_keywords, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(state.youtube_kw_cursor, 1);
        assert_eq!(state.youtube.used_today, 202);

        // Exhausted quota yields no keywords.
        let mut broke = AutoState::default();
        broke.youtube.daily_quota = 250;
        broke.youtube.reserve_quota = 200;
        let plan = plan_round(&keywords, &mut broke, frozen_now(), &params(1));
        assert!(plan.youtube_keywords.is_empty());
    }

    #[test]
    fn current_month_window_is_clamped_to_now() {
        let now = frozen_now();
        let (start, end) = bucket_window("2025-12", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, now);
    }
}
