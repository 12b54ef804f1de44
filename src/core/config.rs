use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// CrawlerConfig — file-based run specification (crawler.json) with env-var
// fallback for the file location.
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "CORPUS_SCOUT_CONFIG";

/// Half-open `[start, end)` discovery interval; `end_date = None` means "now".
#[derive(Debug, Clone)]
pub struct TimeWindow {
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    pub file_name: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data_crawl"),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlLimits {
    pub max_candidates_per_source: usize,
    pub request_timeout_sec: u64,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_candidates_per_source: 500,
            request_timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum number of distinct keyword occurrences required to store a
    /// document. Zero disables the gate.
    pub min_keyword_hits: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { min_keyword_hits: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GdeltSourceConfig {
    pub enabled: bool,
    pub max_records_per_keyword: u32,
    pub chunk_days: i64,
    pub overlap_days: i64,
    pub pause_between_requests: f64,
    pub max_attempts: u32,
    pub rate_limit_backoff_sec: f64,
    pub max_concurrency: usize,
    pub max_days_back: Option<i64>,
}

impl Default for GdeltSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records_per_keyword: 100,
            chunk_days: 30,
            overlap_days: 0,
            pause_between_requests: 1.0,
            max_attempts: 3,
            rate_limit_backoff_sec: 5.0,
            max_concurrency: 4,
            max_days_back: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForumSiteConfig {
    pub enabled: bool,
    pub boards: Vec<String>,
    pub max_pages: u32,
    pub per_board_limit: usize,
    pub pause_between_requests: f64,
    pub obey_robots: bool,
}

impl Default for ForumSiteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            boards: Vec::new(),
            max_pages: 1,
            per_board_limit: 50,
            pause_between_requests: 0.5,
            obey_robots: true,
        }
    }
}

/// Fetcher pacing knobs. `per_host_pause_sec` supports suffix matching on
/// `.domain` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchTuning {
    pub pause_seconds: f64,
    pub obey_robots: bool,
    pub per_host_pause_sec: BTreeMap<String, f64>,
}

impl Default for FetchTuning {
    fn default() -> Self {
        Self {
            pause_seconds: 0.5,
            obey_robots: false,
            per_host_pause_sec: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaDefaults {
    pub daily_quota: i64,
    pub reserve_quota: i64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            daily_quota: 1000,
            reserve_quota: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundLimits {
    pub max_fetch: Option<usize>,
    pub max_gdelt_windows: usize,
    pub max_youtube_windows: usize,
    pub max_forums_windows: usize,
    pub max_youtube_keywords: usize,
}

impl Default for RoundLimits {
    fn default() -> Self {
        Self {
            max_fetch: None,
            max_gdelt_windows: 1,
            max_youtube_windows: 1,
            max_forums_windows: 1,
            max_youtube_keywords: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoCrawlConfig {
    pub months_back: usize,
    pub monthly_target_per_source: i64,
    pub include_forums: bool,
    pub youtube: QuotaDefaults,
    pub round: RoundLimits,
}

impl Default for AutoCrawlConfig {
    fn default() -> Self {
        Self {
            months_back: 12,
            monthly_target_per_source: 60,
            include_forums: true,
            youtube: QuotaDefaults::default(),
            round: RoundLimits::default(),
        }
    }
}

/// Fully resolved run specification.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub keywords: Vec<String>,
    /// Allowed languages, lower-cased two-letter codes.
    pub lang: Vec<String>,
    pub time_window: TimeWindow,
    pub output: OutputConfig,
    pub run_id: String,
    pub limits: CrawlLimits,
    pub quality: QualityConfig,
    pub gdelt: GdeltSourceConfig,
    pub forums: BTreeMap<String, ForumSiteConfig>,
    pub fetch: FetchTuning,
    pub autocrawl: AutoCrawlConfig,
}

// --- raw file shape -------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTimeWindow {
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCrawl {
    run_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSources {
    gdelt: Option<GdeltSourceConfig>,
    forums: BTreeMap<String, ForumSiteConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawParams {
    keywords: Vec<String>,
    keywords_file: Option<PathBuf>,
    lang: Option<Vec<String>>,
    time_window: RawTimeWindow,
    output: Option<OutputConfig>,
    crawl: RawCrawl,
    limits: Option<CrawlLimits>,
    quality: Option<QualityConfig>,
    sources: RawSources,
    fetch: Option<FetchTuning>,
    autocrawl: Option<AutoCrawlConfig>,
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    let cleaned = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }
    bail!("invalid ISO8601 value: {value}")
}

fn load_keyword_file(path: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn default_run_id() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn config_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from("crawler.json"));
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        if !env_path.trim().is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    candidates
}

/// Load the run specification from the first readable candidate path:
/// `--params` override → `./crawler.json` → `CORPUS_SCOUT_CONFIG`.
///
/// A missing file or a parse error falls back to defaults with a warning;
/// only a genuinely missing `time_window.start_date` is an error.
pub fn load_config(params_path: Option<&Path>) -> Result<CrawlerConfig> {
    let candidates = config_candidates(params_path);
    for path in &candidates {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => continue, // file not found at this path — try next
        };
        match serde_json::from_str::<RawParams>(&contents) {
            Ok(raw) => return build_config(raw),
            Err(e) => {
                warn!(
                    "config parse error at {}: {} — using defaults",
                    path.display(),
                    e
                );
                return build_config(RawParams::default());
            }
        }
    }
    warn!(
        "no config file found (tried {}) — using defaults",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    build_config(RawParams::default())
}

fn build_config(raw: RawParams) -> Result<CrawlerConfig> {
    let mut keywords: Vec<String> = raw
        .keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        if let Some(file) = &raw.keywords_file {
            keywords = load_keyword_file(file);
        }
    }

    let start_date = match &raw.time_window.start_date {
        Some(value) => parse_datetime(value)?,
        None => bail!("time_window.start_date must be set"),
    };
    let end_date = raw
        .time_window
        .end_date
        .as_deref()
        .map(parse_datetime)
        .transpose()?;

    let lang = raw
        .lang
        .unwrap_or_else(|| vec!["ko".to_string()])
        .into_iter()
        .map(|entry| entry.to_lowercase())
        .collect();

    Ok(CrawlerConfig {
        keywords,
        lang,
        time_window: TimeWindow {
            start_date,
            end_date,
        },
        output: raw.output.unwrap_or_default(),
        run_id: raw.crawl.run_id.unwrap_or_else(default_run_id),
        limits: raw.limits.unwrap_or_default(),
        quality: raw.quality.unwrap_or_default(),
        gdelt: raw.sources.gdelt.unwrap_or_default(),
        forums: raw.sources.forums,
        fetch: raw.fetch.unwrap_or_default(),
        autocrawl: raw.autocrawl.unwrap_or_default(),
    })
}
