use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open `[start, end)` UTC interval recorded on news discoveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryWindow {
    pub start: String,
    pub end: String,
}

/// Provenance of a candidate URL: which source family found it and with what
/// query context. Serialized with a `type` tag so downstream consumers can
/// route records without knowing every source key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoveredVia {
    News {
        keyword: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seendate: Option<String>,
        window: DiscoveryWindow,
    },
    Video {
        keyword: String,
    },
    Forum {
        site: String,
        board: String,
        page: u32,
    },
}

impl DiscoveredVia {
    pub fn is_forum(&self) -> bool {
        matches!(self, DiscoveredVia::Forum { .. })
    }

    pub fn forum_board(&self) -> Option<&str> {
        match self {
            DiscoveredVia::Forum { board, .. } => Some(board),
            _ => None,
        }
    }
}

/// A discovery hint: a resource URL plus everything we learned about it
/// before fetching. Two candidates with the same normalized URL are the same
/// candidate; the pipeline merges them at discovery time.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub url: String,
    pub source: String,
    pub discovered_via: DiscoveredVia,
    /// Fallback `published_at` when extraction cannot infer one.
    pub hinted_timestamp: Option<DateTime<Utc>>,
    pub title: Option<String>,
    /// Open-ended, source-specific attribute bag carried into the Document.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Candidate {
    pub fn robots_override(&self) -> bool {
        self.extra
            .get("robots_override")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outcome of a successful live fetch, consumed once by the extractor.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub fetched_from: String,
    pub status_code: u16,
    pub html: String,
    pub snapshot_url: Option<String>,
    pub encoding: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Quality-gate verdict stored on every document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    pub score: f64,
    pub reasons: Vec<String>,
    pub keyword_coverage: f64,
    pub length: usize,
    pub keyword_hits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMeta {
    pub run_id: String,
    pub fetched_at: String,
    pub fetched_from: String,
}

/// The canonical stored record. One JSON object per line in the per-source
/// append-only logs; `id` is the SHA-1 of the normalized URL, so a document
/// exists in a log iff its id and normalized url are in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub url: String,
    pub snapshot_url: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub lang: String,
    pub published_at: Option<String>,
    pub authors: Vec<String>,
    pub discovered_via: DiscoveredVia,
    pub quality: Quality,
    pub crawl: CrawlMeta,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Counters for one pipeline run, printed as JSON by the CLI.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineStats {
    pub discovered: BTreeMap<String, usize>,
    pub fetched: usize,
    pub stored: usize,
    pub duplicates_skipped: usize,
    pub failed_fetch: usize,
    pub quality_rejected: usize,
    pub index_duplicates: usize,
    pub extraction_failed: usize,
}
