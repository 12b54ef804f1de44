pub mod article;
pub mod datetime;
pub mod youtube;

use chrono::SecondsFormat;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::core::types::{Candidate, CrawlMeta, Document, FetchResult, Quality};
use crate::core::urlnorm::{normalize_url, sha1_hex};
use crate::net;
use crate::sites::{self, CommentOptions, ForumComment};

pub use article::ExtractionResult;
pub use youtube::YoutubeCommentOptions;

/// Why a fetched candidate did not become a document.
#[derive(Debug)]
pub enum Rejection {
    ExtractFailed,
    Quality(Quality),
}

/// Extractor knobs. All of these are environment-driven in production
/// (`from_env`); tests construct them directly.
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub youtube_api_key: Option<String>,
    pub youtube_comments: YoutubeCommentOptions,
    pub forums_comments_enabled: bool,
    pub forums_comments_max: usize,
    pub user_agent: String,
    pub theqoo_cookies: Option<String>,
    pub theqoo_id: Option<String>,
    pub theqoo_pw: Option<String>,
    pub ppomppu_cookies: Option<String>,
    pub ppomppu_id: Option<String>,
    pub ppomppu_pw: Option<String>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            youtube_api_key: None,
            youtube_comments: YoutubeCommentOptions::default(),
            forums_comments_enabled: true,
            forums_comments_max: 200,
            user_agent: net::user_agent(),
            theqoo_cookies: None,
            theqoo_id: None,
            theqoo_pw: None,
            ppomppu_cookies: None,
            ppomppu_id: None,
            ppomppu_pw: None,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ExtractorOptions {
    pub fn from_env() -> Self {
        let order = env_opt("YOUTUBE_COMMENTS_ORDER")
            .map(|o| o.to_lowercase())
            .filter(|o| o == "relevance" || o == "time")
            .unwrap_or_else(|| "relevance".to_string());
        let text_format = env_opt("YOUTUBE_COMMENTS_TEXT_FORMAT")
            .filter(|f| f == "html" || f == "plainText")
            .unwrap_or_else(|| "html".to_string());

        let mut opts = Self {
            youtube_api_key: env_opt("YOUTUBE_API_KEY"),
            youtube_comments: YoutubeCommentOptions {
                pages: env_usize("YOUTUBE_COMMENTS_PAGES", 5),
                include_replies: env_bool("YOUTUBE_COMMENTS_INCLUDE_REPLIES", true),
                order,
                text_format,
            },
            forums_comments_enabled: env_bool("FORUMS_COMMENTS_ENABLED", true),
            forums_comments_max: env_usize("FORUMS_COMMENTS_MAX", 200),
            user_agent: net::user_agent(),
            theqoo_cookies: env_opt("THEQOO_COOKIES"),
            theqoo_id: env_opt("THEQOO_ID"),
            theqoo_pw: env_opt("THEQOO_PW"),
            ppomppu_cookies: env_opt("PPOMPPU_COOKIES"),
            ppomppu_id: env_opt("PPOMPPU_ID"),
            ppomppu_pw: env_opt("PPOMPPU_PW"),
        };

        // Fast mode trades comments for throughput.
        if env_bool("FAST_CRAWL", false) {
            opts.youtube_comments.pages = 0;
            opts.forums_comments_enabled = false;
        }
        opts
    }

    fn comment_options(&self) -> CommentOptions {
        CommentOptions {
            max_comments: self.forums_comments_max,
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(20),
            theqoo_cookies: self.theqoo_cookies.clone(),
            theqoo_id: self.theqoo_id.clone(),
            theqoo_pw: self.theqoo_pw.clone(),
            ppomppu_cookies: self.ppomppu_cookies.clone(),
            ppomppu_id: self.ppomppu_id.clone(),
            ppomppu_pw: self.ppomppu_pw.clone(),
        }
    }
}

pub struct Extractor {
    keywords_lower: Vec<String>,
    keyword_count: usize,
    allowed_languages: Vec<String>,
    min_keyword_hits: usize,
    opts: ExtractorOptions,
    client: reqwest::Client,
}

impl Extractor {
    pub fn new(
        keywords: &[String],
        allowed_languages: &[String],
        min_keyword_hits: usize,
        opts: ExtractorOptions,
    ) -> Self {
        let keywords_lower: Vec<String> = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.to_lowercase())
            .collect();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            keyword_count: keywords_lower.len(),
            keywords_lower,
            allowed_languages: allowed_languages.iter().map(|l| l.to_lowercase()).collect(),
            min_keyword_hits,
            opts,
            client,
        }
    }

    /// Turn one fetched candidate into a storable document, or a typed
    /// rejection. Mutates `candidate.extra` with comment/statistics metadata
    /// gathered during augmentation.
    pub async fn build_document(
        &self,
        candidate: &mut Candidate,
        fetch_result: &FetchResult,
        run_id: &str,
    ) -> Result<Document, Rejection> {
        let mut extraction = match article::extract_article(&fetch_result.html, &candidate.url) {
            Some(extraction) => extraction,
            // Comments-only threads and API-described videos still make
            // documents; everything else is an extraction failure.
            None if candidate.source == "youtube" => ExtractionResult {
                title: candidate.title.clone(),
                ..Default::default()
            },
            None if candidate.discovered_via.is_forum() => ExtractionResult {
                title: article::fallback_title_from_html(&fetch_result.html)
                    .or_else(|| candidate.title.clone()),
                ..Default::default()
            },
            None => return Err(Rejection::ExtractFailed),
        };

        if candidate.source == "youtube" {
            extraction = youtube::augment_video(
                &self.client,
                self.opts.youtube_api_key.as_deref(),
                &self.opts.youtube_comments,
                candidate,
                extraction,
            )
            .await;
        }

        if self.opts.forums_comments_enabled && candidate.discovered_via.is_forum() {
            extraction = self
                .augment_forum(candidate, extraction, &fetch_result.html)
                .await;
        }

        let lang = detect_lang(&extraction.text);
        let quality = self.build_quality(&extraction.text, &lang);
        if quality.keyword_hits < self.min_keyword_hits {
            return Err(Rejection::Quality(quality));
        }

        let doc_id = sha1_hex(&normalize_url(&candidate.url));

        let mut published_at = extraction
            .published_at
            .as_deref()
            .and_then(datetime::normalize_published_at);
        if published_at.is_none() {
            published_at =
                self.infer_forum_published_at(candidate, &extraction.text, &fetch_result.html);
        }
        if published_at.is_none() {
            published_at = candidate.hinted_timestamp.map(|ts| ts.to_rfc3339());
        }

        let derived_title = extraction
            .title
            .clone()
            .or_else(|| article::fallback_title_from_html(&fetch_result.html));

        Ok(Document {
            id: doc_id,
            source: candidate.source.clone(),
            url: candidate.url.clone(),
            snapshot_url: fetch_result.snapshot_url.clone(),
            title: derived_title.or_else(|| candidate.title.clone()),
            text: extraction.text,
            lang,
            published_at,
            authors: extraction.authors,
            discovered_via: candidate.discovered_via.clone(),
            quality,
            crawl: CrawlMeta {
                run_id: run_id.to_string(),
                fetched_at: fetch_result
                    .fetched_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                fetched_from: fetch_result.fetched_from.clone(),
            },
            extra: candidate.extra.clone(),
        })
    }

    async fn augment_forum(
        &self,
        candidate: &mut Candidate,
        extraction: ExtractionResult,
        html: &str,
    ) -> ExtractionResult {
        if html.is_empty() {
            return extraction;
        }
        let site = candidate.source.to_lowercase();
        let comment_opts = self.opts.comment_options();

        let mut comments = sites::fetch_comments(&site, candidate, html, &comment_opts).await;
        // The DC-style endpoint is authoritative; for other sites a generic
        // selector sweep over the thread page is a usable fallback.
        if comments.is_empty() && site != "dcinside" {
            comments = sites::generic::parse_comments(html, comment_opts.max_comments);
        }
        if comments.is_empty() {
            return extraction;
        }
        if self.opts.forums_comments_max > 0 && comments.len() > self.opts.forums_comments_max {
            comments.truncate(self.opts.forums_comments_max);
        }

        let comments_blob = comments
            .iter()
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let mut parts = Vec::new();
        if !extraction.text.is_empty() {
            parts.push(extraction.text.clone());
        }
        if !comments_blob.trim().is_empty() {
            parts.push(comments_blob);
        }
        let text_combined = parts.join("\n\n");

        patch_forum_comments(candidate, &comments);

        ExtractionResult {
            text: if text_combined.is_empty() {
                extraction.text
            } else {
                text_combined
            },
            title: extraction.title,
            authors: extraction.authors,
            published_at: extraction.published_at,
        }
    }

    /// Forum pages rarely carry machine-readable publication metadata, so
    /// scan everything we have. Tokens that carry a time beat date-only
    /// tokens; within a group the latest wins. DC-style pages short-circuit
    /// on their explicit metadata selectors.
    fn infer_forum_published_at(
        &self,
        candidate: &Candidate,
        text: &str,
        html: &str,
    ) -> Option<String> {
        if !candidate.discovered_via.is_forum() {
            return None;
        }

        let mut found: Vec<(chrono::NaiveDateTime, bool)> = Vec::new();

        if candidate.source.eq_ignore_ascii_case("dcinside") && !html.is_empty() {
            if let Some(first) = dcinside_metadata_timestamp(html) {
                return Some(first.format("%Y-%m-%dT%H:%M:%S").to_string());
            }
        }

        for payload in [text, html] {
            if !payload.is_empty() {
                found.extend(datetime::scan_datetimes(payload));
            }
        }

        if let Some(comments) = candidate
            .extra
            .get("forum")
            .and_then(|f| f.get("comments"))
            .and_then(Value::as_array)
        {
            for comment in comments {
                let ts = comment
                    .get("publishedAt")
                    .or_else(|| comment.get("published_at"))
                    .and_then(Value::as_str);
                let Some(ts) = ts else { continue };
                if let Some(dt) = datetime::parse_datetime_loose(ts) {
                    found.push((dt, ts.contains(':')));
                }
            }
        }

        if found.is_empty() {
            return None;
        }
        let chosen = found
            .iter()
            .filter(|(_, has_time)| *has_time)
            .map(|(dt, _)| *dt)
            .max()
            .or_else(|| found.iter().map(|(dt, _)| *dt).max())?;
        Some(chosen.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    fn build_quality(&self, text: &str, lang: &str) -> Quality {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        if lang_allowed(lang, &self.allowed_languages) {
            score += 0.3;
        } else {
            reasons.push(format!("lang={lang}"));
        }

        let text_lower = text.to_lowercase();
        let keyword_hits = self
            .keywords_lower
            .iter()
            .filter(|kw| !kw.is_empty() && text_lower.contains(kw.as_str()))
            .count();
        let coverage = if self.keyword_count > 0 {
            keyword_hits as f64 / self.keyword_count as f64
        } else {
            0.0
        };
        if keyword_hits >= self.min_keyword_hits {
            score += 0.2;
        } else {
            reasons.push("keyword_hits".to_string());
        }

        Quality {
            score: round3(score),
            reasons,
            keyword_coverage: round3(coverage),
            length: text.chars().count(),
            keyword_hits,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn dcinside_metadata_timestamp(html: &str) -> Option<chrono::NaiveDateTime> {
    let doc = Html::parse_document(html);
    let sel =
        Selector::parse("span.gall_date, td.gall_date, div.gall_date, span.date, span.write_time")
            .ok()?;
    for el in doc.select(&sel) {
        let raw = el
            .value()
            .attr("title")
            .map(str::to_string)
            .unwrap_or_else(|| el.text().collect::<Vec<_>>().join(" "));
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if let Some(dt) = datetime::parse_datetime_loose(raw) {
            return Some(dt);
        }
    }
    None
}

fn patch_forum_comments(candidate: &mut Candidate, comments: &[ForumComment]) {
    let serialized = match serde_json::to_value(comments) {
        Ok(value) => value,
        Err(e) => {
            debug!("comment serialization failed: {}", e);
            return;
        }
    };
    let forum = candidate
        .extra
        .entry("forum".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(map) = forum.as_object_mut() {
        map.insert("comments".to_string(), serialized);
    }
}

/// Detected language as an ISO 639-3 code, or `und`.
pub fn detect_lang(text: &str) -> String {
    if text.is_empty() {
        return "und".to_string();
    }
    match whatlang::detect(text) {
        Some(info) => info.lang().code().to_string(),
        None => "und".to_string(),
    }
}

/// The allow-list carries two-letter codes (they drive discovery query
/// clauses); detection yields three-letter codes. Accept either spelling.
fn lang_allowed(detected: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|lang| {
        if lang == detected {
            return true;
        }
        let three_letter = match lang.as_str() {
            "ko" => "kor",
            "en" => "eng",
            "ja" => "jpn",
            "zh" => "cmn",
            "es" => "spa",
            "fr" => "fra",
            "de" => "deu",
            "it" => "ita",
            "pt" => "por",
            "ru" => "rus",
            _ => return false,
        };
        three_letter == detected
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DiscoveredVia;
    use chrono::Utc;

    fn forum_candidate(url: &str, title: Option<&str>) -> Candidate {
        Candidate {
            url: url.to_string(),
            source: "theqoo".to_string(),
            discovered_via: DiscoveredVia::Forum {
                site: "theqoo".to_string(),
                board: "https://theqoo.net/square".to_string(),
                page: 1,
            },
            hinted_timestamp: None,
            title: title.map(str::to_string),
            extra: serde_json::Map::new(),
        }
    }

    fn fetch_result(html: &str) -> FetchResult {
        FetchResult {
            url: "https://theqoo.net/square/1".to_string(),
            fetched_from: "live".to_string(),
            status_code: 200,
            html: html.to_string(),
            snapshot_url: Some("https://theqoo.net/square/1".to_string()),
            encoding: Some("utf-8".to_string()),
            fetched_at: Utc::now(),
        }
    }

    fn quiet_extractor(min_keyword_hits: usize, keywords: &[&str]) -> Extractor {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        Extractor::new(
            &keywords,
            &["ko".to_string()],
            min_keyword_hits,
            ExtractorOptions {
                forums_comments_enabled: false,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn forum_fallback_title_comes_from_og_tag() {
        let html = r#"<html><head><meta property="og:title" content="정상 제목"></head><body></body></html>"#;
        let extractor = quiet_extractor(0, &[]);
        let mut candidate = forum_candidate("https://theqoo.net/square/1", Some("깨진 제목"));
        let document = extractor
            .build_document(&mut candidate, &fetch_result(html), "run-1")
            .await
            .expect("document");
        assert_eq!(document.title.as_deref(), Some("정상 제목"));
        assert_eq!(document.lang, "und");
    }

    #[tokio::test]
    async fn non_forum_empty_extraction_is_rejected() {
        let extractor = quiet_extractor(0, &[]);
        let mut candidate = forum_candidate("https://news.example.com/a", None);
        candidate.source = "gdelt".to_string();
        candidate.discovered_via = DiscoveredVia::News {
            keyword: "전기차".to_string(),
            seendate: None,
            window: crate::core::types::DiscoveryWindow {
                start: "2025-01-01T00:00:00+00:00".to_string(),
                end: "2025-02-01T00:00:00+00:00".to_string(),
            },
        };
        let outcome = extractor
            .build_document(&mut candidate, &fetch_result("<html></html>"), "run-1")
            .await;
        assert!(matches!(outcome, Err(Rejection::ExtractFailed)));
    }

    #[test]
    fn quality_gate_is_monotone_in_threshold() {
        let text = "전기차 보조금이 줄었다는 소식";
        for threshold in 0..4 {
            let extractor = quiet_extractor(threshold, &["전기차", "보조금", "충전"]);
            let quality = extractor.build_quality(text, "kor");
            let accepted = quality.keyword_hits >= threshold;
            let stricter = quiet_extractor(threshold + 1, &["전기차", "보조금", "충전"]);
            let stricter_quality = stricter.build_quality(text, "kor");
            let stricter_accepted = stricter_quality.keyword_hits >= threshold + 1;
            // Raising the threshold can only reject more, never less.
            assert!(!(stricter_accepted && !accepted));
        }
    }

    #[test]
    fn quality_counts_distinct_keywords_case_insensitive() {
        let extractor = quiet_extractor(1, &["EV", "배터리"]);
        let quality = extractor.build_quality("국내 ev 배터리 업체 동향", "kor");
        assert_eq!(quality.keyword_hits, 2);
        assert_eq!(quality.keyword_coverage, 1.0);
        assert_eq!(quality.score, 0.5);
        assert!(quality.reasons.is_empty());
    }

    #[test]
    fn quality_flags_disallowed_language() {
        let extractor = quiet_extractor(0, &[]);
        let quality = extractor.build_quality("plain english text", "eng");
        assert_eq!(quality.score, 0.2);
        assert_eq!(quality.reasons, vec!["lang=eng".to_string()]);
    }

    #[test]
    fn forum_published_at_prefers_time_bearing_tokens() {
        let extractor = quiet_extractor(0, &[]);
        let candidate = forum_candidate("https://theqoo.net/square/1", None);
        let inferred = extractor
            .infer_forum_published_at(
                &candidate,
                "본문 작성 2025.11.22 13:17:43 그리고 수정일 25/11/24",
                "",
            )
            .unwrap();
        assert!(inferred.starts_with("2025-11-22T13:17:43"));
    }

    #[test]
    fn forum_published_at_uses_comment_timestamps() {
        let extractor = quiet_extractor(0, &[]);
        let mut candidate = forum_candidate("https://theqoo.net/square/1", None);
        candidate.extra.insert(
            "forum".to_string(),
            serde_json::json!({
                "site": "theqoo",
                "comments": [
                    {"author": "a", "text": "t", "publishedAt": "2025-11-20 10:00:00"},
                    {"author": "b", "text": "t2", "publishedAt": "2025-11-21 09:30:00"}
                ]
            }),
        );
        let inferred = extractor
            .infer_forum_published_at(&candidate, "", "")
            .unwrap();
        assert!(inferred.starts_with("2025-11-21T09:30:00"));
    }

    #[test]
    fn dcinside_metadata_selector_short_circuits() {
        let html = r#"<span class="gall_date" title="2025-11-20 09:15:00">11.20</span>"#;
        let dt = dcinside_metadata_timestamp(html).unwrap();
        assert_eq!(dt.to_string(), "2025-11-20 09:15:00");
    }

    #[test]
    fn lang_mapping_accepts_both_spellings() {
        assert!(lang_allowed("kor", &["ko".to_string()]));
        assert!(lang_allowed("kor", &["kor".to_string()]));
        assert!(!lang_allowed("eng", &["ko".to_string()]));
        assert_eq!(detect_lang(""), "und");
    }
}
