//! Video augmentation: compose document text from title, description, and
//! paginated top-level comments (optionally replies), and record comment
//! metadata under `extra.youtube.comments`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::article::ExtractionResult;
use crate::core::types::Candidate;

const COMMENT_THREADS_URL: &str = "https://www.googleapis.com/youtube/v3/commentThreads";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

#[derive(Debug, Clone)]
pub struct YoutubeCommentOptions {
    pub pages: usize,
    pub include_replies: bool,
    pub order: String,
    pub text_format: String,
}

impl Default for YoutubeCommentOptions {
    fn default() -> Self {
        Self {
            pages: 5,
            include_replies: true,
            order: "relevance".to_string(),
            text_format: "html".to_string(),
        }
    }
}

fn strip_html(s: &str) -> String {
    TAG_RE
        .replace_all(s, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn video_id_of(candidate: &Candidate) -> Option<String> {
    if let Some(id) = candidate
        .extra
        .get("youtube")
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }
    let parsed = Url::parse(&candidate.url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())
}

fn comment_snippet_texts(
    snippet: &Value,
    text_format: &str,
) -> Option<(String, Value)> {
    let text = if text_format == "html" {
        strip_html(snippet.get("textDisplay").and_then(Value::as_str).unwrap_or(""))
    } else {
        snippet
            .get("textOriginal")
            .or_else(|| snippet.get("textDisplay"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string()
    };
    if text.is_empty() {
        return None;
    }
    let meta = serde_json::json!({
        "author": snippet.get("authorDisplayName").cloned().unwrap_or(Value::Null),
        "likeCount": snippet.get("likeCount").cloned().unwrap_or(Value::Null),
        "publishedAt": snippet.get("publishedAt").cloned().unwrap_or(Value::Null),
    });
    Some((text, meta))
}

async fn fetch_comment_pages(
    client: &reqwest::Client,
    api_key: &str,
    video_id: &str,
    opts: &YoutubeCommentOptions,
) -> (Vec<String>, Vec<Value>) {
    let mut texts = Vec::new();
    let mut meta = Vec::new();
    let part = if opts.include_replies {
        "snippet,replies"
    } else {
        "snippet"
    };

    let mut page_token: Option<String> = None;
    let mut pages = 0usize;
    loop {
        let mut params = vec![
            ("key".to_string(), api_key.to_string()),
            ("part".to_string(), part.to_string()),
            ("videoId".to_string(), video_id.to_string()),
            ("maxResults".to_string(), "100".to_string()),
            ("order".to_string(), opts.order.clone()),
            ("textFormat".to_string(), opts.text_format.clone()),
        ];
        if let Some(token) = &page_token {
            params.push(("pageToken".to_string(), token.clone()));
        }

        let data: Value = match client.get(COMMENT_THREADS_URL).query(&params).send().await {
            Ok(resp) if resp.status().as_u16() < 400 => match resp.json().await {
                Ok(data) => data,
                Err(e) => {
                    debug!("youtube comments response not JSON for video={}: {}", video_id, e);
                    break;
                }
            },
            Ok(_) | Err(_) => break,
        };

        for item in data
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            if let Some(top) = item.pointer("/snippet/topLevelComment/snippet") {
                if let Some((text, m)) = comment_snippet_texts(top, &opts.text_format) {
                    texts.push(text);
                    meta.push(m);
                }
            }
            if opts.include_replies {
                for reply in item
                    .pointer("/replies/comments")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                {
                    if let Some(snippet) = reply.get("snippet") {
                        if let Some((text, m)) = comment_snippet_texts(snippet, &opts.text_format)
                        {
                            texts.push(text);
                            meta.push(m);
                        }
                    }
                }
            }
        }

        pages += 1;
        if pages >= opts.pages {
            break;
        }
        page_token = data
            .get("nextPageToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        if page_token.is_none() {
            break;
        }
    }
    (texts, meta)
}

/// Compose video document text as `title \n\n description \n\n base_text \n\n
/// joined_comments` and patch comment/statistics metadata into
/// `candidate.extra.youtube`.
pub async fn augment_video(
    client: &reqwest::Client,
    api_key: Option<&str>,
    opts: &YoutubeCommentOptions,
    candidate: &mut Candidate,
    extraction: ExtractionResult,
) -> ExtractionResult {
    let details = candidate.extra.get("youtube").cloned().unwrap_or(Value::Null);
    let snippet = details.get("snippet").cloned().unwrap_or(Value::Null);
    let statistics = details.get("statistics").cloned().unwrap_or(Value::Null);

    let title = extraction
        .title
        .clone()
        .or_else(|| {
            snippet
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| candidate.title.clone());
    let description = snippet
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut comments_texts = Vec::new();
    let mut comments_meta = Vec::new();
    if let (Some(api_key), Some(video_id)) = (api_key, video_id_of(candidate)) {
        if opts.pages > 0 {
            let (texts, meta) = fetch_comment_pages(client, api_key, &video_id, opts).await;
            comments_texts = texts;
            comments_meta = meta;
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = &title {
        parts.push(title.clone());
    }
    if !description.is_empty() {
        parts.push(description);
    }
    if !extraction.text.is_empty() {
        parts.push(extraction.text.clone());
    }
    if !comments_texts.is_empty() {
        parts.push(comments_texts.join("\n"));
    }
    let text_combined = parts
        .iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");

    let yt = candidate
        .extra
        .entry("youtube".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(yt_map) = yt.as_object_mut() {
        if !statistics.is_null() {
            yt_map
                .entry("statistics".to_string())
                .or_insert(statistics);
        }
        if !comments_meta.is_empty() {
            yt_map.insert("comments".to_string(), Value::Array(comments_meta));
        }
    }

    ExtractionResult {
        text: if text_combined.is_empty() {
            extraction.text
        } else {
            text_combined
        },
        title,
        authors: extraction.authors,
        published_at: extraction.published_at,
    }
}
