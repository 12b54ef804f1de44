pub mod bobaedream;
pub mod dcinside;
pub mod generic;
pub mod mlbpark;
pub mod ppomppu;
pub mod theqoo;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::core::types::Candidate;

/// One row scraped from a board listing page.
#[derive(Debug, Clone)]
pub struct ListingPost {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at_raw: Option<String>,
}

/// One comment under a forum thread, stored under
/// `extra.forum.comments` and appended to the document text.
#[derive(Debug, Clone, Serialize)]
pub struct ForumComment {
    pub author: Option<String>,
    pub text: String,
    #[serde(rename = "publishedAt")]
    pub published_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl ForumComment {
    pub fn new(author: Option<String>, text: String, published_at: Option<String>) -> Self {
        Self {
            author,
            text,
            published_at,
            id: None,
            depth: None,
            reply_to: None,
        }
    }
}

/// A supported forum site: its listing-page pagination parameter and parser.
/// The five sites differ in parameter names, link patterns, and row layouts,
/// so each owns its selectors.
pub struct ForumSite {
    pub key: &'static str,
    pub page_param: &'static str,
    pub parse_listing: fn(base_url: &str, html: &str) -> Vec<ListingPost>,
}

pub static FORUM_SITES: &[ForumSite] = &[
    ForumSite {
        key: "dcinside",
        page_param: "page",
        parse_listing: dcinside::parse_listing,
    },
    ForumSite {
        key: "bobaedream",
        page_param: "page",
        parse_listing: bobaedream::parse_listing,
    },
    ForumSite {
        key: "mlbpark",
        page_param: "p",
        parse_listing: mlbpark::parse_listing,
    },
    ForumSite {
        key: "theqoo",
        page_param: "page",
        parse_listing: theqoo::parse_listing,
    },
    ForumSite {
        key: "ppomppu",
        page_param: "page",
        parse_listing: ppomppu::parse_listing,
    },
];

pub fn site(key: &str) -> Option<&'static ForumSite> {
    FORUM_SITES.iter().find(|site| site.key == key)
}

/// Fixed source priority used by the pipeline: forum sites first, in registry
/// order.
pub fn priority_order() -> impl Iterator<Item = &'static str> {
    FORUM_SITES.iter().map(|site| site.key)
}

/// Options threaded into the per-site comment fetchers. Credentials and
/// static cookies come from the environment; absence means "skip login".
#[derive(Debug, Clone, Default)]
pub struct CommentOptions {
    /// Cap on comments kept per thread; zero means unlimited.
    pub max_comments: usize,
    pub user_agent: String,
    pub timeout: Duration,
    pub theqoo_cookies: Option<String>,
    pub theqoo_id: Option<String>,
    pub theqoo_pw: Option<String>,
    pub ppomppu_cookies: Option<String>,
    pub ppomppu_id: Option<String>,
    pub ppomppu_pw: Option<String>,
}

/// Run the site-specific comment protocol for a fetched thread page.
/// Unknown sites yield nothing; the extractor then falls back to the generic
/// selector sweep.
pub async fn fetch_comments(
    site_key: &str,
    candidate: &Candidate,
    html: &str,
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    match site_key {
        "dcinside" => dcinside::fetch_comments(candidate, html, opts).await,
        "bobaedream" => bobaedream::fetch_comments(candidate, html, opts).await,
        "mlbpark" => mlbpark::fetch_comments(candidate, opts).await,
        "theqoo" => theqoo::fetch_comments(candidate, opts).await,
        "ppomppu" => ppomppu::fetch_comments(candidate, html, opts).await,
        _ => Vec::new(),
    }
}

// --- shared scraping helpers ----------------------------------------------

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static tag pattern"));

pub(crate) fn clean_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn strip_tags(html: &str) -> String {
    clean_ws(&TAG_RE.replace_all(html, " "))
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    clean_ws(&el.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn select_first<'a>(root: ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    root.select(&sel).next()
}

/// First non-empty text among candidate selectors, else the node's own text.
pub(crate) fn select_text(root: ElementRef<'_>, candidates: &[&str]) -> String {
    for selector in candidates {
        if let Some(el) = select_first(root, selector) {
            return element_text(el);
        }
    }
    element_text(root)
}

/// Attribute value of the first match, falling back to its text.
pub(crate) fn attr_or_text(root: ElementRef<'_>, selector: &str, attr: &str) -> Option<String> {
    let el = select_first(root, selector)?;
    if let Some(value) = el.value().attr(attr) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    let text = element_text(el);
    (!text.is_empty()).then_some(text)
}

pub(crate) fn ancestor<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == name)
}

pub(crate) fn input_value(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let value = doc.select(&sel).next()?.value().attr("value")?.to_string();
    (!value.is_empty()).then_some(value)
}

/// First value for any of the given query-parameter keys.
pub(crate) fn query_param(url: &str, keys: &[&str]) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    for key in keys {
        if let Some((_, value)) = parsed.query_pairs().find(|(k, _)| k == *key) {
            if !value.is_empty() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

pub(crate) fn cap_reached(len: usize, max: usize) -> bool {
    max > 0 && len >= max
}

/// Transient per-call client with a cookie jar, so cookies acquired by login
/// persist only for one comment fetch.
pub(crate) fn comment_client(opts: &CommentOptions) -> Option<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(if opts.timeout.is_zero() {
            Duration::from_secs(20)
        } else {
            opts.timeout
        })
        .build()
        .ok()
}

pub(crate) fn join_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_all_five_sites() {
        let keys: Vec<&str> = priority_order().collect();
        assert_eq!(
            keys,
            vec!["dcinside", "bobaedream", "mlbpark", "theqoo", "ppomppu"]
        );
        assert_eq!(site("mlbpark").map(|s| s.page_param), Some("p"));
        assert!(site("fmkorea").is_none());
    }

    #[test]
    fn strip_tags_flattens_markup() {
        assert_eq!(strip_tags("<b>굿</b>&nbsp;<i>댓글</i>"), "굿 &nbsp; 댓글");
    }

    #[test]
    fn query_param_tries_keys_in_order() {
        let url = "https://example.com/view.php?code=abc&No=42";
        assert_eq!(query_param(url, &["No", "no"]), Some("42".to_string()));
        assert_eq!(query_param(url, &["missing"]), None);
    }
}
