//! Ppomppu-style zboard: listing links on `view.php?id=`, comments inline in
//! the thread page when lucky, else behind `comment.php` (plus two legacy
//! partials), optionally after login.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::{
    ancestor, attr_or_text, cap_reached, comment_client, element_text, input_value, join_url,
    query_param, select_first, select_text, CommentOptions, ForumComment, ListingPost,
};
use crate::core::types::Candidate;

const COMMENT_URL: &str = "https://www.ppomppu.co.kr/zboard/comment.php";
const LOGIN_PAGE_URL: &str = "https://www.ppomppu.co.kr/zboard/login.php";
const LOGIN_CHECK_URL: &str = "https://www.ppomppu.co.kr/zboard/login_check.php";
const LEGACY_COMMENT_URLS: [&str; 2] = [
    "https://www.ppomppu.co.kr/zboard/_comment_list.php",
    "https://www.ppomppu.co.kr/zboard/bbs_comment.php",
];

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{2}:\d{2}:\d{2}\b").expect("time pattern"));

const INLINE_CONTAINERS: [&str; 6] = [
    "#comment tr",
    "#Comment tr",
    ".comList tr",
    "table#comment_table tr",
    "div.comment tr",
    "div#divComment tr",
];

pub fn parse_listing(base_url: &str, html: &str) -> Vec<ListingPost> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    let Ok(sel) = Selector::parse(r#"a[href*="view.php?id="]"#) else {
        return items;
    };
    // Keep only links that point to the same board id as the listing.
    let current_board = query_param(base_url, &["id"]);
    for a in doc.select(&sel) {
        let href = a.value().attr("href").unwrap_or("");
        let Some(url) = join_url(base_url, href) else {
            continue;
        };
        if let (Some(current), Some(linked)) = (&current_board, query_param(&url, &["id"])) {
            if *current != linked {
                continue;
            }
        }
        let title = {
            let t = element_text(a);
            (!t.is_empty()).then_some(t)
        };
        let mut author = None;
        let mut published_at_raw = None;
        if let Some(tr) = ancestor(a, "tr") {
            if let Some(au) = select_first(tr, "td.name, td.author, td.writer") {
                let t = element_text(au);
                author = (!t.is_empty()).then_some(t);
            }
            published_at_raw = attr_or_text(tr, "td.date, td.regdate, td.time", "title");
        }
        items.push(ListingPost {
            url,
            title,
            author,
            published_at_raw,
        });
    }
    items
}

/// Comments rendered inline in the thread page (some skins).
pub(crate) fn parse_inline_comments(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    for container in INLINE_CONTAINERS {
        let Ok(sel) = Selector::parse(container) else {
            continue;
        };
        for node in doc.select(&sel) {
            let text = select_text(node, &[".comContent", ".comment", ".txt", "p", "td"]);
            if text.is_empty() {
                continue;
            }
            let author = {
                let a = select_text(node, &[".writer", ".nick", ".name", "td.user", ".author"]);
                (!a.is_empty()).then_some(a)
            };
            let ts = attr_or_text(node, "time[datetime]", "datetime")
                .or_else(|| attr_or_text(node, ".date", "title"))
                .or_else(|| attr_or_text(node, ".regdate", "title"));
            items.push(ForumComment::new(author, text, ts));
            if cap_reached(items.len(), max) {
                return items;
            }
        }
        if !items.is_empty() {
            return items;
        }
    }
    items
}

/// `comment.php` partial: `div.comment_line` blocks keyed by a
/// `comment_{id}` wrapper, with a matching `#commentContent_{id}` body.
pub(crate) fn parse_comment_php(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("div.comment_line, div.comment_line2") else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for line in doc.select(&sel) {
        let cid = line
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .find_map(|el| {
                el.value()
                    .attr("id")
                    .filter(|id| id.starts_with("comment_"))
                    .map(|id| id.trim_start_matches("comment_").trim().to_string())
            });

        let mut text = String::new();
        if let Some(cid) = &cid {
            if let Ok(content_sel) = Selector::parse(&format!("#commentContent_{cid}")) {
                if let Some(target) = doc.select(&content_sel).next() {
                    text = element_text(target);
                }
            }
        }
        if text.is_empty() {
            text = select_text(line, &[".mid-text-area", ".comment", ".txt", "p", "div"]);
        }
        if text.is_empty() {
            continue;
        }

        let author = {
            let a = select_text(
                line,
                &[".comment_template_depth1_vote b a", "b a", ".name a", ".writer"],
            );
            (!a.is_empty()).then_some(a)
        };
        let ts = TIME_RE
            .find(&element_text(line))
            .map(|m| m.as_str().to_string());
        let depth: u32 = if line.value().classes().any(|c| c == "comment_line2") {
            1
        } else {
            0
        };

        results.push(ForumComment {
            author,
            text,
            published_at: ts,
            id: cid,
            depth: Some(depth),
            reply_to: None,
        });
        if cap_reached(results.len(), max) {
            break;
        }
    }
    results
}

/// Legacy partial endpoints render a plain comment table.
pub(crate) fn parse_comment_table(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse(".comList tr, tr") else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for node in doc.select(&sel) {
        let text = select_text(node, &[".comContent", ".comment", ".txt", "p", "td"]);
        if text.is_empty() {
            continue;
        }
        let author = {
            let a = select_text(node, &[".writer", ".nick", ".name", "td.user", ".author"]);
            (!a.is_empty()).then_some(a)
        };
        let ts = attr_or_text(node, "time[datetime]", "datetime")
            .or_else(|| attr_or_text(node, ".date", "title"))
            .or_else(|| attr_or_text(node, ".regdate", "title"));
        items.push(ForumComment::new(author, text, ts));
        if cap_reached(items.len(), max) {
            break;
        }
    }
    items
}

async fn try_comment_php(
    client: &reqwest::Client,
    candidate: &Candidate,
    opts: &CommentOptions,
    board: &str,
    no: &str,
) -> Vec<ForumComment> {
    let mut request = client
        .get(COMMENT_URL)
        .query(&[
            ("id", board),
            ("no", no),
            ("c_page", "1"),
            ("comment_mode", "sort_desc"),
        ])
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, &candidate.url)
        .header("X-Requested-With", "XMLHttpRequest");
    if let Some(cookies) = &opts.ppomppu_cookies {
        request = request.header(reqwest::header::COOKIE, cookies.clone());
    }
    match request.send().await {
        Ok(resp) if resp.status().as_u16() < 400 => {
            let body = resp.text().await.unwrap_or_default();
            if body.is_empty() {
                Vec::new()
            } else {
                parse_comment_php(&body, opts.max_comments)
            }
        }
        Ok(resp) => {
            debug!("ppomppu comment.php status {}", resp.status());
            Vec::new()
        }
        Err(e) => {
            debug!("ppomppu comment.php failed: {}", e);
            Vec::new()
        }
    }
}

async fn try_legacy_endpoints(
    client: &reqwest::Client,
    candidate: &Candidate,
    opts: &CommentOptions,
    board: &str,
    no: &str,
) -> Vec<ForumComment> {
    for endpoint in LEGACY_COMMENT_URLS {
        let mut request = client
            .get(endpoint)
            .query(&[("id", board), ("no", no), ("page", "1")])
            .header(reqwest::header::USER_AGENT, &opts.user_agent)
            .header(reqwest::header::REFERER, &candidate.url)
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(cookies) = &opts.ppomppu_cookies {
            request = request.header(reqwest::header::COOKIE, cookies.clone());
        }
        let body = match request.send().await {
            Ok(resp) if resp.status().as_u16() < 400 => resp.text().await.unwrap_or_default(),
            _ => continue,
        };
        if body.is_empty() {
            continue;
        }
        let items = parse_comment_table(&body, opts.max_comments);
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

/// One login attempt; real validation happens on the next partial request.
async fn maybe_login(client: &reqwest::Client, opts: &CommentOptions, referer: &str) -> bool {
    let (Some(user_id), Some(password)) = (&opts.ppomppu_id, &opts.ppomppu_pw) else {
        return false;
    };

    let s_url = match client
        .get(LOGIN_PAGE_URL)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, referer)
        .send()
        .await
    {
        Ok(resp) => resp
            .text()
            .await
            .ok()
            .and_then(|body| {
                let doc = Html::parse_document(&body);
                input_value(&doc, r#"input[name="s_url"]"#)
            })
            .unwrap_or_else(|| referer.to_string()),
        Err(_) => referer.to_string(),
    };

    match client
        .post(LOGIN_CHECK_URL)
        .form(&[
            ("user_id", user_id.as_str()),
            ("password", password.as_str()),
            ("s_url", s_url.as_str()),
        ])
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, referer)
        .send()
        .await
    {
        Ok(resp) => resp.status().as_u16() < 400,
        Err(_) => false,
    }
}

pub(super) async fn fetch_comments(
    candidate: &Candidate,
    html: &str,
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    let inline = parse_inline_comments(html, opts.max_comments);
    if !inline.is_empty() {
        return inline;
    }

    let board = query_param(&candidate.url, &["id"]);
    let no = query_param(&candidate.url, &["no", "No"]);
    let (Some(board), Some(no)) = (board, no) else {
        return Vec::new();
    };
    let Some(client) = comment_client(opts) else {
        return Vec::new();
    };

    let mut warm = client
        .get(&candidate.url)
        .header(reqwest::header::USER_AGENT, &opts.user_agent);
    if let Some(cookies) = &opts.ppomppu_cookies {
        warm = warm.header(reqwest::header::COOKIE, cookies.clone());
    }
    let _ = warm.send().await;

    let items = try_comment_php(&client, candidate, opts, &board, &no).await;
    if !items.is_empty() {
        return items;
    }
    let items = try_legacy_endpoints(&client, candidate, opts, &board, &no).await;
    if !items.is_empty() {
        return items;
    }

    if maybe_login(&client, opts, &candidate.url).await {
        let items = try_comment_php(&client, candidate, opts, &board, &no).await;
        if !items.is_empty() {
            return items;
        }
        return try_legacy_endpoints(&client, candidate, opts, &board, &no).await;
    }
    Vec::new()
}
