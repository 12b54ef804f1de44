//! Bobae-style board: listing links under `/board/bbs_view?` or
//! `/view?code=`, comments behind a `comment_list.php` partial keyed by
//! `tb`/`wid` tokens embedded in the page HTML.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;

use super::{
    ancestor, attr_or_text, cap_reached, comment_client, element_text, join_url, query_param,
    select_first, CommentOptions, ForumComment, ListingPost,
};
use crate::core::types::Candidate;

const COMMENT_LIST_URL: &str =
    "https://www.bobaedream.co.kr/board_renew/bulletin/comment_list.php";

static TB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"tb=([A-Za-z0-9_]+)").expect("tb pattern"));
static WID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"wid=([^&"\\]+)"#).expect("wid pattern"));

pub fn parse_listing(base_url: &str, html: &str) -> Vec<ListingPost> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    // Support both legacy /board/bbs_view? and current /view? patterns.
    let Ok(sel) = Selector::parse(r#"a[href*="/board/bbs_view?"], a[href*="/view?code="]"#) else {
        return items;
    };
    for a in doc.select(&sel) {
        let href = a.value().attr("href").unwrap_or("");
        let Some(url) = join_url(base_url, href) else {
            continue;
        };
        let title = {
            let t = element_text(a);
            (!t.is_empty()).then_some(t)
        };
        let mut author = None;
        let mut published_at_raw = None;
        if let Some(tr) = ancestor(a, "tr") {
            if let Some(au) = select_first(tr, "td.author, td.writer, td.name") {
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

pub(super) async fn fetch_comments(
    candidate: &Candidate,
    html: &str,
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    let board_code = query_param(&candidate.url, &["code", "board"]);
    let article_no = query_param(&candidate.url, &["No", "no"]);
    let (Some(board_code), Some(article_no)) = (board_code, article_no) else {
        return Vec::new();
    };

    let (Some(tb), Some(wid)) = (
        TB_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        WID_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| percent_decode_str(m.as_str()).decode_utf8_lossy().into_owned()),
    ) else {
        return Vec::new();
    };

    let Some(client) = comment_client(opts) else {
        return Vec::new();
    };
    let _ = client
        .get(&candidate.url)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .send()
        .await;

    let params = [
        ("tb", tb.as_str()),
        ("code", board_code.as_str()),
        ("No", article_no.as_str()),
        ("page", "1"),
        ("strLimit", "100"),
        ("strOrder", ""),
        ("strMywrite", ""),
        ("focus", "top"),
        ("wid", wid.as_str()),
    ];
    let body = match client
        .get(COMMENT_LIST_URL)
        .query(&params)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, &candidate.url)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        Ok(resp) => {
            debug!("bobaedream comment endpoint status {}", resp.status());
            return Vec::new();
        }
        Err(e) => {
            debug!("bobaedream comment request failed: {}", e);
            return Vec::new();
        }
    };

    parse_comment_list(&body, opts.max_comments)
}

pub(crate) fn parse_comment_list(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse(r#"dd[id^="small_cmt_"]"#) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    for node in doc.select(&sel) {
        let Some(cid) = node.value().attr("id") else {
            continue;
        };
        let numeric_id = cid.rsplit('_').next().unwrap_or(cid).to_string();
        if !seen_ids.insert(numeric_id.clone()) {
            continue;
        }
        let Some(dl) = ancestor(node, "dl") else {
            continue;
        };
        let mut author = None;
        let mut published = None;
        if let Some(dt) = select_first(dl, "dt") {
            if let Some(name) = select_first(dt, "span.author") {
                let t = element_text(name);
                author = (!t.is_empty()).then_some(t);
            }
            if let Some(date) = select_first(dt, "span.date") {
                let t = element_text(date);
                published = (!t.is_empty()).then_some(t);
            }
        }
        let text = element_text(node);
        if text.is_empty() {
            continue;
        }
        results.push(ForumComment {
            author,
            text,
            published_at: published,
            id: Some(numeric_id),
            depth: Some(0),
            reply_to: None,
        });
        if cap_reached(results.len(), max) {
            break;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_links_both_patterns() {
        let html = r#"
            <table><tr>
                <td><a href="/board/bbs_view?code=freeb&No=77">중고차 질문</a></td>
                <td class="author">작성자A</td>
                <td class="date">25.11.20</td>
            </tr><tr>
                <td><a href="/view?code=national&No=78">국산차 소식</a></td>
                <td class="writer">작성자B</td>
                <td class="regdate" title="2025-11-21 08:00:00">11/21</td>
            </tr></table>
        "#;
        let posts = parse_listing("https://www.bobaedream.co.kr/list?code=freeb", html);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author.as_deref(), Some("작성자A"));
        assert_eq!(posts[0].published_at_raw.as_deref(), Some("25.11.20"));
        assert_eq!(
            posts[1].published_at_raw.as_deref(),
            Some("2025-11-21 08:00:00")
        );
    }

    #[test]
    fn token_patterns_match_page_source() {
        let html = r#"<script>var opt = {tb: 'cmt_freeb'}; load("?tb=cmt_freeb&wid=abc%2F9");</script>"#;
        let tb = TB_RE.captures(html).unwrap().get(1).unwrap().as_str();
        assert_eq!(tb, "cmt_freeb");
        let wid = WID_RE.captures(html).unwrap().get(1).unwrap().as_str();
        assert_eq!(
            percent_decode_str(wid).decode_utf8_lossy().into_owned(),
            "abc/9"
        );
    }

    #[test]
    fn parses_comment_partial_and_dedupes() {
        let html = r#"
            <dl>
              <dt><span class="author">댓글러1</span><span class="date">2025.11.20 12:00</span></dt>
              <dd id="small_cmt_900">첫 댓글</dd>
            </dl>
            <dl>
              <dt><span class="author">댓글러1</span></dt>
              <dd id="small_cmt_900">중복 댓글</dd>
            </dl>
            <dl>
              <dt><span class="author">댓글러2</span><span class="date">2025.11.20 12:05</span></dt>
              <dd id="small_cmt_901">둘째 댓글</dd>
            </dl>
        "#;
        let comments = parse_comment_list(html, 0);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "첫 댓글");
        assert_eq!(comments[0].id.as_deref(), Some("900"));
        assert_eq!(comments[1].author.as_deref(), Some("댓글러2"));
    }
}
