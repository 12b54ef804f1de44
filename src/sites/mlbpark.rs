//! MLBPark-style board: listing links on `/mp/b.php`, comments served by the
//! same script with `m=reply`.

use scraper::{Html, Selector};
use tracing::debug;

use super::{
    ancestor, attr_or_text, cap_reached, comment_client, element_text, join_url, query_param,
    select_first, CommentOptions, ForumComment, ListingPost,
};
use crate::core::types::Candidate;

const BOARD_URL: &str = "https://mlbpark.donga.com/mp/b.php";

pub fn parse_listing(base_url: &str, html: &str) -> Vec<ListingPost> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    let Ok(sel) = Selector::parse(r#"a[href*="/mp/b.php"]"#) else {
        return items;
    };
    for a in doc.select(&sel) {
        let href = a.value().attr("href").unwrap_or("");
        // Links can appear with or without m=view; require a view marker.
        if !href.contains("m=view") && !href.contains("idx=") {
            continue;
        }
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
            if let Some(au) = select_first(tr, "td.nikcon, td.author, td.name") {
                let t = element_text(au);
                author = (!t.is_empty()).then_some(t);
            }
            published_at_raw = attr_or_text(tr, "td.date, td.time", "title");
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
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    let board = query_param(&candidate.url, &["b", "board"]);
    let article_id = query_param(&candidate.url, &["id", "no"]);
    let (Some(board), Some(article_id)) = (board, article_id) else {
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

    let body = match client
        .get(BOARD_URL)
        .query(&[
            ("b", board.as_str()),
            ("id", article_id.as_str()),
            ("m", "reply"),
        ])
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, &candidate.url)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        Ok(resp) => {
            debug!("mlbpark reply endpoint status {}", resp.status());
            return Vec::new();
        }
        Err(e) => {
            debug!("mlbpark reply request failed: {}", e);
            return Vec::new();
        }
    };

    parse_reply_blocks(&body, opts.max_comments)
}

pub(crate) fn parse_reply_blocks(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("div.other_con") else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for block in doc.select(&sel) {
        let Some(cid) = block.value().attr("id") else {
            continue;
        };
        let Some(text_span) = select_first(block, "span.re_txt") else {
            continue;
        };
        let text = element_text(text_span);
        if text.is_empty() {
            continue;
        }
        let author = select_first(block, ".txt .name").map(element_text);
        let published = select_first(block, ".txt .date")
            .map(element_text)
            .filter(|t| !t.is_empty());
        let ip = select_first(block, ".txt .ip").map(element_text);
        let author_display = match (author.filter(|a| !a.is_empty()), ip.filter(|i| !i.is_empty()))
        {
            (Some(name), Some(ip)) => Some(format!("{name} {ip}")),
            (Some(name), None) => Some(name),
            (None, ip) => ip,
        };
        results.push(ForumComment {
            author: author_display,
            text,
            published_at: published,
            id: Some(cid.replace("reply_", "")),
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
    fn listing_requires_view_marker() {
        let html = r#"
            <table><tr>
                <td><a href="/mp/b.php?b=bullpen&m=view&idx=900">불펜 글</a></td>
                <td class="nikcon">야구팬</td>
                <td class="date">2025-11-20</td>
            </tr><tr>
                <td><a href="/mp/b.php?b=bullpen&p=31">다음 페이지</a></td>
            </tr></table>
        "#;
        let posts = parse_listing("https://mlbpark.donga.com/mp/b.php?b=bullpen", html);
        assert_eq!(posts.len(), 1);
        assert!(posts[0].url.contains("m=view"));
        assert_eq!(posts[0].author.as_deref(), Some("야구팬"));
    }

    #[test]
    fn parses_reply_blocks_with_ip_author() {
        let html = r#"
            <div class="other_con" id="reply_1000">
                <div class="txt">
                    <span class="name">댓글왕</span>
                    <span class="ip">(1.2)</span>
                    <span class="date">2025-11-20 13:00:00</span>
                </div>
                <span class="re_txt">동의합니다</span>
            </div>
            <div class="other_con" id="reply_1001">
                <span class="re_txt"></span>
            </div>
        "#;
        let comments = parse_reply_blocks(html, 0);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author.as_deref(), Some("댓글왕 (1.2)"));
        assert_eq!(comments[0].id.as_deref(), Some("1000"));
        assert_eq!(
            comments[0].published_at.as_deref(),
            Some("2025-11-20 13:00:00")
        );
    }
}
