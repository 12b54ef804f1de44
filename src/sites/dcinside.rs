//! DC-style board: listing rows under `td.gall_tit`, comments behind a
//! token-gated JSON endpoint on the thread page.

use scraper::{Html, Selector};
use tracing::debug;

use super::{
    ancestor, attr_or_text, cap_reached, clean_ws, comment_client, element_text, input_value,
    join_url, query_param, strip_tags, CommentOptions, ForumComment, ListingPost,
};
use crate::core::types::Candidate;

const COMMENT_URL: &str = "https://gall.dcinside.com/board/comment/";

pub fn parse_listing(base_url: &str, html: &str) -> Vec<ListingPost> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();

    if let Ok(sel) = Selector::parse("td.gall_tit a[href]") {
        for a in doc.select(&sel) {
            let href = a.value().attr("href").unwrap_or("");
            if !href.contains("/board/view/") {
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
                if let Some(writer) = super::select_first(tr, "td.gall_writer") {
                    let t = element_text(writer);
                    author = (!t.is_empty()).then_some(t);
                }
                published_at_raw = attr_or_text(tr, "td.gall_date", "title");
            }
            items.push(ListingPost {
                url,
                title,
                author,
                published_at_raw,
            });
        }
    }

    // Fallback heuristic for some skins.
    if items.is_empty() {
        if let Ok(sel) = Selector::parse(r#"a[href*="/board/view/"]"#) {
            for a in doc.select(&sel) {
                let href = a.value().attr("href").unwrap_or("");
                let Some(url) = join_url(base_url, href) else {
                    continue;
                };
                let title = {
                    let t = element_text(a);
                    (!t.is_empty()).then_some(t)
                };
                items.push(ListingPost {
                    url,
                    title,
                    author: None,
                    published_at_raw: None,
                });
            }
        }
    }

    items
}

struct PageTokens {
    e_s_n_o: String,
    board_type: String,
    gall_type: String,
    secret_key: String,
}

fn page_tokens(html: &str) -> Option<PageTokens> {
    let doc = Html::parse_document(html);
    let e_s_n_o = input_value(&doc, "#e_s_n_o")?;
    Some(PageTokens {
        e_s_n_o,
        board_type: input_value(&doc, "#board_type").unwrap_or_default(),
        gall_type: input_value(&doc, "#_GALLTYPE_").unwrap_or_default(),
        secret_key: input_value(&doc, "#secret_article_key").unwrap_or_default(),
    })
}

pub(super) async fn fetch_comments(
    candidate: &Candidate,
    html: &str,
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    let Some(tokens) = page_tokens(html) else {
        return Vec::new();
    };

    let mut gall_id = query_param(&candidate.url, &["id"]);
    let article_no = query_param(&candidate.url, &["no"]);
    if gall_id.is_none() {
        if let Some(board) = candidate.discovered_via.forum_board() {
            gall_id = query_param(board, &["id"]);
        }
    }
    let (Some(gall_id), Some(article_no)) = (gall_id, article_no) else {
        return Vec::new();
    };

    let Some(client) = comment_client(opts) else {
        return Vec::new();
    };
    // Warm the session on the thread page before hitting the XHR endpoint.
    let _ = client
        .get(&candidate.url)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .send()
        .await;

    let form = [
        ("id", gall_id.as_str()),
        ("no", article_no.as_str()),
        ("cmt_id", gall_id.as_str()),
        ("cmt_no", article_no.as_str()),
        ("focus_cno", ""),
        ("focus_pno", ""),
        ("e_s_n_o", tokens.e_s_n_o.as_str()),
        ("comment_page", "1"),
        ("sort", "D"),
        ("prevCnt", ""),
        ("board_type", tokens.board_type.as_str()),
        ("_GALLTYPE_", tokens.gall_type.as_str()),
        ("secret_article_key", tokens.secret_key.as_str()),
    ];

    let payload: serde_json::Value = match client
        .post(COMMENT_URL)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, &candidate.url)
        .header("X-Requested-With", "XMLHttpRequest")
        .form(&form)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => match resp.json().await {
            Ok(payload) => payload,
            Err(e) => {
                debug!("dcinside comment payload not JSON: {}", e);
                return Vec::new();
            }
        },
        Ok(resp) => {
            debug!("dcinside comment endpoint status {}", resp.status());
            return Vec::new();
        }
        Err(e) => {
            debug!("dcinside comment request failed: {}", e);
            return Vec::new();
        }
    };

    parse_comment_rows(&payload, opts.max_comments)
}

fn value_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_comment_rows(payload: &serde_json::Value, max: usize) -> Vec<ForumComment> {
    let Some(rows) = payload.get("comments").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for row in rows {
        let memo = row.get("memo").and_then(|v| v.as_str()).unwrap_or("");
        let text = strip_tags(memo);
        if text.is_empty() {
            continue;
        }
        let author = value_string(row.get("name"));
        let ip = value_string(row.get("ip"));
        let author_display = match (author, ip) {
            (Some(name), Some(ip)) => Some(format!("{name} ({ip})")),
            (None, Some(ip)) => Some(ip),
            (name, None) => name,
        };
        results.push(ForumComment {
            author: author_display.map(|a| clean_ws(&a)),
            text,
            published_at: value_string(row.get("reg_date")),
            id: value_string(row.get("no")),
            depth: row.get("depth").and_then(|v| v.as_u64()).map(|d| d as u32),
            reply_to: value_string(row.get("c_no")),
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

    const LISTING: &str = r#"
        <table><tbody>
        <tr>
            <td class="gall_tit"><a href="/board/view/?id=car_new1&no=101">전기차 후기</a></td>
            <td class="gall_writer">홍길동</td>
            <td class="gall_date" title="2025-11-20 09:15:00">11.20</td>
        </tr>
        <tr>
            <td class="gall_tit"><a href="/board/view/?id=car_new1&no=102">두번째 글</a></td>
            <td class="gall_writer">김철수</td>
            <td class="gall_date">11.21</td>
        </tr>
        </tbody></table>
    "#;

    #[test]
    fn parses_listing_rows_with_meta() {
        let posts = parse_listing("https://gall.dcinside.com/board/lists/?id=car_new1", LISTING);
        assert_eq!(posts.len(), 2);
        assert_eq!(
            posts[0].url,
            "https://gall.dcinside.com/board/view/?id=car_new1&no=101"
        );
        assert_eq!(posts[0].title.as_deref(), Some("전기차 후기"));
        assert_eq!(posts[0].author.as_deref(), Some("홍길동"));
        assert_eq!(
            posts[0].published_at_raw.as_deref(),
            Some("2025-11-20 09:15:00")
        );
        assert_eq!(posts[1].published_at_raw.as_deref(), Some("11.21"));
    }

    #[test]
    fn token_extraction_requires_session_token() {
        let html = r#"<input type="hidden" id="e_s_n_o" value="abc123">
                      <input type="hidden" id="board_type" value="normal">"#;
        let tokens = page_tokens(html).unwrap();
        assert_eq!(tokens.e_s_n_o, "abc123");
        assert_eq!(tokens.board_type, "normal");
        assert!(page_tokens("<html></html>").is_none());
    }

    #[test]
    fn parses_comment_rows_from_json() {
        let payload = serde_json::json!({
            "comments": [
                {"memo": "<b>좋은 글</b> 감사", "name": "익명1", "ip": "1.2.3",
                 "reg_date": "2025.11.20 10:00:00", "no": 555, "depth": 0},
                {"memo": "", "name": "빈댓글"},
                {"memo": "답글입니다", "name": "익명2", "reg_date": "2025.11.20 10:05:00",
                 "no": "556", "c_no": "555", "depth": 1}
            ]
        });
        let comments = parse_comment_rows(&payload, 0);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].author.as_deref(), Some("익명1 (1.2.3)"));
        assert_eq!(comments[0].text, "좋은 글 감사");
        assert_eq!(comments[0].id.as_deref(), Some("555"));
        assert_eq!(comments[1].reply_to.as_deref(), Some("555"));
        assert_eq!(comments[1].depth, Some(1));
    }

    #[test]
    fn comment_cap_is_applied() {
        let payload = serde_json::json!({
            "comments": [
                {"memo": "하나"}, {"memo": "둘"}, {"memo": "셋"}
            ]
        });
        assert_eq!(parse_comment_rows(&payload, 2).len(), 2);
    }
}
