//! Theqoo-style board (XE/Rhymix): listing links under `/square/{srl}`,
//! comments behind an XHR board-content-comment-list endpoint that sometimes
//! requires a logged-in session.

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{
    ancestor, attr_or_text, cap_reached, comment_client, element_text, join_url, select_first,
    select_text, CommentOptions, ForumComment, ListingPost,
};
use crate::core::types::Candidate;

const INDEX_URL: &str = "https://theqoo.net/index.php";
const HOME_URL: &str = "https://theqoo.net/";

const COMMENT_CONTAINERS: [&str; 6] = [
    "#cmtPosition li.fdb_itm",
    "ul.bd_lst_cmt li",
    "ul.reply li",
    "div.bd_cmt li",
    "article.xe_comment",
    "li.fdb_itm",
];

pub fn parse_listing(base_url: &str, html: &str) -> Vec<ListingPost> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    let Ok(sel) = Selector::parse(r#"a[href*="/square/"]"#) else {
        return items;
    };
    for a in doc.select(&sel) {
        let href = a.value().attr("href").unwrap_or("");
        if !square_thread_href(href) {
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
            if let Some(au) = select_first(tr, "td.nik, td.author, td.name") {
                let t = element_text(au);
                author = (!t.is_empty()).then_some(t);
            }
            published_at_raw = attr_or_text(tr, "td.time, td.date", "title");
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

fn square_thread_href(href: &str) -> bool {
    let Some(rest) = href.split("/square/").nth(1) else {
        return false;
    };
    rest.chars().take_while(|c| c.is_ascii_digit()).count() > 0
}

/// `mid` and `document_srl` come from the URL path: `/{mid}/{document_srl}`.
fn path_ids(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let parts: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return None;
    }
    Some((
        parts[parts.len() - 2].to_string(),
        parts[parts.len() - 1].to_string(),
    ))
}

async fn request_comment_partial(
    client: &reqwest::Client,
    candidate: &Candidate,
    opts: &CommentOptions,
    mid: &str,
    doc_id: &str,
) -> Option<String> {
    let mut request = client
        .get(INDEX_URL)
        .query(&[
            ("module", "board"),
            ("act", "dispBoardContentCommentList"),
            ("mid", mid),
            ("document_srl", doc_id),
        ])
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, &candidate.url)
        .header("X-Requested-With", "XMLHttpRequest");
    if let Some(cookies) = &opts.theqoo_cookies {
        request = request.header(reqwest::header::COOKIE, cookies.clone());
    }
    match request.send().await {
        Ok(resp) if resp.status().as_u16() < 400 => resp.text().await.ok(),
        Ok(resp) => {
            debug!("theqoo comment endpoint status {}", resp.status());
            None
        }
        Err(e) => {
            debug!("theqoo comment request failed: {}", e);
            None
        }
    }
}

pub(super) async fn fetch_comments(
    candidate: &Candidate,
    opts: &CommentOptions,
) -> Vec<ForumComment> {
    let Some((mid, doc_id)) = path_ids(&candidate.url) else {
        return Vec::new();
    };
    let Some(client) = comment_client(opts) else {
        return Vec::new();
    };

    // Warm the session on the thread page (picks up guest cookies).
    let mut warm = client
        .get(&candidate.url)
        .header(reqwest::header::USER_AGENT, &opts.user_agent);
    if let Some(cookies) = &opts.theqoo_cookies {
        warm = warm.header(reqwest::header::COOKIE, cookies.clone());
    }
    let _ = warm.send().await;

    let mut body = request_comment_partial(&client, candidate, opts, &mid, &doc_id).await;
    if body.is_none() && maybe_login(&client, opts).await {
        body = request_comment_partial(&client, candidate, opts, &mid, &doc_id).await;
    }
    let Some(mut html) = body else {
        return Vec::new();
    };

    let mut comments = parse_comment_nodes(&html, opts.max_comments);
    if comments.is_empty() && maybe_login(&client, opts).await {
        // Login-gated threads return an empty partial for guests.
        if let Some(retry_html) =
            request_comment_partial(&client, candidate, opts, &mid, &doc_id).await
        {
            html = retry_html;
            comments = parse_comment_nodes(&html, opts.max_comments);
        }
    }
    comments
}

pub(crate) fn parse_comment_nodes(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let mut nodes = Vec::new();
    for container in COMMENT_CONTAINERS {
        if let Ok(sel) = Selector::parse(container) {
            nodes = doc.select(&sel).collect();
            if !nodes.is_empty() {
                break;
            }
        }
    }

    let mut results = Vec::new();
    for node in nodes {
        let text = select_text(
            node,
            &[
                ".xe_content",
                ".xe_comment",
                ".bd_cmt",
                ".fdb_cont",
                ".comment-content",
                "p",
            ],
        );
        if text.is_empty() {
            continue;
        }
        let author = {
            let a = select_text(
                node,
                &[".author", ".nick", ".name", ".writer", "strong.name", "a.nick"],
            );
            (!a.is_empty()).then_some(a)
        };
        let ts = attr_or_text(node, "time[datetime]", "datetime")
            .or_else(|| attr_or_text(node, ".date", "title"));
        results.push(ForumComment::new(author, text, ts));
        if cap_reached(results.len(), max) {
            break;
        }
    }
    results
}

/// One login attempt with credentials from the environment; returns whether a
/// logged-in session was established.
async fn maybe_login(client: &reqwest::Client, opts: &CommentOptions) -> bool {
    let (Some(user_id), Some(password)) = (&opts.theqoo_id, &opts.theqoo_pw) else {
        return false;
    };

    // Fetch home to obtain the Rhymix CSRF token.
    let token = match client
        .get(HOME_URL)
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .send()
        .await
    {
        Ok(resp) => resp.text().await.ok().and_then(|body| csrf_token(&body)),
        Err(_) => None,
    };

    let mut request = client
        .post(INDEX_URL)
        .query(&[("module", "member"), ("act", "procMemberLogin")])
        .form(&[
            ("user_id", user_id.as_str()),
            ("password", password.as_str()),
            ("keep_signed", "Y"),
        ])
        .header(reqwest::header::USER_AGENT, &opts.user_agent)
        .header(reqwest::header::REFERER, HOME_URL)
        .header("X-Requested-With", "XMLHttpRequest");
    if let Some(token) = token {
        request = request.header("X-CSRF-Token", token);
    }

    match request.send().await {
        Ok(resp) if resp.status().as_u16() < 400 => resp
            .cookies()
            .any(|c| c.name() == "rx_login_status" || c.name() == "xe_logged"),
        _ => false,
    }
}

pub(crate) fn csrf_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"meta[name="csrf-token"]"#).ok()?;
    let content = doc.select(&sel).next()?.value().attr("content")?;
    (!content.is_empty()).then(|| content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_matches_numeric_square_links_only() {
        let html = r#"
            <table><tr>
                <td><a href="/square/3500123">핫한 게시글</a></td>
                <td class="nik">익명</td>
                <td class="time">13:25</td>
            </tr><tr>
                <td><a href="/square/notice">공지</a></td>
            </tr></table>
        "#;
        let posts = parse_listing("https://theqoo.net/square", html);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://theqoo.net/square/3500123");
        assert_eq!(posts[0].published_at_raw.as_deref(), Some("13:25"));
    }

    #[test]
    fn path_ids_from_thread_url() {
        assert_eq!(
            path_ids("https://theqoo.net/square/3500123"),
            Some(("square".to_string(), "3500123".to_string()))
        );
        assert_eq!(path_ids("https://theqoo.net/"), None);
    }

    #[test]
    fn parses_comment_partial_containers() {
        let html = r#"
            <ul class="bd_lst_cmt">
              <li>
                <strong class="name">익명1</strong>
                <time datetime="2025-11-20T13:30:00+09:00">13:30</time>
                <div class="xe_content">첫 댓글 내용</div>
              </li>
              <li>
                <a class="nick">익명2</a>
                <span class="date">2025.11.20 13:31</span>
                <div class="xe_content">둘째 댓글</div>
              </li>
            </ul>
        "#;
        let comments = parse_comment_nodes(html, 0);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "첫 댓글 내용");
        assert_eq!(
            comments[0].published_at.as_deref(),
            Some("2025-11-20T13:30:00+09:00")
        );
        assert_eq!(comments[1].author.as_deref(), Some("익명2"));
    }

    #[test]
    fn csrf_token_from_meta() {
        let html = r#"<head><meta name="csrf-token" content="tok123"></head>"#;
        assert_eq!(csrf_token(html), Some("tok123".to_string()));
        assert_eq!(csrf_token("<head></head>"), None);
    }
}
