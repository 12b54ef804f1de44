//! Generic comment sweep used when a site-specific fetcher yields nothing:
//! a battery of container selectors that cover the common Korean board
//! skins.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

use super::{attr_or_text, cap_reached, clean_ws, select_text, ForumComment};

const CONTAINERS: [&str; 15] = [
    "ul.cmt_list li",
    "div.cmt_list li",
    "div.comment_list li",
    "div.comments li",
    "#comment li",
    "#cmt li",
    "div#comment .comment",
    "div#cmt .comment",
    "li.comment",
    "div.comment",
    "div.reply",
    "li.reply",
    "div.reple",
    "li.reple",
    "table#cmttbl tr",
];

/// UI chrome that leaks into comment containers on several skins.
const BOILERPLATE: [&str; 4] = ["신고", "삭제", "추천", "비공개"];

static AUTHOR_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(익명|관리자)").expect("author label pattern"));

pub fn parse_comments(html: &str, max: usize) -> Vec<ForumComment> {
    let doc = Html::parse_document(html);
    let mut items = Vec::new();
    let mut seen_texts: HashSet<String> = HashSet::new();

    for container in CONTAINERS {
        let Ok(sel) = Selector::parse(container) else {
            continue;
        };
        for node in doc.select(&sel) {
            let text = select_text(
                node,
                &[
                    ".cmt_txt",
                    ".comment_txt",
                    ".comment-text",
                    ".comment-content",
                    ".txt",
                    ".text",
                    "p",
                ],
            );
            if text.chars().count() < 2 {
                continue;
            }
            if BOILERPLATE.contains(&text.as_str()) {
                continue;
            }
            if !seen_texts.insert(text.clone()) {
                continue;
            }
            let author = {
                let raw = select_text(
                    node,
                    &[
                        ".nickname",
                        ".nick",
                        ".name",
                        ".writer",
                        ".author",
                        ".user",
                        ".member",
                        ".ub-writer",
                    ],
                );
                let cleaned = clean_ws(&AUTHOR_LABEL_RE.replace_all(&raw, ""));
                (!cleaned.is_empty()).then_some(cleaned)
            };
            let ts = attr_or_text(node, "time[datetime]", "datetime")
                .or_else(|| attr_or_text(node, ".date", "title"))
                .or_else(|| attr_or_text(node, ".date", "data-time"))
                .or_else(|| attr_or_text(node, ".date", "data-datetime"))
                .or_else(|| attr_or_text(node, ".time", "datetime"));
            items.push(ForumComment::new(author, text, ts));
            if cap_reached(items.len(), max) {
                return items;
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeps_common_containers_and_skips_boilerplate() {
        let html = r#"
            <ul class="cmt_list">
              <li>
                <span class="nickname">댓글러</span>
                <span class="date" title="2025-11-20 15:00">15:00</span>
                <p class="cmt_txt">일반 댓글입니다</p>
              </li>
              <li><p class="cmt_txt">신고</p></li>
              <li><p class="cmt_txt">일반 댓글입니다</p></li>
            </ul>
        "#;
        let comments = parse_comments(html, 0);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author.as_deref(), Some("댓글러"));
        assert_eq!(comments[0].published_at.as_deref(), Some("2025-11-20 15:00"));
    }

    #[test]
    fn strips_author_labels() {
        let html = r#"
            <div class="comment">
              <span class="writer">익명 사용자7</span>
              <p>내용 있는 댓글</p>
            </div>
        "#;
        let comments = parse_comments(html, 0);
        assert_eq!(comments[0].author.as_deref(), Some("사용자7"));
    }

    #[test]
    fn cap_limits_results() {
        let html = r#"
            <ul class="cmt_list">
              <li><p>댓글 하나</p></li>
              <li><p>댓글 둘</p></li>
              <li><p>댓글 셋</p></li>
            </ul>
        "#;
        assert_eq!(parse_comments(html, 2).len(), 2);
    }
}
