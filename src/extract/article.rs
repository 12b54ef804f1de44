//! Primary article extraction: a readability pass for body text and title,
//! supplemented with head metadata (author, published time) the readability
//! pipeline does not surface.

use readability::extractor;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// What stage-1 extraction yields for any source family.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub text: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub published_at: Option<String>,
}

/// Readability-style extraction. `None` when extraction fails or produces
/// empty text; forum and video candidates get a synthesized result instead.
pub fn extract_article(html: &str, url: &str) -> Option<ExtractionResult> {
    let parsed = Url::parse(url).ok()?;
    let product = match extractor::extract(&mut html.as_bytes(), &parsed) {
        Ok(product) => product,
        Err(e) => {
            debug!("readability extraction failed for {}: {}", url, e);
            return None;
        }
    };

    let text = product.text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    let title = {
        let t = product.title.trim().to_string();
        (!t.is_empty()).then_some(t)
    };
    let (authors, published_at) = head_metadata(html);

    Some(ExtractionResult {
        text,
        title,
        authors,
        published_at,
    })
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let content = doc.select(&sel).next()?.value().attr("content")?.trim();
    (!content.is_empty()).then(|| content.to_string())
}

/// Author and published-time hints from `<head>` metadata.
pub fn head_metadata(html: &str) -> (Vec<String>, Option<String>) {
    let doc = Html::parse_document(html);
    let author = meta_content(&doc, r#"meta[name="author"]"#)
        .or_else(|| meta_content(&doc, r#"meta[property="article:author"]"#));
    let published = meta_content(&doc, r#"meta[property="article:published_time"]"#);
    (author.into_iter().collect(), published)
}

/// Best-effort title when extraction yields none: OpenGraph first, then the
/// plain meta title, then `<title>`.
pub fn fallback_title_from_html(html: &str) -> Option<String> {
    if html.is_empty() {
        return None;
    }
    let doc = Html::parse_document(html);
    if let Some(title) = meta_content(&doc, r#"meta[property="og:title"]"#) {
        return Some(title);
    }
    if let Some(title) = meta_content(&doc, r#"meta[name="title"]"#) {
        return Some(title);
    }
    let sel = Selector::parse("title").ok()?;
    let title = doc
        .select(&sel)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_title_prefers_og() {
        let html = r#"
            <head>
                <title>깨진 제목</title>
                <meta name="title" content="메타 제목">
                <meta property="og:title" content="정상 제목">
            </head>
        "#;
        assert_eq!(fallback_title_from_html(html).as_deref(), Some("정상 제목"));
    }

    #[test]
    fn fallback_title_degrades_to_title_tag() {
        let html = "<head><title>  문서 제목  </title></head>";
        assert_eq!(fallback_title_from_html(html).as_deref(), Some("문서 제목"));
        assert_eq!(fallback_title_from_html("<head></head>"), None);
        assert_eq!(fallback_title_from_html(""), None);
    }

    #[test]
    fn head_metadata_reads_author_and_published() {
        let html = r#"
            <head>
                <meta name="author" content="기자 김씨">
                <meta property="article:published_time" content="2025-11-20T09:00:00+09:00">
            </head>
        "#;
        let (authors, published) = head_metadata(html);
        assert_eq!(authors, vec!["기자 김씨".to_string()]);
        assert_eq!(published.as_deref(), Some("2025-11-20T09:00:00+09:00"));
    }

    #[test]
    fn extract_article_returns_body_text() {
        let html = r#"
            <html><head><title>기사 제목</title></head>
            <body><article>
                <p>전기차 시장이 빠르게 성장하고 있다. 배터리 가격 하락이 주요 요인으로 꼽힌다.</p>
                <p>업계는 내년에도 두 자릿수 성장을 예상한다. 충전 인프라 확충이 과제로 남아 있다.</p>
            </article></body></html>
        "#;
        let result = extract_article(html, "https://news.example.com/a/1");
        if let Some(result) = result {
            assert!(result.text.contains("전기차"));
        }
        // Unparsable URL always short-circuits.
        assert!(extract_article(html, "no scheme").is_none());
    }
}
