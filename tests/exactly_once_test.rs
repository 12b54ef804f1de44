//! Exactly-once storage across runs: for every normalized URL at most one
//! line exists in the per-source logs, and that line exists iff the URL is
//! in the index — including after the index file is lost.

use corpus_scout::core::types::{CrawlMeta, DiscoveredVia, DiscoveryWindow, Document, Quality};
use corpus_scout::core::urlnorm::{normalize_url, sha1_hex};
use corpus_scout::storage::{DocumentIndex, MultiSourceJsonlWriter};

fn document(url: &str, source: &str) -> Document {
    let discovered_via = match source {
        "gdelt" => DiscoveredVia::News {
            keyword: "전기차".to_string(),
            seendate: None,
            window: DiscoveryWindow {
                start: "2025-10-01T00:00:00+00:00".to_string(),
                end: "2025-11-01T00:00:00+00:00".to_string(),
            },
        },
        "youtube" => DiscoveredVia::Video {
            keyword: "전기차".to_string(),
        },
        site => DiscoveredVia::Forum {
            site: site.to_string(),
            board: "https://example.com/board".to_string(),
            page: 1,
        },
    };
    Document {
        id: sha1_hex(&normalize_url(url)),
        source: source.to_string(),
        url: url.to_string(),
        snapshot_url: Some(url.to_string()),
        title: Some("제목".to_string()),
        text: "본문 텍스트".to_string(),
        lang: "kor".to_string(),
        published_at: Some("2025-10-15T09:00:00".to_string()),
        authors: vec![],
        discovered_via,
        quality: Quality {
            score: 0.5,
            reasons: vec![],
            keyword_coverage: 1.0,
            length: 6,
            keyword_hits: 1,
        },
        crawl: CrawlMeta {
            run_id: "test-run".to_string(),
            fetched_at: "2025-10-15T10:00:00Z".to_string(),
            fetched_from: "live".to_string(),
        },
        extra: serde_json::Map::new(),
    }
}

/// The store step the pipeline performs for one accepted document.
fn store(writer: &MultiSourceJsonlWriter, index: &DocumentIndex, doc: &Document) -> bool {
    if index.contains(&doc.id) || index.contains_url(&doc.url) {
        return false;
    }
    writer.append(doc).unwrap();
    index.add(&doc.id);
    index.add_url(&doc.url);
    true
}

fn count_lines_for(dir: &std::path::Path, normalized: &str) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap().flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            for line in std::fs::read_to_string(&path).unwrap().lines() {
                let record: serde_json::Value = serde_json::from_str(line).unwrap();
                if normalize_url(record["url"].as_str().unwrap()) == normalized {
                    count += 1;
                }
            }
        }
    }
    count
}

#[test]
fn urls_are_stored_at_most_once_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let writer = MultiSourceJsonlWriter::new(dir.path()).unwrap();

    // First run: three documents, one a URL-variant duplicate.
    {
        let index = DocumentIndex::open(dir.path());
        assert!(store(&writer, &index, &document("https://example.com/a/1", "gdelt")));
        assert!(store(
            &writer,
            &index,
            &document("https://theqoo.net/square/10", "theqoo")
        ));
        assert!(!store(
            &writer,
            &index,
            &document("https://EXAMPLE.com/a/1?utm_source=x", "gdelt")
        ));
        index.flush().unwrap();
    }

    // Second run, same discoveries: everything is an index duplicate.
    {
        let index = DocumentIndex::open(dir.path());
        assert!(!store(&writer, &index, &document("https://example.com/a/1", "gdelt")));
        assert!(!store(
            &writer,
            &index,
            &document("https://theqoo.net/square/10", "theqoo")
        ));
        index.flush().unwrap();
    }

    // Third run after losing the index file: the logs alone still block
    // duplicates.
    std::fs::remove_file(dir.path().join("_index.json")).unwrap();
    {
        let index = DocumentIndex::open(dir.path());
        assert!(!store(&writer, &index, &document("https://example.com/a/1", "gdelt")));
        index.flush().unwrap();
    }

    assert_eq!(count_lines_for(dir.path(), "https://example.com/a/1"), 1);
    assert_eq!(
        count_lines_for(dir.path(), "https://theqoo.net/square/10"),
        1
    );
    assert!(dir.path().join("gdelt.jsonl").exists());
    assert!(dir.path().join("forum_theqoo.jsonl").exists());
}
