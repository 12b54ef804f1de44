//! Per-source append-only JSONL logs: forums land in
//! `forum_{site}.jsonl`, everything else in `{source}.jsonl`. One JSON
//! object per line, UTF-8, `\n`-terminated.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::types::Document;

pub struct MultiSourceJsonlWriter {
    output_dir: PathBuf,
}

impl MultiSourceJsonlWriter {
    pub fn new(output_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_root)
            .with_context(|| format!("creating output dir {}", output_root.display()))?;
        Ok(Self {
            output_dir: output_root.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn file_path_for(&self, document: &Document) -> PathBuf {
        let source = if document.source.is_empty() {
            "unknown"
        } else {
            document.source.as_str()
        };
        let file_name = if document.discovered_via.is_forum() {
            format!("forum_{source}.jsonl")
        } else {
            format!("{source}.jsonl")
        };
        self.output_dir.join(file_name)
    }

    pub fn append(&self, document: &Document) -> Result<()> {
        let path = self.file_path_for(document);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log {}", path.display()))?;
        let line = serde_json::to_string(document)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CrawlMeta, DiscoveredVia, Quality};

    fn document(source: &str, discovered_via: DiscoveredVia) -> Document {
        Document {
            id: "abc".to_string(),
            source: source.to_string(),
            url: format!("https://{source}.example.com/1"),
            snapshot_url: None,
            title: Some("제목".to_string()),
            text: "본문".to_string(),
            lang: "kor".to_string(),
            published_at: Some("2025-11-20T10:00:00".to_string()),
            authors: vec![],
            discovered_via,
            quality: Quality {
                score: 0.5,
                reasons: vec![],
                keyword_coverage: 1.0,
                length: 2,
                keyword_hits: 1,
            },
            crawl: CrawlMeta {
                run_id: "r1".to_string(),
                fetched_at: "2025-11-20T11:00:00Z".to_string(),
                fetched_from: "live".to_string(),
            },
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn routes_forums_to_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MultiSourceJsonlWriter::new(dir.path()).unwrap();

        writer
            .append(&document(
                "dcinside",
                DiscoveredVia::Forum {
                    site: "dcinside".to_string(),
                    board: "b".to_string(),
                    page: 1,
                },
            ))
            .unwrap();
        writer
            .append(&document(
                "gdelt",
                DiscoveredVia::News {
                    keyword: "kw".to_string(),
                    seendate: None,
                    window: crate::core::types::DiscoveryWindow {
                        start: "s".to_string(),
                        end: "e".to_string(),
                    },
                },
            ))
            .unwrap();

        assert!(dir.path().join("forum_dcinside.jsonl").exists());
        assert!(dir.path().join("gdelt.jsonl").exists());
    }

    #[test]
    fn appended_lines_are_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MultiSourceJsonlWriter::new(dir.path()).unwrap();
        let doc = document(
            "youtube",
            DiscoveredVia::Video {
                keyword: "전기차".to_string(),
            },
        );
        writer.append(&doc).unwrap();
        writer.append(&doc).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("youtube.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["discovered_via"]["type"], "video");
        assert_eq!(parsed["source"], "youtube");
        assert!(contents.ends_with('\n'));
    }
}
