//! Persistent `{ids, urls}` twin-set providing exactly-once storage.
//!
//! The JSON file is a cache; the append-only logs are the source of truth.
//! On startup every `*.jsonl` in the output directory is scanned and any
//! missing id/url is unioned in, so deleting `_index.json` (or editing the
//! logs) self-heals on the next run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::core::urlnorm::normalize_url;

const INDEX_FILE: &str = "_index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashSet<String>,
    urls: HashSet<String>,
    dirty: bool,
}

pub struct DocumentIndex {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl DocumentIndex {
    pub fn open(output_dir: &Path) -> Self {
        let path = output_dir.join(INDEX_FILE);
        if let Err(e) = std::fs::create_dir_all(output_dir) {
            warn!("could not create output dir {}: {}", output_dir.display(), e);
        }

        let mut inner = Inner::default();
        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<IndexFile>(&text).map_err(|e| e.to_string())
                }) {
                Ok(file) => {
                    inner.ids.extend(file.ids);
                    inner.urls.extend(file.urls);
                }
                Err(e) => {
                    // Corrupt or unreadable index; the log scan rebuilds it.
                    warn!("index file {} unreadable ({}); rebuilding", path.display(), e);
                }
            }
        }

        Self::scan_logs(output_dir, &mut inner);
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    fn scan_logs(output_dir: &Path, inner: &mut Inner) {
        let Ok(entries) = std::fs::read_dir(output_dir) else {
            return;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "jsonl").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            for (line_no, line) in contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record: serde_json::Value = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(_) => {
                        warn!(
                            "skipping malformed JSONL line {}:{}",
                            path.display(),
                            line_no + 1
                        );
                        continue;
                    }
                };
                if let Some(doc_id) = record.get("id").and_then(|v| v.as_str()) {
                    if inner.ids.insert(doc_id.to_string()) {
                        inner.dirty = true;
                    }
                }
                if let Some(url) = record.get("url").and_then(|v| v.as_str()) {
                    let norm = normalize_url(url);
                    if !norm.is_empty() && inner.urls.insert(norm) {
                        inner.dirty = true;
                    }
                }
            }
        }
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.inner.lock().expect("index lock").ids.contains(doc_id)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        let norm = normalize_url(url);
        self.inner.lock().expect("index lock").urls.contains(&norm)
    }

    pub fn add(&self, doc_id: &str) {
        let mut inner = self.inner.lock().expect("index lock");
        if inner.ids.insert(doc_id.to_string()) {
            inner.dirty = true;
        }
    }

    pub fn add_url(&self, url: &str) {
        let norm = normalize_url(url);
        if norm.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().expect("index lock");
        if inner.urls.insert(norm) {
            inner.dirty = true;
        }
    }

    /// Write the JSON file, only when something changed since the last flush.
    pub fn flush(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("index lock");
        if !inner.dirty {
            return Ok(());
        }
        let mut ids: Vec<&String> = inner.ids.iter().collect();
        ids.sort();
        let mut urls: Vec<&String> = inner.urls.iter().collect();
        urls.sort();
        let payload = serde_json::json!({ "ids": ids, "urls": urls });
        std::fs::write(&self.path, serde_json::to_string_pretty(&payload)?)?;
        inner.dirty = false;
        Ok(())
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.lock().expect("index lock");
        let mut ids: Vec<String> = inner.ids.iter().cloned().collect();
        ids.sort();
        let mut urls: Vec<String> = inner.urls.iter().cloned().collect();
        urls.sort();
        (ids, urls)
    }
}
