//! History Surface (`GET /history`, `GET /history/metadata/<date>/<filename>`):
//! a read-only scan of the output directory hierarchy `outputs/<date>/<filename>`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dispatch_core::metadata_store::MetadataStore;
use serde::Serialize;
use serde_json::Value as Json;

use crate::image_metadata;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub path: String,
    pub created: DateTime<Utc>,
}

/// Lists artifacts under `output_dir/<date>/<filename>`, newest first.
pub async fn list(output_dir: &Path) -> anyhow::Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    let mut date_dirs = match tokio::fs::read_dir(output_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };

    while let Some(date_dir) = date_dirs.next_entry().await? {
        if !date_dir.file_type().await?.is_dir() {
            continue;
        }
        let date_name = date_dir.file_name().to_string_lossy().to_string();
        let mut files = tokio::fs::read_dir(date_dir.path()).await?;
        while let Some(file) = files.next_entry().await? {
            if !file.file_type().await?.is_file() {
                continue;
            }
            let filename = file.file_name().to_string_lossy().to_string();
            let meta = file.metadata().await?;
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            entries.push(HistoryEntry { filename: filename.clone(), path: format!("{date_name}/{filename}"), created });
        }
    }

    entries.sort_by_key(|e| std::cmp::Reverse(e.created));
    Ok(entries)
}

/// Looks up metadata for `<date>/<filename>`: the metadata store first,
/// falling back to the artifact's own embedded metadata.
pub fn metadata(output_dir: &Path, store: &MetadataStore, date: &str, filename: &str) -> anyhow::Result<Option<Json>> {
    let rel = format!("{date}/{filename}");
    if let Some(found) = store.get(&rel)? {
        return Ok(Some(found));
    }
    let path: PathBuf = output_dir.join(date).join(filename);
    if !path.exists() {
        return Ok(None);
    }
    Ok(image_metadata::fallback_metadata(&path))
}
