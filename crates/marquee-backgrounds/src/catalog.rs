use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::warn;

/// One remote background image and its local download state.
///
/// Identity is `url`; everything the manifest carries beyond the fields we
/// track (attribution, author, and so on) is kept in `metadata` and passed
/// through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl CatalogEntry {
    pub fn from_remote(url: String, metadata: Map<String, Value>) -> Self {
        Self {
            url,
            filename: None,
            downloaded: false,
            metadata,
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write catalog snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Local file name for a source URL: lowercase hex SHA-256 of the URL plus
/// the URL path's original extension. Stable across runs, distinct per URL,
/// so re-running the fetch logic never collides or duplicates files.
pub fn content_filename(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    match url_extension(url) {
        Some(ext) => format!("{digest}.{ext}"),
        None => digest,
    }
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reconcile the local snapshot against a freshly fetched manifest.
///
/// Local entries whose URL still appears remotely keep their
/// `downloaded`/`filename` state; remote entries with no local counterpart
/// are appended with `downloaded = false`; local entries absent from the
/// manifest are dropped. Yields exactly one entry per remote URL.
pub fn merge(local: Option<Vec<CatalogEntry>>, remote: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let Some(local) = local else {
        let mut seen: HashSet<String> = HashSet::new();
        return remote
            .into_iter()
            .filter(|e| seen.insert(e.url.clone()))
            .collect();
    };

    let remote_urls: HashSet<&str> = remote.iter().map(|e| e.url.as_str()).collect();
    let mut merged: Vec<CatalogEntry> = local
        .into_iter()
        .filter(|e| remote_urls.contains(e.url.as_str()))
        .collect();
    let mut seen: HashSet<String> = merged.iter().map(|e| e.url.clone()).collect();
    for entry in remote {
        if seen.insert(entry.url.clone()) {
            merged.push(entry);
        }
    }
    merged
}

/// Durable JSON snapshot of the catalog. The download coordinator is the
/// only writer; readers may open the file at any time.
#[derive(Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_path() -> Self {
        Self::new(crate::paths::catalog_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent or unparseable snapshots are both "no prior state", never fatal.
    pub async fn load(&self) -> Option<Vec<CatalogEntry>> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("catalog snapshot unreadable: {err}");
                return None;
            }
        };
        match serde_json::from_slice::<Vec<CatalogEntry>>(&bytes) {
            Ok(entries) => Some(entries),
            Err(err) => {
                warn!("catalog snapshot corrupt, treating as no prior state: {err}");
                None
            }
        }
    }

    /// Write to a temp file in the same directory, then rename over the
    /// snapshot path, so concurrent readers never observe a partial write.
    pub async fn persist(&self, entries: &[CatalogEntry]) -> Result<(), PersistError> {
        let body = serde_json::to_vec_pretty(entries)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
