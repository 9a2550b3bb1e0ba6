use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use marquee_events::{Bus, Envelope};
use marquee_topics as topics;
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, warn};

use crate::catalog::CatalogEntry;

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no background is both downloaded and present on disk")]
    NoneAvailable,
}

/// A chosen background: the absolute path to the image file plus the full
/// catalog entry it came from.
#[derive(Debug, Clone)]
pub struct Selection {
    pub path: PathBuf,
    pub metadata: CatalogEntry,
}

/// UI-facing side of the notification channel.
///
/// Holds a read-only copy of catalog data delivered over the bus (never the
/// coordinator's live structure) and answers random-pick queries against it.
/// `last_shown` is instance state, one selector per UI session.
pub struct BackgroundSelector {
    dir: PathBuf,
    catalog: Arc<RwLock<Vec<CatalogEntry>>>,
    catalog_ready: watch::Receiver<bool>,
    image_ready: watch::Receiver<bool>,
    last_shown: Option<String>,
}

impl BackgroundSelector {
    pub fn new(bus: &Bus) -> Self {
        Self::with_dir(bus, crate::paths::backgrounds_dir())
    }

    /// Subscribes with replay, so a selector constructed after the backend
    /// already emitted still converges on the latest known state.
    pub fn with_dir(bus: &Bus, dir: PathBuf) -> Self {
        let catalog = Arc::new(RwLock::new(Vec::new()));
        let (catalog_tx, catalog_ready) = watch::channel(false);
        let (image_tx, image_ready) = watch::channel(false);
        let (history, rx) = bus.subscribe_with_replay();
        tokio::spawn(listen(history, rx, catalog.clone(), catalog_tx, image_tx));
        Self {
            dir,
            catalog,
            catalog_ready,
            image_ready,
            last_shown: None,
        }
    }

    /// One random, currently-available background that differs from the last
    /// one shown whenever an alternative exists.
    ///
    /// Waits for catalog data and for at least one image to have become
    /// available (this run or a prior one), then verifies presence on disk at
    /// call time: the catalog's `downloaded` flag is a hint, not a guarantee,
    /// since files can be deleted externally. A backend error also ends the
    /// wait, so a run that dies before producing anything yields
    /// [`SelectionError::NoneAvailable`] rather than a hang.
    pub async fn random_background(&mut self) -> Result<Selection, SelectionError> {
        self.wait_ready().await;

        let entries = self.catalog.read().await.clone();
        let mut eligible: Vec<(PathBuf, CatalogEntry)> = Vec::new();
        for entry in entries {
            if !entry.downloaded {
                continue;
            }
            let Some(filename) = entry.filename.as_deref() else {
                continue;
            };
            let path = self.dir.join(filename);
            if fs::File::open(&path).await.is_ok() {
                eligible.push((path, entry));
            }
        }
        if eligible.is_empty() {
            return Err(SelectionError::NoneAvailable);
        }

        // Rejection sampling, bounded by the eligible-set size: keep drawing
        // untried indices until the pick differs from the last shown entry.
        // Once every index has been tried, the last pick stands; with one
        // eligible entry repetition is unavoidable and accepted.
        let mut tried: HashSet<usize> = HashSet::new();
        let mut pick = random_index(eligible.len());
        tried.insert(pick);
        while self.last_shown.as_deref() == Some(eligible[pick].1.url.as_str())
            && tried.len() < eligible.len()
        {
            while tried.contains(&pick) {
                pick = random_index(eligible.len());
            }
            tried.insert(pick);
        }

        let (path, metadata) = eligible.swap_remove(pick);
        debug!("selected background {}", path.display());
        self.last_shown = Some(metadata.url.clone());
        Ok(Selection { path, metadata })
    }

    async fn wait_ready(&mut self) {
        let mut catalog_ready = self.catalog_ready.clone();
        while !*catalog_ready.borrow() {
            if catalog_ready.changed().await.is_err() {
                return;
            }
        }
        let mut image_ready = self.image_ready.clone();
        while !*image_ready.borrow() {
            if image_ready.changed().await.is_err() {
                return;
            }
        }
    }
}

// Uniform over the whole eligible set; every index is selectable.
fn random_index(len: usize) -> usize {
    (rand::random::<u32>() as usize) % len.max(1)
}

async fn listen(
    history: Vec<Envelope>,
    mut rx: broadcast::Receiver<Envelope>,
    catalog: Arc<RwLock<Vec<CatalogEntry>>>,
    catalog_tx: watch::Sender<bool>,
    image_tx: watch::Sender<bool>,
) {
    for env in &history {
        apply(env, &catalog, &catalog_tx, &image_tx).await;
    }
    loop {
        match rx.recv().await {
            Ok(env) => apply(&env, &catalog, &catalog_tx, &image_tx).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!("selector lagged behind the bus, skipped {skipped} events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn apply(
    env: &Envelope,
    catalog: &RwLock<Vec<CatalogEntry>>,
    catalog_tx: &watch::Sender<bool>,
    image_tx: &watch::Sender<bool>,
) {
    match env.kind.as_str() {
        topics::TOPIC_BACKGROUNDS_CATALOG_UPDATED => {
            match serde_json::from_value::<Vec<CatalogEntry>>(env.payload.clone()) {
                Ok(entries) => {
                    *catalog.write().await = entries;
                    let _ = catalog_tx.send(true);
                }
                Err(err) => warn!("catalog payload malformed: {err}"),
            }
        }
        topics::TOPIC_BACKGROUNDS_IMAGE_AVAILABLE
        | topics::TOPIC_BACKGROUNDS_DOWNLOADS_COMPLETE => {
            let _ = image_tx.send(true);
        }
        // A backend error releases both waits. The cached catalog stays as
        // delivered, so a caller with nothing on disk gets `NoneAvailable`
        // instead of waiting on flags that may never flip.
        topics::TOPIC_BACKGROUNDS_ERROR => {
            let _ = catalog_tx.send(true);
            let _ = image_tx.send(true);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::content_filename;
    use serde_json::{json, Map};
    use std::path::Path;

    fn entry_with_file(url: &str) -> CatalogEntry {
        CatalogEntry {
            url: url.to_string(),
            filename: Some(content_filename(url)),
            downloaded: true,
            metadata: Map::new(),
        }
    }

    async fn write_file(dir: &Path, entry: &CatalogEntry) {
        let name = entry.filename.as_deref().expect("filename");
        fs::write(dir.join(name), b"img").await.expect("write image");
    }

    fn publish_catalog(bus: &Bus, entries: &[CatalogEntry]) {
        bus.publish(topics::TOPIC_BACKGROUNDS_CATALOG_UPDATED, &entries);
        bus.publish(topics::TOPIC_BACKGROUNDS_DOWNLOADS_COMPLETE, &json!({}));
    }

    #[tokio::test]
    async fn none_available_when_no_file_backs_the_flags() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bus = Bus::new_with_replay(16, 16);
        // Flagged downloaded, but nothing was ever written to disk.
        publish_catalog(&bus, &[entry_with_file("http://x/a.jpg")]);

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        let err = selector.random_background().await.expect_err("no file");
        assert_eq!(err, SelectionError::NoneAvailable);
    }

    #[tokio::test]
    async fn backend_error_with_nothing_on_disk_fails_fast() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bus = Bus::new_with_replay(16, 16);
        // The run died before any catalog or image event, as on a fresh
        // install whose manifest fetch fails.
        bus.publish(
            topics::TOPIC_BACKGROUNDS_ERROR,
            &json!({"message": "error loading backgrounds from http://x/backgrounds.json"}),
        );

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            selector.random_background(),
        )
        .await
        .expect("selection must not hang after a backend error");
        assert_eq!(result.expect_err("nothing on disk"), SelectionError::NoneAvailable);
    }

    #[tokio::test]
    async fn externally_deleted_file_is_excluded_despite_flag() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let present = entry_with_file("http://x/present.jpg");
        let missing = entry_with_file("http://x/missing.jpg");
        write_file(tmp.path(), &present).await;

        let bus = Bus::new_with_replay(16, 16);
        publish_catalog(&bus, &[present.clone(), missing]);

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        for _ in 0..8 {
            let sel = selector.random_background().await.expect("selection");
            assert_eq!(sel.metadata.url, present.url);
        }
    }

    #[tokio::test]
    async fn consecutive_selections_differ_with_two_eligible() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = entry_with_file("http://x/a.jpg");
        let b = entry_with_file("http://x/b.jpg");
        write_file(tmp.path(), &a).await;
        write_file(tmp.path(), &b).await;

        let bus = Bus::new_with_replay(16, 16);
        publish_catalog(&bus, &[a, b]);

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        let mut last = selector.random_background().await.expect("first").metadata.url;
        for _ in 0..16 {
            let next = selector.random_background().await.expect("next").metadata.url;
            assert_ne!(next, last);
            last = next;
        }
    }

    #[tokio::test]
    async fn single_entry_repeats_rather_than_blocking() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let only = entry_with_file("http://x/only.jpg");
        write_file(tmp.path(), &only).await;

        let bus = Bus::new_with_replay(16, 16);
        publish_catalog(&bus, &[only.clone()]);

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        for _ in 0..4 {
            let sel = selector.random_background().await.expect("selection");
            assert_eq!(sel.metadata.url, only.url);
        }
    }

    #[tokio::test]
    async fn selection_returns_the_on_disk_path_and_metadata() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut entry = entry_with_file("http://x/a.jpg");
        entry.metadata.insert("author".into(), json!("somebody"));
        write_file(tmp.path(), &entry).await;

        let bus = Bus::new_with_replay(16, 16);
        publish_catalog(&bus, &[entry.clone()]);

        let mut selector = BackgroundSelector::with_dir(&bus, tmp.path().to_path_buf());
        let sel = selector.random_background().await.expect("selection");
        assert!(sel.path.exists());
        assert_eq!(sel.path, tmp.path().join(entry.filename.as_deref().unwrap()));
        assert_eq!(sel.metadata.metadata["author"], "somebody");
    }
}
