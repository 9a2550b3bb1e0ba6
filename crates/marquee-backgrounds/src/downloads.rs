use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use marquee_events::Bus;
use marquee_topics as topics;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::{content_filename, CatalogEntry, CatalogStore};

const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct DownloadTuning {
    pub concurrency: usize,
}

impl DownloadTuning {
    pub fn from_env() -> Self {
        let concurrency = std::env::var("MARQUEE_BG_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CONCURRENCY)
            .clamp(1, 64);
        Self { concurrency }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("canceled")]
    Canceled,
}

/// Bounded admission for concurrent downloads: a worker takes a slot before
/// it spawns and gives it back when its entry reaches a terminal state.
struct WorkerSlots {
    active: Mutex<usize>,
    notify: Notify,
}

impl WorkerSlots {
    fn new() -> Self {
        Self {
            active: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    async fn acquire(&self, max: usize, cancel: &CancellationToken) -> Result<(), ()> {
        let max = max.max(1);
        loop {
            {
                let mut active = self.active.lock().await;
                if *active < max {
                    *active += 1;
                    return Ok(());
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(()),
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn release(&self) {
        let mut active = self.active.lock().await;
        *active = active.saturating_sub(1);
        // notify_one stores a permit when nobody is parked yet, so a release
        // landing between the admission check and `notified()` still wakes
        // the single admitting task.
        self.notify.notify_one();
    }
}

/// State shared by every worker of one run.
struct RunState {
    catalog: Mutex<Vec<CatalogEntry>>,
    // Single-fire guard for the "first image available" notification,
    // regardless of which worker finishes first.
    image_seen: AtomicBool,
    slots: WorkerSlots,
}

/// Downloads every pending catalog entry into the backgrounds directory.
///
/// Per-entry state machine: pending -> downloading -> downloaded | failed.
/// A failed entry keeps `downloaded = false` so the next run's merge picks
/// it up again; nothing inside one run retries it. The whole snapshot is
/// persisted after each individual success so progress survives a crash.
#[derive(Clone)]
pub struct DownloadCoordinator {
    bus: Bus,
    client: reqwest::Client,
    store: CatalogStore,
    dir: PathBuf,
    tuning: DownloadTuning,
    cancel: CancellationToken,
}

impl DownloadCoordinator {
    pub fn new(
        bus: Bus,
        client: reqwest::Client,
        store: CatalogStore,
        dir: PathBuf,
        tuning: DownloadTuning,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            client,
            store,
            dir,
            tuning,
            cancel,
        }
    }

    /// Run the catalog to completion and return its final state.
    ///
    /// `image_seen` carries whether an image was already available before the
    /// run started (from a prior run's snapshot), which suppresses the
    /// single-fire availability notification here.
    pub async fn run(&self, catalog: Vec<CatalogEntry>, image_seen: bool) -> Vec<CatalogEntry> {
        if let Err(err) = fs::create_dir_all(self.tmp_dir()).await {
            self.publish_error("could not create backgrounds directory", &err.to_string());
            return catalog;
        }
        self.sweep_stale_partials().await;

        let pending: Vec<(usize, String)> = catalog
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.downloaded)
            .map(|(i, e)| (i, e.url.clone()))
            .collect();
        let state = Arc::new(RunState {
            catalog: Mutex::new(catalog),
            image_seen: AtomicBool::new(image_seen),
            slots: WorkerSlots::new(),
        });

        let mut tasks = Vec::with_capacity(pending.len());
        for (index, url) in pending {
            if state
                .slots
                .acquire(self.tuning.concurrency, &self.cancel)
                .await
                .is_err()
            {
                break;
            }
            let this = self.clone();
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                this.download_entry(index, url, &state).await;
                state.slots.release().await;
            }));
        }
        for task in tasks {
            if let Err(err) = task.await {
                warn!("download worker join error: {err}");
            }
        }

        let snapshot = state.catalog.lock().await.clone();
        if self.cancel.is_cancelled() {
            debug!("download run canceled before completion");
            return snapshot;
        }

        // Every entry is terminal now; tell listeners, then collect garbage.
        self.bus
            .publish(topics::TOPIC_BACKGROUNDS_DOWNLOADS_COMPLETE, &json!({}));
        self.cleanup_orphans(&snapshot).await;
        snapshot
    }

    async fn download_entry(&self, index: usize, url: String, state: &RunState) {
        let filename = content_filename(&url);
        self.publish_progress(&url, "started", None);

        match self.fetch_to_disk(&url, &filename).await {
            Ok(bytes) => {
                debug!("downloaded {url} ({bytes} bytes) as {filename}");
                self.record_success(index, &url, filename, state).await;
            }
            Err(DownloadError::Canceled) => {
                self.publish_progress(&url, "canceled", None);
            }
            Err(err) => {
                warn!("error downloading {url}: {err}");
                self.publish_progress(&url, "error", Some(&err.to_string()));
                self.publish_error(&format!("error downloading {url}"), &err.to_string());
            }
        }
    }

    /// Stream the remote bytes to a partial file, then rename into place so
    /// a file under the final name is always complete.
    async fn fetch_to_disk(&self, url: &str, filename: &str) -> Result<u64, DownloadError> {
        let part_path = self.tmp_dir().join(format!("{filename}.part"));
        let result = self.stream_to_part(url, &part_path).await;
        match result {
            Ok(bytes) => {
                fs::rename(&part_path, self.dir.join(filename)).await?;
                Ok(bytes)
            }
            Err(err) => {
                let _ = fs::remove_file(&part_path).await;
                Err(err)
            }
        }
    }

    async fn stream_to_part(&self, url: &str, part_path: &PathBuf) -> Result<u64, DownloadError> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = resp.bytes_stream();
        let mut file = fs::File::create(part_path).await?;
        let mut bytes = 0u64;
        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = self.cancel.cancelled() => return Err(DownloadError::Canceled),
            };
            let Some(next) = next else {
                break;
            };
            let chunk = next?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(bytes)
    }

    async fn record_success(
        &self,
        index: usize,
        url: &str,
        filename: String,
        state: &RunState,
    ) {
        let (snapshot, entry) = {
            let mut catalog = state.catalog.lock().await;
            let entry = &mut catalog[index];
            entry.filename = Some(filename);
            entry.downloaded = true;
            (catalog.clone(), catalog[index].clone())
        };

        // Persist after every success; a failure here is reported but the
        // in-memory state stays valid for the rest of the run.
        if let Err(err) = self.store.persist(&snapshot).await {
            warn!("could not save backgrounds list: {err}");
            self.publish_error("could not save backgrounds list", &err.to_string());
        }

        if !state.image_seen.swap(true, Ordering::SeqCst) {
            self.bus.publish(
                topics::TOPIC_BACKGROUNDS_IMAGE_AVAILABLE,
                &json!({"index": index, "entry": entry}),
            );
        }
        self.bus
            .publish(topics::TOPIC_BACKGROUNDS_CATALOG_UPDATED, &snapshot);
        self.publish_progress(url, "complete", None);
    }

    /// Delete files that no catalog entry claims anymore (entries removed by
    /// an earlier merge leave their images behind). The tmp subdirectory is
    /// left alone.
    pub async fn cleanup_orphans(&self, catalog: &[CatalogEntry]) {
        let keep: HashSet<&str> = catalog.iter().filter_map(|e| e.filename.as_deref()).collect();
        let mut scanned = 0u64;
        let mut kept = 0u64;
        let mut deleted = 0u64;
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(it) => it,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            scanned += 1;
            let fname = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if keep.contains(fname.as_str()) {
                kept += 1;
                continue;
            }
            if let Err(err) = fs::remove_file(&path).await {
                warn!("orphan cleanup remove failed {:?}: {err}", path);
                kept += 1;
                continue;
            }
            debug!("deleted orphaned background {fname}");
            deleted += 1;
        }
        self.bus.publish(
            topics::TOPIC_BACKGROUNDS_CLEANUP,
            &json!({"scanned": scanned, "kept": kept, "deleted": deleted}),
        );
    }

    /// Drop partials a crashed run left in the staging directory. Runs
    /// before any worker stages new ones, so everything found is stale.
    async fn sweep_stale_partials(&self) {
        let mut entries = match fs::read_dir(self.tmp_dir()).await {
            Ok(it) => it,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => debug!("removed stale partial {:?}", path),
                Err(err) => warn!("stale partial remove failed {:?}: {err}", path),
            }
        }
    }

    fn tmp_dir(&self) -> PathBuf {
        self.dir.join("tmp")
    }

    fn publish_progress(&self, url: &str, status: &str, error: Option<&str>) {
        let mut payload = json!({"url": url, "status": status});
        if let Some(err) = error {
            payload["error"] = Value::from(err);
        }
        self.bus
            .publish(topics::TOPIC_BACKGROUNDS_PROGRESS, &payload);
    }

    fn publish_error(&self, message: &str, details: &str) {
        self.bus.publish(
            topics::TOPIC_BACKGROUNDS_ERROR,
            &json!({"message": message, "details": details}),
        );
    }
}
