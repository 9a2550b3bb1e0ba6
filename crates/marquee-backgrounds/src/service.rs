use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use marquee_events::Bus;
use marquee_topics as topics;
use serde_json::json;
use tokio::fs;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{self, CatalogEntry, CatalogStore};
use crate::downloads::{DownloadCoordinator, DownloadTuning};
use crate::manifest;

/// Explicit startup handshake between the UI-facing frontend and the
/// backend: the backend emits nothing and downloads nothing until the
/// frontend has registered its listeners and called [`ReadyGate::ready`].
#[derive(Default)]
pub struct ReadyGate {
    signaled: AtomicBool,
    notify: Notify,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; the first call releases the backend.
    pub fn ready(&self) {
        if !self.signaled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub async fn wait_ready(&self) {
        while !self.signaled.load(Ordering::SeqCst) {
            let notified = self.notify.notified();
            if self.signaled.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }
}

/// Backend owner of the catalog pipeline: load the local snapshot, fetch
/// and merge the remote manifest, then hand the catalog to the download
/// coordinator. All outcomes are reported on the bus; nothing here ever
/// terminates the process.
pub struct BackgroundService {
    bus: Bus,
    client: reqwest::Client,
    store: CatalogStore,
    dir: PathBuf,
    manifest_url: String,
    gate: Arc<ReadyGate>,
    cancel: CancellationToken,
}

impl BackgroundService {
    pub fn new(bus: Bus, manifest_url: impl Into<String>) -> Self {
        Self::with_paths(
            bus,
            manifest_url,
            CatalogStore::at_default_path(),
            crate::paths::backgrounds_dir(),
        )
    }

    pub fn with_paths(
        bus: Bus,
        manifest_url: impl Into<String>,
        store: CatalogStore,
        dir: PathBuf,
    ) -> Self {
        Self {
            bus,
            client: crate::http_client::client().clone(),
            store,
            dir,
            manifest_url: manifest_url.into(),
            gate: Arc::new(ReadyGate::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the shared HTTP client (shorter timeouts, test servers).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn ready_gate(&self) -> Arc<ReadyGate> {
        self.gate.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One full acquisition run. Expected to be called once per backend
    /// session; a future session's merge picks up whatever this one left
    /// undone.
    pub async fn run(&self) {
        self.gate.wait_ready().await;

        // Fast path to first paint: surface the prior run's snapshot before
        // touching the network at all.
        let local = self.store.load().await;
        let mut image_seen = false;
        if let Some(entries) = &local {
            info!("found existing catalog snapshot with {} entries", entries.len());
            self.bus
                .publish(topics::TOPIC_BACKGROUNDS_CATALOG_UPDATED, entries);
            if let Some((index, entry)) = self.first_on_disk(entries).await {
                image_seen = true;
                self.bus.publish(
                    topics::TOPIC_BACKGROUNDS_IMAGE_AVAILABLE,
                    &json!({"index": index, "entry": entry}),
                );
            }
        }

        let remote = match manifest::fetch_manifest(&self.client, &self.manifest_url).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("error loading backgrounds from {}: {err}", self.manifest_url);
                self.bus.publish(
                    topics::TOPIC_BACKGROUNDS_ERROR,
                    &json!({
                        "message": format!("error loading backgrounds from {}", self.manifest_url),
                        "details": err.to_string(),
                    }),
                );
                return;
            }
        };
        info!("manifest lists {} backgrounds", remote.len());

        let merged = catalog::merge(local, remote);
        if let Err(err) = self.store.persist(&merged).await {
            warn!("could not save backgrounds list: {err}");
            self.bus.publish(
                topics::TOPIC_BACKGROUNDS_ERROR,
                &json!({
                    "message": "could not save backgrounds list",
                    "details": err.to_string(),
                }),
            );
        }
        self.bus
            .publish(topics::TOPIC_BACKGROUNDS_CATALOG_UPDATED, &merged);

        let coordinator = DownloadCoordinator::new(
            self.bus.clone(),
            self.client.clone(),
            self.store.clone(),
            self.dir.clone(),
            DownloadTuning::from_env(),
            self.cancel.clone(),
        );
        coordinator.run(merged, image_seen).await;
    }

    async fn first_on_disk(&self, entries: &[CatalogEntry]) -> Option<(usize, CatalogEntry)> {
        for (index, entry) in entries.iter().enumerate() {
            if !entry.downloaded {
                continue;
            }
            let Some(filename) = entry.filename.as_deref() else {
                continue;
            };
            if fs::File::open(self.dir.join(filename)).await.is_ok() {
                return Some((index, entry.clone()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn ready_gate_releases_waiters_and_is_idempotent() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.ready();
        gate.ready();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate released")
            .expect("waiter task");

        // Late waiters pass straight through.
        tokio::time::timeout(Duration::from_secs(1), gate.wait_ready())
            .await
            .expect("no wait after ready");
    }
}
