// src/watch/cache.rs

//! Package summary cache kept warm by repository events
//!
//! Every ready repository object is indexed straight from the index URL in
//! its status, and the resulting package summaries are stored under the
//! repository name as a CBOR list. Objects that are not ready, or deleted,
//! have their entry cleared so stale listings are never served.

use crate::config::CacheSection;
use crate::error::{Error, Result};
use crate::models::PackageSummary;
use crate::pool;
use crate::repository::{HttpClient, charts_from_index, get_checked, parse_repo_index};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::kv::KeyValueStore;
use super::source::{RepositoryWatcher, WatchEvent};
use super::unstructured::{is_repo_ready, repo_from_object, repo_name, status_url};

/// Watch-driven package summary cache
pub struct WatchCache {
    kv: Arc<dyn KeyValueStore>,
    watcher: Arc<dyn RepositoryWatcher>,
    http: Arc<dyn HttpClient>,
    max_workers: usize,
    watcher_started: Mutex<bool>,
}

impl WatchCache {
    /// Create a cache, failing if the key-value store is unreachable
    pub async fn new(
        kv: Arc<dyn KeyValueStore>,
        watcher: Arc<dyn RepositoryWatcher>,
        http: Arc<dyn HttpClient>,
        config: &CacheSection,
    ) -> Result<Arc<Self>> {
        kv.ping()
            .await
            .map_err(|e| Error::InitError(format!("Key-value store unreachable: {e}")))?;

        Ok(Arc::new(Self {
            kv,
            watcher,
            http,
            max_workers: config.max_workers.max(1),
            watcher_started: Mutex::new(false),
        }))
    }

    /// Whether a watch loop is running
    pub async fn is_watching(&self) -> bool {
        *self.watcher_started.lock().await
    }

    /// Open the watch stream and spawn the event loop
    ///
    /// Returns `None` when a loop is already running. If the stream cannot be
    /// opened the error is returned and a later call may try again.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<Option<JoinHandle<()>>> {
        let mut started = self.watcher_started.lock().await;
        if *started {
            info!("Repository watcher already started");
            return Ok(None);
        }

        let events = self.watcher.watch().await?;
        *started = true;
        info!("Repository watcher started, waiting for events");

        let cache = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            cache.process_events(events, cancel).await;
        })))
    }

    async fn process_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Repository watcher cancelled");
                    break;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                error!("Repository watch stream closed");
                break;
            };

            debug!("Got {} event", event.kind());
            let cache = Arc::clone(&self);
            tokio::spawn(async move {
                cache.handle_event(event).await;
            });
        }

        *self.watcher_started.lock().await = false;
    }

    /// Apply one event to the cache, logging failures
    pub async fn handle_event(&self, event: WatchEvent) {
        let result = match &event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => self.on_add_or_modify(obj).await,
            WatchEvent::Deleted(obj) => self.on_delete(obj).await,
        };
        match result {
            Ok(()) => {}
            Err(Error::NotReady(reason)) => info!("Skipping {} event: {}", event.kind(), reason),
            Err(e) => error!("Failed to process {} event: {}", event.kind(), e),
        }
    }

    /// Index a ready repository, or clear the entry of one that is not ready
    ///
    /// On failure the existing entry is left untouched.
    pub async fn on_add_or_modify(&self, obj: &Value) -> Result<()> {
        let start = Instant::now();
        let name = repo_name(obj)?;

        if !is_repo_ready(obj)? {
            info!("Skipping packages for repository {}, not in Ready state", name);
            self.kv.del(name).await?;
            return Ok(());
        }

        let summaries = self.index_repo(obj).await?;
        self.kv.set(name, encode_summaries(&summaries)?).await?;
        info!(
            "Indexed {} packages in repository {} in {} ms",
            summaries.len(),
            name,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Clear the entry of a deleted repository
    pub async fn on_delete(&self, obj: &Value) -> Result<()> {
        let name = repo_name(obj)?;
        if self.kv.del(name).await? {
            info!("Removed cached packages of deleted repository {}", name);
        }
        Ok(())
    }

    /// Build the summaries of a ready repository object
    async fn index_repo(&self, obj: &Value) -> Result<Vec<PackageSummary>> {
        let repo = repo_from_object(obj)?;
        let url = status_url(obj)?.ok_or_else(|| {
            Error::NotReady(format!("Repository {} has no status.url", repo.name))
        })?;
        debug!("Found repository {}, index URL {}", repo.name, url);

        // Served by the in-cluster source controller; no credentials needed
        let response = get_checked(self.http.as_ref(), url, None).await?;
        let index = parse_repo_index(&response.body)?;
        let charts = charts_from_index(&index, &repo);

        Ok(charts.iter().filter_map(PackageSummary::from_chart).collect())
    }

    /// Cached summaries of a repository; empty on a miss or any read error
    pub async fn package_summaries_for_repo(&self, name: &str) -> Vec<PackageSummary> {
        let bytes = match self.kv.get(name).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read cached packages of {}: {}", name, e);
                return Vec::new();
            }
        };

        match decode_summaries(&bytes) {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("Failed to decode cached packages of {}: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Cached summaries of many repositories, read on a bounded worker pool
    ///
    /// Objects without a name are logged and skipped.
    pub async fn fetch_package_summaries(
        self: &Arc<Self>,
        repos: Vec<Value>,
    ) -> Vec<PackageSummary> {
        let cache = Arc::clone(self);
        let mut results = pool::spawn_workers(repos, self.max_workers, move |obj: Value| {
            let cache = Arc::clone(&cache);
            async move {
                let name = repo_name(&obj)?.to_string();
                Ok::<_, Error>(cache.package_summaries_for_repo(&name).await)
            }
        });

        let mut summaries = Vec::new();
        while let Some(result) = results.recv().await {
            match result {
                Ok(found) => summaries.extend(found),
                Err(e) => error!("Skipping repository object: {}", e),
            }
        }
        summaries
    }
}

/// Serialize summaries as a CBOR list
pub fn encode_summaries(summaries: &[PackageSummary]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(summaries, &mut buf)
        .map_err(|e| Error::StoreError(format!("Failed to encode package summaries: {e}")))?;
    Ok(buf)
}

/// Deserialize a CBOR summary list
pub fn decode_summaries(data: &[u8]) -> Result<Vec<PackageSummary>> {
    ciborium::from_reader(data)
        .map_err(|e| Error::ParseError(format!("Invalid cached package summaries: {e}")))
}
