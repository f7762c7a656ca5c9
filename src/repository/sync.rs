// src/repository/sync.rs

//! Repository synchronization
//!
//! One pass over a repository runs strictly in order:
//!
//! 1. fetch the index and compare its checksum with the stored checkpoint,
//!    stopping early when nothing changed;
//! 2. build the chart set and import it as one bulk upsert;
//! 3. remove the repository's charts that are no longer listed;
//! 4. fetch icons and chart files on a bounded worker pool, where individual
//!    failures are logged and counted but never fail the pass;
//! 5. record the new checksum.
//!
//! The checkpoint is written last, so a pass that fails part-way is retried
//! in full on the next run.

use crate::config::SyncSection;
use crate::error::{Error, Result};
use crate::models::{Chart, ChartVersion, Repo};
use crate::pool;
use crate::store::CatalogStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::artifacts::{FileImporter, FilesOutcome, IconOutcome};
use super::builder::charts_from_index;
use super::client::HttpClient;
use super::index::{fetch_repo_index, index_checksum, parse_repo_index};

/// Default artifact fan-out concurrency
pub const DEFAULT_WORKERS: usize = 10;

/// Tunables for a sync pass
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Concurrent artifact jobs
    pub workers: usize,
    /// Accept an index with no charts even when the repository has charts stored
    pub allow_empty_index: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            allow_empty_index: false,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &SyncSection) -> Self {
        Self {
            workers: config.workers,
            allow_empty_index: config.allow_empty_index,
        }
    }
}

/// Counts from a completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub charts: usize,
    pub charts_removed: usize,
    pub files_imported: usize,
    pub files_present: usize,
    pub files_failed: usize,
    pub icons_imported: usize,
    pub icons_failed: usize,
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Index unchanged since the last successful pass
    Skipped,
    Synced(SyncReport),
}

/// One unit of artifact work
#[derive(Debug, Clone)]
pub enum ArtifactJob {
    Icon(Chart),
    /// Versions of one chart sharing an archive digest
    Files {
        chart: Chart,
        versions: Vec<ChartVersion>,
    },
}

impl ArtifactJob {
    fn describe(&self) -> String {
        match self {
            ArtifactJob::Icon(chart) => format!("icon of {}", chart.id),
            ArtifactJob::Files { chart, versions } => {
                let names: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
                format!("files of {} {}", chart.id, names.join(","))
            }
        }
    }

    async fn run(self, importer: &FileImporter) -> (String, JobResult) {
        let label = self.describe();
        let result = match self {
            ArtifactJob::Icon(chart) => {
                JobResult::Icon(importer.fetch_and_import_icon(&chart).await)
            }
            ArtifactJob::Files { chart, versions } => {
                JobResult::Files(importer.fetch_and_import_files(&chart, &versions).await)
            }
        };
        (label, result)
    }
}

enum JobResult {
    Icon(Result<IconOutcome>),
    Files(Result<FilesOutcome>),
}

/// Order the artifact work for a chart set
///
/// Icons come first, then each chart's newest version, then historic
/// versions. Versions of a chart that share a digest form one job; versions
/// without a digest are never merged.
pub fn artifact_jobs(charts: &[Chart]) -> Vec<ArtifactJob> {
    let mut icons = Vec::new();
    let mut latest = Vec::new();
    let mut historic = Vec::new();

    for chart in charts {
        if !chart.icon.trim().is_empty() {
            icons.push(ArtifactJob::Icon(chart.clone()));
        }

        let mut groups: Vec<Vec<ChartVersion>> = Vec::new();
        for version in &chart.chart_versions {
            let shared = groups.iter_mut().find(|group| {
                !version.digest.is_empty() && group[0].digest == version.digest
            });
            match shared {
                Some(group) => group.push(version.clone()),
                None => groups.push(vec![version.clone()]),
            }
        }

        for (i, versions) in groups.into_iter().enumerate() {
            let job = ArtifactJob::Files {
                chart: chart.clone(),
                versions,
            };
            if i == 0 {
                latest.push(job);
            } else {
                historic.push(job);
            }
        }
    }

    icons.extend(latest);
    icons.extend(historic);
    icons
}

/// Drives sync passes against a catalog store
pub struct SyncOrchestrator {
    store: Arc<dyn CatalogStore>,
    http: Arc<dyn HttpClient>,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        http: Arc<dyn HttpClient>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            http,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Run one pass over a repository
    ///
    /// Fetch, parse and store failures abort the pass with the catalog and
    /// checkpoint left at their last successful state.
    pub async fn sync_repo(&self, repo: &Repo) -> Result<SyncOutcome> {
        info!("Synchronizing repository: {}", repo.name);

        let data = fetch_repo_index(self.http.as_ref(), repo).await?;
        let checksum = index_checksum(&data);
        if self.store.repo_already_processed(&repo.name, &checksum).await {
            info!("Repository {} unchanged (checksum {}), skipping", repo.name, checksum);
            return Ok(SyncOutcome::Skipped);
        }

        let index = parse_repo_index(&data)?;
        let charts = charts_from_index(&index, repo);
        debug!("Built {} charts from index of {}", charts.len(), repo.name);

        if charts.is_empty() && !self.options.allow_empty_index {
            let stored = self.store.list_charts(&repo.name).await?;
            if !stored.is_empty() {
                return Err(Error::ParseError(format!(
                    "Index of {} lists no charts but {} are stored; refusing to remove them",
                    repo.name,
                    stored.len()
                )));
            }
        }

        let charts_removed = self.store.sync(repo, &charts).await?;
        if charts_removed > 0 {
            info!("Removed {} charts no longer listed by {}", charts_removed, repo.name);
        }

        let mut report = self.import_artifacts(repo, &charts).await;
        report.charts = charts.len();
        report.charts_removed = charts_removed;

        self.store.update_last_check(repo, &checksum, Utc::now()).await?;

        info!(
            "Synchronized {} charts from repository {} \
             ({} chart files imported, {} failed; {} icons imported, {} failed)",
            report.charts,
            repo.name,
            report.files_imported,
            report.files_failed,
            report.icons_imported,
            report.icons_failed
        );
        Ok(SyncOutcome::Synced(report))
    }

    /// Fan out artifact jobs and tally their results
    async fn import_artifacts(&self, repo: &Repo, charts: &[Chart]) -> SyncReport {
        let importer = Arc::new(FileImporter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.http),
            repo.clone(),
        ));
        let jobs = artifact_jobs(charts);
        debug!("Dispatching {} artifact jobs for {}", jobs.len(), repo.name);

        let mut results = pool::spawn_workers(jobs, self.options.workers, move |job: ArtifactJob| {
            let importer = Arc::clone(&importer);
            async move { job.run(&importer).await }
        });

        let mut report = SyncReport::default();
        while let Some((label, result)) = results.recv().await {
            match result {
                JobResult::Icon(Ok(IconOutcome::Imported { .. })) => report.icons_imported += 1,
                JobResult::Icon(Ok(IconOutcome::NoIcon)) => {}
                JobResult::Icon(Err(e)) => {
                    warn!("Failed to import {}: {}", label, e);
                    report.icons_failed += 1;
                }
                JobResult::Files(Ok(outcome)) => {
                    report.files_imported += outcome.imported;
                    report.files_present += outcome.already_present;
                }
                JobResult::Files(Err(e)) => {
                    warn!("Failed to import {}: {}", label, e);
                    report.files_failed += 1;
                }
            }
        }
        report
    }

    /// Remove all catalog state of a repository
    pub async fn delete_repo(&self, repo_name: &str) -> Result<()> {
        info!("Deleting repository: {}", repo_name);
        self.store.delete_repo(repo_name).await
    }

    /// Sync every repository once, in order, logging failures
    ///
    /// Returns the number of repositories that failed.
    pub async fn sync_all(&self, repos: &[Repo]) -> usize {
        let mut failed = 0;
        for repo in repos {
            if let Err(e) = self.sync_repo(repo).await {
                error!("Sync of repository {} failed: {}", repo.name, e);
                failed += 1;
            }
        }
        failed
    }

    /// Sync `repos` every `interval` until cancelled
    ///
    /// The first round starts immediately. A round in progress finishes its
    /// current repository before cancellation is observed.
    pub async fn run_periodic(
        &self,
        repos: Vec<Repo>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Periodic sync stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let mut failed = 0;
            for repo in &repos {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.sync_repo(repo).await {
                    error!("Sync of repository {} failed: {}", repo.name, e);
                    failed += 1;
                }
            }
            debug!("Sync round finished, {} of {} repositories failed", failed, repos.len());
        }
    }
}
