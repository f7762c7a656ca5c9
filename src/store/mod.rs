// src/store/mod.rs

//! Catalog persistence
//!
//! The catalog holds three kinds of records: charts (rebuilt from the index on
//! every sync pass), chart files (README/values/schema per version, created
//! lazily and deduplicated by digest) and per-repository checkpoints (the
//! checksum of the last successfully synced index).
//!
//! Two backends implement [`CatalogStore`] with the same observable
//! behavior:
//! - [`SqliteStore`] - relational tables with JSON document columns
//! - [`DocumentStore`] - `_id`-keyed document collections

mod document;
mod sqlite;

pub use document::{Collection, DocumentStore, Filter};
pub use sqlite::SqliteStore;

use crate::config::{StorageBackend, StorageSection};
use crate::error::Result;
use crate::models::{Chart, ChartFiles, Repo, RepoCheckpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Table/collection holding chart documents
pub const CHARTS: &str = "charts";
/// Table/collection holding repository checkpoints
pub const REPOS: &str = "repos";
/// Table/collection holding chart files
pub const FILES: &str = "files";

/// Persistence contract shared by every catalog backend
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Upsert every chart, keyed by chart id, as one atomic bulk write
    async fn import_charts(&self, repo: &Repo, charts: &[Chart]) -> Result<()>;

    /// Delete charts of `repo_name` whose id is not in `keep_ids`
    ///
    /// Returns the number of charts removed.
    async fn remove_missing_charts(&self, repo_name: &str, keep_ids: &[String]) -> Result<usize>;

    /// Whether the stored checkpoint for `repo_name` has this checksum
    ///
    /// Any read failure counts as "not processed" so the repository is
    /// re-synced rather than skipped.
    async fn repo_already_processed(&self, repo_name: &str, checksum: &str) -> bool;

    /// Record a successful sync of `repo` at `checksum`
    async fn update_last_check(
        &self,
        repo: &Repo,
        checksum: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove every chart, chart files record and checkpoint of a repository
    async fn delete_repo(&self, repo_name: &str) -> Result<()>;

    /// Whether chart files already exist for this id, repository and digest
    async fn chart_files_exist(
        &self,
        files_id: &str,
        repo_name: &str,
        namespace: &str,
        digest: &str,
    ) -> Result<bool>;

    /// Insert or replace chart files for one chart version
    async fn insert_chart_files(&self, chart_id: &str, files: &ChartFiles) -> Result<()>;

    /// Attach normalized icon bytes to a stored chart
    async fn update_icon(
        &self,
        repo: &Repo,
        chart_id: &str,
        raw_icon: &[u8],
        content_type: &str,
    ) -> Result<()>;

    /// Fetch a chart by id
    async fn get_chart(&self, chart_id: &str) -> Result<Option<Chart>>;

    /// List the charts of a repository, ordered by id
    async fn list_charts(&self, repo_name: &str) -> Result<Vec<Chart>>;

    /// Fetch chart files by files id
    async fn get_chart_files(&self, files_id: &str) -> Result<Option<ChartFiles>>;

    /// Fetch the checkpoint of a repository
    async fn get_checkpoint(&self, repo_name: &str) -> Result<Option<RepoCheckpoint>>;

    /// Replace a repository's charts with `charts`
    ///
    /// Imports the new set, then removes the repository's charts that are no
    /// longer listed.
    async fn sync(&self, repo: &Repo, charts: &[Chart]) -> Result<usize> {
        self.import_charts(repo, charts).await?;
        let keep: Vec<String> = charts.iter().map(|c| c.id.clone()).collect();
        self.remove_missing_charts(&repo.name, &keep).await
    }
}

/// Open the backend selected by the `[storage]` configuration section
pub fn open_store(config: &StorageSection) -> Result<Arc<dyn CatalogStore>> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path)?)),
        StorageBackend::Document => Ok(Arc::new(DocumentStore::new())),
    }
}
