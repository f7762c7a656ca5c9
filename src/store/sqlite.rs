// src/store/sqlite.rs

//! Relational catalog backend (SQLite)
//!
//! Each chart is stored as an opaque JSON document in the `info` column, with
//! the id and repository identity broken out into indexed columns. A chart
//! import is one transaction streaming every chart through a single prepared
//! upsert statement, so a failure part-way leaves the table unchanged.
//!
//! rusqlite connections are blocking; every operation runs on tokio's blocking
//! pool behind a mutex-guarded connection.

use crate::error::{Error, Result};
use crate::models::{Chart, ChartFiles, Repo, RepoCheckpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::CatalogStore;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed catalog store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a catalog database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        info!("Opened catalog database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open a private in-memory catalog
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::StoreError(format!("Store task failed: {e}")))?
    }

    /// Count rows of a catalog table
    pub async fn count_rows(&self, table: &'static str) -> Result<usize> {
        let sql = match table {
            super::CHARTS => "SELECT COUNT(*) FROM charts",
            super::REPOS => "SELECT COUNT(*) FROM repos",
            super::FILES => "SELECT COUNT(*) FROM files",
            other => return Err(Error::StoreError(format!("Unknown table {other}"))),
        };
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

/// Create the catalog tables if they do not exist
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS charts (
            id TEXT PRIMARY KEY,
            repo_name TEXT NOT NULL,
            repo_namespace TEXT NOT NULL,
            info TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_charts_repo ON charts(repo_name);

        CREATE TABLE IF NOT EXISTS repos (
            name TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            checksum TEXT NOT NULL,
            last_update TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            chart_files_id TEXT PRIMARY KEY,
            chart_id TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            repo_namespace TEXT NOT NULL,
            digest TEXT NOT NULL,
            info TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_files_repo ON files(repo_name);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    debug!("Catalog schema at version {}", SCHEMA_VERSION);
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(info: &str) -> Result<T> {
    serde_json::from_str(info)
        .map_err(|e| Error::StoreError(format!("Corrupt document in catalog: {e}")))
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn import_charts(&self, repo: &Repo, charts: &[Chart]) -> Result<()> {
        let repo = repo.clone();
        let charts = charts.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO charts (id, repo_name, repo_namespace, info)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        repo_name = excluded.repo_name,
                        repo_namespace = excluded.repo_namespace,
                        info = excluded.info",
                )?;
                for chart in &charts {
                    let info = serde_json::to_string(chart)?;
                    stmt.execute(params![&chart.id, &repo.name, &repo.namespace, info])?;
                }
            }
            tx.commit()?;
            debug!("Imported {} charts for {}", charts.len(), repo.name);
            Ok(())
        })
        .await
    }

    async fn remove_missing_charts(&self, repo_name: &str, keep_ids: &[String]) -> Result<usize> {
        let repo_name = repo_name.to_string();
        let keep_ids = keep_ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "CREATE TEMP TABLE IF NOT EXISTS keep_ids (id TEXT PRIMARY KEY)",
                [],
            )?;
            tx.execute("DELETE FROM keep_ids", [])?;
            {
                let mut stmt = tx.prepare("INSERT OR IGNORE INTO keep_ids (id) VALUES (?1)")?;
                for id in &keep_ids {
                    stmt.execute([id])?;
                }
            }
            let removed = tx.execute(
                "DELETE FROM charts
                 WHERE repo_name = ?1 AND id NOT IN (SELECT id FROM keep_ids)",
                [&repo_name],
            )?;
            tx.execute("DELETE FROM keep_ids", [])?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn repo_already_processed(&self, repo_name: &str, checksum: &str) -> bool {
        let repo_name = repo_name.to_string();
        let result = self
            .with_conn(move |conn| {
                let stored: Option<String> = conn
                    .query_row(
                        "SELECT checksum FROM repos WHERE name = ?1",
                        [&repo_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(stored)
            })
            .await;

        match result {
            Ok(Some(stored)) => stored == checksum,
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read checkpoint, treating repository as changed: {}", e);
                false
            }
        }
    }

    async fn update_last_check(
        &self,
        repo: &Repo,
        checksum: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let name = repo.name.clone();
        let namespace = repo.namespace.clone();
        let checksum = checksum.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO repos (name, namespace, checksum, last_update)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    namespace = excluded.namespace,
                    checksum = excluded.checksum,
                    last_update = excluded.last_update",
                params![name, namespace, checksum, now.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_repo(&self, repo_name: &str) -> Result<()> {
        let repo_name = repo_name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let charts = tx.execute("DELETE FROM charts WHERE repo_name = ?1", [&repo_name])?;
            let files = tx.execute("DELETE FROM files WHERE repo_name = ?1", [&repo_name])?;
            tx.execute("DELETE FROM repos WHERE name = ?1", [&repo_name])?;
            tx.commit()?;
            info!(
                "Deleted repository {} ({} charts, {} chart files)",
                repo_name, charts, files
            );
            Ok(())
        })
        .await
    }

    async fn chart_files_exist(
        &self,
        files_id: &str,
        repo_name: &str,
        namespace: &str,
        digest: &str,
    ) -> Result<bool> {
        let args = [
            files_id.to_string(),
            repo_name.to_string(),
            namespace.to_string(),
            digest.to_string(),
        ];
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM files
                    WHERE chart_files_id = ?1 AND repo_name = ?2
                      AND repo_namespace = ?3 AND digest = ?4
                 )",
                params![args[0], args[1], args[2], args[3]],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn insert_chart_files(&self, chart_id: &str, files: &ChartFiles) -> Result<()> {
        let chart_id = chart_id.to_string();
        let files = files.clone();
        self.with_conn(move |conn| {
            let info = serde_json::to_string(&files)?;
            conn.execute(
                "INSERT INTO files
                    (chart_files_id, chart_id, repo_name, repo_namespace, digest, info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(chart_files_id) DO UPDATE SET
                    chart_id = excluded.chart_id,
                    repo_name = excluded.repo_name,
                    repo_namespace = excluded.repo_namespace,
                    digest = excluded.digest,
                    info = excluded.info",
                params![
                    &files.id,
                    chart_id,
                    &files.repo.name,
                    &files.repo.namespace,
                    &files.digest,
                    info
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_icon(
        &self,
        repo: &Repo,
        chart_id: &str,
        raw_icon: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let repo = repo.clone();
        let chart_id = chart_id.to_string();
        let raw_icon = raw_icon.to_vec();
        let content_type = content_type.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let info: Option<String> = tx
                .query_row(
                    "SELECT info FROM charts
                     WHERE id = ?1 AND repo_name = ?2 AND repo_namespace = ?3",
                    params![&chart_id, &repo.name, &repo.namespace],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(info) = info else {
                return Err(Error::StoreError(format!(
                    "Chart {} not found in repository {}",
                    chart_id, repo.name
                )));
            };

            let mut chart: Chart = decode(&info)?;
            chart.raw_icon = Some(raw_icon);
            chart.icon_content_type = Some(content_type);
            tx.execute(
                "UPDATE charts SET info = ?1 WHERE id = ?2",
                params![serde_json::to_string(&chart)?, &chart_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_chart(&self, chart_id: &str) -> Result<Option<Chart>> {
        let chart_id = chart_id.to_string();
        self.with_conn(move |conn| {
            let info: Option<String> = conn
                .query_row("SELECT info FROM charts WHERE id = ?1", [&chart_id], |row| {
                    row.get(0)
                })
                .optional()?;
            info.as_deref().map(decode).transpose()
        })
        .await
    }

    async fn list_charts(&self, repo_name: &str) -> Result<Vec<Chart>> {
        let repo_name = repo_name.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT info FROM charts WHERE repo_name = ?1 ORDER BY id")?;
            let infos = stmt
                .query_map([&repo_name], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            infos.iter().map(|info| decode(info)).collect()
        })
        .await
    }

    async fn get_chart_files(&self, files_id: &str) -> Result<Option<ChartFiles>> {
        let files_id = files_id.to_string();
        self.with_conn(move |conn| {
            let info: Option<String> = conn
                .query_row(
                    "SELECT info FROM files WHERE chart_files_id = ?1",
                    [&files_id],
                    |row| row.get(0),
                )
                .optional()?;
            info.as_deref().map(decode).transpose()
        })
        .await
    }

    async fn get_checkpoint(&self, repo_name: &str) -> Result<Option<RepoCheckpoint>> {
        let repo_name = repo_name.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT name, namespace, checksum, last_update FROM repos WHERE name = ?1",
                    [&repo_name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            row.map(|(name, namespace, checksum, last_update)| {
                let last_update = DateTime::parse_from_rfc3339(&last_update)
                    .map_err(|e| Error::StoreError(format!("Invalid checkpoint timestamp: {e}")))?
                    .with_timezone(&Utc);
                Ok(RepoCheckpoint {
                    name,
                    namespace,
                    checksum,
                    last_update,
                })
            })
            .transpose()
        })
        .await
    }
}
