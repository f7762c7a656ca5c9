// src/config.rs
//! Configuration file parsing for chartsync
//!
//! Supports TOML configuration files with the following sections:
//! - [sync] - Artifact concurrency, sync interval, empty-index policy
//! - [http] - Request timeout, custom CA bundle, User-Agent comment
//! - [storage] - Catalog backend selection and database path
//! - [cache] - Watch cache read fan-out
//! - [repos.*] - Chart repositories to index

use crate::models::Repo;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct ChartsyncConfig {
    /// Sync pass settings
    #[serde(default)]
    pub sync: SyncSection,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpSection,

    /// Catalog storage settings
    #[serde(default)]
    pub storage: StorageSection,

    /// Watch cache settings
    #[serde(default)]
    pub cache: CacheSection,

    /// Chart repositories, keyed by repository name
    #[serde(default)]
    pub repos: BTreeMap<String, RepoSection>,
}

/// Sync configuration section
#[derive(Debug, Deserialize)]
pub struct SyncSection {
    /// Maximum concurrent artifact downloads per pass
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Periodic sync interval (e.g., "10m", "1h")
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Accept an index with no charts even if the catalog holds charts for the repo
    #[serde(default)]
    pub allow_empty_index: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            interval: default_interval(),
            allow_empty_index: false,
        }
    }
}

fn default_workers() -> usize {
    10
}

fn default_interval() -> String {
    "10m".to_string()
}

/// HTTP client configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    /// Request timeout (e.g., "30s")
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// PEM bundle of additional trusted CA certificates
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Comment appended to the User-Agent, e.g. "monocular/1.2"
    #[serde(default)]
    pub user_agent_comment: Option<String>,

    /// Largest response body accepted, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            ca_file: None,
            user_agent_comment: None,
            max_body_size: default_max_body_size(),
        }
    }
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_max_body_size() -> u64 {
    64 * 1024 * 1024
}

/// Catalog backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Relational backend (SQLite)
    Sqlite,
    /// Document backend (in-process collections)
    ///
    /// Not persisted: `path` is ignored and the catalog starts empty on every
    /// start, so the first pass over each repository is a full sync.
    Document,
}

/// Storage configuration section
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Database path for the relational backend
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/chartsync/catalog.db")
}

/// Watch cache configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Maximum concurrent cache reads when assembling summaries
    #[serde(default = "default_cache_workers")]
    pub max_workers: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_workers: default_cache_workers(),
        }
    }
}

fn default_cache_workers() -> usize {
    10
}

/// Chart repository configuration
#[derive(Debug, Deserialize)]
pub struct RepoSection {
    /// Repository base URL
    pub url: String,

    /// Namespace the repository belongs to
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bearer token sent as `Authorization: Bearer <token>`
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Full `Authorization` header value, for non-bearer schemes
    #[serde(default)]
    pub auth_header: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ChartsyncConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sync.workers == 0 {
            bail!("sync.workers must be at least 1");
        }
        if self.cache.max_workers == 0 {
            bail!("cache.max_workers must be at least 1");
        }
        if self.http.max_body_size == 0 {
            bail!("http.max_body_size must be at least 1");
        }
        parse_duration(&self.sync.interval).context("Invalid sync.interval")?;
        parse_duration(&self.http.timeout).context("Invalid http.timeout")?;

        for (name, repo) in &self.repos {
            if repo.url.trim().is_empty() {
                bail!("Repository '{}' has an empty url", name);
            }
            if repo.bearer_token.is_some() && repo.auth_header.is_some() {
                bail!(
                    "Repository '{}' sets both bearer_token and auth_header",
                    name
                );
            }
        }
        Ok(())
    }

    /// Parse the sync interval to Duration
    pub fn sync_interval(&self) -> Result<Duration> {
        parse_duration(&self.sync.interval)
    }

    /// Parse the HTTP timeout to Duration
    pub fn http_timeout(&self) -> Result<Duration> {
        parse_duration(&self.http.timeout)
    }

    /// Build the configured repositories
    pub fn repositories(&self) -> Vec<Repo> {
        self.repos
            .iter()
            .map(|(name, section)| {
                let repo = Repo::new(name.clone(), section.namespace.clone(), section.url.clone());
                match (&section.bearer_token, &section.auth_header) {
                    (Some(token), _) => repo.with_bearer_token(token),
                    (None, Some(header)) => repo.with_auth_header(header.clone()),
                    (None, None) => repo,
                }
            })
            .collect()
    }
}

/// Parse a human-readable duration string (e.g., "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('d') {
        (num, 24 * 60 * 60)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    Ok(Duration::from_secs(num * multiplier))
}
