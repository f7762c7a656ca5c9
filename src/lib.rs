// src/lib.rs

//! Chartsync
//!
//! Keeps a queryable catalog of Helm charts consistent with the indexes
//! published by chart repositories, while avoiding redundant network and
//! storage work.
//!
//! # Architecture
//!
//! - Checksum-gated sync: an unchanged index costs one download and no writes
//! - Bulk import then reconcile: the catalog never lists removed charts
//! - Digest-keyed artifacts: README/values/schema fetched once per archive
//! - Pluggable storage: relational (SQLite) and document backends
//! - Watch cache: package summaries kept warm from repository events

pub mod config;
mod error;
pub mod hash;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;
pub mod watch;

pub use config::ChartsyncConfig;
pub use error::{Error, Result};
pub use models::{
    Chart, ChartFiles, ChartVersion, Maintainer, PackageSummary, Repo, RepoCheckpoint, RepoRef,
};
pub use repository::{
    HttpClient, ReqwestClient, SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport,
};
pub use store::{CatalogStore, DocumentStore, SqliteStore, open_store};
pub use watch::{WatchCache, WatchEvent};
