// src/repository/mod.rs

//! Chart repository indexing and synchronization
//!
//! This module provides functionality for:
//! - Fetching and parsing repository indexes
//! - Building catalog charts from index entries
//! - Downloading chart archives and icons
//! - Synchronizing a repository into a catalog store

mod artifacts;
mod builder;
mod client;
mod index;
mod sync;

// Re-export main types and functions
pub use artifacts::{
    FileImporter, FilesOutcome, ICON_SIZE, IconOutcome, MAX_ARCHIVE_SIZE, MAX_MEMBER_SIZE,
    chart_member_paths, chart_tarball_url, extract_chart_files, extract_files_from_tarball,
    normalize_icon, same_origin,
};
pub use builder::{charts_from_index, new_chart};
pub use client::{HttpClient, HttpResponse, ReqwestClient, get_checked, user_agent};
pub use index::{
    INDEX_FILE, IndexEntry, IndexFile, fetch_repo_index, index_checksum, index_url,
    parse_repo_index,
};
pub use sync::{
    ArtifactJob, DEFAULT_WORKERS, SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport,
    artifact_jobs,
};
