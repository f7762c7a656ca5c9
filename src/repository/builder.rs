// src/repository/builder.rs

//! Chart model construction from a parsed index
//!
//! Deprecated versions are dropped; a chart whose versions are all deprecated
//! is dropped entirely. Chart-level metadata (description, icon, keywords...)
//! comes from the newest remaining version.

use crate::models::{Chart, ChartVersion, Repo, chart_id};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::index::{IndexEntry, IndexFile};

/// Build the catalog charts for every entry of an index
///
/// Charts are ordered by name; the result is fully determined by the index.
pub fn charts_from_index(index: &IndexFile, repo: &Repo) -> Vec<Chart> {
    index
        .entries
        .iter()
        .filter_map(|(name, entries)| {
            let chart = new_chart(name, entries, repo);
            if chart.is_none() {
                debug!("Skipping deprecated chart {}/{}", repo.name, name);
            }
            chart
        })
        .collect()
}

/// Build one chart from its index entries, or None if nothing is installable
pub fn new_chart(name: &str, entries: &[IndexEntry], repo: &Repo) -> Option<Chart> {
    let live: Vec<&IndexEntry> = entries.iter().filter(|e| !e.deprecated).collect();
    let newest = live.first()?;

    let chart_versions = live.iter().map(|entry| chart_version(entry)).collect();

    Some(Chart {
        id: chart_id(&repo.name, name),
        name: name.to_string(),
        repo: repo.reference(),
        description: newest.description.clone(),
        home: newest.home.clone(),
        keywords: newest.keywords.clone(),
        maintainers: newest.maintainers.clone(),
        sources: newest.sources.clone(),
        icon: newest.icon.clone(),
        raw_icon: None,
        icon_content_type: None,
        chart_versions,
    })
}

fn chart_version(entry: &IndexEntry) -> ChartVersion {
    ChartVersion {
        version: entry.version.clone(),
        app_version: entry.app_version.clone(),
        created: entry.created.as_deref().and_then(parse_created),
        digest: entry.digest.clone(),
        urls: entry.urls.clone(),
    }
}

fn parse_created(created: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(created.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!("Ignoring unparseable creation time '{}': {}", created, e);
            None
        }
    }
}
