// src/repository/index.rs

//! Repository index fetching and parsing
//!
//! A chart repository publishes an `index.yaml` at its base URL whose
//! `entries` map chart names to their versions, newest first. The raw index
//! bytes are hashed to detect whether a repository changed since the last
//! successful sync.

use crate::error::{Error, Result};
use crate::hash;
use crate::models::{Maintainer, Repo};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

use super::client::{HttpClient, get_checked};

/// File name of the repository index under the repository base URL
pub const INDEX_FILE: &str = "index.yaml";

/// Parsed repository index
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    #[serde(default)]
    pub api_version: String,
    /// Chart name -> versions, newest first
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

/// One chart version as listed in the index
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    pub app_version: String,
    pub description: String,
    pub home: String,
    #[serde(deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub maintainers: Vec<Maintainer>,
    #[serde(deserialize_with = "null_as_default")]
    pub sources: Vec<String>,
    pub icon: String,
    pub deprecated: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub urls: Vec<String>,
    pub digest: String,
    pub created: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Build the index URL for a repository base URL
///
/// Surrounding whitespace is ignored and `index.yaml` is appended under any
/// sub-path without doubling slashes:
/// `"  https://subpath.test/subpath/"` -> `https://subpath.test/subpath/index.yaml`.
pub fn index_url(repo_url: &str) -> Result<Url> {
    let trimmed = repo_url.trim();
    let mut base = Url::parse(trimmed)
        .map_err(|e| Error::ParseError(format!("Invalid repository URL '{}': {e}", trimmed)))?;

    if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
        return Err(Error::ParseError(format!(
            "Repository URL '{}' must be an absolute http(s) URL",
            trimmed
        )));
    }

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(INDEX_FILE)
        .map_err(|e| Error::ParseError(format!("Invalid repository URL '{}': {e}", trimmed)))
}

/// Download the raw index of a repository
pub async fn fetch_repo_index(client: &dyn HttpClient, repo: &Repo) -> Result<Vec<u8>> {
    let url = index_url(&repo.url)?;
    info!("Fetching repository index from {}", url);

    let response = get_checked(client, url.as_str(), repo.auth_header.as_deref()).await?;
    debug!("Fetched {} bytes of index for {}", response.body.len(), repo.name);
    Ok(response.body)
}

/// Parse raw index bytes
pub fn parse_repo_index(data: &[u8]) -> Result<IndexFile> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::ParseError("Repository index is empty".to_string()));
    }
    serde_yaml::from_slice(data)
        .map_err(|e| Error::ParseError(format!("Invalid repository index: {e}")))
}

/// Checksum identifying an index revision
pub fn index_checksum(data: &[u8]) -> String {
    hash::sha256(data)
}
