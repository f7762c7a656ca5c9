// src/repository/artifacts.rs

//! Per-version chart artifacts
//!
//! [`FileImporter`] enriches stored charts with content that is not in the
//! index: the README, default values and values schema packaged in each
//! version's `.tgz` archive, and the chart icon. Chart files are keyed by
//! `(chart files id, repository, namespace, digest)`, so an unchanged version
//! costs a single store lookup on later passes.

use crate::error::{Error, Result};
use crate::hash;
use crate::models::{Chart, ChartFiles, ChartVersion, Repo, chart_files_id};
use crate::store::CatalogStore;
use flate2::read::GzDecoder;
use image::ImageFormat;
use image::imageops::FilterType;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tar::Archive;
use tracing::{debug, warn};
use url::Url;

use super::client::{HttpClient, get_checked};

/// Keys of the members extracted from a chart archive
pub const CHART_YAML: &str = "chart";
pub const VALUES: &str = "values";
pub const README: &str = "readme";
pub const SCHEMA: &str = "schema";

const CHART_MEMBERS: [(&str, &str); 4] = [
    (CHART_YAML, "Chart.yaml"),
    (VALUES, "values.yaml"),
    (README, "README.md"),
    (SCHEMA, "values.schema.json"),
];

/// Icons larger than this in either dimension are scaled down to fit
pub const ICON_SIZE: u32 = 160;

const ICON_CONTENT_TYPE: &str = "image/png";

const TAR_BLOCK_SIZE: usize = 512;

/// Largest archive member read into memory (16 MiB)
pub const MAX_MEMBER_SIZE: u64 = 16 * 1024 * 1024;

/// Largest uncompressed archive walked while looking for members (256 MiB)
pub const MAX_ARCHIVE_SIZE: u64 = 256 * 1024 * 1024;

/// Result of importing the files of one group of versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilesOutcome {
    /// Chart files rows written
    pub imported: usize,
    /// Versions whose files were already stored
    pub already_present: usize,
}

/// Result of importing a chart icon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconOutcome {
    /// The chart declares no icon
    NoIcon,
    /// Icon stored with this content type
    Imported { content_type: String, size: usize },
}

#[derive(Debug, Default, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    name: String,
}

/// Downloads and stores chart artifacts for one repository
pub struct FileImporter {
    store: Arc<dyn CatalogStore>,
    http: Arc<dyn HttpClient>,
    repo: Repo,
}

impl FileImporter {
    pub fn new(store: Arc<dyn CatalogStore>, http: Arc<dyn HttpClient>, repo: Repo) -> Self {
        Self { store, http, repo }
    }

    /// Repository this importer writes for
    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    /// Import the chart files of `versions`, which must share one digest
    ///
    /// Versions already stored are skipped. The archive is downloaded once,
    /// from the first missing version, and a row is written for every
    /// missing version.
    pub async fn fetch_and_import_files(
        &self,
        chart: &Chart,
        versions: &[ChartVersion],
    ) -> Result<FilesOutcome> {
        let mut outcome = FilesOutcome::default();
        let mut missing = Vec::new();

        for version in versions {
            let files_id = chart_files_id(&chart.id, &version.version);
            let exists = self
                .store
                .chart_files_exist(
                    &files_id,
                    &self.repo.name,
                    &self.repo.namespace,
                    &version.digest,
                )
                .await?;
            if exists {
                debug!("Chart files {} already stored", files_id);
                outcome.already_present += 1;
            } else {
                missing.push((files_id, version));
            }
        }

        let Some((_, first)) = missing.first() else {
            return Ok(outcome);
        };

        let url = chart_tarball_url(&self.repo, first)?;
        debug!("Downloading chart archive {}", url);
        let auth = self.repo.auth_header.as_deref();
        let response = get_checked(self.http.as_ref(), &url, auth).await?;

        if !hash::digest_matches(&response.body, &first.digest) {
            warn!(
                "Digest mismatch for {} {}: index lists {}",
                chart.id, first.version, first.digest
            );
        }

        let wanted = chart_member_paths(&chart.name);
        let body = response.body;
        let files = tokio::task::spawn_blocking(move || extract_chart_files(&wanted, &body))
            .await
            .map_err(|e| Error::ArtifactError(format!("Archive task failed: {e}")))??;
        check_chart_yaml(&chart.name, member(&files, CHART_YAML));

        for (files_id, version) in missing {
            let record = ChartFiles {
                id: files_id,
                readme: member(&files, README).to_string(),
                values: member(&files, VALUES).to_string(),
                schema: member(&files, SCHEMA).to_string(),
                repo: self.repo.reference(),
                digest: version.digest.clone(),
            };
            self.store.insert_chart_files(&chart.id, &record).await?;
            outcome.imported += 1;
        }

        Ok(outcome)
    }

    /// Download, normalize and store a chart's icon
    ///
    /// SVG responses are stored as-is; raster icons are decoded, scaled to fit
    /// within [`ICON_SIZE`] and re-encoded as PNG.
    pub async fn fetch_and_import_icon(&self, chart: &Chart) -> Result<IconOutcome> {
        let icon_url = chart.icon.trim();
        if icon_url.is_empty() {
            return Ok(IconOutcome::NoIcon);
        }

        // Credentials only go to the repository's own origin
        let auth = self
            .repo
            .auth_header
            .as_deref()
            .filter(|_| same_origin(&self.repo.url, icon_url));
        let response = get_checked(self.http.as_ref(), icon_url, auth).await?;
        let content_type = response.content_type.clone().unwrap_or_default();

        let (icon, content_type) = if content_type.to_ascii_lowercase().contains("svg") {
            (response.body, content_type)
        } else {
            let body = response.body;
            let png = tokio::task::spawn_blocking(move || normalize_icon(&body))
                .await
                .map_err(|e| Error::ArtifactError(format!("Icon task failed: {e}")))??;
            (png, ICON_CONTENT_TYPE.to_string())
        };

        self.store
            .update_icon(&self.repo, &chart.id, &icon, &content_type)
            .await?;
        Ok(IconOutcome::Imported {
            content_type,
            size: icon.len(),
        })
    }
}

/// Resolve the archive download URL of a chart version
///
/// Absolute URLs are used unchanged; relative ones are joined onto the
/// repository base URL.
pub fn chart_tarball_url(repo: &Repo, version: &ChartVersion) -> Result<String> {
    let source = version
        .urls
        .first()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            Error::ArtifactError(format!("Chart version {} has no download URL", version.version))
        })?;

    if let Ok(url) = Url::parse(source)
        && url.has_host()
    {
        return Ok(source.to_string());
    }

    Ok(format!(
        "{}/{}",
        repo.url.trim().trim_end_matches('/'),
        source.trim_start_matches('/')
    ))
}

/// Whether two URLs share scheme, host and port
///
/// Unparseable URLs never match.
pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a.trim()), Url::parse(b.trim())) {
        (Ok(a), Ok(b)) => a.has_host() && a.origin() == b.origin(),
        _ => false,
    }
}

/// Archive paths of the members extracted for a chart, keyed by member key
pub fn chart_member_paths(chart_name: &str) -> BTreeMap<String, String> {
    CHART_MEMBERS
        .iter()
        .map(|(key, file)| (key.to_string(), format!("{}/{}", chart_name, file)))
        .collect()
}

/// Extract the requested members from a gzip-compressed chart archive
pub fn extract_chart_files(
    wanted: &BTreeMap<String, String>,
    archive: &[u8],
) -> Result<BTreeMap<String, String>> {
    extract_files_from_tarball(wanted, GzDecoder::new(archive))
}

/// Extract the requested members from an uncompressed tar stream
///
/// `wanted` maps a key to a member path, matched case-insensitively. Every
/// key is present in the result; missing members map to an empty string.
/// The stream is read at most up to [`MAX_ARCHIVE_SIZE`] bytes and stops
/// once every member has been found.
pub fn extract_files_from_tarball<R: Read>(
    wanted: &BTreeMap<String, String>,
    tar_data: R,
) -> Result<BTreeMap<String, String>> {
    extract_bounded(wanted, tar_data, MAX_ARCHIVE_SIZE)
}

fn extract_bounded<R: Read>(
    wanted: &BTreeMap<String, String>,
    tar_data: R,
    limit: u64,
) -> Result<BTreeMap<String, String>> {
    let mut archive = Archive::new(BoundedTarReader::new(tar_data, limit));
    let mut found: BTreeMap<String, String> = BTreeMap::new();

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(archive_error)?.to_string_lossy().into_owned();
        let path = path.trim_start_matches("./");
        let keys: Vec<&String> = wanted
            .iter()
            .filter(|(key, want)| want.eq_ignore_ascii_case(path) && !found.contains_key(*key))
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            continue;
        }

        let size = entry.header().size().map_err(archive_error)?;
        if size > MAX_MEMBER_SIZE {
            warn!("Skipping oversized archive member: {} ({} bytes)", path, size);
            continue;
        }

        let mut content = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut content).map_err(archive_error)?;
        let content = String::from_utf8_lossy(&content).into_owned();
        for key in keys {
            found.insert(key.clone(), content.clone());
        }

        if found.len() == wanted.len() {
            break;
        }
    }

    Ok(wanted
        .keys()
        .map(|key| (key.clone(), found.remove(key).unwrap_or_default()))
        .collect())
}

/// Decode a raster icon and re-encode it as a PNG fitting [`ICON_SIZE`]
pub fn normalize_icon(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::ArtifactError(format!("Unsupported icon image: {e}")))?;

    let img = if img.width() > ICON_SIZE || img.height() > ICON_SIZE {
        img.resize(ICON_SIZE, ICON_SIZE, FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::ArtifactError(format!("Failed to encode icon: {e}")))?;
    Ok(out.into_inner())
}

/// Tar stream reader enforcing a size limit and whole 512-byte blocks
struct BoundedTarReader<R> {
    inner: R,
    read: u64,
    limit: u64,
}

impl<R: Read> BoundedTarReader<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            read: 0,
            limit,
        }
    }
}

impl<R: Read> Read for BoundedTarReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;

        if n == 0 && !buf.is_empty() && self.read % TAR_BLOCK_SIZE as u64 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("archive ends mid-block after {} bytes", self.read),
            ));
        }
        if self.read > self.limit {
            return Err(std::io::Error::other(format!(
                "archive exceeds {} bytes uncompressed",
                self.limit
            )));
        }
        Ok(n)
    }
}

fn archive_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEof(e.to_string()),
        _ => Error::ArtifactError(format!("Invalid chart archive: {e}")),
    }
}

fn member<'a>(files: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    files.get(key).map(String::as_str).unwrap_or("")
}

/// Chart.yaml is read only to flag archives packaged under the wrong name
fn check_chart_yaml(chart_name: &str, content: &str) {
    if content.is_empty() {
        debug!("No Chart.yaml in archive of {}", chart_name);
        return;
    }
    match serde_yaml::from_str::<ChartMetadata>(content) {
        Ok(meta) if meta.name != chart_name => {
            warn!("Chart.yaml of {} declares name '{}'", chart_name, meta.name);
        }
        Ok(_) => {}
        Err(e) => debug!("Unreadable Chart.yaml in archive of {}: {}", chart_name, e),
    }
}
