// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chartsync::repository::{HttpClient, HttpResponse};
use chartsync::watch::{KeyValueStore, MemoryKv};
use chartsync::{
    CatalogStore, Chart, ChartFiles, DocumentStore, Error, Repo, RepoCheckpoint, Result,
    SqliteStore,
};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const REPO_URL: &str = "http://testrepo.com";

/// Index with one chart at an absolute URL and one with two relative versions
pub const INDEX_YAML: &str = r#"
apiVersion: v1
entries:
  acs-engine-autoscaler:
  - name: acs-engine-autoscaler
    version: 2.1.1
    appVersion: 2.1.1
    description: Scales worker nodes within agent pools
    digest: 39d0b9b2a5a1c9a1c2e4f1d1f6e3d9a8b5d5d2f8e4e0c0a1d0b6d1e8e9f0a1b2
    icon: https://github.com/kubernetes/kubernetes/raw/master/logo/logo.png
    urls:
    - https://kubernetes-charts.storage.googleapis.com/acs-engine-autoscaler-2.1.1.tgz
  wordpress:
  - name: wordpress
    version: 0.7.5
    appVersion: 4.9.1
    description: new description!
    digest: 1f5d7b1ac1f1a4ff3e5cbb8d60e2d0a1e21d8cc4e1b4c0f8f6b1c2a9e8d7f6a5
    icon: http://testrepo.com/wordpress.svg
    urls:
    - wordpress-0.7.5.tgz
  - name: wordpress
    version: 0.7.4
    appVersion: 4.9.0
    description: old description
    digest: 2a6e8c2bd2a2b5aa4f6dcc9e71f3e1b2f32e9dd5f2c5d1a9a7c2d3b0f9e8a7b6
    urls:
    - wordpress-0.7.4.tgz
"#;

/// The same repository after `acs-engine-autoscaler` was removed
pub const INDEX_WITHOUT_ACS: &str = r#"
apiVersion: v1
entries:
  wordpress:
  - name: wordpress
    version: 0.7.5
    appVersion: 4.9.1
    description: new description!
    digest: 1f5d7b1ac1f1a4ff3e5cbb8d60e2d0a1e21d8cc4e1b4c0f8f6b1c2a9e8d7f6a5
    icon: http://testrepo.com/wordpress.svg
    urls:
    - wordpress-0.7.5.tgz
"#;

pub const EMPTY_INDEX_YAML: &str = "apiVersion: v1\nentries: {}\n";

pub const TEST_README: &str = "# readme for chart\n\nBest chart in town";
pub const TEST_VALUES: &str = "image: test";
pub const TEST_SCHEMA: &str = r#"{"properties": {}}"#;

/// In-process HTTP client serving canned responses
///
/// Unrouted URLs answer 404. Every request is recorded with its
/// `Authorization` header.
#[derive(Default)]
pub struct FakeHttpClient {
    routes: Mutex<HashMap<String, Option<HttpResponse>>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(
        &self,
        url: &str,
        status: u16,
        content_type: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Some(HttpResponse {
                status,
                content_type: content_type.map(str::to_string),
                body: body.into(),
            }),
        );
    }

    pub fn ok(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.respond(url, 200, None, body);
    }

    /// Fail requests to `url` at the transport level
    pub fn unreachable(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), None);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn auth_headers(&self, url: &str) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, auth)| auth.clone())
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn get(&self, url: &str, auth_header: Option<&str>) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), auth_header.map(str::to_string)));

        match self.routes.lock().unwrap().get(url) {
            Some(Some(response)) => Ok(response.clone()),
            Some(None) => Err(Error::TransportError(format!("connection refused: {}", url))),
            None => Ok(HttpResponse {
                status: 404,
                content_type: None,
                body: b"not found".to_vec(),
            }),
        }
    }
}

/// Build an uncompressed tar archive
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o600);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Build a gzip-compressed chart archive with the standard members
pub fn chart_archive(chart_name: &str) -> Vec<u8> {
    let chart_yaml = format!("name: {}\nversion: 1.0.0\n", chart_name);
    let readme = format!("{}/README.md", chart_name);
    let values = format!("{}/values.yaml", chart_name);
    let schema = format!("{}/values.schema.json", chart_name);
    let chart = format!("{}/Chart.yaml", chart_name);
    gzip(&tarball(&[
        (chart.as_str(), chart_yaml.as_str()),
        (readme.as_str(), TEST_README),
        (values.as_str(), TEST_VALUES),
        (schema.as_str(), TEST_SCHEMA),
    ]))
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Encode a blank PNG of the given size
pub fn png_icon(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgba8(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Serve the test repository: index, every archive and both icons
pub fn serve_test_repo(http: &FakeHttpClient, base: &str, index: &str) {
    let base = base.trim_end_matches('/');
    http.ok(&format!("{}/index.yaml", base), index);
    http.ok(
        "https://kubernetes-charts.storage.googleapis.com/acs-engine-autoscaler-2.1.1.tgz",
        chart_archive("acs-engine-autoscaler"),
    );
    http.ok(&format!("{}/wordpress-0.7.5.tgz", base), chart_archive("wordpress"));
    http.ok(&format!("{}/wordpress-0.7.4.tgz", base), chart_archive("wordpress"));
    http.respond(
        "https://github.com/kubernetes/kubernetes/raw/master/logo/logo.png",
        200,
        Some("image/png"),
        png_icon(320, 320),
    );
    http.respond(
        "http://testrepo.com/wordpress.svg",
        200,
        Some("image/svg+xml"),
        "<svg xmlns=\"http://www.w3.org/2000/svg\"/>",
    );
}

/// Every catalog backend, for running the same checks against each
pub fn backends() -> Vec<(&'static str, Arc<dyn CatalogStore>)> {
    let sqlite: Arc<dyn CatalogStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let document: Arc<dyn CatalogStore> = Arc::new(DocumentStore::new());
    vec![("sqlite", sqlite), ("document", document)]
}

/// Poll `check` until it holds, failing after five seconds
pub async fn wait_for<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Catalog store wrapper that fails chosen write steps on demand
pub struct FailingStore {
    inner: Arc<dyn CatalogStore>,
    fail_import: AtomicBool,
    fail_remove: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn CatalogStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_import: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        })
    }

    pub fn fail_import(&self, fail: bool) {
        self.fail_import.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for FailingStore {
    async fn import_charts(&self, repo: &Repo, charts: &[Chart]) -> Result<()> {
        if self.fail_import.load(Ordering::SeqCst) {
            return Err(Error::StoreError("bulk import rejected".to_string()));
        }
        self.inner.import_charts(repo, charts).await
    }

    async fn remove_missing_charts(&self, repo_name: &str, keep_ids: &[String]) -> Result<usize> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::StoreError("reconcile rejected".to_string()));
        }
        self.inner.remove_missing_charts(repo_name, keep_ids).await
    }

    async fn repo_already_processed(&self, repo_name: &str, checksum: &str) -> bool {
        self.inner.repo_already_processed(repo_name, checksum).await
    }

    async fn update_last_check(
        &self,
        repo: &Repo,
        checksum: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_last_check(repo, checksum, now).await
    }

    async fn delete_repo(&self, repo_name: &str) -> Result<()> {
        self.inner.delete_repo(repo_name).await
    }

    async fn chart_files_exist(
        &self,
        files_id: &str,
        repo_name: &str,
        namespace: &str,
        digest: &str,
    ) -> Result<bool> {
        self.inner
            .chart_files_exist(files_id, repo_name, namespace, digest)
            .await
    }

    async fn insert_chart_files(&self, chart_id: &str, files: &ChartFiles) -> Result<()> {
        self.inner.insert_chart_files(chart_id, files).await
    }

    async fn update_icon(
        &self,
        repo: &Repo,
        chart_id: &str,
        raw_icon: &[u8],
        content_type: &str,
    ) -> Result<()> {
        self.inner
            .update_icon(repo, chart_id, raw_icon, content_type)
            .await
    }

    async fn get_chart(&self, chart_id: &str) -> Result<Option<Chart>> {
        self.inner.get_chart(chart_id).await
    }

    async fn list_charts(&self, repo_name: &str) -> Result<Vec<Chart>> {
        self.inner.list_charts(repo_name).await
    }

    async fn get_chart_files(&self, files_id: &str) -> Result<Option<ChartFiles>> {
        self.inner.get_chart_files(files_id).await
    }

    async fn get_checkpoint(&self, repo_name: &str) -> Result<Option<RepoCheckpoint>> {
        self.inner.get_checkpoint(repo_name).await
    }
}

/// Key-value store that can be switched unreachable
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKv,
    offline: AtomicBool,
}

impl FlakyKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::StoreError("key-value store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyKv {
    async fn ping(&self) -> Result<()> {
        self.check_online()?;
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_online()?;
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.check_online()?;
        self.inner.del(key).await
    }
}
