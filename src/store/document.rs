// src/store/document.rs

//! Document catalog backend
//!
//! Records live in three `_id`-keyed collections of JSON documents: `charts`
//! (keyed by chart id), `repos` (keyed by repository name) and `files` (keyed
//! by chart files id). Queries are expressed as [`Filter`]s over dotted field
//! paths such as `repo.name`.
//!
//! Bulk writes validate every operation before applying any, so a rejected
//! batch leaves the collection unchanged.

use crate::error::{Error, Result};
use crate::models::{Chart, ChartFiles, Repo, RepoCheckpoint};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{CHARTS, CatalogStore, FILES, REPOS};

/// Document key field
pub const ID_FIELD: &str = "_id";

/// Query over documents
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field at the dotted path equals the value
    Eq(String, Value),
    /// Field at the dotted path is absent or not one of the values
    NotIn(String, Vec<Value>),
    /// Every filter matches
    And(Vec<Filter>),
}

impl Filter {
    /// Shorthand for an equality filter
    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(path.to_string(), value.into())
    }

    /// Filter on the document key
    pub fn id(id: &str) -> Self {
        Self::eq(ID_FIELD, id)
    }

    /// Whether a document matches
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(path, value) => lookup(doc, path) == Some(value),
            Filter::NotIn(path, values) => match lookup(doc, path) {
                Some(field) => !values.contains(field),
                None => true,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

/// An `_id`-keyed collection of JSON documents
#[derive(Debug)]
pub struct Collection {
    name: &'static str,
    docs: RwLock<BTreeMap<String, Value>>,
}

impl Collection {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        self.name
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the collection holds no documents
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Apply a batch of upserts, each a `{"_id": ...}` selector and a document
    ///
    /// The stored document replaces any previous one with the same key.
    pub fn bulk_upsert(&self, writes: Vec<(Value, Value)>) -> Result<usize> {
        let mut validated = Vec::with_capacity(writes.len());
        for (selector, doc) in writes {
            let id = selector
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::StoreError(format!(
                        "Upsert into {} requires a string {} selector, got {}",
                        self.name, ID_FIELD, selector
                    ))
                })?
                .to_string();
            let Value::Object(mut fields) = doc else {
                return Err(Error::StoreError(format!(
                    "Document for {} in {} is not an object",
                    id, self.name
                )));
            };
            fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            validated.push((id, Value::Object(fields)));
        }

        let count = validated.len();
        let mut docs = self.docs.write();
        for (id, doc) in validated {
            docs.insert(id, doc);
        }
        Ok(count)
    }

    /// Upsert one document under `id`
    pub fn upsert(&self, id: &str, doc: Value) -> Result<()> {
        self.bulk_upsert(vec![(json!({ ID_FIELD: id }), doc)])?;
        Ok(())
    }

    /// Set fields on every matching document; returns the number updated
    pub fn update_fields(&self, filter: &Filter, fields: Map<String, Value>) -> usize {
        let mut docs = self.docs.write();
        let mut updated = 0;
        for doc in docs.values_mut().filter(|doc| filter.matches(doc)) {
            if let Value::Object(existing) = doc {
                for (key, value) in &fields {
                    existing.insert(key.clone(), value.clone());
                }
                updated += 1;
            }
        }
        updated
    }

    /// Remove every matching document; returns the number removed
    pub fn remove_all(&self, filter: &Filter) -> usize {
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        before - docs.len()
    }

    /// First matching document in key order
    pub fn find_one(&self, filter: &Filter) -> Option<Value> {
        self.docs.read().values().find(|doc| filter.matches(doc)).cloned()
    }

    /// All matching documents in key order
    pub fn find(&self, filter: &Filter) -> Vec<Value> {
        self.docs
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect()
    }
}

/// In-process document catalog
#[derive(Debug)]
pub struct DocumentStore {
    charts: Collection,
    repos: Collection,
    files: Collection,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            charts: Collection::new(CHARTS),
            repos: Collection::new(REPOS),
            files: Collection::new(FILES),
        }
    }

    /// Look up a collection by name
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        match name {
            CHARTS => Some(&self.charts),
            REPOS => Some(&self.repos),
            FILES => Some(&self.files),
            _ => None,
        }
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_document<T: DeserializeOwned>(doc: Value) -> Result<T> {
    serde_json::from_value(doc)
        .map_err(|e| Error::StoreError(format!("Corrupt document in catalog: {e}")))
}

#[async_trait]
impl CatalogStore for DocumentStore {
    async fn import_charts(&self, repo: &Repo, charts: &[Chart]) -> Result<()> {
        let writes = charts
            .iter()
            .map(|chart| Ok((json!({ ID_FIELD: chart.id }), to_document(chart)?)))
            .collect::<Result<Vec<_>>>()?;
        let count = self.charts.bulk_upsert(writes)?;
        debug!("Imported {} charts for {}", count, repo.name);
        Ok(())
    }

    async fn remove_missing_charts(&self, repo_name: &str, keep_ids: &[String]) -> Result<usize> {
        let keep = keep_ids.iter().map(|id| Value::String(id.clone())).collect();
        Ok(self.charts.remove_all(&Filter::And(vec![
            Filter::eq("repo.name", repo_name),
            Filter::NotIn(ID_FIELD.to_string(), keep),
        ])))
    }

    async fn repo_already_processed(&self, repo_name: &str, checksum: &str) -> bool {
        self.repos
            .find_one(&Filter::And(vec![
                Filter::id(repo_name),
                Filter::eq("checksum", checksum),
            ]))
            .is_some()
    }

    async fn update_last_check(
        &self,
        repo: &Repo,
        checksum: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let checkpoint = RepoCheckpoint {
            name: repo.name.clone(),
            namespace: repo.namespace.clone(),
            checksum: checksum.to_string(),
            last_update: now,
        };
        self.repos.upsert(&repo.name, to_document(&checkpoint)?)
    }

    async fn delete_repo(&self, repo_name: &str) -> Result<()> {
        let charts = self.charts.remove_all(&Filter::eq("repo.name", repo_name));
        let files = self.files.remove_all(&Filter::eq("repo.name", repo_name));
        self.repos.remove_all(&Filter::id(repo_name));
        info!(
            "Deleted repository {} ({} charts, {} chart files)",
            repo_name, charts, files
        );
        Ok(())
    }

    async fn chart_files_exist(
        &self,
        files_id: &str,
        repo_name: &str,
        namespace: &str,
        digest: &str,
    ) -> Result<bool> {
        Ok(self
            .files
            .find_one(&Filter::And(vec![
                Filter::id(files_id),
                Filter::eq("repo.name", repo_name),
                Filter::eq("repo.namespace", namespace),
                Filter::eq("digest", digest),
            ]))
            .is_some())
    }

    async fn insert_chart_files(&self, chart_id: &str, files: &ChartFiles) -> Result<()> {
        let mut doc = to_document(files)?;
        if let Value::Object(fields) = &mut doc {
            fields.insert("chart_id".to_string(), Value::String(chart_id.to_string()));
        }
        self.files.upsert(&files.id, doc)
    }

    async fn update_icon(
        &self,
        repo: &Repo,
        chart_id: &str,
        raw_icon: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("raw_icon".to_string(), Value::String(STANDARD.encode(raw_icon)));
        fields.insert(
            "icon_content_type".to_string(),
            Value::String(content_type.to_string()),
        );

        let updated = self.charts.update_fields(
            &Filter::And(vec![
                Filter::id(chart_id),
                Filter::eq("repo.name", repo.name.as_str()),
                Filter::eq("repo.namespace", repo.namespace.as_str()),
            ]),
            fields,
        );
        if updated == 0 {
            return Err(Error::StoreError(format!(
                "Chart {} not found in repository {}",
                chart_id, repo.name
            )));
        }
        Ok(())
    }

    async fn get_chart(&self, chart_id: &str) -> Result<Option<Chart>> {
        self.charts
            .find_one(&Filter::id(chart_id))
            .map(from_document)
            .transpose()
    }

    async fn list_charts(&self, repo_name: &str) -> Result<Vec<Chart>> {
        self.charts
            .find(&Filter::eq("repo.name", repo_name))
            .into_iter()
            .map(from_document)
            .collect()
    }

    async fn get_chart_files(&self, files_id: &str) -> Result<Option<ChartFiles>> {
        self.files
            .find_one(&Filter::id(files_id))
            .map(from_document)
            .transpose()
    }

    async fn get_checkpoint(&self, repo_name: &str) -> Result<Option<RepoCheckpoint>> {
        self.repos
            .find_one(&Filter::id(repo_name))
            .map(from_document)
            .transpose()
    }
}
