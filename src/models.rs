// src/models.rs

//! Catalog data model
//!
//! Charts and their versions are rebuilt from the repository index on every
//! sync pass. Chart files (README, default values, schema) are created lazily
//! per version and deduplicated by archive digest. Package summaries are the
//! compact form kept in the watch cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured chart repository
///
/// Carries credentials, so it is never persisted as-is. Documents embed a
/// [`RepoRef`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub name: String,
    pub namespace: String,
    pub url: String,
    /// Full `Authorization` header value sent with index and archive requests
    pub auth_header: Option<String>,
}

impl Repo {
    /// Create a new repository without credentials
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            url: url.into(),
            auth_header: None,
        }
    }

    /// Authenticate requests with a bearer token
    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.auth_header = Some(format!("Bearer {}", token.trim()));
        self
    }

    /// Authenticate requests with a preformatted `Authorization` header value
    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }

    /// Credential-free reference embedded in persisted documents
    pub fn reference(&self) -> RepoRef {
        RepoRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            url: self.url.clone(),
        }
    }
}

/// Repository identity as stored alongside charts and chart files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub url: String,
}

/// Last successfully synced index of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCheckpoint {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub checksum: String,
    pub last_update: DateTime<Utc>,
}

/// Chart maintainer as listed in the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub url: String,
}

/// One published version of a chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartVersion {
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// SHA-256 of the chart archive
    #[serde(default)]
    pub digest: String,
    /// Archive download URLs, absolute or relative to the repository URL
    #[serde(default)]
    pub urls: Vec<String>,
}

/// A chart and all of its non-deprecated versions, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chart {
    /// `<repoName>/<chartName>`
    pub id: String,
    pub name: String,
    pub repo: RepoRef,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Icon URL from the index
    #[serde(default)]
    pub icon: String,
    /// Normalized icon bytes (PNG, or raw SVG)
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub raw_icon: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_content_type: Option<String>,
    pub chart_versions: Vec<ChartVersion>,
}

impl Chart {
    /// Newest non-deprecated version
    pub fn latest_version(&self) -> Option<&ChartVersion> {
        self.chart_versions.first()
    }
}

/// Build the chart id for a chart in a repository
pub fn chart_id(repo_name: &str, chart_name: &str) -> String {
    format!("{}/{}", repo_name, chart_name)
}

/// Build the chart files id for one version of a chart
pub fn chart_files_id(chart_id: &str, version: &str) -> String {
    format!("{}-{}", chart_id, version)
}

/// Text members extracted from one chart version's archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartFiles {
    /// `<chartID>-<version>`
    pub id: String,
    #[serde(default)]
    pub readme: String,
    #[serde(default)]
    pub values: String,
    #[serde(default)]
    pub schema: String,
    pub repo: RepoRef,
    #[serde(default)]
    pub digest: String,
}

/// Compact chart listing kept in the watch cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub display_name: String,
    pub latest_version: String,
    pub icon_url: String,
    pub namespace: String,
    /// Chart id, `<repoName>/<chartName>`
    pub identifier: String,
}

impl PackageSummary {
    /// Summarize a chart; charts without versions have no summary
    pub fn from_chart(chart: &Chart) -> Option<Self> {
        let latest = chart.latest_version()?;
        Some(Self {
            display_name: chart.name.clone(),
            latest_version: latest.version.clone(),
            icon_url: chart.icon.clone(),
            namespace: chart.repo.namespace.clone(),
            identifier: chart.id.clone(),
        })
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_header() {
        let repo = Repo::new("test", "default", "https://charts.example.com")
            .with_bearer_token(" ThisSecretAccessTokenAuthenticatesTheClient ");
        assert_eq!(
            repo.auth_header.as_deref(),
            Some("Bearer ThisSecretAccessTokenAuthenticatesTheClient")
        );
        // References never carry credentials
        assert_eq!(repo.reference().name, "test");
    }

    #[test]
    fn test_raw_icon_json_roundtrip() {
        let chart = Chart {
            id: "test/wordpress".to_string(),
            name: "wordpress".to_string(),
            raw_icon: Some(vec![0x89, b'P', b'N', b'G']),
            icon_content_type: Some("image/png".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&chart).unwrap();
        assert!(json["raw_icon"].is_string());

        let back: Chart = serde_json::from_value(json).unwrap();
        assert_eq!(back.raw_icon, chart.raw_icon);
    }

    #[test]
    fn test_summary_requires_a_version() {
        let mut chart = Chart {
            id: "test/redis".to_string(),
            name: "redis".to_string(),
            icon: "https://example.com/redis.png".to_string(),
            ..Default::default()
        };
        assert!(PackageSummary::from_chart(&chart).is_none());

        chart.chart_versions.push(ChartVersion {
            version: "1.2.0".to_string(),
            ..Default::default()
        });
        let summary = PackageSummary::from_chart(&chart).unwrap();
        assert_eq!(summary.latest_version, "1.2.0");
        assert_eq!(summary.identifier, "test/redis");
    }

    #[test]
    fn test_ids() {
        let id = chart_id("stable", "wordpress");
        assert_eq!(id, "stable/wordpress");
        assert_eq!(chart_files_id(&id, "0.1.0"), "stable/wordpress-0.1.0");
    }
}
