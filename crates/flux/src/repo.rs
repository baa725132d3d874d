//! HelmRepository object inspection and `index.yaml` parsing.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use repowatch_core::{RawObject, ResourceKey};
use serde::{Deserialize, Serialize};

/// Charts served by one indexed Helm repository. This is the cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoCharts {
    pub repo: ResourceKey,
    pub index_url: String,
    pub checksum: Option<String>,
    /// Sorted by chart name.
    pub charts: Vec<Chart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub home: Option<String>,
    /// Index order; Helm writes the newest version first.
    pub versions: Vec<ChartVersion>,
}

impl Chart {
    pub fn latest(&self) -> Option<&ChartVersion> { self.versions.first() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    pub version: String,
    pub app_version: Option<String>,
    pub created: Option<String>,
    pub digest: Option<String>,
    pub urls: Vec<String>,
}

/// A repository is usable once the controller has reconciled its current
/// generation and reports `Ready=True`.
pub fn is_repo_ready(obj: &RawObject) -> bool {
    let generation = obj.pointer("/metadata/generation").and_then(|v| v.as_i64());
    let observed = obj.pointer("/status/observedGeneration").and_then(|v| v.as_i64());
    if let (Some(g), Some(o)) = (generation, observed) {
        if g != o {
            return false;
        }
    }
    obj.pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
        .unwrap_or(false)
}

/// Where the controller published the repository index.
pub fn index_url(obj: &RawObject) -> Option<&str> {
    ["/status/artifact/url", "/status/url"]
        .iter()
        .find_map(|p| obj.pointer(p).and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
}

pub fn artifact_checksum(obj: &RawObject) -> Option<String> {
    obj.pointer("/status/artifact/checksum").and_then(|v| v.as_str()).map(str::to_string)
}

#[derive(Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    version: String,
    app_version: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    home: Option<String>,
    created: Option<String>,
    digest: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

/// Parse a Helm `index.yaml` document into the repository's chart list.
pub fn parse_index(repo: ResourceKey, index_url: &str, checksum: Option<String>, bytes: &[u8]) -> Result<RepoCharts> {
    let index: IndexFile = serde_yaml::from_slice(bytes).with_context(|| format!("parsing index {index_url}"))?;
    let mut charts = Vec::with_capacity(index.entries.len());
    for (name, entries) in index.entries {
        let Some(head) = entries.first() else { continue };
        let (description, icon, home) = (head.description.clone(), head.icon.clone(), head.home.clone());
        let versions = entries
            .into_iter()
            .map(|e| ChartVersion { version: e.version, app_version: e.app_version, created: e.created, digest: e.digest, urls: e.urls })
            .collect();
        charts.push(Chart { name, description, icon, home, versions });
    }
    if charts.is_empty() {
        tracing::debug!(repo = %repo, "index lists no charts");
    }
    Ok(RepoCharts { repo, index_url: index_url.to_string(), checksum, charts })
}

pub(crate) fn require_index_url(key: &ResourceKey, obj: &RawObject) -> Result<String> {
    index_url(obj).map(str::to_string).ok_or_else(|| anyhow!("repository {key} has no index url in status"))
}
