//! repowatch flux – a chart catalog kept current from Flux `HelmRepository`
//! resources.
//!
//! Each ready repository is materialized into its parsed `index.yaml`
//! ([`RepoCharts`]); the catalog helpers read those payloads back out of the
//! cache.

#![forbid(unsafe_code)]

mod catalog;
mod fetch;
mod hooks;
mod repo;

pub use catalog::{available_charts, find_chart, ChartPage, ChartSummary};
pub use fetch::{FluxConfig, HttpIndexFetcher, IndexFetcher};
pub use hooks::HelmRepoHooks;
pub use repo::{artifact_checksum, index_url, is_repo_ready, parse_index, Chart, ChartVersion, RepoCharts};

use anyhow::Result;
use repowatch_kubehub::{KubeSource, FLUX_HELM_REPOSITORIES};
use repowatch_store::{Cache, CacheConfig};

/// Watch HelmRepositories (in `namespace`, or everywhere) with the ambient
/// kube config and env-derived settings. The returned cache starts filling
/// in the background.
pub async fn watch_helm_repositories(namespace: Option<&str>) -> Result<Cache<RepoCharts>> {
    let source = KubeSource::try_default(FLUX_HELM_REPOSITORIES, namespace).await?;
    let hooks = HelmRepoHooks::new(HttpIndexFetcher::new(&FluxConfig::from_env())?);
    Ok(Cache::spawn(source, hooks, CacheConfig::from_env()))
}
