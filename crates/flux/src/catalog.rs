//! Read-side helpers over a cache of indexed repositories.

use repowatch_core::{CacheError, CacheResult, ResourceKey};
use repowatch_store::Cache;
use serde::Serialize;
use tracing::debug;

use crate::repo::{Chart, RepoCharts};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSummary {
    pub repo: ResourceKey,
    pub name: String,
    pub latest_version: Option<String>,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl ChartSummary {
    fn from_chart(repo: &ResourceKey, chart: &Chart) -> Self {
        let latest = chart.latest();
        Self {
            repo: repo.clone(),
            name: chart.name.clone(),
            latest_version: latest.map(|v| v.version.clone()),
            app_version: latest.and_then(|v| v.app_version.clone()),
            description: chart.description.clone(),
            icon: chart.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartPage {
    pub charts: Vec<ChartSummary>,
    /// Set when this page came back full and more may follow.
    pub next_page: Option<u32>,
    /// Repositories that could not be served this time.
    pub errors: Vec<CacheError>,
}

/// Charts of every indexed repository whose name is in `repo_filter` (all
/// when empty), ordered by repository then chart name. `page_size` 0 returns
/// everything; otherwise page `page_offset` of that size.
pub async fn available_charts(
    cache: &Cache<RepoCharts>,
    repo_filter: &[String],
    page_size: u32,
    page_offset: u32,
) -> CacheResult<ChartPage> {
    let repos = cache.list_keys(repo_filter).await?;
    let (indexed, errors) = cache.fetch_for_multiple(&repos).await;

    let mut all: Vec<ChartSummary> = repos
        .iter()
        .filter_map(|k| indexed.get(k))
        .flat_map(|rc| rc.charts.iter().map(move |c| ChartSummary::from_chart(&rc.repo, c)))
        .collect();
    debug!(repos = repos.len(), charts = all.len(), errors = errors.len(), "available charts");

    if page_size == 0 {
        return Ok(ChartPage { charts: all, next_page: None, errors });
    }
    let size = page_size as usize;
    let start = (page_offset as usize).saturating_mul(size);
    let charts: Vec<_> = if start >= all.len() { Vec::new() } else { all.drain(start..).take(size).collect() };
    let next_page = (charts.len() == size).then_some(page_offset + 1);
    Ok(ChartPage { charts, next_page, errors })
}

/// One chart of one repository. `NotFound` when the repository is not
/// indexed; `Ok(None)` when it is but does not carry the chart.
pub async fn find_chart(cache: &Cache<RepoCharts>, repo: &ResourceKey, chart_name: &str) -> CacheResult<Option<Chart>> {
    let fetched = cache.fetch_one(repo).await?;
    Ok(fetched.payload.charts.into_iter().find(|c| c.name == chart_name))
}
