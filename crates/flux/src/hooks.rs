use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use repowatch_core::{RawObject, ResourceHooks, ResourceKey};
use tracing::info;

use crate::fetch::IndexFetcher;
use crate::repo::{artifact_checksum, is_repo_ready, parse_index, require_index_url, RepoCharts};

/// Indexes ready HelmRepository objects into their chart lists.
pub struct HelmRepoHooks<F> {
    fetcher: Arc<F>,
}

impl<F: IndexFetcher> HelmRepoHooks<F> {
    pub fn new(fetcher: F) -> Self { Self { fetcher: Arc::new(fetcher) } }

    async fn index(&self, key: &ResourceKey, obj: &RawObject) -> Result<RepoCharts> {
        let url = require_index_url(key, obj)?;
        let started = Instant::now();
        let bytes = self.fetcher.fetch(&url).await?;
        let charts = parse_index(key.clone(), &url, artifact_checksum(obj), &bytes)?;
        counter!("repowatch_flux_indexed_total", 1);
        info!(
            repo = %key,
            url = %url,
            charts = charts.charts.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "repository indexed"
        );
        Ok(charts)
    }
}

#[async_trait]
impl<F: IndexFetcher> ResourceHooks for HelmRepoHooks<F> {
    type Payload = RepoCharts;

    fn admit(&self, obj: &RawObject) -> bool { is_repo_ready(obj) }

    async fn on_add(&self, key: &ResourceKey, obj: &RawObject) -> Result<RepoCharts> { self.index(key, obj).await }

    async fn on_modify(&self, key: &ResourceKey, obj: &RawObject) -> Result<RepoCharts> { self.index(key, obj).await }

    async fn on_delete(&self, key: &ResourceKey, _obj: &RawObject) -> Result<()> {
        info!(repo = %key, "repository removed from catalog");
        Ok(())
    }
}
