use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Retrieves a repository index document by URL.
#[async_trait]
pub trait IndexFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxConfig {
    pub index_timeout: Duration,
}

impl Default for FluxConfig {
    fn default() -> Self { Self { index_timeout: Duration::from_secs(30) } }
}

impl FluxConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = std::env::var("REPOWATCH_INDEX_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            cfg.index_timeout = Duration::from_secs(secs.max(1));
        }
        cfg
    }
}

pub struct HttpIndexFetcher {
    client: reqwest::Client,
}

impl HttpIndexFetcher {
    pub fn new(config: &FluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.index_timeout)
            .build()
            .context("building index http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl IndexFetcher for HttpIndexFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        let body = resp.bytes().await.with_context(|| format!("reading body of {url}"))?;
        Ok(body.to_vec())
    }
}
