#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use repowatch_core::prelude::*;
use repowatch_flux::{available_charts, find_chart, HelmRepoHooks, IndexFetcher, RepoCharts};
use repowatch_store::{Cache, CacheConfig};
use tokio::sync::mpsc;

fn init_tracing() {
    let env = std::env::var("REPOWATCH_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// One fixed list, then a single watch stream fed by the test.
struct OneShotSource {
    items: Vec<RawObject>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<WatchEvent, SourceError>>>>,
}

#[async_trait::async_trait]
impl ResourceSource for OneShotSource {
    async fn list(&self) -> Result<ListResult, SourceError> {
        Ok(ListResult { items: self.items.clone(), resource_version: ResourceVersion::new("100") })
    }

    async fn watch(&self, _rv: &ResourceVersion) -> Result<WatchStream, SourceError> {
        match self.events.lock().unwrap().take() {
            Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) }).boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

#[derive(Clone, Default)]
struct MapFetcher {
    docs: Arc<Mutex<HashMap<String, String>>>,
}

impl MapFetcher {
    fn serve(&self, url: &str, body: &str) { self.docs.lock().unwrap().insert(url.to_string(), body.to_string()); }
}

#[async_trait::async_trait]
impl IndexFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        match self.docs.lock().unwrap().get(url) {
            Some(body) => Ok(body.clone().into_bytes()),
            None => anyhow::bail!("GET {url}: 404 Not Found"),
        }
    }
}

fn helm_repo(ns: &str, name: &str, rv: &str, ready: bool) -> RawObject {
    serde_json::json!({
        "apiVersion": "source.toolkit.fluxcd.io/v1beta1",
        "kind": "HelmRepository",
        "metadata": { "name": name, "namespace": ns, "resourceVersion": rv, "generation": 1 },
        "status": {
            "observedGeneration": 1,
            "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }],
            "artifact": { "url": format!("http://source-controller/{ns}/{name}/index.yaml"), "checksum": rv },
        },
    })
}

fn index_yaml(charts: &[(&str, &str)]) -> String {
    let mut out = String::from("apiVersion: v1\nentries:\n");
    for (name, version) in charts {
        out.push_str(&format!("  {name}:\n    - name: {name}\n      version: {version}\n      urls: [http://charts/{name}-{version}.tgz]\n"));
    }
    out
}

fn url(ns: &str, name: &str) -> String { format!("http://source-controller/{ns}/{name}/index.yaml") }

fn test_config() -> CacheConfig {
    CacheConfig::default()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_relist_interval(None)
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let res = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(res.is_ok(), "timed out waiting for {what}");
}

fn spawn(items: Vec<RawObject>, fetcher: &MapFetcher) -> (Cache<RepoCharts>, mpsc::UnboundedSender<Result<WatchEvent, SourceError>>) {
    init_tracing();
    let (tx, rx) = mpsc::unbounded_channel();
    let source = OneShotSource { items, events: Mutex::new(Some(rx)) };
    (Cache::spawn(source, HelmRepoHooks::new(fetcher.clone()), test_config()), tx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_lists_charts_of_ready_repositories() {
    let fetcher = MapFetcher::default();
    fetcher.serve(&url("default", "bitnami"), &index_yaml(&[("redis", "14.8.8"), ("apache", "8.6.2")]));
    fetcher.serve(&url("team", "jetstack"), &index_yaml(&[("cert-manager", "1.5.3")]));
    let (cache, _tx) = spawn(
        vec![
            helm_repo("default", "bitnami", "10", true),
            helm_repo("team", "jetstack", "11", true),
            helm_repo("default", "pending", "12", false),
        ],
        &fetcher,
    );

    let page = available_charts(&cache, &[], 0, 0).await.unwrap();
    let names: Vec<_> = page.charts.iter().map(|c| (c.repo.name.as_str(), c.name.as_str())).collect();
    assert_eq!(names, vec![("bitnami", "apache"), ("bitnami", "redis"), ("jetstack", "cert-manager")]);
    assert!(page.errors.is_empty(), "{:?}", page.errors);
    assert_eq!(page.next_page, None);
    assert_eq!(page.charts[1].latest_version.as_deref(), Some("14.8.8"));

    let only = available_charts(&cache, &["jetstack".to_string()], 0, 0).await.unwrap();
    assert_eq!(only.charts.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_pages_through_charts() {
    let fetcher = MapFetcher::default();
    fetcher.serve(&url("default", "bitnami"), &index_yaml(&[("a", "1"), ("b", "1"), ("c", "1"), ("d", "1"), ("e", "1")]));
    let (cache, _tx) = spawn(vec![helm_repo("default", "bitnami", "10", true)], &fetcher);

    let first = available_charts(&cache, &[], 2, 0).await.unwrap();
    assert_eq!(first.charts.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(first.next_page, Some(1));
    let last = available_charts(&cache, &[], 2, 2).await.unwrap();
    assert_eq!(last.charts.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["e"]);
    assert_eq!(last.next_page, None);
    let past = available_charts(&cache, &[], 2, 9).await.unwrap();
    assert!(past.charts.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_index_is_reported_not_fatal() {
    let fetcher = MapFetcher::default();
    fetcher.serve(&url("default", "bitnami"), &index_yaml(&[("redis", "14.8.8")]));
    let (cache, _tx) = spawn(
        vec![helm_repo("default", "bitnami", "10", true), helm_repo("default", "broken", "11", true)],
        &fetcher,
    );

    let page = available_charts(&cache, &[], 0, 0).await.unwrap();
    assert_eq!(page.charts.len(), 1);
    assert_eq!(page.errors.len(), 1);
    assert!(matches!(&page.errors[0], CacheError::Failed { key, reason } if key.name == "broken" && reason.contains("404")));

    let err = find_chart(&cache, &ResourceKey::new("default", "broken"), "redis").await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn find_chart_follows_repository_updates() {
    let fetcher = MapFetcher::default();
    let bitnami = ResourceKey::new("default", "bitnami");
    fetcher.serve(&url("default", "bitnami"), &index_yaml(&[("redis", "14.8.7")]));
    let (cache, tx) = spawn(vec![helm_repo("default", "bitnami", "10", true)], &fetcher);

    let redis = find_chart(&cache, &bitnami, "redis").await.unwrap().unwrap();
    assert_eq!(redis.versions[0].version, "14.8.7");
    assert!(find_chart(&cache, &bitnami, "nginx").await.unwrap().is_none());

    fetcher.serve(&url("default", "bitnami"), &index_yaml(&[("redis", "14.8.8"), ("nginx", "9.5.0")]));
    tx.send(Ok(WatchEvent::Modified(helm_repo("default", "bitnami", "20", true)))).unwrap();
    eventually("reindexed", || {
        cache.try_fetch_one(&bitnami).map(|f| f.payload.checksum.as_deref() == Some("20")).unwrap_or(false)
    })
    .await;
    assert!(find_chart(&cache, &bitnami, "nginx").await.unwrap().is_some());

    tx.send(Ok(WatchEvent::Deleted(helm_repo("default", "bitnami", "21", true)))).unwrap();
    eventually("repo removed", || cache.try_list_keys(&[]).map(|k| k.is_empty()).unwrap_or(false)).await;
    assert!(available_charts(&cache, &[], 0, 0).await.unwrap().charts.is_empty());
}
