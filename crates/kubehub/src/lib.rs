//! repowatch kubehub – list/watch source over the Kubernetes API

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::{StreamExt, TryStreamExt};
use kube::{
    api::{Api, ListParams, WatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, WatchEvent as KubeWatchEvent},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use repowatch_core::{
    strip_managed_fields, ListResult, RawObject, ResourceSource, ResourceVersion, SourceError, WatchEvent,
    WatchStream,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Flux source-controller HelmRepository, the resource the packages plugin caches.
pub const FLUX_HELM_REPOSITORIES: &str = "source.toolkit.fluxcd.io/v1beta1/HelmRepository";

/// Watch request knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Ask the server for bookmark events. Their cadence is up to the server.
    pub bookmarks: bool,
    /// Server-side watch timeout; the stream then closes and is reopened.
    pub timeout_secs: u32,
    pub label_selector: Option<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { bookmarks: true, timeout_secs: 290, label_selector: None }
    }
}

impl WatchOptions {
    /// Defaults overridden by `REPOWATCH_WATCH_*` / `REPOWATCH_LABEL_SELECTOR`.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(b) = std::env::var("REPOWATCH_WATCH_BOOKMARKS").ok().and_then(|s| s.parse::<bool>().ok()) {
            opts.bookmarks = b;
        }
        if let Some(t) = std::env::var("REPOWATCH_WATCH_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u32>().ok()) {
            // the API server rejects watch timeouts of 295s and above
            opts.timeout_secs = t.clamp(1, 290);
        }
        opts.label_selector = std::env::var("REPOWATCH_LABEL_SELECTOR").ok().filter(|s| !s.is_empty());
        opts
    }

    fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        lp.label_selector = self.label_selector.clone();
        lp
    }

    fn watch_params(&self) -> WatchParams {
        let mut wp = WatchParams::default();
        wp.bookmarks = self.bookmarks;
        wp.timeout = Some(self.timeout_secs);
        wp.label_selector = self.label_selector.clone();
        wp
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

pub fn to_raw(obj: &DynamicObject) -> Result<RawObject> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

/// True when the API server says the requested resource version has expired.
pub fn is_gone(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 410)
}

fn source_error(err: kube::Error) -> SourceError {
    if is_gone(&err) {
        SourceError::Gone(err.to_string())
    } else {
        SourceError::Transport(anyhow::Error::new(err))
    }
}

/// Map one raw kube watch event onto the cache's event model.
pub fn convert_event(ev: KubeWatchEvent<DynamicObject>) -> Result<WatchEvent, SourceError> {
    match ev {
        KubeWatchEvent::Added(o) => Ok(WatchEvent::Added(to_raw(&o)?)),
        KubeWatchEvent::Modified(o) => Ok(WatchEvent::Modified(to_raw(&o)?)),
        KubeWatchEvent::Deleted(o) => Ok(WatchEvent::Deleted(to_raw(&o)?)),
        KubeWatchEvent::Bookmark(b) => Ok(WatchEvent::Bookmark(ResourceVersion::new(b.metadata.resource_version))),
        KubeWatchEvent::Error(e) if e.code == 410 => Ok(WatchEvent::Gone(e.message)),
        KubeWatchEvent::Error(e) => Err(SourceError::Transport(anyhow!("watch error {}: {} ({})", e.code, e.message, e.reason))),
    }
}

/// List/watch over one GVK, either in one namespace or cluster-wide.
pub struct KubeSource {
    api: Api<DynamicObject>,
    gvk_key: String,
    namespace: Option<String>,
    options: WatchOptions,
}

impl KubeSource {
    pub fn new(api: Api<DynamicObject>, gvk_key: impl Into<String>, namespace: Option<String>, options: WatchOptions) -> Self {
        Self { api, gvk_key: gvk_key.into(), namespace, options }
    }

    /// Resolve `gvk_key` through discovery and build a source scoped to
    /// `namespace` (all namespaces when None or for cluster-scoped kinds).
    pub async fn connect(client: Client, gvk_key: &str, namespace: Option<&str>, options: WatchOptions) -> Result<Self> {
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
        let api: Api<DynamicObject> = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(client, ns, &ar),
                None => Api::all_with(client, &ar),
            }
        } else {
            Api::all_with(client, &ar)
        };
        let namespace = if namespaced { namespace.map(|s| s.to_string()) } else { None };
        info!(gvk = %gvk_key, ns = ?namespace, "kube source resolved");
        Ok(Self::new(api, gvk_key, namespace, options))
    }

    /// `connect` with the ambient kube config.
    pub async fn try_default(gvk_key: &str, namespace: Option<&str>) -> Result<Self> {
        let client = Client::try_default().await?;
        Self::connect(client, gvk_key, namespace, WatchOptions::from_env()).await
    }
}

#[async_trait::async_trait]
impl ResourceSource for KubeSource {
    async fn list(&self) -> Result<ListResult, SourceError> {
        let list = self.api.list(&self.options.list_params()).await.map_err(source_error)?;
        let resource_version = ResourceVersion::new(list.metadata.resource_version.clone().unwrap_or_default());
        let items = list.items.iter().map(to_raw).collect::<Result<Vec<_>>>()?;
        debug!(gvk = %self.gvk_key, count = items.len(), rv = %resource_version, "listed");
        Ok(ListResult { items, resource_version })
    }

    async fn watch(&self, resource_version: &ResourceVersion) -> Result<WatchStream, SourceError> {
        let stream = self
            .api
            .watch(&self.options.watch_params(), resource_version.as_str())
            .await
            .map_err(source_error)?;
        let gvk = self.gvk_key.clone();
        let stream = stream.map_err(source_error).and_then(|ev| async move { convert_event(ev) }).inspect_err(move |e| {
            if !e.is_gone() {
                counter!("repowatch_kube_watch_errors_total", 1);
                warn!(gvk = %gvk, error = %e, "watch stream error");
            }
        });
        Ok(stream.boxed())
    }

    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} in {}", self.gvk_key, ns),
            None => format!("{} (all namespaces)", self.gvk_key),
        }
    }
}
