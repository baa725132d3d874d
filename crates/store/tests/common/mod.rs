#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use repowatch_core::prelude::*;
use repowatch_store::CacheConfig;
use tokio::sync::{mpsc, oneshot};

pub fn init_tracing() {
    let env = std::env::var("REPOWATCH_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn test_config() -> CacheConfig {
    CacheConfig::default()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_relist_interval(None)
}

pub fn key(ns: &str, name: &str) -> ResourceKey { ResourceKey::new(ns, name) }

pub fn repo(ns: &str, name: &str, rv: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "name": name, "namespace": ns, "resourceVersion": rv },
        "status": { "ready": true },
    })
}

pub fn repo_not_ready(ns: &str, name: &str, rv: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "name": name, "namespace": ns, "resourceVersion": rv },
        "status": { "ready": false },
    })
}

// ----------------- Scripted source -----------------

enum ListScript {
    Ok(ListResult),
    Err(String),
    Gated(ListResult, oneshot::Receiver<()>),
}

enum WatchScript {
    Stream(mpsc::UnboundedReceiver<Result<WatchEvent, SourceError>>),
    Err(SourceError),
}

#[derive(Default)]
struct SourceInner {
    lists: Mutex<VecDeque<ListScript>>,
    watches: Mutex<VecDeque<WatchScript>>,
    list_calls: AtomicUsize,
    watch_rvs: Mutex<Vec<String>>,
}

/// List/watch source driven by the test. Lists and watches are served in the
/// order they were pushed; with nothing queued a list fails and a watch
/// stays open without events.
#[derive(Clone, Default)]
pub struct FakeSource {
    inner: Arc<SourceInner>,
}

/// Sending half of one scripted watch stream. Dropping it closes the stream.
pub struct WatchFeed {
    tx: mpsc::UnboundedSender<Result<WatchEvent, SourceError>>,
}

impl WatchFeed {
    pub fn added(&self, obj: serde_json::Value) { let _ = self.tx.send(Ok(WatchEvent::Added(obj))); }
    pub fn modified(&self, obj: serde_json::Value) { let _ = self.tx.send(Ok(WatchEvent::Modified(obj))); }
    pub fn deleted(&self, obj: serde_json::Value) { let _ = self.tx.send(Ok(WatchEvent::Deleted(obj))); }
    pub fn bookmark(&self, rv: &str) { let _ = self.tx.send(Ok(WatchEvent::Bookmark(ResourceVersion::new(rv)))); }
    pub fn gone(&self) { let _ = self.tx.send(Ok(WatchEvent::Gone("too old resource version".into()))); }
    pub fn error(&self, err: SourceError) { let _ = self.tx.send(Err(err)); }
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

impl FakeSource {
    pub fn new() -> Self { Self::default() }

    pub fn push_list(&self, items: Vec<serde_json::Value>, rv: &str) {
        let list = ListResult { items, resource_version: ResourceVersion::new(rv) };
        self.inner.lists.lock().unwrap().push_back(ListScript::Ok(list));
    }

    pub fn push_list_error(&self, msg: &str) {
        self.inner.lists.lock().unwrap().push_back(ListScript::Err(msg.to_string()));
    }

    /// The list only returns once the returned sender fires (or is dropped).
    pub fn push_gated_list(&self, items: Vec<serde_json::Value>, rv: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        let list = ListResult { items, resource_version: ResourceVersion::new(rv) };
        self.inner.lists.lock().unwrap().push_back(ListScript::Gated(list, rx));
        tx
    }

    pub fn push_watch(&self) -> WatchFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.watches.lock().unwrap().push_back(WatchScript::Stream(rx));
        WatchFeed { tx }
    }

    pub fn push_watch_error(&self, err: SourceError) {
        self.inner.watches.lock().unwrap().push_back(WatchScript::Err(err));
    }

    pub fn list_calls(&self) -> usize { self.inner.list_calls.load(Ordering::SeqCst) }

    /// Resource versions watches were opened with, in order.
    pub fn watch_rvs(&self) -> Vec<String> { self.inner.watch_rvs.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl ResourceSource for FakeSource {
    async fn list(&self) -> Result<ListResult, SourceError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.inner.lists.lock().unwrap().pop_front();
        match next {
            Some(ListScript::Ok(list)) => Ok(list),
            Some(ListScript::Err(msg)) => Err(SourceError::Transport(anyhow::anyhow!(msg))),
            Some(ListScript::Gated(list, gate)) => {
                let _ = gate.await;
                Ok(list)
            }
            None => Err(SourceError::Transport(anyhow::anyhow!("no list scripted"))),
        }
    }

    async fn watch(&self, rv: &ResourceVersion) -> Result<WatchStream, SourceError> {
        self.inner.watch_rvs.lock().unwrap().push(rv.to_string());
        let next = self.inner.watches.lock().unwrap().pop_front();
        match next {
            Some(WatchScript::Stream(rx)) => {
                Ok(futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) }).boxed())
            }
            Some(WatchScript::Err(e)) => Err(e),
            None => Ok(futures::stream::pending().boxed()),
        }
    }

    fn describe(&self) -> String { "fake".to_string() }
}

// ----------------- Recording hooks -----------------

#[derive(Default)]
struct HooksInner {
    failing: Mutex<HashSet<String>>,
    fail_deletes: Mutex<bool>,
    calls: Mutex<Vec<(String, String)>>,
}

/// Payload is `"<name>@<resourceVersion>"`. Objects with `status.ready ==
/// false` are not admitted.
#[derive(Clone, Default)]
pub struct TestHooks {
    inner: Arc<HooksInner>,
}

impl TestHooks {
    pub fn new() -> Self { Self::default() }

    pub fn fail_for(&self, name: &str) { self.inner.failing.lock().unwrap().insert(name.to_string()); }
    pub fn succeed_for(&self, name: &str) { self.inner.failing.lock().unwrap().remove(name); }
    pub fn fail_deletes(&self) { *self.inner.fail_deletes.lock().unwrap() = true; }

    /// `(op, key)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> { self.inner.calls.lock().unwrap().clone() }

    pub fn count(&self, op: &str, key: &ResourceKey) -> usize {
        let k = key.to_string();
        self.calls().iter().filter(|(o, c)| o == op && *c == k).count()
    }

    fn record(&self, op: &str, key: &ResourceKey) {
        self.inner.calls.lock().unwrap().push((op.to_string(), key.to_string()));
    }

    fn materialize(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<String> {
        if self.inner.failing.lock().unwrap().contains(&key.name) {
            anyhow::bail!("index fetch for {} failed", key.name);
        }
        let rv = ResourceVersion::from_object(obj).unwrap_or_default();
        Ok(format!("{}@{}", key.name, rv))
    }
}

#[async_trait::async_trait]
impl ResourceHooks for TestHooks {
    type Payload = String;

    fn admit(&self, obj: &RawObject) -> bool {
        obj.get("status").and_then(|s| s.get("ready")).and_then(|r| r.as_bool()).unwrap_or(true)
    }

    async fn on_add(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<String> {
        self.record("add", key);
        self.materialize(key, obj)
    }

    async fn on_modify(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<String> {
        self.record("modify", key);
        self.materialize(key, obj)
    }

    async fn on_delete(&self, key: &ResourceKey, _obj: &RawObject) -> anyhow::Result<()> {
        self.record("delete", key);
        if *self.inner.fail_deletes.lock().unwrap() {
            anyhow::bail!("cleanup for {} failed", key);
        }
        Ok(())
    }
}

// ----------------- Waiting -----------------

/// Poll `cond` until it holds; panics after a few seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let res = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(res.is_ok(), "timed out waiting for {what}");
}
