use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use repowatch_core::{
    CacheError, CacheResult, EntryStatus, Fetched, ResourceHooks, ResourceKey, ResourceSource,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::state::{Readiness, Shared, State};
use crate::watcher::WatcherLoop;

/// Point-in-time counters, cheap to compute under the read lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub readiness: Readiness,
    pub keys: usize,
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
    pub epoch: u64,
    pub resource_version: Option<String>,
    pub lists_completed: u64,
}

struct TaskHandle {
    task: Mutex<Option<JoinHandle<()>>>,
    /// Cancels the watcher once the last cache handle is dropped.
    _cancel_on_drop: DropGuard,
}

/// Handle to a watch-driven cache. Clones share the same state and watcher.
///
/// Query methods wait until the first full list has been applied. They never
/// touch the source; everything they return is copied out under the read
/// lock.
pub struct Cache<P> {
    shared: Arc<Shared<P>>,
    handle: Arc<TaskHandle>,
}

impl<P> Clone for Cache<P> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), handle: Arc::clone(&self.handle) }
    }
}

impl<P: Clone + Send + Sync + 'static> Cache<P> {
    /// Start the watcher task for `source` with `hooks` and return the handle.
    /// Must be called within a tokio runtime.
    pub fn spawn<S, H>(source: S, hooks: H, config: CacheConfig) -> Self
    where
        S: ResourceSource,
        H: ResourceHooks<Payload = P>,
    {
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared::new(cancel.clone()));
        info!(source = %source.describe(), relist = ?config.relist_interval, "starting cache");
        let watcher = WatcherLoop::new(Arc::new(source), Arc::new(hooks), Arc::clone(&shared), config);
        let task = tokio::spawn(watcher.run());
        Self {
            shared,
            handle: Arc::new(TaskHandle { task: Mutex::new(Some(task)), _cancel_on_drop: cancel.drop_guard() }),
        }
    }

    /// Wait for the first full list. Errors only with `Shutdown`.
    pub async fn wait_ready(&self) -> CacheResult<()> {
        let mut rx = self.shared.readiness.subscribe();
        let readiness = match rx.wait_for(|r| *r != Readiness::Starting).await {
            Ok(r) => *r,
            Err(_) => Readiness::ShuttingDown,
        };
        match readiness {
            Readiness::Ready => Ok(()),
            _ => Err(CacheError::Shutdown),
        }
    }

    fn check_ready(&self) -> CacheResult<()> {
        match self.shared.readiness() {
            Readiness::Ready => Ok(()),
            Readiness::Starting => Err(CacheError::NotReady),
            Readiness::ShuttingDown => Err(CacheError::Shutdown),
        }
    }

    pub fn is_ready(&self) -> bool { self.shared.readiness() == Readiness::Ready }

    pub fn readiness(&self) -> Readiness { self.shared.readiness() }

    /// Known keys, optionally restricted to the given names, in
    /// namespace-then-name order.
    pub async fn list_keys(&self, name_filter: &[String]) -> CacheResult<Vec<ResourceKey>> {
        self.wait_ready().await?;
        self.try_list_keys(name_filter)
    }

    /// Like [`Cache::list_keys`] but fails with `NotReady` instead of waiting.
    pub fn try_list_keys(&self, name_filter: &[String]) -> CacheResult<Vec<ResourceKey>> {
        self.check_ready()?;
        Ok(self.shared.state.read().index.list(name_filter))
    }

    /// Last materialized payload for `key`, with the entry status attached.
    /// A failed entry still returns its previous payload; `NotFound` when the
    /// key is unknown or was never materialized.
    pub async fn fetch_one(&self, key: &ResourceKey) -> CacheResult<Fetched<P>> {
        self.wait_ready().await?;
        self.try_fetch_one(key)
    }

    pub fn try_fetch_one(&self, key: &ResourceKey) -> CacheResult<Fetched<P>> {
        self.check_ready()?;
        let st = self.shared.state.read();
        read_one(&st, key)
    }

    /// Best-effort batch fetch. Failed keys are reported as `Failed` with
    /// their last error, whether or not an older payload exists; unknown and
    /// not yet materialized keys as `NotFound`.
    pub async fn fetch_for_multiple(&self, keys: &[ResourceKey]) -> (HashMap<ResourceKey, P>, Vec<CacheError>) {
        if let Err(e) = self.wait_ready().await {
            return (HashMap::new(), vec![e]);
        }
        let mut found = HashMap::with_capacity(keys.len());
        let mut errors = Vec::new();
        {
            let st = self.shared.state.read();
            for key in keys {
                if let Some(entry) = st.entries.get(key).filter(|e| e.status == EntryStatus::Failed) {
                    errors.push(CacheError::Failed {
                        key: key.clone(),
                        reason: entry.last_error.clone().unwrap_or_else(|| "materialization failed".to_string()),
                    });
                    continue;
                }
                match read_one(&st, key) {
                    Ok(f) => {
                        found.insert(f.key, f.payload);
                    }
                    Err(e) => errors.push(e),
                }
            }
        }
        debug!(requested = keys.len(), found = found.len(), errors = errors.len(), "fetch_for_multiple");
        (found, errors)
    }

    pub fn stats(&self) -> CacheStats {
        let readiness = self.shared.readiness();
        let epoch = self.shared.epoch();
        let st = self.shared.state.read();
        let mut stats = CacheStats {
            readiness,
            keys: st.index.len(),
            pending: 0,
            ready: 0,
            failed: 0,
            epoch,
            resource_version: st.resource_version.as_ref().map(|rv| rv.to_string()),
            lists_completed: st.lists_completed,
        };
        for entry in st.entries.values() {
            match entry.status {
                EntryStatus::Pending => stats.pending += 1,
                EntryStatus::Ready => stats.ready += 1,
                EntryStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Receiver bumped after every applied mutation.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.shared.subscribe_epoch() }

    /// Stop the watcher and wait for it to exit. Queries fail with `Shutdown`
    /// afterwards. Idempotent.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let task = self.handle.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!("cache shut down");
        }
        self.shared.mark_shutting_down();
    }
}

fn read_one<P: Clone>(st: &State<P>, key: &ResourceKey) -> CacheResult<Fetched<P>> {
    let entry = st.entries.get(key).ok_or_else(|| CacheError::NotFound(key.clone()))?;
    let payload = entry.payload.clone().ok_or_else(|| CacheError::NotFound(key.clone()))?;
    Ok(Fetched {
        key: key.clone(),
        payload,
        status: entry.status,
        resource_version: entry.payload_version.clone().unwrap_or_default(),
        last_error: entry.last_error.clone(),
    })
}
