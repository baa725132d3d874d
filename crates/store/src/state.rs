use metrics::gauge;
use parking_lot::RwLock;
use repowatch_core::{ResourceEntry, ResourceKey, ResourceVersion};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::index::KeyIndex;

/// Lifecycle of a cache as seen by query callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    /// First full list still running.
    Starting,
    Ready,
    ShuttingDown,
}

/// Everything behind the cache lock.
pub(crate) struct State<P> {
    pub(crate) index: KeyIndex,
    pub(crate) entries: FxHashMap<ResourceKey, ResourceEntry<P>>,
    /// Resume point of the watch; informational outside the loop.
    pub(crate) resource_version: Option<ResourceVersion>,
    pub(crate) lists_completed: u64,
}

impl<P> Default for State<P> {
    fn default() -> Self {
        Self {
            index: KeyIndex::new(),
            entries: FxHashMap::default(),
            resource_version: None,
            lists_completed: 0,
        }
    }
}

/// State shared between the watcher task and every cache handle.
pub(crate) struct Shared<P> {
    pub(crate) state: RwLock<State<P>>,
    pub(crate) readiness: watch::Sender<Readiness>,
    epoch: watch::Sender<u64>,
    pub(crate) cancel: CancellationToken,
}

impl<P> Shared<P> {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        let (readiness, _) = watch::channel(Readiness::Starting);
        let (epoch, _) = watch::channel(0u64);
        Self { state: RwLock::new(State::default()), readiness, epoch, cancel }
    }

    /// Apply one mutation under the write lock and bump the epoch.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut State<P>) -> R) -> R {
        let (out, keys) = {
            let mut st = self.state.write();
            let out = f(&mut st);
            (out, st.index.len())
        };
        gauge!("repowatch_keys", keys as f64);
        self.epoch.send_modify(|e| *e = e.wrapping_add(1));
        out
    }

    pub(crate) fn readiness(&self) -> Readiness { *self.readiness.borrow() }

    /// Flip Starting -> Ready. True only the first time.
    pub(crate) fn mark_ready(&self) -> bool {
        self.readiness.send_if_modified(|r| {
            if *r == Readiness::Starting {
                *r = Readiness::Ready;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_shutting_down(&self) {
        self.readiness.send_if_modified(|r| {
            if *r == Readiness::ShuttingDown {
                false
            } else {
                *r = Readiness::ShuttingDown;
                true
            }
        });
    }

    pub(crate) fn epoch(&self) -> u64 { *self.epoch.borrow() }

    pub(crate) fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch.subscribe() }
}
