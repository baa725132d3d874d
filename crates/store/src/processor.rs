//! Event classification and hook dispatch.
//!
//! [`decide`] is the pure part: it looks at the event kind, the admission
//! result and the current entry and says whether to index, evict or skip.
//! [`EventProcessor`] carries the decision out. Hooks always run outside the
//! cache lock; the lock is taken once to mark the entry pending and once to
//! record the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use repowatch_core::{
    EntryStatus, EventKind, RawObject, ResourceEntry, ResourceHooks, ResourceKey, ResourceVersion,
};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::state::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Object carries no name.
    NoKey,
    /// Precondition hook rejected the object.
    NotAdmitted,
    /// Same resource version as an already materialized entry.
    Unchanged,
    /// Delete for a key the cache does not know.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Index,
    Evict,
    Skip(SkipReason),
}

/// Classify one event. `current` is the status and resource version of the
/// existing entry for the key, if any.
pub fn decide(
    kind: EventKind,
    admitted: bool,
    incoming_rv: Option<&ResourceVersion>,
    current: Option<(EntryStatus, &ResourceVersion)>,
) -> Decision {
    match kind {
        EventKind::Delete => match current {
            Some(_) => Decision::Evict,
            None => Decision::Skip(SkipReason::Unknown),
        },
        EventKind::Add | EventKind::Modify => {
            if !admitted {
                return Decision::Skip(SkipReason::NotAdmitted);
            }
            match (current, incoming_rv) {
                (Some((EntryStatus::Ready, rv)), Some(incoming)) if rv == incoming => {
                    Decision::Skip(SkipReason::Unchanged)
                }
                _ => Decision::Index,
            }
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Indexed(EntryStatus),
    Evicted,
    Skipped(SkipReason),
}

/// Counts of one full-list reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub listed: usize,
    pub indexed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub evicted: usize,
}

pub(crate) struct EventProcessor<H: ResourceHooks> {
    hooks: Arc<H>,
    shared: Arc<Shared<H::Payload>>,
}

impl<H: ResourceHooks> EventProcessor<H> {
    pub(crate) fn new(hooks: Arc<H>, shared: Arc<Shared<H::Payload>>) -> Self {
        Self { hooks, shared }
    }

    pub(crate) async fn apply(&self, kind: EventKind, obj: RawObject) -> Outcome {
        counter!("repowatch_events_total", 1, "kind" => kind.as_str());
        let Some(key) = ResourceKey::from_object(&obj) else {
            warn!(kind = kind.as_str(), "event object has no name; skipping");
            return Outcome::Skipped(SkipReason::NoKey);
        };
        let incoming_rv = ResourceVersion::from_object(&obj);
        let admitted = kind == EventKind::Delete || self.hooks.admit(&obj);
        let decision = {
            let st = self.shared.state.read();
            let current = st.entries.get(&key).map(|e| (e.status, &e.resource_version));
            decide(kind, admitted, incoming_rv.as_ref(), current)
        };
        match decision {
            Decision::Skip(reason) => {
                debug!(key = %key, kind = kind.as_str(), reason = ?reason, "event skipped");
                Outcome::Skipped(reason)
            }
            Decision::Index => {
                let status = self.materialize(kind, key, incoming_rv.unwrap_or_default(), obj).await;
                Outcome::Indexed(status)
            }
            Decision::Evict => {
                self.evict(key, obj).await;
                Outcome::Evicted
            }
        }
    }

    async fn materialize(
        &self,
        kind: EventKind,
        key: ResourceKey,
        rv: ResourceVersion,
        obj: RawObject,
    ) -> EntryStatus {
        self.shared.mutate(|st| {
            st.index.add(key.clone());
            match st.entries.get_mut(&key) {
                Some(entry) => {
                    entry.status = EntryStatus::Pending;
                    entry.resource_version = rv.clone();
                    entry.object = obj.clone();
                    entry.updated_at = Utc::now();
                }
                None => {
                    st.entries.insert(key.clone(), ResourceEntry::pending(key.clone(), rv.clone(), obj.clone()));
                }
            }
        });

        let t0 = Instant::now();
        let res = match kind {
            EventKind::Add => self.hooks.on_add(&key, &obj).await,
            _ => self.hooks.on_modify(&key, &obj).await,
        };
        histogram!("repowatch_materialize_ms", t0.elapsed().as_secs_f64() * 1000.0);

        let error = res.as_ref().err().map(|e| format!("{e:#}"));
        let status = self.shared.mutate(|st| {
            let entry = st.entries.get_mut(&key)?;
            match res {
                Ok(payload) => {
                    entry.payload = Some(payload);
                    entry.payload_version = Some(rv.clone());
                    entry.status = EntryStatus::Ready;
                    entry.last_error = None;
                }
                Err(_) => {
                    entry.status = EntryStatus::Failed;
                    entry.last_error = error.clone();
                }
            }
            entry.updated_at = Utc::now();
            Some(entry.status)
        });
        if let Some(err) = &error {
            counter!("repowatch_materialize_failures_total", 1);
            warn!(key = %key, rv = %rv, kind = kind.as_str(), error = %err, took_ms = %t0.elapsed().as_millis(), "materialization failed; keeping previous payload");
        } else {
            debug!(key = %key, rv = %rv, kind = kind.as_str(), took_ms = %t0.elapsed().as_millis(), "entry materialized");
        }
        status.unwrap_or(EntryStatus::Failed)
    }

    /// Run the delete hook, then drop the key from index and entries under one
    /// write lock. Hook failures never keep the key alive.
    async fn evict(&self, key: ResourceKey, obj: RawObject) {
        if let Err(e) = self.hooks.on_delete(&key, &obj).await {
            warn!(key = %key, error = %format!("{e:#}"), "delete hook failed; evicting anyway");
        }
        self.shared.mutate(|st| {
            st.index.remove(&key);
            st.entries.remove(&key);
        });
        debug!(key = %key, "entry evicted");
    }

    /// Apply a full list: every item as an add, then evict every known key the
    /// list no longer contains. Each object takes the lock on its own.
    pub(crate) async fn resync(&self, items: Vec<RawObject>) -> ResyncSummary {
        let mut summary = ResyncSummary { listed: items.len(), ..Default::default() };
        let mut seen: FxHashSet<ResourceKey> = FxHashSet::default();
        for obj in items {
            if let Some(key) = ResourceKey::from_object(&obj) {
                seen.insert(key);
            }
            match self.apply(EventKind::Add, obj).await {
                Outcome::Indexed(EntryStatus::Failed) => summary.failed += 1,
                Outcome::Indexed(_) => summary.indexed += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
                Outcome::Evicted => summary.evicted += 1,
            }
        }

        let stale: Vec<(ResourceKey, RawObject)> = {
            let st = self.shared.state.read();
            st.index
                .iter()
                .filter(|k| !seen.contains(*k))
                .map(|k| {
                    let obj = st.entries.get(k).map(|e| e.object.clone()).unwrap_or(RawObject::Null);
                    (k.clone(), obj)
                })
                .collect()
        };
        for (key, obj) in stale {
            info!(key = %key, "key missing from relist; evicting");
            self.evict(key, obj).await;
            summary.evicted += 1;
        }
        summary
    }
}
