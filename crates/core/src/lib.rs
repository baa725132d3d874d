//! repowatch core types: resource identity, cache entries and the
//! collaborator traits the cache is built against.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod error;
mod hooks;
mod source;

pub use error::{CacheError, CacheResult, SourceError};
pub use hooks::ResourceHooks;
pub use source::{ListResult, ResourceSource, WatchEvent, WatchStream};

/// Raw watched object as delivered by the source (Kubernetes-shaped JSON).
pub type RawObject = serde_json::Value;

pub mod prelude {
    pub use super::{
        CacheError, CacheResult, EntryStatus, EventKind, Fetched, ListResult, RawObject,
        ResourceEntry, ResourceHooks, ResourceKey, ResourceSource, ResourceVersion, SourceError,
        WatchEvent, WatchStream,
    };
}

/// Composite identity of a watched custom resource.
///
/// Ordering is namespace first, then name, which is the order `list_keys`
/// reports keys in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Key of a raw object, read from `metadata.namespace` / `metadata.name`.
    /// Cluster-scoped objects get an empty namespace. Returns None when the
    /// object has no name.
    pub fn from_object(obj: &RawObject) -> Option<Self> {
        let meta = obj.get("metadata")?;
        let name = meta.get("name").and_then(|v| v.as_str()).filter(|s| !s.is_empty())?;
        let namespace = meta.get("namespace").and_then(|v| v.as_str()).unwrap_or("");
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Opaque resource version token. Only ever compared for equality, and only
/// between versions of the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(rv: impl Into<String>) -> Self { Self(rv.into()) }

    /// `metadata.resourceVersion` of a raw object, if present and non-empty.
    pub fn from_object(obj: &RawObject) -> Option<Self> {
        obj.get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of change carried by a watch event that touches an object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Modify,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Modify => "modify",
            EventKind::Delete => "delete",
        }
    }
}

/// Materialization state of an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    /// Add/modify observed, hook still running.
    Pending,
    Ready,
    /// Last hook run failed; the previous payload (if any) is still held.
    Failed,
}

/// One watched object and its materialized payload.
#[derive(Debug, Clone)]
pub struct ResourceEntry<P> {
    pub key: ResourceKey,
    /// Latest version seen for the key, whether or not it materialized.
    pub resource_version: ResourceVersion,
    pub status: EntryStatus,
    pub payload: Option<P>,
    /// Version `payload` was materialized from.
    pub payload_version: Option<ResourceVersion>,
    /// Message of the most recent materialization failure; cleared on success.
    pub last_error: Option<String>,
    /// Last raw object seen for this key.
    pub object: RawObject,
    pub updated_at: DateTime<Utc>,
}

impl<P> ResourceEntry<P> {
    pub fn pending(key: ResourceKey, resource_version: ResourceVersion, object: RawObject) -> Self {
        Self {
            key,
            resource_version,
            status: EntryStatus::Pending,
            payload: None,
            payload_version: None,
            last_error: None,
            object,
            updated_at: Utc::now(),
        }
    }
}

/// Payload copied out of the cache by `fetch_one`, annotated with the entry
/// state so callers can decide whether to serve stale data.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<P> {
    pub key: ResourceKey,
    pub payload: P,
    pub status: EntryStatus,
    /// Version the payload was materialized from, which lags the latest seen
    /// version while the entry is Pending or Failed.
    pub resource_version: ResourceVersion,
    pub last_error: Option<String>,
}

impl<P> Fetched<P> {
    pub fn is_stale(&self) -> bool { self.status != EntryStatus::Ready }
}

/// Remove `metadata.managedFields`, which is large and never useful to hooks.
pub fn strip_managed_fields(v: &mut RawObject) {
    if !cfg!(feature = "strip-managed-fields") {
        return;
    }
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}
