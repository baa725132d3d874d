use crate::{RawObject, ResourceKey};

/// Materialization hooks for one resource type.
///
/// `on_add` / `on_modify` turn a raw object into the payload served by the
/// cache. A hook error marks the entry failed and keeps the previous payload.
/// `on_delete` runs cleanup before the key is removed; its error is logged and
/// the key is removed anyway.
#[async_trait::async_trait]
pub trait ResourceHooks: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;

    /// Precondition for indexing. Objects not admitted are skipped and any
    /// existing entry for them is left untouched. Deletes are never filtered.
    fn admit(&self, _obj: &RawObject) -> bool { true }

    async fn on_add(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<Self::Payload>;

    async fn on_modify(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<Self::Payload>;

    async fn on_delete(&self, key: &ResourceKey, obj: &RawObject) -> anyhow::Result<()>;
}
