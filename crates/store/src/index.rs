use std::collections::BTreeSet;

use repowatch_core::ResourceKey;

/// Ordered set of known keys. Not synchronized on its own; the cache lock
/// guards it together with the entry map.
#[derive(Debug, Default, Clone)]
pub struct KeyIndex {
    keys: BTreeSet<ResourceKey>,
}

impl KeyIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.keys.len() }
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    pub fn contains(&self, key: &ResourceKey) -> bool { self.keys.contains(key) }

    /// Idempotent; returns true if the key was newly inserted.
    pub fn add(&mut self, key: ResourceKey) -> bool { self.keys.insert(key) }

    /// Idempotent; returns true if the key was present.
    pub fn remove(&mut self, key: &ResourceKey) -> bool { self.keys.remove(key) }

    /// All keys when `name_filter` is empty, otherwise the keys whose name is
    /// listed. Namespace-then-name order.
    pub fn list(&self, name_filter: &[String]) -> Vec<ResourceKey> {
        if name_filter.is_empty() {
            return self.keys.iter().cloned().collect();
        }
        self.keys
            .iter()
            .filter(|k| name_filter.iter().any(|n| n == &k.name))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> { self.keys.iter() }
}
