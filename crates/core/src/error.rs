use crate::ResourceKey;

/// Errors a cache query caller is expected to handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("not_found: {0}")]
    NotFound(ResourceKey),
    /// The first full list has not completed yet.
    #[error("not_ready: cache has not completed its initial sync")]
    NotReady,
    #[error("shutdown: cache is shutting down")]
    Shutdown,
    /// Reported per key by batch fetches when the latest materialization failed.
    #[error("failed: {key}: {reason}")]
    Failed { key: ResourceKey, reason: String },
}

impl CacheError {
    /// True for errors that go away by themselves (retry later).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::NotReady)
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by a list/watch source. These never reach query callers.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested resource version is too old (HTTP 410); only a full
    /// relist can recover.
    #[error("gone: {0}")]
    Gone(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_gone(&self) -> bool { matches!(self, SourceError::Gone(_)) }
}
