//! repowatch store: a namespaced resource cache kept current by a list/watch
//! loop and queried concurrently by request handlers.
//!
//! Consistency is eventual. One background task owns every mutation and
//! applies events one at a time under the write lock; readers copy data out
//! under the read lock.

#![forbid(unsafe_code)]

mod backoff;
mod cache;
mod config;
mod index;
mod processor;
mod state;
mod watcher;

pub use backoff::Backoff;
pub use cache::{Cache, CacheStats};
pub use config::CacheConfig;
pub use index::KeyIndex;
pub use processor::{decide, Decision, Outcome, ResyncSummary, SkipReason};
pub use state::Readiness;
pub use watcher::Phase;
