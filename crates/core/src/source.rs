use futures::stream::BoxStream;

use crate::{RawObject, ResourceVersion, SourceError};

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(RawObject),
    Modified(RawObject),
    Deleted(RawObject),
    /// Resume point advanced without any object change.
    Bookmark(ResourceVersion),
    /// Resume point expired; the consumer must relist.
    Gone(String),
}

/// Result of a full list of the watched collection.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<RawObject>,
    /// Collection-level version to start the following watch from.
    pub resource_version: ResourceVersion,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, SourceError>>;

/// List + watch capability over one resource type in one scope.
#[async_trait::async_trait]
pub trait ResourceSource: Send + Sync + 'static {
    async fn list(&self) -> Result<ListResult, SourceError>;

    /// Open a watch starting after `resource_version`. The stream ending is an
    /// ordinary closure; the consumer reopens from its last recorded version.
    async fn watch(&self, resource_version: &ResourceVersion) -> Result<WatchStream, SourceError>;

    /// Short description used in logs.
    fn describe(&self) -> String { "resource source".to_string() }
}
