//! The list/watch control loop.
//!
//! `Listing -> Watching`, with `Backoff` in between whenever a list or a watch
//! open fails. A `Gone` from the source drops the resume point and goes back
//! to `Listing`; an ordinary stream closure reopens the watch from the last
//! recorded version. Only a stream that closes quickly without delivering
//! anything is treated as a failure. The loop only ends on cancellation.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use futures::StreamExt;
use metrics::counter;
use repowatch_core::{
    EventKind, RawObject, ResourceHooks, ResourceSource, ResourceVersion, SourceError, WatchEvent,
    WatchStream,
};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::CacheConfig;
use crate::processor::EventProcessor;
use crate::state::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Listing,
    Watching,
    Backoff,
}

/// Why a watch stream stopped being consumed.
#[derive(Debug)]
enum StreamEnd {
    Closed { events: usize },
    Gone(String),
    Failed(SourceError),
    RelistDue,
}

pub(crate) struct WatcherLoop<S, H: ResourceHooks> {
    source: Arc<S>,
    processor: EventProcessor<H>,
    shared: Arc<Shared<H::Payload>>,
    config: CacheConfig,
    backoff: Backoff,
    resource_version: Option<ResourceVersion>,
    /// Phase to resume after sleeping in `Backoff`.
    retry_phase: Phase,
    next_relist: Option<Instant>,
}

impl<S: ResourceSource, H: ResourceHooks> WatcherLoop<S, H> {
    pub(crate) fn new(source: Arc<S>, hooks: Arc<H>, shared: Arc<Shared<H::Payload>>, config: CacheConfig) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_factor, config.backoff_max);
        Self {
            source,
            processor: EventProcessor::new(hooks, Arc::clone(&shared)),
            shared,
            config,
            backoff,
            resource_version: None,
            retry_phase: Phase::Listing,
            next_relist: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let source = self.source.describe();
        info!(source = %source, "watcher loop started");
        let mut phase = Phase::Listing;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.step(phase) => next,
            };
            if next != phase {
                info!(source = %source, from = ?phase, to = ?next, "watcher transition");
            }
            phase = next;
        }
        self.shared.mark_shutting_down();
        info!(source = %source, "watcher loop stopped");
    }

    async fn step(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::Listing => self.list().await,
            Phase::Watching => self.watch().await,
            Phase::Backoff => {
                let delay = self.backoff.next_delay();
                warn!(attempt = self.backoff.attempt(), delay_ms = %delay.as_millis(), retry = ?self.retry_phase, "backing off");
                sleep(delay).await;
                self.retry_phase
            }
        }
    }

    fn fail(&mut self, retry: Phase) -> Phase {
        self.retry_phase = retry;
        Phase::Backoff
    }

    async fn list(&mut self) -> Phase {
        let t0 = StdInstant::now();
        let list = match self.source.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "list failed");
                return self.fail(Phase::Listing);
            }
        };
        counter!("repowatch_lists_total", 1);
        let summary = self.processor.resync(list.items).await;
        if list.resource_version.is_empty() {
            debug!("list carried no resource version; watching from the current state");
        }
        self.set_resource_version(Some(list.resource_version));
        self.shared.mutate(|st| st.lists_completed += 1);
        self.backoff.reset();
        self.next_relist = self.config.relist_interval.map(|d| Instant::now() + d);
        info!(
            listed = summary.listed,
            indexed = summary.indexed,
            failed = summary.failed,
            skipped = summary.skipped,
            evicted = summary.evicted,
            rv = ?self.resource_version.as_ref().map(|v| v.as_str()),
            took_ms = %t0.elapsed().as_millis(),
            "list applied"
        );
        if self.shared.mark_ready() {
            info!("cache ready");
        }
        Phase::Watching
    }

    async fn watch(&mut self) -> Phase {
        let Some(rv) = self.resource_version.clone() else {
            debug!("no resume point; relisting");
            return self.fail(Phase::Listing);
        };
        let stream = match self.source.watch(&rv).await {
            Ok(s) => s,
            Err(SourceError::Gone(msg)) => {
                info!(rv = %rv, reason = %msg, "resume point gone on watch open; relisting");
                self.set_resource_version(None);
                return Phase::Listing;
            }
            Err(e) => {
                warn!(rv = %rv, error = %e, "watch open failed");
                return self.fail(Phase::Watching);
            }
        };
        counter!("repowatch_watch_restarts_total", 1);
        debug!(rv = %rv, "watch opened");
        let opened = StdInstant::now();
        match self.consume(stream).await {
            StreamEnd::Closed { events } if events > 0 || opened.elapsed() >= self.config.healthy_watch_after => {
                debug!(events, open_ms = %opened.elapsed().as_millis(), "watch closed; reopening");
                self.backoff.reset();
                Phase::Watching
            }
            StreamEnd::Closed { .. } => {
                debug!("watch closed without events");
                self.fail(Phase::Watching)
            }
            StreamEnd::Gone(msg) => {
                info!(reason = %msg, "resume point gone; relisting");
                self.set_resource_version(None);
                Phase::Listing
            }
            StreamEnd::Failed(e) => {
                warn!(error = %e, "watch stream failed");
                self.fail(Phase::Watching)
            }
            StreamEnd::RelistDue => {
                debug!("periodic relist due");
                Phase::Listing
            }
        }
    }

    async fn consume(&mut self, mut stream: WatchStream) -> StreamEnd {
        let mut events = 0usize;
        let relist_at = self.next_relist;
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = sleep_until(relist_at.unwrap_or_else(Instant::now)), if relist_at.is_some() => {
                    return StreamEnd::RelistDue;
                }
            };
            let event = match item {
                None => return StreamEnd::Closed { events },
                Some(Ok(event)) => event,
                Some(Err(SourceError::Gone(msg))) => return StreamEnd::Gone(msg),
                Some(Err(e)) => return StreamEnd::Failed(e),
            };
            events += 1;
            match event {
                WatchEvent::Added(obj) => self.apply(EventKind::Add, obj).await,
                WatchEvent::Modified(obj) => self.apply(EventKind::Modify, obj).await,
                WatchEvent::Deleted(obj) => self.apply(EventKind::Delete, obj).await,
                WatchEvent::Bookmark(rv) => {
                    debug!(rv = %rv, "bookmark");
                    if !rv.is_empty() {
                        self.set_resource_version(Some(rv));
                    }
                }
                WatchEvent::Gone(msg) => return StreamEnd::Gone(msg),
            }
        }
    }

    async fn apply(&mut self, kind: EventKind, obj: RawObject) {
        let rv = ResourceVersion::from_object(&obj);
        let outcome = self.processor.apply(kind, obj).await;
        debug!(kind = kind.as_str(), outcome = ?outcome, "event applied");
        if rv.is_some() {
            self.set_resource_version(rv);
        }
    }

    fn set_resource_version(&mut self, rv: Option<ResourceVersion>) {
        self.shared.state.write().resource_version = rv.clone();
        self.resource_version = rv;
    }
}
