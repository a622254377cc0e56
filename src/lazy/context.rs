//! Per-content load context
//!
//! Everything a lazy node needs to re-read its region: the content, the
//! stream index, the executor and the configuration. Lazy nodes and their
//! materialized contents hold the context; when the last holder goes away
//! the content owner closes the backend.
//!
//! The context also remembers which group and graph objects are alive for
//! each region start, so that re-reading a parent hands back the same
//! child objects (and the edits made on them) instead of fresh copies.

use super::Executor;
use crate::config::LoadConfig;
use crate::content::ContentOwner;
use crate::index::StreamIndex;
use crate::model::{Graph, Group};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

const MIN_PRUNE_AT: usize = 64;

/// Counters shared by a document and its load context.
#[derive(Debug, Default)]
pub struct LoadStats {
    reparses: AtomicUsize,
    releases: AtomicUsize,
    failures: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Region re-parses run by lazy completions.
    pub reparses: usize,
    /// Materialized contents dropped (release hook runs).
    pub releases: usize,
    /// Completions that ended in an error.
    pub failures: usize,
}

impl LoadStats {
    pub(crate) fn record_reparse(&self) {
        self.reparses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reparses: self.reparses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

enum LiveNode {
    Group(Weak<Group>),
    Graph(Weak<Graph>),
}

impl LiveNode {
    fn is_alive(&self) -> bool {
        match self {
            LiveNode::Group(g) => g.strong_count() > 0,
            LiveNode::Graph(g) => g.strong_count() > 0,
        }
    }
}

/// Region start → the node object currently standing for that region.
struct LiveNodes {
    map: HashMap<u64, LiveNode>,
    prune_at: usize,
}

impl Default for LiveNodes {
    fn default() -> Self {
        LiveNodes {
            map: HashMap::new(),
            prune_at: MIN_PRUNE_AT,
        }
    }
}

impl LiveNodes {
    fn insert(&mut self, start: u64, node: LiveNode) {
        self.map.insert(start, node);
        if self.map.len() >= self.prune_at {
            self.map.retain(|_, n| n.is_alive());
            self.prune_at = (self.map.len() * 2).max(MIN_PRUNE_AT);
        }
    }
}

pub struct LoadContext {
    pub(crate) content: Arc<ContentOwner>,
    pub(crate) index: Arc<StreamIndex>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) config: LoadConfig,
    pub(crate) stats: Arc<LoadStats>,
    live: Mutex<LiveNodes>,
}

impl LoadContext {
    pub(crate) fn new(
        content: Arc<ContentOwner>,
        executor: Arc<dyn Executor>,
        config: LoadConfig,
    ) -> Arc<Self> {
        Arc::new(LoadContext {
            content,
            index: Arc::new(StreamIndex::new()),
            executor,
            config,
            stats: Arc::new(LoadStats::default()),
            live: Mutex::new(LiveNodes::default()),
        })
    }

    pub fn index(&self) -> &Arc<StreamIndex> {
        &self.index
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<LoadStats> {
        &self.stats
    }

    fn live(&self) -> MutexGuard<'_, LiveNodes> {
        self.live.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The live group object for the region at `start`, if any.
    pub(crate) fn live_group(&self, start: u64) -> Option<Arc<Group>> {
        match self.live().map.get(&start) {
            Some(LiveNode::Group(g)) => g.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn live_graph(&self, start: u64) -> Option<Arc<Graph>> {
        match self.live().map.get(&start) {
            Some(LiveNode::Graph(g)) => g.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn register_group(&self, group: &Arc<Group>) {
        let start = group.region().start();
        self.live().insert(start, LiveNode::Group(Arc::downgrade(group)));
    }

    pub(crate) fn register_graph(&self, start: u64, graph: &Arc<Graph>) {
        self.live().insert(start, LiveNode::Graph(Arc::downgrade(graph)));
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("content", &self.content)
            .field("entries", &self.index.len())
            .finish()
    }
}

/// Dropped together with a node's materialized contents.
///
/// Lets the backend forget cached bytes up to the end of the region.
pub(crate) struct ReleaseGuard {
    ctx: Arc<LoadContext>,
    start: u64,
    end: AtomicU64,
}

impl ReleaseGuard {
    pub(crate) fn new(ctx: Arc<LoadContext>, start: u64, end: u64) -> Self {
        ReleaseGuard {
            ctx,
            start,
            end: AtomicU64::new(end),
        }
    }

    /// Regions still being scanned learn their end late.
    pub(crate) fn set_end(&self, end: u64) {
        self.end.store(end, Ordering::Relaxed);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let end = self.end.load(Ordering::Relaxed);
        log::debug!("released contents of region {}..{}", self.start, end);
        self.ctx.stats.record_release();
        self.ctx.content.reset_cache(end);
    }
}
