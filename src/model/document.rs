//! Documents
//!
//! Root of the tree. Owns its top-level elements; a scanning thread may
//! still be appending to it. Documents are cheap handles (`Clone`).

use super::{ChangeEvent, FolderElement, Listener, ListenerId, Listeners, ParentLink};
use super::{Graph, Properties, PropertyValue};
use crate::error::{Error, Result};
use crate::index::StreamIndex;
use crate::lazy::{LoadStats, StatsSnapshot};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

#[derive(Default)]
struct ScanState {
    handle: Option<JoinHandle<Result<()>>>,
    outcome: Option<Result<()>>,
}

/// Index and counters of one content that contributed elements.
#[derive(Clone)]
struct Source {
    index: Arc<StreamIndex>,
    stats: Arc<LoadStats>,
}

#[derive(Default)]
pub(crate) struct DocumentInner {
    elements: RwLock<Vec<FolderElement>>,
    properties: Mutex<Properties>,
    listeners: Listeners,
    scan: Mutex<ScanState>,
    sources: Mutex<Vec<Source>>,
}

#[derive(Clone, Default)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_inner(inner: Arc<DocumentInner>) -> Self {
        Document { inner }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<FolderElement>> {
        self.inner.elements.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<FolderElement>> {
        self.inner.elements.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_scan(&self) -> MutexGuard<'_, ScanState> {
        self.inner.scan.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn link(&self) -> ParentLink {
        ParentLink::Document(Arc::downgrade(&self.inner))
    }

    /// True if both handles refer to the same document.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn elements(&self) -> Vec<FolderElement> {
        self.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<FolderElement> {
        self.read().get(index).cloned()
    }

    pub fn find(&self, name: &str) -> Option<FolderElement> {
        self.read().iter().find(|e| &*e.name() == name).cloned()
    }

    /// Properties recorded outside any group.
    pub fn properties(&self) -> Properties {
        self.inner
            .properties
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn set_property(&self, key: &str, value: PropertyValue) {
        self.inner
            .properties
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .set(key, value);
    }

    /// Append a top-level element, taking it over from any previous parent.
    pub fn add(&self, element: FolderElement) -> usize {
        element.set_parent(self.link());
        let index = {
            let mut elements = self.write();
            elements.push(element);
            elements.len() - 1
        };
        self.notify(&ChangeEvent::ElementAdded { index });
        index
    }

    pub fn remove(&self, index: usize) -> Option<FolderElement> {
        let removed = {
            let mut elements = self.write();
            (index < elements.len()).then(|| elements.remove(index))
        }?;
        removed.set_parent(ParentLink::Detached);
        self.notify(&ChangeEvent::ElementRemoved { index });
        Some(removed)
    }

    /// Move every element of `other` to the end of this document.
    pub fn merge(&self, other: &Document) {
        if self.ptr_eq(other) {
            return;
        }
        let moved: Vec<FolderElement> = std::mem::take(&mut *other.write());
        let sources = std::mem::take(
            &mut *other
                .inner
                .sources
                .lock()
                .unwrap_or_else(|p| p.into_inner()),
        );
        let count = moved.len();
        let link = self.link();
        for element in &moved {
            element.set_parent(link.clone());
        }
        self.write().extend(moved);
        self.inner
            .sources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(sources);
        other.notify(&ChangeEvent::Cleared);
        self.notify(&ChangeEvent::Merged { count });
    }

    /// Drop every element. Backends close once nothing references them.
    pub fn clear(&self) {
        let removed: Vec<FolderElement> = std::mem::take(&mut *self.write());
        for element in &removed {
            element.set_parent(ParentLink::Detached);
        }
        drop(removed);
        self.notify(&ChangeEvent::Cleared);
    }

    pub(crate) fn last_graph(&self) -> Option<Arc<Graph>> {
        super::last_graph(&self.read()).cloned()
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub(crate) fn notify(&self, event: &ChangeEvent) {
        self.inner.listeners.fire(event);
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    pub(crate) fn attach_source(&self, index: Arc<StreamIndex>, stats: Arc<LoadStats>) {
        self.inner
            .sources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Source { index, stats });
    }

    pub(crate) fn set_scan_thread(&self, handle: JoinHandle<Result<()>>) {
        self.lock_scan().handle = Some(handle);
    }

    pub(crate) fn set_scan_outcome(&self, outcome: Result<()>) {
        self.lock_scan().outcome = Some(outcome);
    }

    pub fn is_scanning(&self) -> bool {
        self.lock_scan()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the scan to finish and return its outcome.
    pub fn wait_scanned(&self) -> Result<()> {
        let handle = self.lock_scan().handle.take();
        if let Some(handle) = handle {
            let outcome = handle.join().unwrap_or_else(|_| {
                log::warn!("scanning thread panicked");
                Err(Error::Cancelled)
            });
            self.lock_scan().outcome = Some(outcome);
        }
        self.lock_scan().outcome.clone().unwrap_or(Ok(()))
    }

    /// Stream index of the first content that fed this document.
    pub fn index(&self) -> Option<Arc<StreamIndex>> {
        self.inner
            .sources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .first()
            .map(|s| Arc::clone(&s.index))
    }

    /// Load counters summed over every content that fed this document.
    pub fn stats(&self) -> StatsSnapshot {
        let sources = self.inner.sources.lock().unwrap_or_else(|p| p.into_inner());
        sources.iter().fold(StatsSnapshot::default(), |acc, s| {
            let snap = s.stats.snapshot();
            StatsSnapshot {
                reparses: acc.reparses + snap.reparses,
                releases: acc.releases + snap.releases,
                failures: acc.failures + snap.failures,
            }
        })
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("elements", &self.len())
            .finish()
    }
}
