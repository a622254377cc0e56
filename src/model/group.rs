//! Groups
//!
//! Every group read from a content is lazy. While the scanner is inside a
//! group its children accumulate in a loading list that `partial_data`
//! exposes. When the group closes, those contents become the group's
//! complete contents for as long as someone holds them; after that the
//! group is pending again and `complete_contents` re-reads its region.

use super::{ChangeEvent, FolderElement, Listener, ListenerId, Listeners, Parent, ParentLink};
use super::{Properties, PropertyValue};
use crate::error::Result;
use crate::index::{RegionSummary, StreamEntry};
use crate::lazy::{Begin, Completion, LazySlot, LoadContext, LoadStatus, ReleaseGuard};
use crate::pool::Method;
use crate::reader::events::{GroupHeader, RegionHeader};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

/// Children of a group.
///
/// Filled by one builder, then sealed; sealed contents never change.
pub struct GroupContents {
    elements: RwLock<Vec<FolderElement>>,
    sealed: AtomicBool,
    release: ReleaseGuard,
}

impl GroupContents {
    pub(crate) fn new(release: ReleaseGuard) -> Self {
        GroupContents {
            elements: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
            release,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<FolderElement>> {
        self.elements.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a child; returns its index.
    pub(crate) fn push(&self, element: FolderElement) -> usize {
        debug_assert!(!self.is_sealed(), "sealed contents are read-only");
        let mut elements = self.elements.write().unwrap_or_else(|p| p.into_inner());
        elements.push(element);
        elements.len() - 1
    }

    pub(crate) fn seal(&self, end: u64) {
        self.release.set_end(end);
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn pin(self: &Arc<Self>, element: &FolderElement) -> Element {
        Element {
            element: element.clone(),
            siblings: Arc::clone(self),
        }
    }

    pub fn get(self: &Arc<Self>, index: usize) -> Option<Element> {
        self.read().get(index).map(|e| self.pin(e))
    }

    pub fn elements(self: &Arc<Self>) -> Vec<Element> {
        self.read().iter().map(|e| self.pin(e)).collect()
    }

    pub fn find(self: &Arc<Self>, name: &str) -> Option<Element> {
        self.read()
            .iter()
            .find(|e| &*e.name() == name)
            .map(|e| self.pin(e))
    }

    pub(crate) fn last_graph(&self) -> Option<Arc<super::Graph>> {
        super::last_graph(&self.read()).cloned()
    }
}

/// A child of a group, holding the group's contents alive.
///
/// Dereferences to the `FolderElement`. The group stays complete, and
/// returns these same children, until every `Element` from it and every
/// `Arc<GroupContents>` is dropped.
#[derive(Clone)]
pub struct Element {
    element: FolderElement,
    siblings: Arc<GroupContents>,
}

impl Element {
    pub fn element(&self) -> &FolderElement {
        &self.element
    }

    /// The sibling list this element pins.
    pub fn siblings(&self) -> &Arc<GroupContents> {
        &self.siblings
    }

    /// Drop the pin and keep the bare element.
    pub fn into_inner(self) -> FolderElement {
        self.element
    }
}

impl Deref for Element {
    type Target = FolderElement;

    fn deref(&self) -> &FolderElement {
        &self.element
    }
}

impl AsRef<FolderElement> for Element {
    fn as_ref(&self) -> &FolderElement {
        &self.element
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.element, f)
    }
}

impl fmt::Debug for GroupContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupContents")
            .field("len", &self.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

pub struct Group {
    header: GroupHeader,
    properties: Mutex<Properties>,
    parent: Mutex<ParentLink>,
    entry: Arc<StreamEntry>,
    ctx: Arc<LoadContext>,
    slot: LazySlot<GroupContents>,
    /// Contents the scanner is still filling.
    loading: Mutex<Option<Arc<GroupContents>>>,
    listeners: Listeners,
}

impl Group {
    pub(crate) fn new(
        header: GroupHeader,
        properties: Properties,
        entry: Arc<StreamEntry>,
        ctx: Arc<LoadContext>,
    ) -> Arc<Self> {
        Arc::new(Group {
            header,
            properties: Mutex::new(properties),
            parent: Mutex::new(ParentLink::Detached),
            entry,
            ctx,
            slot: LazySlot::new(),
            loading: Mutex::new(None),
            listeners: Listeners::default(),
        })
    }

    /// Group for a finished region, built from its index entry alone.
    pub(crate) fn from_entry(entry: Arc<StreamEntry>, ctx: Arc<LoadContext>) -> Option<Arc<Self>> {
        let RegionHeader::Group(header) = entry.header() else {
            return None;
        };
        let header = header.clone();
        let properties = match entry.summary() {
            Some(RegionSummary::Group { properties, .. }) => properties.clone(),
            _ => Properties::new(),
        };
        Some(Group::new(header, properties, entry, ctx))
    }

    fn props(&self) -> MutexGuard<'_, Properties> {
        self.properties.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn loading(&self) -> Option<Arc<GroupContents>> {
        self.loading
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn name(&self) -> &Arc<str> {
        &self.header.name
    }

    pub fn short_name(&self) -> &Arc<str> {
        &self.header.short_name
    }

    pub fn method(&self) -> Option<&Arc<Method>> {
        self.header.method.as_ref()
    }

    pub fn bci(&self) -> i32 {
        self.header.bci
    }

    pub fn header(&self) -> &GroupHeader {
        &self.header
    }

    pub fn region(&self) -> &Arc<StreamEntry> {
        &self.entry
    }

    pub(crate) fn context(&self) -> &Arc<LoadContext> {
        &self.ctx
    }

    pub fn properties(&self) -> Properties {
        self.props().clone()
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.props().get(key).cloned()
    }

    /// Edit a property. Edits survive later completions of the group.
    pub fn set_property(&self, key: &str, value: PropertyValue) {
        self.props().set(key, value);
    }

    pub(crate) fn merge_properties(&self, parsed: &Properties) {
        self.props().merge_absent(parsed);
    }

    /// Set a parsed property unless the key is already present.
    pub(crate) fn fill_property(&self, key: &str, value: PropertyValue) {
        let mut props = self.props();
        if !props.contains(key) {
            props.set(key, value);
        }
    }

    pub fn parent(&self) -> Option<Parent> {
        self.parent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .resolve()
    }

    pub(crate) fn set_parent(&self, link: ParentLink) {
        *self.parent.lock().unwrap_or_else(|p| p.into_inner()) = link;
    }

    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener = Arc::new(listener);
        self.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn notify(&self, event: &ChangeEvent) {
        self.listeners.fire(event);
    }

    pub fn status(&self) -> LoadStatus {
        self.slot.status()
    }

    pub fn is_complete(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Children known right now, without blocking.
    ///
    /// Always a prefix of what `get_elements` eventually returns.
    pub fn partial_data(&self) -> Vec<Element> {
        match self.slot.current().or_else(|| self.loading()) {
            Some(contents) => contents.elements(),
            None => Vec::new(),
        }
    }

    /// Best guess at the number of children.
    pub fn child_count_hint(&self) -> usize {
        if let Some(contents) = self.slot.current().or_else(|| self.loading()) {
            return contents.len();
        }
        match self.entry.summary() {
            Some(RegionSummary::Group { children, .. }) => *children,
            _ => 0,
        }
    }

    /// Start (or join) materializing the children; never blocks.
    pub fn complete_contents(self: &Arc<Self>) -> Completion<GroupContents> {
        match self.slot.begin() {
            Begin::Ready(handle) | Begin::Joined(handle) => handle,
            Begin::Started(handle) => {
                let group = Arc::clone(self);
                let task_handle = handle.clone();
                log::debug!(
                    "completing group {} at {}",
                    self.header.name,
                    self.entry.start()
                );
                self.ctx
                    .executor
                    .execute(Box::new(move || group.run_load(&task_handle)));
                handle
            }
        }
    }

    /// `complete_contents` with a listener called once on completion.
    pub fn complete_contents_with(
        self: &Arc<Self>,
        listener: impl FnOnce(&Result<Arc<GroupContents>>) + Send + 'static,
    ) -> Completion<GroupContents> {
        let handle = self.complete_contents();
        handle.on_complete(listener);
        handle
    }

    /// Block until the children are materialized.
    pub fn get_elements(self: &Arc<Self>) -> Result<Arc<GroupContents>> {
        self.complete_contents().wait()
    }

    fn run_load(self: &Arc<Self>, handle: &Completion<GroupContents>) {
        let result = crate::builder::group::load_group(self).map(|(properties, contents)| {
            self.merge_properties(&properties);
            contents
        });
        let event = match &result {
            Ok(_) => ChangeEvent::ContentsLoaded {
                start: self.entry.start(),
            },
            Err(e) => {
                self.ctx.stats.record_failure();
                log::warn!("completing group {} failed: {}", self.header.name, e);
                ChangeEvent::LoadFailed {
                    start: self.entry.start(),
                    error: e.clone(),
                }
            }
        };
        self.slot.finish(handle, result);
        self.notify(&event);
    }

    // ========================================================================
    // Scanner hooks
    // ========================================================================

    /// Claim the slot for the scanner and expose `contents` as partial data.
    ///
    /// Callers asking for the contents meanwhile join the returned handle.
    pub(crate) fn begin_scan(&self, contents: &Arc<GroupContents>) -> Option<Completion<GroupContents>> {
        *self.loading.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(contents));
        match self.slot.begin() {
            Begin::Started(handle) => Some(handle),
            _ => None,
        }
    }

    fn clear_loading(&self) {
        *self.loading.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Publish the scanner's outcome for this group.
    ///
    /// A failed scan fails the claimed handle; a later request re-reads
    /// whatever part of the region was received.
    pub(crate) fn finish_scan(
        &self,
        handle: Option<Completion<GroupContents>>,
        result: Result<Arc<GroupContents>>,
    ) {
        let failure = result.as_ref().err().cloned();
        if failure.is_some() {
            self.clear_loading();
        }
        match (handle, result) {
            (Some(handle), result) => self.slot.finish(&handle, result),
            (None, Ok(contents)) => self.slot.install(&contents),
            (None, Err(_)) => {}
        }
        self.clear_loading();
        if let Some(error) = failure {
            log::warn!("scan of group {} failed: {}", self.header.name, error);
            self.notify(&ChangeEvent::LoadFailed {
                start: self.entry.start(),
                error,
            });
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.header.name)
            .field("start", &self.entry.start())
            .field("status", &self.status())
            .finish()
    }
}

impl From<Arc<Group>> for FolderElement {
    fn from(group: Arc<Group>) -> Self {
        FolderElement::Group(group)
    }
}
