//! Document Model
//!
//! The browsable tree built from a dump:
//!
//! ```text
//! Document
//! └── FolderElement (Group | Graph)
//!       Group ── lazy: partial prefix + child count estimate
//!             └─ complete: GroupContents (sealed child list)
//!       Graph ── nodes, edges, properties (loaded or lazy)
//! ```
//!
//! Ownership runs downwards only. Parent links are `Weak` and are rewritten
//! when elements move between folders. Children handed out by a group are
//! `Element`s, which hold the group's contents: keeping any one of them
//! keeps the whole sibling list materialized.

pub mod document;
pub mod graph;
pub mod group;
pub mod properties;

pub use document::Document;
pub use graph::{Edge, EdgeKind, Graph, GraphContents, GraphSummary, Node};
pub use group::{Element, Group, GroupContents};
pub use properties::{Properties, PropertyValue};

use crate::error::Error;
use crate::reader::events::RegionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

// ============================================================================
// Change notification
// ============================================================================

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A child was appended at `index`.
    ElementAdded { index: usize },
    ElementRemoved { index: usize },
    /// The scanner finished a region.
    RegionClosed {
        kind: RegionKind,
        start: u64,
        end: u64,
        depth: usize,
    },
    /// A lazy node's contents were materialized.
    ContentsLoaded { start: u64 },
    LoadFailed { start: u64, error: Error },
    Merged { count: usize },
    Cleared,
    ScanFinished { error: Option<Error> },
}

pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next: AtomicU64,
    list: Mutex<Vec<(ListenerId, Listener)>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.list
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut list = self.list.lock().unwrap_or_else(|p| p.into_inner());
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != before
    }

    /// Call every listener outside the registry lock.
    pub(crate) fn fire(&self, event: &ChangeEvent) {
        let snapshot: Vec<Listener> = self
            .list
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

// ============================================================================
// Folder elements and parents
// ============================================================================

/// Non-owning link from an element to its folder.
#[derive(Clone, Default)]
pub(crate) enum ParentLink {
    #[default]
    Detached,
    Document(Weak<document::DocumentInner>),
    Group(Weak<Group>),
}

impl ParentLink {
    pub(crate) fn resolve(&self) -> Option<Parent> {
        match self {
            ParentLink::Detached => None,
            ParentLink::Document(weak) => weak.upgrade().map(|inner| Parent::Document(Document::from_inner(inner))),
            ParentLink::Group(weak) => weak.upgrade().map(Parent::Group),
        }
    }
}

pub enum Parent {
    Document(Document),
    Group(Arc<Group>),
}

impl Parent {
    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Parent::Group(g) => Some(g),
            Parent::Document(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FolderElement {
    Group(Arc<Group>),
    Graph(Arc<Graph>),
}

impl FolderElement {
    pub fn kind(&self) -> RegionKind {
        match self {
            FolderElement::Group(_) => RegionKind::Group,
            FolderElement::Graph(_) => RegionKind::Graph,
        }
    }

    pub fn name(&self) -> Arc<str> {
        match self {
            FolderElement::Group(g) => Arc::clone(g.name()),
            FolderElement::Graph(g) => Arc::clone(g.name()),
        }
    }

    pub fn properties(&self) -> Properties {
        match self {
            FolderElement::Group(g) => g.properties(),
            FolderElement::Graph(g) => g.properties(),
        }
    }

    pub fn set_property(&self, key: &str, value: PropertyValue) {
        match self {
            FolderElement::Group(g) => g.set_property(key, value),
            FolderElement::Graph(g) => g.set_property(key, value),
        }
    }

    pub fn parent(&self) -> Option<Parent> {
        match self {
            FolderElement::Group(g) => g.parent(),
            FolderElement::Graph(g) => g.parent(),
        }
    }

    pub(crate) fn set_parent(&self, link: ParentLink) {
        match self {
            FolderElement::Group(g) => g.set_parent(link),
            FolderElement::Graph(g) => g.set_parent(link),
        }
    }

    /// Offset of the element's region in its content, if it came from one.
    pub fn start(&self) -> Option<u64> {
        match self {
            FolderElement::Group(g) => Some(g.region().start()),
            FolderElement::Graph(g) => g.region().map(|e| e.start()),
        }
    }

    /// Same kind and same region: the identity used across re-parses.
    pub fn same_region(&self, other: &FolderElement) -> bool {
        self.kind() == other.kind() && self.start().is_some() && self.start() == other.start()
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            FolderElement::Group(g) => Some(g),
            FolderElement::Graph(_) => None,
        }
    }

    pub fn as_graph(&self) -> Option<&Arc<Graph>> {
        match self {
            FolderElement::Graph(g) => Some(g),
            FolderElement::Group(_) => None,
        }
    }
}

/// Last graph in a sibling list, for predecessor links.
pub(crate) fn last_graph(elements: &[FolderElement]) -> Option<&Arc<Graph>> {
    elements.iter().rev().find_map(FolderElement::as_graph)
}

impl AsRef<FolderElement> for FolderElement {
    fn as_ref(&self) -> &FolderElement {
        self
    }
}
