//! Graphs
//!
//! A graph is either loaded (contents held directly) or lazy. A lazy graph
//! keeps only the summary the scanner computed (node and edge counts, node
//! ids) and re-reads its body from the content when asked. Listeners on a
//! lazy graph hear `ContentsLoaded` or `LoadFailed` after every load.

use super::{ChangeEvent, FolderElement, Listener, ListenerId, Listeners, Parent, ParentLink};
use super::{Properties, PropertyValue};
use crate::error::Result;
use crate::index::StreamEntry;
use crate::lazy::{Begin, Completion, LazySlot, LoadContext, LoadStatus, ReleaseGuard};
use crate::pool::{NodeClass, SourcePosition};
use crate::reader::events::GraphHeader;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i32,
    pub class: Option<Arc<NodeClass>>,
    pub position: Option<Arc<SourcePosition>>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Input,
    Successor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub kind: EdgeKind,
    pub from: i32,
    pub to: i32,
    /// Slot index; tells parallel edges apart.
    pub ordinal: u16,
    pub label: Option<Arc<str>>,
}

/// What is known about a graph without its body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
    /// Sorted, deduplicated node ids.
    pub node_ids: Arc<[i32]>,
}

impl GraphSummary {
    pub fn new(nodes: &[Node], edge_count: usize) -> Self {
        let mut ids: Vec<i32> = nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids.dedup();
        GraphSummary {
            node_count: nodes.len(),
            edge_count,
            node_ids: ids.into(),
        }
    }

    pub fn contains_node(&self, id: i32) -> bool {
        self.node_ids.binary_search(&id).is_ok()
    }
}

/// Nodes and edges of a graph.
pub struct GraphContents {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    by_id: HashMap<i32, usize>,
    _release: Option<ReleaseGuard>,
}

impl GraphContents {
    pub(crate) fn new(nodes: Vec<Node>, edges: Vec<Edge>, release: Option<ReleaseGuard>) -> Self {
        let by_id = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        GraphContents {
            nodes,
            edges,
            by_id,
            _release: release,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: i32) -> Option<&Node> {
        self.by_id.get(&id).map(|&i| &self.nodes[i])
    }

    /// Edges ending at `id`.
    pub fn inputs_of(&self, id: i32) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary::new(&self.nodes, self.edges.len())
    }
}

impl fmt::Debug for GraphContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContents")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

enum GraphBody {
    Loaded(Arc<GraphContents>),
    Lazy {
        entry: Arc<StreamEntry>,
        ctx: Arc<LoadContext>,
        slot: LazySlot<GraphContents>,
    },
}

pub struct Graph {
    header: GraphHeader,
    properties: Mutex<Properties>,
    parent: Mutex<ParentLink>,
    predecessor: Mutex<Weak<Graph>>,
    summary: GraphSummary,
    region: Option<Arc<StreamEntry>>,
    body: GraphBody,
    listeners: Listeners,
}

impl Graph {
    pub(crate) fn loaded(
        header: GraphHeader,
        properties: Properties,
        contents: GraphContents,
        region: Option<Arc<StreamEntry>>,
    ) -> Arc<Self> {
        Arc::new(Graph {
            summary: contents.summary(),
            header,
            properties: Mutex::new(properties),
            parent: Mutex::new(ParentLink::Detached),
            predecessor: Mutex::new(Weak::new()),
            region,
            body: GraphBody::Loaded(Arc::new(contents)),
            listeners: Listeners::default(),
        })
    }

    pub(crate) fn lazy(
        header: GraphHeader,
        properties: Properties,
        summary: GraphSummary,
        entry: Arc<StreamEntry>,
        ctx: Arc<LoadContext>,
    ) -> Arc<Self> {
        Arc::new(Graph {
            header,
            properties: Mutex::new(properties),
            parent: Mutex::new(ParentLink::Detached),
            predecessor: Mutex::new(Weak::new()),
            summary,
            region: Some(Arc::clone(&entry)),
            body: GraphBody::Lazy {
                entry,
                ctx,
                slot: LazySlot::new(),
            },
            listeners: Listeners::default(),
        })
    }

    fn props(&self) -> MutexGuard<'_, Properties> {
        self.properties.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn id(&self) -> i32 {
        self.header.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.header.title
    }

    pub fn header(&self) -> &GraphHeader {
        &self.header
    }

    pub fn properties(&self) -> Properties {
        self.props().clone()
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.props().get(key).cloned()
    }

    pub fn set_property(&self, key: &str, value: PropertyValue) {
        self.props().set(key, value);
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

    /// Previous graph in the same folder.
    pub fn predecessor(&self) -> Option<Arc<Graph>> {
        self.predecessor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .upgrade()
    }

    pub(crate) fn set_predecessor(&self, graph: Option<&Arc<Graph>>) {
        *self.predecessor.lock().unwrap_or_else(|p| p.into_inner()) =
            graph.map_or_else(Weak::new, Arc::downgrade);
    }

    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener = Arc::new(listener);
        self.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn region(&self) -> Option<&Arc<StreamEntry>> {
        self.region.as_ref()
    }

    pub fn summary(&self) -> &GraphSummary {
        &self.summary
    }

    pub fn node_count(&self) -> usize {
        self.summary.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.summary.edge_count
    }

    pub fn contains_node(&self, id: i32) -> bool {
        self.summary.contains_node(id)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.body, GraphBody::Lazy { .. })
    }

    pub fn status(&self) -> LoadStatus {
        match &self.body {
            GraphBody::Loaded(_) => LoadStatus::Complete,
            GraphBody::Lazy { slot, .. } => slot.status(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == LoadStatus::Complete
    }

    /// Start (or join) loading the body; never blocks.
    pub fn complete_contents(self: &Arc<Self>) -> Completion<GraphContents> {
        let (ctx, slot) = match &self.body {
            GraphBody::Loaded(contents) => return Completion::resolved(Ok(Arc::clone(contents))),
            GraphBody::Lazy { ctx, slot, .. } => (ctx, slot),
        };
        match slot.begin() {
            Begin::Ready(handle) | Begin::Joined(handle) => handle,
            Begin::Started(handle) => {
                let graph = Arc::clone(self);
                let task_handle = handle.clone();
                log::debug!("loading graph {} ({})", self.header.id, self.header.title);
                ctx.executor
                    .execute(Box::new(move || graph.run_load(&task_handle)));
                handle
            }
        }
    }

    /// `complete_contents` with a listener called once on completion.
    pub fn complete_contents_with(
        self: &Arc<Self>,
        listener: impl FnOnce(&Result<Arc<GraphContents>>) + Send + 'static,
    ) -> Completion<GraphContents> {
        let handle = self.complete_contents();
        handle.on_complete(listener);
        handle
    }

    /// Block until the body is available.
    pub fn contents(self: &Arc<Self>) -> Result<Arc<GraphContents>> {
        self.complete_contents().wait()
    }

    fn run_load(&self, handle: &Completion<GraphContents>) {
        let GraphBody::Lazy { entry, ctx, slot } = &self.body else {
            return;
        };
        let result = crate::builder::graph::load_graph(entry, ctx).map(|(properties, contents)| {
            self.props().merge_absent(&properties);
            Arc::new(contents)
        });
        let start = entry.start();
        let event = match &result {
            Ok(_) => ChangeEvent::ContentsLoaded { start },
            Err(e) => {
                ctx.stats.record_failure();
                log::warn!("loading graph {} failed: {}", self.header.id, e);
                ChangeEvent::LoadFailed {
                    start,
                    error: e.clone(),
                }
            }
        };
        slot.finish(handle, result);
        self.listeners.fire(&event);
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.header.id)
            .field("title", &self.header.title)
            .field("nodes", &self.summary.node_count)
            .field("lazy", &self.is_lazy())
            .finish()
    }
}

impl From<Arc<Graph>> for FolderElement {
    fn from(graph: Arc<Graph>) -> Self {
        FolderElement::Graph(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i32) -> Node {
        Node {
            id,
            class: None,
            position: None,
            properties: Properties::new(),
        }
    }

    fn edge(from: i32, to: i32, ordinal: u16) -> Edge {
        Edge {
            kind: EdgeKind::Input,
            from,
            to,
            ordinal,
            label: None,
        }
    }

    #[test]
    fn test_summary_ids_sorted() {
        let summary = GraphSummary::new(&[node(5), node(1), node(3)], 0);
        assert_eq!(&*summary.node_ids, &[1, 3, 5]);
        assert!(summary.contains_node(3));
        assert!(!summary.contains_node(2));
    }

    #[test]
    fn test_loaded_graph() {
        let contents = GraphContents::new(
            vec![node(0), node(1)],
            vec![edge(0, 1, 0), edge(0, 1, 1)],
            None,
        );
        let header = GraphHeader {
            id: 3,
            title: Arc::from("After parsing"),
        };
        let graph = Graph::loaded(header, Properties::new(), contents, None);
        assert!(!graph.is_lazy());
        assert!(graph.is_complete());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);

        let contents = graph.contents().unwrap();
        assert_eq!(contents.node(1).map(|n| n.id), Some(1));
        assert_eq!(contents.inputs_of(1).count(), 2);
    }

    #[test]
    fn test_predecessor_is_weak() {
        let make = |id| {
            Graph::loaded(
                GraphHeader {
                    id,
                    title: Arc::from("g"),
                },
                Properties::new(),
                GraphContents::new(Vec::new(), Vec::new(), None),
                None,
            )
        };
        let first = make(1);
        let second = make(2);
        second.set_predecessor(Some(&first));
        assert_eq!(second.predecessor().map(|g| g.id()), Some(1));
        drop(first);
        assert!(second.predecessor().is_none());
    }
}
