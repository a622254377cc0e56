//! Graph assembly shared by every builder that reads graph bodies.

use crate::lazy::ReleaseGuard;
use crate::model::{Edge, GraphContents, GraphSummary, Node, Properties, PropertyValue};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct GraphAssembly {
    pub(crate) properties: Properties,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphAssembly {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_property(&mut self, key: Arc<str>, value: PropertyValue) {
        self.properties.set(key, value);
    }

    pub(crate) fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub(crate) fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub(crate) fn summary(&self) -> GraphSummary {
        GraphSummary::new(&self.nodes, self.edges.len())
    }

    pub(crate) fn into_parts(self, release: Option<ReleaseGuard>) -> (Properties, GraphContents) {
        (
            self.properties,
            GraphContents::new(self.nodes, self.edges, release),
        )
    }
}
