//! Graph completion: re-read the body of one lazy graph.

use super::assembly::GraphAssembly;
use super::Builder;
use crate::error::{Error, Result};
use crate::index::StreamEntry;
use crate::lazy::{LoadContext, ReleaseGuard};
use crate::model::{Edge, GraphContents, Node, Properties, PropertyValue};
use crate::pool::ConstantPool;
use crate::reader::binary::{drive, BinaryReader};
use crate::reader::events::{Closure, RegionContent, RegionEnd};
use std::sync::Arc;

#[derive(Default)]
struct GraphBodyBuilder {
    assembly: GraphAssembly,
    finish: Option<(u64, Closure, ConstantPool)>,
}

impl Builder for GraphBodyBuilder {
    fn start_group_content(&mut self, content: RegionContent) -> Result<()> {
        Err(Error::protocol(content.content_start, "group inside a graph"))
    }

    fn end_group(&mut self, end: RegionEnd, _pool: &mut ConstantPool) -> Result<()> {
        Err(Error::protocol(end.end, "end of group inside a graph"))
    }

    fn start_graph_content(&mut self, content: RegionContent) -> Result<()> {
        Err(Error::protocol(content.content_start, "graph inside a graph"))
    }

    fn end_graph(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        self.finish = Some((end.end, end.closure, pool.copy()));
        Ok(())
    }

    fn set_property(&mut self, key: Arc<str>, value: PropertyValue) -> Result<()> {
        self.assembly.set_property(key, value);
        Ok(())
    }

    fn add_node(&mut self, node: Node) -> Result<()> {
        self.assembly.add_node(node);
        Ok(())
    }

    fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.assembly.add_edge(edge);
        Ok(())
    }
}

/// Nodes, edges and properties of the graph region `entry`.
pub(crate) fn load_graph(
    entry: &Arc<StreamEntry>,
    ctx: &Arc<LoadContext>,
) -> Result<(Properties, GraphContents)> {
    ctx.stats.record_reparse();
    log::debug!("re-reading graph body at {}..{:?}", entry.content_start(), entry.end());
    let channel = ctx.content.sub_channel(entry.content_start(), entry.end())?;
    let mut reader = BinaryReader::for_graph_body(channel, entry, &ctx.config);
    let mut builder = GraphBodyBuilder::default();
    drive(&mut reader, &mut builder)?;

    let (end, closure, pool) = builder
        .finish
        .ok_or_else(|| Error::protocol(entry.content_start(), "graph body without an end"))?;
    if ctx.config.verify_pools && closure == Closure::Tag {
        if let Some(close) = entry.closing().filter(|c| !c.truncated) {
            pool.verify_against(&close.end_pool)?;
        }
    }
    let release = ReleaseGuard::new(Arc::clone(ctx), entry.start(), end);
    Ok(builder.assembly.into_parts(Some(release)))
}
