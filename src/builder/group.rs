//! Group completion
//!
//! Re-reads one group region and materializes its direct children. Nested
//! regions whose end is already in the index are skipped with a seek and
//! the pool recorded at their end; only what cannot be skipped is parsed.

use super::assembly::GraphAssembly;
use super::Builder;
use crate::error::{Error, Result};
use crate::index::{RegionClose, RegionSummary, StreamEntry};
use crate::lazy::{LoadContext, ReleaseGuard};
use crate::model::{
    Edge, FolderElement, Graph, Group, GroupContents, Node, ParentLink, Properties, PropertyValue,
};
use crate::pool::ConstantPool;
use crate::reader::binary::{drive, BinaryReader};
use crate::reader::events::{
    Closure, Directive, GraphHeader, RegionContent, RegionEnd, RegionHeader, RegionKind,
    RegionMark,
};
use log::debug;
use std::sync::{Arc, Weak};

enum Frame {
    /// The group being completed.
    Target,
    /// Direct child whose header has not been read yet.
    Opening(RegionMark),
    ChildGroup {
        group: Arc<Group>,
        entry: Arc<StreamEntry>,
        children: usize,
        parsed: Properties,
    },
    ChildGraph {
        entry: Arc<StreamEntry>,
        header: GraphHeader,
        assembly: GraphAssembly,
    },
    /// Region jumped over; a direct child carries its stub.
    Skipped(Option<FolderElement>),
    /// Grandchild read only to get past it.
    Nested,
}

struct Finish {
    end: u64,
    closure: Closure,
    pool: ConstantPool,
}

struct GroupBuilder<'a> {
    target: Weak<Group>,
    ctx: &'a Arc<LoadContext>,
    contents: Arc<GroupContents>,
    frames: Vec<Frame>,
    properties: Properties,
    finish: Option<Finish>,
}

impl GroupBuilder<'_> {
    /// A finished sibling region this builder may skip.
    fn indexed(&self, start: u64) -> Option<Arc<StreamEntry>> {
        self.ctx.index.closed(start)
    }

    fn count_grandchild(&mut self) {
        if let Some(Frame::ChildGroup { children, .. }) = self.frames.get_mut(1) {
            *children += 1;
        }
    }

    fn attach(&self, element: FolderElement) {
        if let FolderElement::Graph(graph) = &element {
            graph.set_predecessor(self.contents.last_graph().as_ref());
        }
        element.set_parent(ParentLink::Group(Weak::clone(&self.target)));
        self.contents.push(element);
    }

    /// Entry for a direct child: the scanner's if it has one.
    fn child_entry(&self, mark: RegionMark, content: RegionContent) -> Arc<StreamEntry> {
        match self.ctx.index.get(mark.start) {
            Some(entry) => entry,
            None => Arc::new(StreamEntry::new(
                mark,
                content.header,
                content.content_start,
                content.skip_pool,
            )),
        }
    }

    fn start_region(&mut self, mark: RegionMark) -> Result<Directive> {
        match mark.depth {
            0 if self.frames.is_empty() && mark.kind == RegionKind::Group => {
                self.frames.push(Frame::Target);
                Ok(Directive::Continue)
            }
            0 => Err(Error::protocol(mark.start, "region is not the expected group")),
            1 => {
                let skip = self.indexed(mark.start).and_then(|entry| {
                    let stub = match mark.kind {
                        RegionKind::Group => self.group_for(&entry).map(FolderElement::Group),
                        RegionKind::Graph => self
                            .ctx
                            .live_graph(mark.start)
                            .or_else(|| self.lazy_graph(&entry))
                            .map(FolderElement::Graph),
                    }?;
                    Some((entry, stub))
                });
                match skip {
                    Some((entry, stub)) => {
                        self.frames.push(Frame::Skipped(Some(stub)));
                        Ok(skip_directive(&entry))
                    }
                    None => {
                        self.frames.push(Frame::Opening(mark));
                        Ok(Directive::Continue)
                    }
                }
            }
            _ => {
                if mark.depth == 2 {
                    self.count_grandchild();
                }
                match self.indexed(mark.start) {
                    Some(entry) => {
                        self.frames.push(Frame::Skipped(None));
                        Ok(skip_directive(&entry))
                    }
                    None => {
                        self.frames.push(Frame::Nested);
                        Ok(Directive::Continue)
                    }
                }
            }
        }
    }

    /// The live group for `entry`, or a new one built from the entry.
    fn group_for(&self, entry: &Arc<StreamEntry>) -> Option<Arc<Group>> {
        if let Some(group) = self.ctx.live_group(entry.start()) {
            return Some(group);
        }
        let group = Group::from_entry(Arc::clone(entry), Arc::clone(self.ctx))?;
        self.ctx.register_group(&group);
        Some(group)
    }

    /// Stub for a finished graph large enough to stay lazy.
    fn lazy_graph(&self, entry: &Arc<StreamEntry>) -> Option<Arc<Graph>> {
        if entry.encoded_len()? <= self.ctx.config.lazy_graph_threshold {
            return None;
        }
        let RegionHeader::Graph(header) = entry.header() else {
            return None;
        };
        let Some(RegionSummary::Graph {
            summary,
            properties,
        }) = entry.summary()
        else {
            return None;
        };
        let graph = Graph::lazy(
            header.clone(),
            properties.clone(),
            summary.clone(),
            Arc::clone(entry),
            Arc::clone(self.ctx),
        );
        self.ctx.register_graph(entry.start(), &graph);
        Some(graph)
    }

    fn end_region(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::protocol(end.end, "unbalanced region end"))?;
        let truncated = end.closure == Closure::Truncated;
        match frame {
            Frame::Target => {
                self.finish = Some(Finish {
                    end: end.end,
                    closure: end.closure,
                    pool: pool.copy(),
                });
            }
            Frame::ChildGroup {
                group,
                entry,
                children,
                parsed,
            } => {
                entry.close(RegionClose {
                    end: end.end,
                    end_pool: pool.copy(),
                    summary: RegionSummary::Group {
                        children,
                        properties: parsed,
                    },
                    truncated,
                });
                self.attach(FolderElement::Group(group));
            }
            Frame::ChildGraph {
                entry,
                header,
                assembly,
            } => {
                let summary = assembly.summary();
                entry.close(RegionClose {
                    end: end.end,
                    end_pool: pool.copy(),
                    summary: RegionSummary::Graph {
                        summary: summary.clone(),
                        properties: assembly.properties.clone(),
                    },
                    truncated,
                });
                let live = self.ctx.live_graph(entry.start());
                let graph = match live.or_else(|| self.lazy_graph(&entry)) {
                    Some(graph) => graph,
                    None => {
                        let start = entry.start();
                        let (properties, contents) = assembly.into_parts(None);
                        let graph = Graph::loaded(header, properties, contents, Some(entry));
                        self.ctx.register_graph(start, &graph);
                        graph
                    }
                };
                self.attach(FolderElement::Graph(graph));
            }
            Frame::Skipped(Some(stub)) => self.attach(stub),
            Frame::Skipped(None) | Frame::Nested | Frame::Opening(_) => {}
        }
        Ok(())
    }
}

fn skip_directive(entry: &StreamEntry) -> Directive {
    match (entry.end(), entry.end_pool()) {
        (Some(end), Some(pool)) => Directive::Skip {
            end,
            pool: pool.clone(),
        },
        _ => Directive::Continue,
    }
}

impl Builder for GroupBuilder<'_> {
    fn start_group(&mut self, mark: RegionMark) -> Result<Directive> {
        self.start_region(mark)
    }

    fn start_group_content(&mut self, content: RegionContent) -> Result<()> {
        if let Some(Frame::Opening(_)) = self.frames.last() {
            let Some(Frame::Opening(mark)) = self.frames.pop() else {
                return Ok(());
            };
            let entry = self.child_entry(mark, content);
            let group = self
                .group_for(&entry)
                .ok_or_else(|| Error::protocol(entry.start(), "group tag with a graph header"))?;
            self.frames.push(Frame::ChildGroup {
                group,
                entry,
                children: 0,
                parsed: Properties::new(),
            });
        }
        Ok(())
    }

    fn end_group(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        self.end_region(end, pool)
    }

    fn start_graph(&mut self, mark: RegionMark) -> Result<Directive> {
        self.start_region(mark)
    }

    fn start_graph_content(&mut self, content: RegionContent) -> Result<()> {
        if let Some(Frame::Opening(_)) = self.frames.last() {
            let Some(Frame::Opening(mark)) = self.frames.pop() else {
                return Ok(());
            };
            let header = match &content.header {
                RegionHeader::Graph(header) => header.clone(),
                RegionHeader::Group(_) => {
                    return Err(Error::protocol(mark.start, "graph tag with a group header"))
                }
            };
            let entry = self.child_entry(mark, content);
            self.frames.push(Frame::ChildGraph {
                entry,
                header,
                assembly: GraphAssembly::new(),
            });
        }
        Ok(())
    }

    fn end_graph(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        self.end_region(end, pool)
    }

    fn set_property(&mut self, key: Arc<str>, value: PropertyValue) -> Result<()> {
        match self.frames.last_mut() {
            Some(Frame::Target) => self.properties.set(key, value),
            Some(Frame::ChildGroup { group, parsed, .. }) => {
                group.fill_property(&key, value.clone());
                parsed.set(key, value);
            }
            Some(Frame::ChildGraph { assembly, .. }) => assembly.set_property(key, value),
            _ => {}
        }
        Ok(())
    }

    fn add_node(&mut self, node: Node) -> Result<()> {
        if let Some(Frame::ChildGraph { assembly, .. }) = self.frames.last_mut() {
            assembly.add_node(node);
        }
        Ok(())
    }

    fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if let Some(Frame::ChildGraph { assembly, .. }) = self.frames.last_mut() {
            assembly.add_edge(edge);
        }
        Ok(())
    }
}

/// Materialize the direct children of `group` from its region.
///
/// Returns the properties read from the region and the sealed contents.
pub(crate) fn load_group(group: &Arc<Group>) -> Result<(Properties, Arc<GroupContents>)> {
    let ctx = group.context();
    let entry = group.region();
    ctx.stats.record_reparse();
    debug!(
        "re-reading group {} at {}..{:?}",
        group.name(),
        entry.start(),
        entry.end()
    );

    let channel = ctx.content.sub_channel(entry.start(), entry.end())?;
    let mut reader = BinaryReader::for_region(channel, entry, &ctx.config);
    let contents = Arc::new(GroupContents::new(ReleaseGuard::new(
        Arc::clone(ctx),
        entry.start(),
        entry.end().unwrap_or_else(|| entry.content_start()),
    )));
    let mut builder = GroupBuilder {
        target: Arc::downgrade(group),
        ctx,
        contents: Arc::clone(&contents),
        frames: Vec::with_capacity(8),
        properties: Properties::new(),
        finish: None,
    };
    drive(&mut reader, &mut builder)?;

    let finish = builder
        .finish
        .ok_or_else(|| Error::protocol(entry.start(), "group region not found"))?;
    if ctx.config.verify_pools && finish.closure == Closure::Tag {
        if let Some(close) = entry.closing().filter(|c| !c.truncated) {
            finish.pool.verify_against(&close.end_pool)?;
        }
    }
    contents.seal(finish.end);
    Ok((builder.properties, contents))
}
