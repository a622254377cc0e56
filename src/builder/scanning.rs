//! Scanning builder
//!
//! First pass over a content. Groups are attached to their parent as soon
//! as their header is read and fill up while the scan is inside them;
//! graphs are attached once their closing tag is read. Every region gets a
//! `StreamEntry` in the index, and the scanner is the only writer of it.
//!
//! When the input fails, groups still open fail their completion with that
//! error and a graph cut short is dropped; their entries are still closed.

use super::assembly::GraphAssembly;
use super::Builder;
use crate::error::{Error, Result};
use crate::index::{RegionClose, RegionSummary, StreamEntry};
use crate::lazy::{Completion, LoadContext, ReleaseGuard};
use crate::model::{
    ChangeEvent, Document, Edge, FolderElement, Graph, Group, GroupContents, Node, ParentLink,
    Properties, PropertyValue,
};
use crate::pool::ConstantPool;
use crate::reader::binary::{drive, BinaryReader};
use crate::reader::events::{
    Closure, Directive, GraphHeader, RegionContent, RegionEnd, RegionHeader, RegionMark,
    StreamInfo,
};
use log::{debug, info};
use std::sync::Arc;

enum ScanFrame {
    Group {
        group: Arc<Group>,
        contents: Arc<GroupContents>,
        entry: Arc<StreamEntry>,
        handle: Option<Completion<GroupContents>>,
        /// Properties as read, without edits made while scanning.
        parsed: Properties,
    },
    Graph {
        entry: Arc<StreamEntry>,
        header: GraphHeader,
        assembly: GraphAssembly,
    },
}

pub struct ScanningBuilder {
    document: Document,
    ctx: Arc<LoadContext>,
    frames: Vec<ScanFrame>,
    pending: Option<RegionMark>,
    /// Error that stopped the input, if any.
    failure: Option<Error>,
}

impl ScanningBuilder {
    pub fn new(document: Document, ctx: Arc<LoadContext>) -> Self {
        ScanningBuilder {
            document,
            ctx,
            frames: Vec::with_capacity(16),
            pending: None,
            failure: None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn open_entry(&mut self, content: RegionContent) -> Result<Arc<StreamEntry>> {
        let mark = self.pending.take().ok_or_else(|| {
            Error::protocol(content.content_start, "region content without an opening tag")
        })?;
        let entry = Arc::new(StreamEntry::new(
            mark,
            content.header,
            content.content_start,
            content.skip_pool,
        ));
        self.ctx.index.insert(Arc::clone(&entry));
        Ok(entry)
    }

    /// Attach to the innermost open group, or to the document.
    fn attach(&self, element: FolderElement) {
        let parent = self.frames.iter().rev().find_map(|f| match f {
            ScanFrame::Group {
                group, contents, ..
            } => Some((group, contents)),
            ScanFrame::Graph { .. } => None,
        });
        match parent {
            Some((group, contents)) => {
                if let FolderElement::Graph(graph) = &element {
                    graph.set_predecessor(contents.last_graph().as_ref());
                }
                element.set_parent(ParentLink::Group(Arc::downgrade(group)));
                let index = contents.push(element);
                group.notify(&ChangeEvent::ElementAdded { index });
            }
            None => {
                if let FolderElement::Graph(graph) = &element {
                    graph.set_predecessor(self.document.last_graph().as_ref());
                }
                self.document.add(element);
            }
        }
    }

    /// Error to fail a region with, if it was cut short by one.
    fn cut_by(&self, end: &RegionEnd) -> Option<&Error> {
        match end.closure {
            Closure::Truncated => self.failure.as_ref(),
            Closure::Tag | Closure::Skipped => None,
        }
    }

    fn region_closed(&self, end: &RegionEnd) {
        self.document.notify(&ChangeEvent::RegionClosed {
            kind: end.kind,
            start: end.start,
            end: end.end,
            depth: self.frames.len(),
        });
    }
}

impl Builder for ScanningBuilder {
    fn start_stream(&mut self, stream: &StreamInfo) -> Result<()> {
        info!(
            "{}: stream {} (v{})",
            self.ctx.content.description(),
            stream.id,
            stream.version
        );
        Ok(())
    }

    fn start_group(&mut self, mark: RegionMark) -> Result<Directive> {
        self.pending = Some(mark);
        Ok(Directive::Continue)
    }

    fn start_group_content(&mut self, content: RegionContent) -> Result<()> {
        let entry = self.open_entry(content)?;
        let group = Group::from_entry(Arc::clone(&entry), Arc::clone(&self.ctx))
            .ok_or_else(|| Error::protocol(entry.start(), "group tag with a graph header"))?;
        let contents = Arc::new(GroupContents::new(ReleaseGuard::new(
            Arc::clone(&self.ctx),
            entry.start(),
            entry.content_start(),
        )));
        self.ctx.register_group(&group);
        let handle = group.begin_scan(&contents);
        debug!("scanning group {} at {}", group.name(), entry.start());
        self.attach(FolderElement::Group(Arc::clone(&group)));
        self.frames.push(ScanFrame::Group {
            group,
            contents,
            entry,
            handle,
            parsed: Properties::new(),
        });
        Ok(())
    }

    fn end_group(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        if self.pending.take().is_some() {
            // Input ended inside the header.
            return Ok(());
        }
        let Some(ScanFrame::Group {
            group,
            contents,
            entry,
            handle,
            parsed,
        }) = self.frames.pop()
        else {
            return Err(Error::protocol(end.end, "unbalanced end of group"));
        };
        entry.close(RegionClose {
            end: end.end,
            end_pool: pool.copy(),
            summary: RegionSummary::Group {
                children: contents.len(),
                properties: parsed,
            },
            truncated: end.closure == Closure::Truncated,
        });
        contents.seal(end.end);
        match self.cut_by(&end) {
            Some(e) => group.finish_scan(handle, Err(e.clone())),
            None => group.finish_scan(handle, Ok(contents)),
        }
        self.region_closed(&end);
        Ok(())
    }

    fn start_graph(&mut self, mark: RegionMark) -> Result<Directive> {
        self.pending = Some(mark);
        Ok(Directive::Continue)
    }

    fn start_graph_content(&mut self, content: RegionContent) -> Result<()> {
        let header = match &content.header {
            RegionHeader::Graph(header) => header.clone(),
            RegionHeader::Group(_) => {
                return Err(Error::protocol(
                    content.content_start,
                    "graph tag with a group header",
                ))
            }
        };
        let entry = self.open_entry(content)?;
        self.frames.push(ScanFrame::Graph {
            entry,
            header,
            assembly: GraphAssembly::new(),
        });
        Ok(())
    }

    fn end_graph(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()> {
        if self.pending.take().is_some() {
            return Ok(());
        }
        let Some(ScanFrame::Graph {
            entry,
            header,
            assembly,
        }) = self.frames.pop()
        else {
            return Err(Error::protocol(end.end, "unbalanced end of graph"));
        };
        let summary = assembly.summary();
        entry.close(RegionClose {
            end: end.end,
            end_pool: pool.copy(),
            summary: RegionSummary::Graph {
                summary: summary.clone(),
                properties: assembly.properties.clone(),
            },
            truncated: end.closure == Closure::Truncated,
        });

        if let Some(e) = self.cut_by(&end) {
            debug!("dropping graph {} at {}: {}", header.id, entry.start(), e);
            self.region_closed(&end);
            return Ok(());
        }

        let size = entry.encoded_len().unwrap_or(0);
        let graph = if size > self.ctx.config.lazy_graph_threshold {
            debug!("graph {} at {} is lazy ({} bytes)", header.id, entry.start(), size);
            let properties = assembly.properties;
            Graph::lazy(header, properties, summary, entry, Arc::clone(&self.ctx))
        } else {
            let (properties, contents) = assembly.into_parts(None);
            Graph::loaded(header, properties, contents, Some(entry))
        };
        self.ctx.register_graph(end.start, &graph);
        self.attach(FolderElement::Graph(graph));
        self.region_closed(&end);
        Ok(())
    }

    fn set_property(&mut self, key: Arc<str>, value: PropertyValue) -> Result<()> {
        match self.frames.last_mut() {
            Some(ScanFrame::Group { group, parsed, .. }) => {
                group.fill_property(&key, value.clone());
                parsed.set(key, value);
            }
            Some(ScanFrame::Graph { assembly, .. }) => assembly.set_property(key, value),
            None => self.document.set_property(&key, value),
        }
        Ok(())
    }

    fn add_node(&mut self, node: Node) -> Result<()> {
        match self.frames.last_mut() {
            Some(ScanFrame::Graph { assembly, .. }) => {
                assembly.add_node(node);
                Ok(())
            }
            _ => Err(Error::protocol(0, "node outside a graph")),
        }
    }

    fn add_edge(&mut self, edge: Edge) -> Result<()> {
        match self.frames.last_mut() {
            Some(ScanFrame::Graph { assembly, .. }) => {
                assembly.add_edge(edge);
                Ok(())
            }
            _ => Err(Error::protocol(0, "edge outside a graph")),
        }
    }

    fn interrupted(&mut self, error: &Error) {
        self.failure = Some(error.clone());
    }
}

/// Scan the whole content of `ctx` into `document`.
///
/// Returns the first error that stopped the scan; end of input is not one.
/// Whatever was read before the error stays in the document.
pub(crate) fn scan(document: &Document, ctx: &Arc<LoadContext>) -> Result<()> {
    let outcome = ctx.content.open_stream().and_then(|channel| {
        let mut reader = BinaryReader::new(channel, &ctx.config);
        let mut builder = ScanningBuilder::new(document.clone(), Arc::clone(ctx));
        drive(&mut reader, &mut builder)
    });
    match &outcome {
        Ok(()) => info!(
            "{}: scanned {} regions",
            ctx.content.description(),
            ctx.index.len()
        ),
        Err(e) => log::warn!("{}: scan stopped: {}", ctx.content.description(), e),
    }
    document.notify(&ChangeEvent::ScanFinished {
        error: outcome.as_ref().err().cloned(),
    });
    outcome
}
