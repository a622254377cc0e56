//! Builders
//!
//! A `Builder` receives the reader's callbacks and decides what to keep:
//!
//! - `ScanningBuilder`: first pass over a whole content. Grows the document
//!   skeleton and records a `StreamEntry` for every region.
//! - `group::load_group`: re-reads one group region and materializes its
//!   direct children, skipping nested regions the index already knows.
//! - `graph::load_graph`: re-reads the body of one lazy graph.
//!
//! Calls arrive strictly nested: `start_*` → `start_*_content` → children
//! → `end_*`. A start answered with `Directive::Skip` gets its end call
//! directly, without a content call.
//!
//! When the input fails (anything but plain end of input), `interrupted`
//! is called once before the still-open regions are closed.

pub(crate) mod assembly;
pub mod graph;
pub mod group;
pub mod scanning;

pub use scanning::ScanningBuilder;

use crate::error::{Error, Result};
use crate::model::{Edge, Node, PropertyValue};
use crate::pool::ConstantPool;
use crate::reader::events::{Directive, RegionContent, RegionEnd, RegionMark, StreamInfo};
use std::sync::Arc;

pub trait Builder {
    /// A stream header was read; the pool has been restarted.
    fn start_stream(&mut self, _stream: &StreamInfo) -> Result<()> {
        Ok(())
    }

    /// Opening tag of a group; its header has not been decoded yet.
    fn start_group(&mut self, _mark: RegionMark) -> Result<Directive> {
        Ok(Directive::Continue)
    }

    fn start_group_content(&mut self, content: RegionContent) -> Result<()>;

    /// End of a group. `pool` is the pool just past the region.
    fn end_group(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()>;

    fn start_graph(&mut self, _mark: RegionMark) -> Result<Directive> {
        Ok(Directive::Continue)
    }

    fn start_graph_content(&mut self, content: RegionContent) -> Result<()>;

    fn end_graph(&mut self, end: RegionEnd, pool: &mut ConstantPool) -> Result<()>;

    /// Property of the innermost open region (or of the document).
    fn set_property(&mut self, key: Arc<str>, value: PropertyValue) -> Result<()>;

    fn add_node(&mut self, node: Node) -> Result<()>;

    fn add_edge(&mut self, edge: Edge) -> Result<()>;

    /// The parse stopped on `error`; synthesized region ends follow.
    fn interrupted(&mut self, _error: &Error) {}
}
