//! Parse Event Types
//!
//! Values the binary reader hands to a `Builder`: stream segment info,
//! decoded region headers and the marks taken at every region start.

use crate::pool::{ConstantPool, Method};
use std::fmt;
use std::sync::Arc;

/// Protocol version from a stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const V5: Version = Version { major: 5, minor: 0 };
    pub const V6: Version = Version { major: 6, minor: 0 };

    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }

    /// v6 and later encode node positions as pool references.
    pub fn has_source_positions(&self) -> bool {
        self.major >= 6
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One stream segment: everything after a header up to the next header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: u32,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Group,
    Graph,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Group => f.write_str("group"),
            RegionKind::Graph => f.write_str("graph"),
        }
    }
}

/// State captured when the reader meets a region's opening tag.
#[derive(Debug, Clone)]
pub struct RegionMark {
    pub kind: RegionKind,
    pub stream: StreamInfo,
    /// Offset of the opening tag.
    pub start: u64,
    /// Nesting depth of the region (0 = top level of the parse).
    pub depth: usize,
    /// Pool as it was before the opening tag.
    pub initial_pool: ConstantPool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupHeader {
    pub name: Arc<str>,
    pub short_name: Arc<str>,
    pub method: Option<Arc<Method>>,
    pub bci: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphHeader {
    pub id: i32,
    pub title: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionHeader {
    Group(GroupHeader),
    Graph(GraphHeader),
}

impl RegionHeader {
    pub fn kind(&self) -> RegionKind {
        match self {
            RegionHeader::Group(_) => RegionKind::Group,
            RegionHeader::Graph(_) => RegionKind::Graph,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            RegionHeader::Group(g) => &g.name,
            RegionHeader::Graph(g) => &g.title,
        }
    }
}

/// Header decoded, body about to start.
#[derive(Debug, Clone)]
pub struct RegionContent {
    pub header: RegionHeader,
    /// Offset of the first body record.
    pub content_start: u64,
    /// Pool right after the header, for re-reading only the body.
    pub skip_pool: ConstantPool,
}

/// How a region ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Closing tag read.
    Tag,
    /// The builder asked to skip over the region.
    Skipped,
    /// Input ended or failed first; the close was synthesized.
    Truncated,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionEnd {
    pub kind: RegionKind,
    pub start: u64,
    /// Offset just past the region.
    pub end: u64,
    pub closure: Closure,
}

/// Builder reply to a region start.
#[derive(Debug, Clone)]
pub enum Directive {
    Continue,
    /// Jump to `end` and carry on with `pool`, as if the region had been read.
    Skip { end: u64, pool: ConstantPool },
}
