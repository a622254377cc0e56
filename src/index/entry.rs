//! Stream entries
//!
//! A `StreamEntry` remembers where a group or graph region lives in the
//! content and which pool state is needed to re-read it. The opening half
//! is fixed at creation; the closing half is set once, when the region ends.

use crate::model::{GraphSummary, Properties};
use crate::pool::ConstantPool;
use crate::reader::events::{RegionHeader, RegionKind, RegionMark, StreamInfo, Version};
use std::sync::OnceLock;

/// What the first pass learned about a finished region.
#[derive(Debug, Clone)]
pub enum RegionSummary {
    Group {
        children: usize,
        properties: Properties,
    },
    Graph {
        summary: GraphSummary,
        properties: Properties,
    },
}

#[derive(Debug, Clone)]
pub struct RegionClose {
    pub end: u64,
    pub end_pool: ConstantPool,
    pub summary: RegionSummary,
    /// Closed by unwinding rather than by a closing tag.
    pub truncated: bool,
}

#[derive(Debug)]
pub struct StreamEntry {
    stream: StreamInfo,
    start: u64,
    content_start: u64,
    header: RegionHeader,
    initial_pool: ConstantPool,
    skip_pool: ConstantPool,
    close: OnceLock<RegionClose>,
}

impl StreamEntry {
    pub fn new(
        mark: RegionMark,
        header: RegionHeader,
        content_start: u64,
        skip_pool: ConstantPool,
    ) -> Self {
        debug_assert_eq!(mark.kind, header.kind());
        StreamEntry {
            stream: mark.stream,
            start: mark.start,
            content_start,
            header,
            initial_pool: mark.initial_pool,
            skip_pool,
            close: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> RegionKind {
        self.header.kind()
    }

    pub fn stream(&self) -> StreamInfo {
        self.stream
    }

    pub fn version(&self) -> Version {
        self.stream.version
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn content_start(&self) -> u64 {
        self.content_start
    }

    pub fn header(&self) -> &RegionHeader {
        &self.header
    }

    /// Pool just before the opening tag.
    pub fn initial_pool(&self) -> &ConstantPool {
        &self.initial_pool
    }

    /// Pool just after the header.
    pub fn skip_pool(&self) -> &ConstantPool {
        &self.skip_pool
    }

    /// Offset just past the region, `None` while it is still being read.
    pub fn end(&self) -> Option<u64> {
        self.close.get().map(|c| c.end)
    }

    pub fn is_closed(&self) -> bool {
        self.close.get().is_some()
    }

    pub fn closing(&self) -> Option<&RegionClose> {
        self.close.get()
    }

    pub fn end_pool(&self) -> Option<&ConstantPool> {
        self.close.get().map(|c| &c.end_pool)
    }

    pub fn summary(&self) -> Option<&RegionSummary> {
        self.close.get().map(|c| &c.summary)
    }

    /// Encoded size of the finished region.
    pub fn encoded_len(&self) -> Option<u64> {
        self.end().map(|end| end - self.start)
    }

    /// Record the end of the region. Only the first call has an effect.
    pub fn close(&self, close: RegionClose) -> bool {
        debug_assert!(close.end > self.start, "region must not be empty");
        self.close.set(close).is_ok()
    }
}
