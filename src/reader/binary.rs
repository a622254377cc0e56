//! Binary reader
//!
//! Forward-only state machine over the record stream. Each record is
//! decoded and handed to a `Builder`; the reader keeps the constant pool and
//! a stack of open regions, and nothing else.
//!
//! The reader never closes regions on its own when input stops; `drive`
//! does that after the loop ends, innermost region first.

use super::buffered::ByteStream;
use super::events::{
    Closure, Directive, GraphHeader, GroupHeader, RegionContent, RegionEnd, RegionHeader,
    RegionKind, RegionMark, StreamInfo, Version,
};
use super::protocol::*;
use crate::builder::Builder;
use crate::config::LoadConfig;
use crate::content::Channel;
use crate::error::{Error, Result};
use crate::index::StreamEntry;
use crate::model::{Edge, EdgeKind, Node, Properties, PropertyValue};
use crate::pool::{ConstantPool, Field, Location, Method, NodeClass, PoolValue, SourcePosition};
use std::sync::Arc;

/// What the reader expects to find in its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Whole content: stream headers and top-level regions.
    Document,
    /// Exactly one region starting at the cursor.
    Region,
    /// The body of one graph, header already consumed.
    GraphBody,
}

#[derive(Debug, Clone, Copy)]
struct OpenRegion {
    kind: RegionKind,
    start: u64,
}

pub struct BinaryReader {
    input: ByteStream,
    pool: ConstantPool,
    stream: Option<StreamInfo>,
    next_stream_id: u32,
    open: Vec<OpenRegion>,
    mode: Mode,
    started: bool,
}

impl BinaryReader {
    /// Reader over a whole content, starting with a stream header.
    pub fn new(channel: Channel, config: &LoadConfig) -> Self {
        BinaryReader {
            input: ByteStream::with_capacity(channel, config.read_buffer_size)
                .bounded(config.max_block_len, None),
            pool: ConstantPool::new(),
            stream: None,
            next_stream_id: 0,
            open: Vec::with_capacity(16),
            mode: Mode::Document,
            started: false,
        }
    }

    /// Reader for the region described by `entry`; the channel must start
    /// at `entry.start()`.
    pub fn for_region(channel: Channel, entry: &StreamEntry, config: &LoadConfig) -> Self {
        BinaryReader {
            input: ByteStream::with_capacity(channel, config.read_buffer_size)
                .bounded(config.max_block_len, complete_end(entry)),
            pool: entry.initial_pool().clone(),
            stream: Some(entry.stream()),
            next_stream_id: entry.stream().id + 1,
            open: Vec::with_capacity(16),
            mode: Mode::Region,
            started: false,
        }
    }

    /// Reader for the body of the graph described by `entry`; the channel
    /// must start at `entry.content_start()`.
    pub fn for_graph_body(channel: Channel, entry: &StreamEntry, config: &LoadConfig) -> Self {
        BinaryReader {
            input: ByteStream::with_capacity(channel, config.read_buffer_size)
                .bounded(config.max_block_len, complete_end(entry)),
            pool: entry.skip_pool().clone(),
            stream: Some(entry.stream()),
            next_stream_id: entry.stream().id + 1,
            open: vec![OpenRegion {
                kind: RegionKind::Graph,
                start: entry.start(),
            }],
            mode: Mode::GraphBody,
            started: true,
        }
    }

    pub fn position(&self) -> u64 {
        self.input.position()
    }

    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// Number of regions opened and not yet closed.
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    fn finished(&self) -> bool {
        self.mode != Mode::Document && self.started && self.open.is_empty()
    }

    fn stream_info(&self, offset: u64) -> Result<StreamInfo> {
        self.stream
            .ok_or_else(|| Error::protocol(offset, "record before stream header"))
    }

    // ========================================================================
    // Main loop
    // ========================================================================

    /// Read records until the input or the target region ends.
    ///
    /// End of input inside an open region is reported as `EndOfStream`;
    /// regions are left open for `unwind`.
    pub fn parse<B: Builder + ?Sized>(&mut self, builder: &mut B) -> Result<()> {
        loop {
            if self.finished() {
                return Ok(());
            }
            let offset = self.input.position();
            let tag = match self.input.next_byte()? {
                Some(tag) => tag,
                None if self.mode == Mode::Document && self.open.is_empty() => return Ok(()),
                None => return Err(Error::EndOfStream { offset }),
            };

            match tag {
                t if t == MAGIC[0] => self.stream_header(offset, builder)?,
                BEGIN_GROUP => self.begin_region(RegionKind::Group, offset, builder)?,
                BEGIN_GRAPH => self.begin_region(RegionKind::Graph, offset, builder)?,
                END_GROUP => self.end_region(RegionKind::Group, offset, builder)?,
                END_GRAPH => self.end_region(RegionKind::Graph, offset, builder)?,
                PROPERTY => {
                    self.stream_info(offset)?;
                    let key = self.required_string(offset)?;
                    let value = self.property_value(offset)?;
                    builder.set_property(key, value)?;
                }
                NODE => {
                    self.expect_in_graph(offset, "node")?;
                    let node = self.node(offset)?;
                    builder.add_node(node)?;
                }
                EDGE => {
                    self.expect_in_graph(offset, "edge")?;
                    let edge = self.edge(offset)?;
                    builder.add_edge(edge)?;
                }
                POOL_DEFINE => self.pool_define(offset)?,
                other => {
                    return Err(Error::protocol(
                        offset,
                        format!("unknown record tag 0x{:02x}", other),
                    ))
                }
            }
        }
    }

    /// Close every open region innermost-first with a synthesized end.
    pub fn unwind<B: Builder + ?Sized>(&mut self, builder: &mut B) -> Result<()> {
        let mut first_error = None;
        while let Some(open) = self.open.pop() {
            let end = RegionEnd {
                kind: open.kind,
                start: open.start,
                end: self.input.position().max(open.start + 1),
                closure: Closure::Truncated,
            };
            log::debug!("unwinding {} at {} (end {})", open.kind, open.start, end.end);
            let result = match open.kind {
                RegionKind::Group => builder.end_group(end, &mut self.pool),
                RegionKind::Graph => builder.end_graph(end, &mut self.pool),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stream_header<B: Builder + ?Sized>(&mut self, offset: u64, builder: &mut B) -> Result<()> {
        if self.mode != Mode::Document || !self.open.is_empty() {
            return Err(Error::protocol(offset, "stream header inside a region"));
        }
        let rest = self.input.read_exact_bytes(MAGIC.len() - 1)?;
        if rest != &MAGIC[1..] {
            return Err(Error::protocol(offset, "bad stream header magic"));
        }
        let version = Version::new(self.input.read_u8()?, self.input.read_u8()?);
        if !is_supported(version) {
            return Err(Error::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            });
        }
        let info = StreamInfo {
            id: self.next_stream_id,
            version,
        };
        self.next_stream_id += 1;
        self.stream = Some(info);
        self.pool.restart();
        log::debug!("stream {} (v{}) at {}", info.id, version, offset);
        builder.start_stream(&info)
    }

    fn begin_region<B: Builder + ?Sized>(
        &mut self,
        kind: RegionKind,
        offset: u64,
        builder: &mut B,
    ) -> Result<()> {
        let stream = self.stream_info(offset)?;
        if self.open.last().map(|o| o.kind) == Some(RegionKind::Graph) {
            return Err(Error::protocol(offset, format!("{} inside a graph", kind)));
        }
        self.started = true;

        let mark = RegionMark {
            kind,
            stream,
            start: offset,
            depth: self.open.len(),
            initial_pool: self.pool.copy(),
        };
        self.open.push(OpenRegion {
            kind,
            start: offset,
        });
        let directive = match kind {
            RegionKind::Group => builder.start_group(mark)?,
            RegionKind::Graph => builder.start_graph(mark)?,
        };
        if let Directive::Skip { end, pool } = directive {
            return self.skip_region(kind, offset, end, pool, builder);
        }

        let header = match kind {
            RegionKind::Group => RegionHeader::Group(self.group_header(offset)?),
            RegionKind::Graph => RegionHeader::Graph(self.graph_header(offset)?),
        };
        let content = RegionContent {
            header,
            content_start: self.input.position(),
            skip_pool: self.pool.copy(),
        };
        match kind {
            RegionKind::Group => builder.start_group_content(content),
            RegionKind::Graph => builder.start_graph_content(content),
        }
    }

    fn skip_region<B: Builder + ?Sized>(
        &mut self,
        kind: RegionKind,
        start: u64,
        end: u64,
        pool: ConstantPool,
        builder: &mut B,
    ) -> Result<()> {
        self.input.skip_to(end)?;
        self.open.pop();
        self.pool = pool;
        let end = RegionEnd {
            kind,
            start,
            end,
            closure: Closure::Skipped,
        };
        match kind {
            RegionKind::Group => builder.end_group(end, &mut self.pool),
            RegionKind::Graph => builder.end_graph(end, &mut self.pool),
        }
    }

    fn end_region<B: Builder + ?Sized>(
        &mut self,
        kind: RegionKind,
        offset: u64,
        builder: &mut B,
    ) -> Result<()> {
        let open = match self.open.last() {
            Some(open) if open.kind == kind => *open,
            Some(open) => {
                return Err(Error::protocol(
                    offset,
                    format!("end of {} while a {} is open", kind, open.kind),
                ))
            }
            None => return Err(Error::protocol(offset, format!("unmatched end of {}", kind))),
        };
        self.open.pop();
        let end = RegionEnd {
            kind,
            start: open.start,
            end: self.input.position(),
            closure: Closure::Tag,
        };
        match kind {
            RegionKind::Group => builder.end_group(end, &mut self.pool),
            RegionKind::Graph => builder.end_graph(end, &mut self.pool),
        }
    }

    fn expect_in_graph(&self, offset: u64, what: &str) -> Result<()> {
        match self.open.last() {
            Some(open) if open.kind == RegionKind::Graph => Ok(()),
            _ => Err(Error::protocol(offset, format!("{} outside a graph", what))),
        }
    }

    // ========================================================================
    // Record payloads
    // ========================================================================

    fn string_or_empty(&mut self, offset: u64) -> Result<Arc<str>> {
        let index = self.input.read_u16()?;
        Ok(self
            .pool
            .string(index, offset)?
            .unwrap_or_else(|| Arc::from("")))
    }

    fn required_string(&mut self, offset: u64) -> Result<Arc<str>> {
        let index = self.input.read_u16()?;
        self.pool
            .string(index, offset)?
            .ok_or_else(|| Error::protocol(offset, "null where a string is required"))
    }

    fn optional_string(&mut self, offset: u64) -> Result<Option<Arc<str>>> {
        let index = self.input.read_u16()?;
        self.pool.string(index, offset)
    }

    fn string_list(&mut self, offset: u64) -> Result<Vec<Arc<str>>> {
        let count = self.input.read_u16()?;
        (0..count).map(|_| self.string_or_empty(offset)).collect()
    }

    fn group_header(&mut self, offset: u64) -> Result<GroupHeader> {
        let name = self.string_or_empty(offset)?;
        let short_name = self.string_or_empty(offset)?;
        let method_ref = self.input.read_u16()?;
        let method = self.pool.method(method_ref, offset)?;
        let bci = self.input.read_i32()?;
        Ok(GroupHeader {
            name,
            short_name,
            method,
            bci,
        })
    }

    fn graph_header(&mut self, offset: u64) -> Result<GraphHeader> {
        let id = self.input.read_i32()?;
        let title = self.string_or_empty(offset)?;
        Ok(GraphHeader { id, title })
    }

    fn property_value(&mut self, offset: u64) -> Result<PropertyValue> {
        let kind = self.input.read_u8()?;
        Ok(match kind {
            PROPERTY_INT => PropertyValue::Int(self.input.read_i32()?),
            PROPERTY_LONG => PropertyValue::Long(self.input.read_i64()?),
            PROPERTY_DOUBLE => PropertyValue::Double(self.input.read_f64()?),
            PROPERTY_TRUE => PropertyValue::Bool(true),
            PROPERTY_FALSE => PropertyValue::Bool(false),
            PROPERTY_STRING => match self.optional_string(offset)? {
                Some(s) => PropertyValue::String(s),
                None => PropertyValue::Null,
            },
            PROPERTY_STRING_ARRAY => PropertyValue::StringArray(self.string_list(offset)?.into()),
            PROPERTY_BLOB => PropertyValue::Blob(self.input.read_block()?.into()),
            PROPERTY_POOL => {
                let index = self.input.read_u16()?;
                match self.pool.value(index, offset)? {
                    Some(v) => PropertyValue::Pool(v),
                    None => PropertyValue::Null,
                }
            }
            other => {
                return Err(Error::protocol(
                    offset,
                    format!("unknown property kind {}", other),
                ))
            }
        })
    }

    fn node(&mut self, offset: u64) -> Result<Node> {
        let id = self.input.read_i32()?;
        let class_ref = self.input.read_u16()?;
        let class = self.pool.node_class(class_ref, offset)?;
        let version = self.stream_info(offset)?.version;
        let position = if version.has_source_positions() {
            let index = self.input.read_u16()?;
            self.pool.source_position(index, offset)?
        } else {
            let method_ref = self.input.read_u16()?;
            let method = self.pool.method(method_ref, offset)?;
            let bci = self.input.read_i32()?;
            method.map(|m| {
                Arc::new(SourcePosition {
                    method: Some(m),
                    bci,
                    caller: None,
                    locations: Vec::new(),
                })
            })
        };
        let count = self.input.read_u16()?;
        let mut properties = Properties::new();
        for _ in 0..count {
            let key = self.required_string(offset)?;
            let value = self.property_value(offset)?;
            properties.set(key, value);
        }
        Ok(Node {
            id,
            class,
            position,
            properties,
        })
    }

    fn edge(&mut self, offset: u64) -> Result<Edge> {
        let kind = match self.input.read_u8()? {
            EDGE_INPUT => EdgeKind::Input,
            EDGE_SUCCESSOR => EdgeKind::Successor,
            other => {
                return Err(Error::protocol(
                    offset,
                    format!("unknown edge kind {}", other),
                ))
            }
        };
        let from = self.input.read_i32()?;
        let to = self.input.read_i32()?;
        let ordinal = self.input.read_u16()?;
        let label = self.optional_string(offset)?;
        Ok(Edge {
            kind,
            from,
            to,
            ordinal,
            label,
        })
    }

    fn pool_define(&mut self, offset: u64) -> Result<()> {
        let version = self.stream_info(offset)?.version;
        let index = self.input.read_u16()?;
        let kind = self.input.read_u8()?;
        let value = match kind {
            POOL_STRING => PoolValue::String(self.input.read_string()?),
            POOL_CLASS => PoolValue::Class(self.string_or_empty(offset)?),
            POOL_METHOD => {
                let holder_ref = self.input.read_u16()?;
                let holder = self
                    .pool
                    .class(holder_ref, offset)?
                    .unwrap_or_else(|| Arc::from(""));
                let name = self.string_or_empty(offset)?;
                let signature = self.string_or_empty(offset)?;
                let modifiers = self.input.read_i32()?;
                PoolValue::Method(Arc::new(Method {
                    holder,
                    name,
                    signature,
                    modifiers,
                }))
            }
            POOL_FIELD => {
                let holder_ref = self.input.read_u16()?;
                let holder = self
                    .pool
                    .class(holder_ref, offset)?
                    .unwrap_or_else(|| Arc::from(""));
                let name = self.string_or_empty(offset)?;
                let type_name = self.string_or_empty(offset)?;
                PoolValue::Field(Arc::new(Field {
                    holder,
                    name,
                    type_name,
                }))
            }
            POOL_NODE_CLASS => {
                let name = self.string_or_empty(offset)?;
                let template = self.string_or_empty(offset)?;
                let inputs = self.string_list(offset)?;
                let successors = self.string_list(offset)?;
                PoolValue::NodeClass(Arc::new(NodeClass {
                    name,
                    template,
                    inputs,
                    successors,
                }))
            }
            POOL_SOURCE_POSITION if version.has_source_positions() => {
                let method_ref = self.input.read_u16()?;
                let method = self.pool.method(method_ref, offset)?;
                let bci = self.input.read_i32()?;
                let caller_ref = self.input.read_u16()?;
                let caller = self.pool.source_position(caller_ref, offset)?;
                let count = self.input.read_u16()?;
                let mut locations = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let language = self.string_or_empty(offset)?;
                    let file = self.string_or_empty(offset)?;
                    let line = self.input.read_i32()?;
                    locations.push(Location {
                        language,
                        file,
                        line,
                    });
                }
                PoolValue::SourcePosition(Arc::new(SourcePosition {
                    method,
                    bci,
                    caller,
                    locations,
                }))
            }
            POOL_SOURCE_POSITION => {
                return Err(Error::protocol(
                    offset,
                    format!("source positions are not supported in v{}", version),
                ))
            }
            other => {
                return Err(Error::protocol(
                    offset,
                    format!("unknown pool kind {}", other),
                ))
            }
        };
        self.pool.add(index, value, offset)
    }
}

/// End of a region closed by its own tag; a cut-short region has none.
fn complete_end(entry: &StreamEntry) -> Option<u64> {
    entry.closing().filter(|c| !c.truncated).map(|c| c.end)
}

/// Run `reader` to completion and close whatever is left open.
///
/// End of input is not an error: open regions are closed innermost-first
/// and the call returns normally. Any other failure closes the open regions
/// the same way and is then returned.
pub fn drive<B: Builder + ?Sized>(reader: &mut BinaryReader, builder: &mut B) -> Result<()> {
    let outcome = reader.parse(builder);
    if let Err(e) = &outcome {
        if !e.is_end_of_stream() {
            builder.interrupted(e);
        }
    }
    if reader.open_depth() > 0 {
        match &outcome {
            Err(e) if !e.is_end_of_stream() => log::warn!(
                "closing {} open regions after error: {}",
                reader.open_depth(),
                e
            ),
            _ => log::warn!(
                "input ended with {} open regions at {}",
                reader.open_depth(),
                reader.position()
            ),
        }
    }
    let unwound = reader.unwind(builder);
    match outcome {
        Ok(()) => unwound,
        Err(e) if e.is_end_of_stream() => unwound,
        Err(e) => {
            if let Err(during) = unwound {
                log::debug!("error while unwinding: {}", during);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{DumpWriter, NodePosition, WireValue};
    use std::io::Cursor;

    /// Records every callback as a line of text.
    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        skip_graphs_at: Vec<(u64, u64)>,
    }

    impl Builder for Recorder {
        fn start_stream(&mut self, stream: &StreamInfo) -> Result<()> {
            self.log.push(format!("stream {} v{}", stream.id, stream.version));
            Ok(())
        }

        fn start_graph(&mut self, mark: RegionMark) -> Result<Directive> {
            if let Some(&(_, end)) = self.skip_graphs_at.iter().find(|(s, _)| *s == mark.start) {
                self.log.push(format!("skip graph {}", mark.start));
                let mut pool = mark.initial_pool;
                return Ok(Directive::Skip {
                    end,
                    pool: pool.copy(),
                });
            }
            Ok(Directive::Continue)
        }

        fn start_group_content(&mut self, content: RegionContent) -> Result<()> {
            self.log.push(format!("group {}", content.header.name()));
            Ok(())
        }

        fn end_group(&mut self, end: RegionEnd, _pool: &mut ConstantPool) -> Result<()> {
            self.log.push(format!("end group {:?}", end.closure));
            Ok(())
        }

        fn start_graph_content(&mut self, content: RegionContent) -> Result<()> {
            self.log.push(format!("graph {}", content.header.name()));
            Ok(())
        }

        fn end_graph(&mut self, end: RegionEnd, _pool: &mut ConstantPool) -> Result<()> {
            self.log.push(format!("end graph {:?}", end.closure));
            Ok(())
        }

        fn set_property(&mut self, key: Arc<str>, value: PropertyValue) -> Result<()> {
            self.log.push(format!("property {}={}", key, value));
            Ok(())
        }

        fn add_node(&mut self, node: Node) -> Result<()> {
            let bci = node.position.as_ref().map_or(-1, |p| p.bci);
            self.log.push(format!("node {} bci {}", node.id, bci));
            Ok(())
        }

        fn add_edge(&mut self, edge: Edge) -> Result<()> {
            self.log.push(format!("edge {}->{}", edge.from, edge.to));
            Ok(())
        }

        fn interrupted(&mut self, error: &Error) {
            self.log.push(format!("interrupted {}", error));
        }
    }

    fn reader(bytes: Vec<u8>) -> BinaryReader {
        BinaryReader::new(Box::new(Cursor::new(bytes)), &LoadConfig::default())
    }

    fn sample(version: Version) -> DumpWriter<Vec<u8>> {
        let mut w = DumpWriter::with_header(Vec::new(), version).unwrap();
        let class = w.node_class("Add", "{p#x}", &["x", "y"], &[]).unwrap();
        let method = w.method("Foo", "bar", "()V", 0).unwrap();
        let position = if version.has_source_positions() {
            NodePosition::Source(w.source_position(Some(method), 7, None, &[]).unwrap())
        } else {
            NodePosition::Method { method, bci: 7 }
        };
        w.begin_group("root", "r", Some(method), 0).unwrap();
        w.property("phase", WireValue::Str("parse")).unwrap();
        w.begin_graph(1, "after parse").unwrap();
        w.node(0, Some(class), position, &[("x", WireValue::Int(1))])
            .unwrap();
        w.node(1, Some(class), NodePosition::Unknown, &[]).unwrap();
        w.edge(EdgeKind::Input, 0, 1, 0, Some("x")).unwrap();
        w.end_graph().unwrap();
        w.end_group().unwrap();
        w
    }

    #[test]
    fn test_parses_nested_regions() {
        for version in [Version::V5, Version::V6] {
            let bytes = sample(version).into_inner().unwrap();
            let mut recorder = Recorder::default();
            drive(&mut reader(bytes), &mut recorder).unwrap();
            assert_eq!(
                recorder.log,
                vec![
                    format!("stream 0 v{}", version),
                    "group root".to_string(),
                    "property phase=parse".to_string(),
                    "graph after parse".to_string(),
                    "node 0 bci 7".to_string(),
                    "node 1 bci -1".to_string(),
                    "edge 0->1".to_string(),
                    "end graph Tag".to_string(),
                    "end group Tag".to_string(),
                ]
            );
        }
    }

    #[test]
    fn test_end_of_input_closes_open_regions() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.begin_group("outer", "o", None, 0).unwrap();
        w.begin_group("inner", "i", None, 0).unwrap();
        w.begin_graph(3, "g").unwrap();
        let bytes = w.into_inner().unwrap();

        let mut recorder = Recorder::default();
        let mut r = reader(bytes);
        drive(&mut r, &mut recorder).unwrap();
        assert_eq!(r.open_depth(), 0);
        assert!(!recorder.log.iter().any(|l| l.starts_with("interrupted")));
        assert_eq!(
            &recorder.log[recorder.log.len() - 3..],
            &[
                "end graph Truncated".to_string(),
                "end group Truncated".to_string(),
                "end group Truncated".to_string(),
            ]
        );
    }

    #[test]
    fn test_protocol_error_after_unwinding() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.begin_group("outer", "o", None, 0).unwrap();
        w.raw(&[0x7F]).unwrap();
        let bytes = w.into_inner().unwrap();

        let mut recorder = Recorder::default();
        let err = drive(&mut reader(bytes), &mut recorder).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "{:?}", err);
        let n = recorder.log.len();
        assert!(recorder.log[n - 2].starts_with("interrupted protocol error"));
        assert_eq!(recorder.log[n - 1], "end group Truncated");
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = b"BIGV".to_vec();
        bytes.extend_from_slice(&[7, 0]);
        let err = drive(&mut reader(bytes), &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { major: 7, .. }));
    }

    #[test]
    fn test_skip_directive_jumps_over_region() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.begin_group("root", "r", None, 0).unwrap();
        let start = w.begin_graph(1, "first").unwrap();
        w.node(0, None, NodePosition::Unknown, &[]).unwrap();
        let end = w.end_graph().unwrap();
        w.begin_graph(2, "second").unwrap();
        w.end_graph().unwrap();
        w.end_group().unwrap();
        let bytes = w.into_inner().unwrap();

        let mut recorder = Recorder {
            skip_graphs_at: vec![(start, end)],
            ..Recorder::default()
        };
        drive(&mut reader(bytes), &mut recorder).unwrap();
        assert!(recorder.log.contains(&format!("skip graph {}", start)));
        assert!(recorder.log.contains(&"end graph Skipped".to_string()));
        assert!(!recorder.log.iter().any(|l| l.starts_with("node")));
        assert!(recorder.log.contains(&"graph second".to_string()));
    }

    #[test]
    fn test_conflicting_pool_definition() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.define_string(0, "a").unwrap();
        w.define_string(0, "b").unwrap();
        let bytes = w.into_inner().unwrap();
        let err = drive(&mut reader(bytes), &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_header_restarts_pool() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.define_string(0, "a").unwrap();
        w.header(Version::V5).unwrap();
        w.define_string(0, "b").unwrap();
        w.property("k", WireValue::Str("b")).unwrap();
        let bytes = w.into_inner().unwrap();

        let mut recorder = Recorder::default();
        drive(&mut reader(bytes), &mut recorder).unwrap();
        assert_eq!(recorder.log[1], "stream 1 v5.0");
        assert_eq!(recorder.log[2], "property k=b");
    }

    #[test]
    fn test_node_outside_graph() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.begin_group("g", "g", None, 0).unwrap();
        w.raw(&[NODE, 0, 0, 0, 1]).unwrap();
        let bytes = w.into_inner().unwrap();
        let err = drive(&mut reader(bytes), &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
