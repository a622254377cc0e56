//! Dump writer
//!
//! Emits the binary dump format. Strings and classes are interned: the
//! first use defines a pool entry, later uses refer to it. Every region
//! written is remembered with its offsets so callers can line up what they
//! wrote with what a reader reports.

use crate::error::{Error, Result};
use crate::model::EdgeKind;
use crate::reader::events::{RegionKind, Version};
use crate::reader::protocol::*;
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;
use std::io::Write;

const NULL: u16 = 0xFFFF;

/// Property value as written.
#[derive(Debug, Clone, Copy)]
pub enum WireValue<'a> {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(&'a str),
    Strings(&'a [&'a str]),
    Blob(&'a [u8]),
    /// Reference to an entry the caller defined.
    Pool(u16),
    Null,
}

impl<'a> From<&'a str> for WireValue<'a> {
    fn from(s: &'a str) -> Self {
        WireValue::Str(s)
    }
}

impl From<i32> for WireValue<'_> {
    fn from(v: i32) -> Self {
        WireValue::Int(v)
    }
}

impl From<i64> for WireValue<'_> {
    fn from(v: i64) -> Self {
        WireValue::Long(v)
    }
}

impl From<bool> for WireValue<'_> {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

/// Where a node comes from.
#[derive(Debug, Clone, Copy, Default)]
pub enum NodePosition {
    #[default]
    Unknown,
    /// v5 only: method reference and bytecode index.
    Method { method: u16, bci: i32 },
    /// v6 only: reference to a source position entry.
    Source(u16),
}

/// A region as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRegion {
    pub kind: RegionKind,
    pub name: String,
    pub start: u64,
    /// `None` while the region is open.
    pub end: Option<u64>,
    pub depth: usize,
}

pub struct DumpWriter<W: Write> {
    out: W,
    written: u64,
    version: Option<Version>,
    strings: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    next_index: u16,
    open: Vec<usize>,
    regions: Vec<WrittenRegion>,
}

impl<W: Write> DumpWriter<W> {
    /// Writer with no stream header yet; call `header` first.
    pub fn new(out: W) -> Self {
        DumpWriter {
            out,
            written: 0,
            version: None,
            strings: HashMap::new(),
            classes: HashMap::new(),
            next_index: 0,
            open: Vec::new(),
            regions: Vec::new(),
        }
    }

    /// Writer that starts with a stream header for `version`.
    pub fn with_header(out: W, version: Version) -> Result<Self> {
        let mut writer = Self::new(out);
        writer.header(version)?;
        Ok(writer)
    }

    /// Offset of the next byte.
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn regions(&self) -> &[WrittenRegion] {
        &self.regions
    }

    /// Regions of one kind, in the order they were opened.
    pub fn regions_of(&self, kind: RegionKind) -> impl Iterator<Item = &WrittenRegion> {
        self.regions.iter().filter(move |r| r.kind == kind)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Return the sink. Open regions are left open.
    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn version(&self) -> Result<Version> {
        self.version
            .ok_or_else(|| Error::protocol(self.written, "no stream header written"))
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    fn u8(&mut self, v: u8) -> Result<()> {
        self.out.write_u8(v)?;
        self.written += 1;
        Ok(())
    }

    fn u16(&mut self, v: u16) -> Result<()> {
        self.out.write_u16::<BigEndian>(v)?;
        self.written += 2;
        Ok(())
    }

    fn i32(&mut self, v: i32) -> Result<()> {
        self.out.write_i32::<BigEndian>(v)?;
        self.written += 4;
        Ok(())
    }

    fn i64(&mut self, v: i64) -> Result<()> {
        self.out.write_i64::<BigEndian>(v)?;
        self.written += 8;
        Ok(())
    }

    fn f64(&mut self, v: f64) -> Result<()> {
        self.out.write_f64::<BigEndian>(v)?;
        self.written += 8;
        Ok(())
    }

    fn block(&mut self, bytes: &[u8]) -> Result<()> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| Error::protocol(self.written, "block too large"))?;
        self.i32(len)?;
        self.raw(bytes)
    }

    /// Write bytes as they are, for streams a reader must reject.
    pub fn raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    // ========================================================================
    // Pool
    // ========================================================================

    /// Start a new stream segment. Interned entries are forgotten.
    pub fn header(&mut self, version: Version) -> Result<()> {
        if !self.open.is_empty() {
            return Err(Error::protocol(self.written, "stream header inside a region"));
        }
        self.raw(&MAGIC)?;
        self.u8(version.major)?;
        self.u8(version.minor)?;
        self.version = Some(version);
        self.strings.clear();
        self.classes.clear();
        self.next_index = 0;
        Ok(())
    }

    fn allocate(&mut self) -> Result<u16> {
        while self.strings.values().any(|&i| i == self.next_index)
            || self.classes.values().any(|&i| i == self.next_index)
        {
            self.next_index += 1;
        }
        let index = self.next_index;
        if index == NULL {
            return Err(Error::protocol(self.written, "constant pool is full"));
        }
        self.next_index += 1;
        Ok(index)
    }

    fn define(&mut self, index: u16, kind: u8) -> Result<()> {
        self.version()?;
        self.u8(POOL_DEFINE)?;
        self.u16(index)?;
        self.u8(kind)
    }

    /// Define a string at an explicit index, replacing any interned use.
    pub fn define_string(&mut self, index: u16, value: &str) -> Result<()> {
        self.define(index, POOL_STRING)?;
        let bytes = value.as_bytes().to_vec();
        self.block(&bytes)?;
        self.strings.retain(|_, i| *i != index);
        self.strings.insert(value.to_string(), index);
        Ok(())
    }

    /// Pool index of `value`, defining it on first use.
    pub fn string(&mut self, value: &str) -> Result<u16> {
        if let Some(&index) = self.strings.get(value) {
            return Ok(index);
        }
        let index = self.allocate()?;
        self.define_string(index, value)?;
        Ok(index)
    }

    fn optional_string(&mut self, value: Option<&str>) -> Result<u16> {
        value.map_or(Ok(NULL), |s| self.string(s))
    }

    pub fn class(&mut self, name: &str) -> Result<u16> {
        if let Some(&index) = self.classes.get(name) {
            return Ok(index);
        }
        let name_ref = self.string(name)?;
        let index = self.allocate()?;
        self.define(index, POOL_CLASS)?;
        self.u16(name_ref)?;
        self.classes.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn method(&mut self, holder: &str, name: &str, signature: &str, modifiers: i32) -> Result<u16> {
        let holder = self.class(holder)?;
        let name = self.string(name)?;
        let signature = self.string(signature)?;
        let index = self.allocate()?;
        self.define(index, POOL_METHOD)?;
        self.u16(holder)?;
        self.u16(name)?;
        self.u16(signature)?;
        self.i32(modifiers)?;
        Ok(index)
    }

    pub fn field(&mut self, holder: &str, name: &str, type_name: &str) -> Result<u16> {
        let holder = self.class(holder)?;
        let name = self.string(name)?;
        let type_name = self.string(type_name)?;
        let index = self.allocate()?;
        self.define(index, POOL_FIELD)?;
        self.u16(holder)?;
        self.u16(name)?;
        self.u16(type_name)?;
        Ok(index)
    }

    pub fn node_class(
        &mut self,
        name: &str,
        template: &str,
        inputs: &[&str],
        successors: &[&str],
    ) -> Result<u16> {
        let name = self.string(name)?;
        let template = self.string(template)?;
        let inputs = self.string_refs(inputs)?;
        let successors = self.string_refs(successors)?;
        let index = self.allocate()?;
        self.define(index, POOL_NODE_CLASS)?;
        self.u16(name)?;
        self.u16(template)?;
        self.ref_list(&inputs)?;
        self.ref_list(&successors)?;
        Ok(index)
    }

    /// v6 source position; `locations` are (language, file, line).
    pub fn source_position(
        &mut self,
        method: Option<u16>,
        bci: i32,
        caller: Option<u16>,
        locations: &[(&str, &str, i32)],
    ) -> Result<u16> {
        if !self.version()?.has_source_positions() {
            return Err(Error::protocol(
                self.written,
                "source positions need a v6 stream",
            ));
        }
        let mut refs = Vec::with_capacity(locations.len());
        for (language, file, line) in locations {
            refs.push((self.string(language)?, self.string(file)?, *line));
        }
        let index = self.allocate()?;
        self.define(index, POOL_SOURCE_POSITION)?;
        self.u16(method.unwrap_or(NULL))?;
        self.i32(bci)?;
        self.u16(caller.unwrap_or(NULL))?;
        self.count(refs.len())?;
        for (language, file, line) in refs {
            self.u16(language)?;
            self.u16(file)?;
            self.i32(line)?;
        }
        Ok(index)
    }

    fn string_refs(&mut self, values: &[&str]) -> Result<Vec<u16>> {
        values.iter().map(|v| self.string(v)).collect()
    }

    fn count(&mut self, n: usize) -> Result<()> {
        let n = u16::try_from(n).map_err(|_| Error::protocol(self.written, "list too long"))?;
        self.u16(n)
    }

    fn ref_list(&mut self, refs: &[u16]) -> Result<()> {
        self.count(refs.len())?;
        for &r in refs {
            self.u16(r)?;
        }
        Ok(())
    }

    // ========================================================================
    // Records
    // ========================================================================

    fn open_region(&mut self, kind: RegionKind, name: &str) -> Result<u64> {
        self.version()?;
        if let Some(&top) = self.open.last() {
            if self.regions[top].kind == RegionKind::Graph {
                return Err(Error::protocol(self.written, format!("{} inside a graph", kind)));
            }
        }
        let start = self.written;
        self.regions.push(WrittenRegion {
            kind,
            name: name.to_string(),
            start,
            end: None,
            depth: self.open.len(),
        });
        self.open.push(self.regions.len() - 1);
        Ok(start)
    }

    fn close_region(&mut self, kind: RegionKind, tag: u8) -> Result<u64> {
        match self.open.last() {
            Some(&top) if self.regions[top].kind == kind => {
                self.u8(tag)?;
                self.open.pop();
                self.regions[top].end = Some(self.written);
                Ok(self.written)
            }
            _ => Err(Error::protocol(self.written, format!("no open {}", kind))),
        }
    }

    /// Open a group; returns its start offset.
    ///
    /// Pool definitions for the header go before the opening tag.
    pub fn begin_group(
        &mut self,
        name: &str,
        short_name: &str,
        method: Option<u16>,
        bci: i32,
    ) -> Result<u64> {
        let name_ref = self.string(name)?;
        let short_ref = self.string(short_name)?;
        let start = self.open_region(RegionKind::Group, name)?;
        self.u8(BEGIN_GROUP)?;
        self.u16(name_ref)?;
        self.u16(short_ref)?;
        self.u16(method.unwrap_or(NULL))?;
        self.i32(bci)?;
        Ok(start)
    }

    /// Close the innermost group; returns the offset just past it.
    pub fn end_group(&mut self) -> Result<u64> {
        self.close_region(RegionKind::Group, END_GROUP)
    }

    pub fn begin_graph(&mut self, id: i32, title: &str) -> Result<u64> {
        let title_ref = self.string(title)?;
        let start = self.open_region(RegionKind::Graph, title)?;
        self.u8(BEGIN_GRAPH)?;
        self.i32(id)?;
        self.u16(title_ref)?;
        Ok(start)
    }

    pub fn end_graph(&mut self) -> Result<u64> {
        self.close_region(RegionKind::Graph, END_GRAPH)
    }

    /// Property of the innermost open region, or of the document.
    pub fn property(&mut self, key: &str, value: WireValue<'_>) -> Result<()> {
        let prepared = self.prepare(value)?;
        let key = self.string(key)?;
        self.u8(PROPERTY)?;
        self.u16(key)?;
        self.value(prepared)
    }

    pub fn node(
        &mut self,
        id: i32,
        class: Option<u16>,
        position: NodePosition,
        properties: &[(&str, WireValue<'_>)],
    ) -> Result<()> {
        let version = self.version()?;
        let mut props = Vec::with_capacity(properties.len());
        for (key, value) in properties {
            props.push((self.string(key)?, self.prepare(*value)?));
        }
        self.u8(NODE)?;
        self.i32(id)?;
        self.u16(class.unwrap_or(NULL))?;
        match (version.has_source_positions(), position) {
            (true, NodePosition::Source(r)) => self.u16(r)?,
            (true, NodePosition::Unknown) => self.u16(NULL)?,
            (false, NodePosition::Method { method, bci }) => {
                self.u16(method)?;
                self.i32(bci)?;
            }
            (false, NodePosition::Unknown) => {
                self.u16(NULL)?;
                self.i32(-1)?;
            }
            (_, other) => {
                return Err(Error::protocol(
                    self.written,
                    format!("{:?} cannot be written in v{}", other, version),
                ))
            }
        }
        self.count(props.len())?;
        for (key, value) in props {
            self.u16(key)?;
            self.value(value)?;
        }
        Ok(())
    }

    pub fn edge(
        &mut self,
        kind: EdgeKind,
        from: i32,
        to: i32,
        ordinal: u16,
        label: Option<&str>,
    ) -> Result<()> {
        let label = self.optional_string(label)?;
        self.u8(EDGE)?;
        self.u8(match kind {
            EdgeKind::Input => EDGE_INPUT,
            EdgeKind::Successor => EDGE_SUCCESSOR,
        })?;
        self.i32(from)?;
        self.i32(to)?;
        self.u16(ordinal)?;
        self.u16(label)
    }

    /// Define the strings a value needs before its record starts.
    fn prepare<'v>(&mut self, value: WireValue<'v>) -> Result<Prepared<'v>> {
        Ok(match value {
            WireValue::Str(s) => Prepared::Ref(PROPERTY_STRING, self.string(s)?),
            WireValue::Strings(list) => Prepared::Refs(self.string_refs(list)?),
            WireValue::Pool(r) => Prepared::Ref(PROPERTY_POOL, r),
            WireValue::Null => Prepared::Ref(PROPERTY_STRING, NULL),
            other => Prepared::Plain(other),
        })
    }

    fn value(&mut self, value: Prepared<'_>) -> Result<()> {
        match value {
            Prepared::Ref(kind, r) => {
                self.u8(kind)?;
                self.u16(r)
            }
            Prepared::Refs(refs) => {
                self.u8(PROPERTY_STRING_ARRAY)?;
                self.ref_list(&refs)
            }
            Prepared::Plain(WireValue::Int(v)) => {
                self.u8(PROPERTY_INT)?;
                self.i32(v)
            }
            Prepared::Plain(WireValue::Long(v)) => {
                self.u8(PROPERTY_LONG)?;
                self.i64(v)
            }
            Prepared::Plain(WireValue::Double(v)) => {
                self.u8(PROPERTY_DOUBLE)?;
                self.f64(v)
            }
            Prepared::Plain(WireValue::Bool(true)) => self.u8(PROPERTY_TRUE),
            Prepared::Plain(WireValue::Bool(false)) => self.u8(PROPERTY_FALSE),
            Prepared::Plain(WireValue::Blob(bytes)) => {
                self.u8(PROPERTY_BLOB)?;
                self.block(bytes)
            }
            Prepared::Plain(_) => Err(Error::protocol(self.written, "unprepared value")),
        }
    }
}

enum Prepared<'a> {
    Ref(u8, u16),
    Refs(Vec<u16>),
    Plain(WireValue<'a>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        assert_eq!(w.position(), HEADER_LEN);
        assert_eq!(w.into_inner().unwrap(), b"BIGV\x06\x00");
    }

    #[test]
    fn test_strings_are_interned_once() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        let a = w.string("a").unwrap();
        let before = w.position();
        assert_eq!(w.string("a").unwrap(), a);
        assert_eq!(w.position(), before);
        let b = w.string("b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_header_forgets_interned_entries() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.string("a").unwrap();
        w.header(Version::V5).unwrap();
        let before = w.position();
        w.string("a").unwrap();
        assert!(w.position() > before);
    }

    #[test]
    fn test_region_offsets() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.string("root").unwrap();
        let start = w.begin_group("root", "root", None, 0).unwrap();
        assert_eq!(start, w.regions()[0].start);
        let graph = w.begin_graph(1, "g").unwrap();
        assert!(graph > start);
        w.end_graph().unwrap();
        let end = w.end_group().unwrap();
        assert_eq!(w.regions()[0].end, Some(end));
        assert_eq!(w.regions()[1].depth, 1);
        assert_eq!(end, w.position());
    }

    #[test]
    fn test_no_group_inside_graph() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
        w.begin_graph(1, "g").unwrap();
        assert!(w.begin_group("x", "x", None, 0).is_err());
        assert!(w.end_group().is_err());
    }

    #[test]
    fn test_position_kind_must_match_version() {
        let mut w = DumpWriter::with_header(Vec::new(), Version::V5).unwrap();
        w.begin_graph(1, "g").unwrap();
        assert!(w.node(0, None, NodePosition::Source(0), &[]).is_err());
        assert!(w.source_position(None, 0, None, &[]).is_err());
    }
}
