//! Decoded pool values
//!
//! Values are immutable once decoded and shared by `Arc`, so pool
//! generations and the document model hold the same allocations.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub holder: Arc<str>,
    pub name: Arc<str>,
    pub signature: Arc<str>,
    pub modifiers: i32,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.signature)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub holder: Arc<str>,
    pub name: Arc<str>,
    pub type_name: Arc<str>,
}

/// Node class: name, label template and the names of its edge slots.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeClass {
    pub name: Arc<str>,
    pub template: Arc<str>,
    pub inputs: Vec<Arc<str>>,
    pub successors: Vec<Arc<str>>,
}

/// One stratum of a source position (language, file, line).
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub language: Arc<str>,
    pub file: Arc<str>,
    pub line: i32,
}

/// Position of a node in the source program.
///
/// v6 dumps carry full positions with inlining callers and strata; v5 dumps
/// only have a method and bytecode index, decoded into the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePosition {
    pub method: Option<Arc<Method>>,
    pub bci: i32,
    pub caller: Option<Arc<SourcePosition>>,
    pub locations: Vec<Location>,
}

impl SourcePosition {
    pub fn inline_depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.caller.as_deref();
        while let Some(pos) = cur {
            depth += 1;
            cur = pos.caller.as_deref();
        }
        depth
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolValue {
    String(Arc<str>),
    Class(Arc<str>),
    Method(Arc<Method>),
    Field(Arc<Field>),
    NodeClass(Arc<NodeClass>),
    SourcePosition(Arc<SourcePosition>),
}

impl PoolValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PoolValue::String(_) => "string",
            PoolValue::Class(_) => "class",
            PoolValue::Method(_) => "method",
            PoolValue::Field(_) => "field",
            PoolValue::NodeClass(_) => "node class",
            PoolValue::SourcePosition(_) => "source position",
        }
    }
}

impl fmt::Display for PoolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolValue::String(s) | PoolValue::Class(s) => f.write_str(s),
            PoolValue::Method(m) => m.fmt(f),
            PoolValue::Field(x) => write!(f, "{}.{}", x.holder, x.name),
            PoolValue::NodeClass(c) => f.write_str(&c.name),
            PoolValue::SourcePosition(p) => match &p.method {
                Some(m) => write!(f, "{}@{}", m, p.bci),
                None => write!(f, "@{}", p.bci),
            },
        }
    }
}
