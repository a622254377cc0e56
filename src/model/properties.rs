//! Property bags
//!
//! Ordered key/value lists attached to groups, graphs and nodes. Insertion
//! order is preserved; keys are unique.

use crate::pool::PoolValue;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    String(Arc<str>),
    StringArray(Arc<[Arc<str>]>),
    /// Opaque payload such as an encoded method-location expression.
    Blob(Arc<[u8]>),
    Pool(PoolValue),
    Null,
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v as i64),
            PropertyValue::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(Arc::from(s))
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Long(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::StringArray(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(item)?;
                }
                f.write_str("]")
            }
            PropertyValue::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
            PropertyValue::Pool(v) => write!(f, "{}", v),
            PropertyValue::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: Vec<(Arc<str>, PropertyValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set `key`, replacing any previous value in place.
    pub fn set(&mut self, key: impl Into<Arc<str>>, value: PropertyValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let pos = self.entries.iter().position(|(k, _)| &**k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Add entries of `other` whose keys are not present here.
    ///
    /// Existing values, including user edits, always win.
    pub fn merge_absent(&mut self, other: &Properties) {
        for (key, value) in &other.entries {
            if !self.contains(key) {
                self.entries.push((Arc::clone(key), value.clone()));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (&**k, v))
    }
}
