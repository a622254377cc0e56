//! Constant Pool
//!
//! Index-addressed table of decoded values referenced by later records.
//! Entries are append-only within a generation. `copy()` freezes the
//! current entries into a shared frame and hands out a new generation that
//! sees them by reference, so snapshotting at every region start is cheap.
//!
//! ## Layout
//!
//! ```text
//! ConstantPool
//! ├── local: HashMap<u16, PoolEntry>      # entries added since last copy
//! └── frozen: Arc<Frame> ──► Frame ──► Frame ──► ...
//! ```
//!
//! Chains deeper than `MAX_CHAIN_DEPTH` are flattened into a single frame.

mod value;

pub use value::{Field, Location, Method, NodeClass, PoolValue, SourcePosition};

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference value meaning "no entry".
pub const NULL_REF: u16 = 0xFFFF;

const MAX_CHAIN_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct PoolEntry {
    value: PoolValue,
    /// Stream offset of the defining record.
    offset: u64,
}

#[derive(Debug)]
struct Frame {
    entries: HashMap<u16, PoolEntry>,
    parent: Option<Arc<Frame>>,
    depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    frozen: Option<Arc<Frame>>,
    local: HashMap<u16, PoolEntry>,
    generation: u32,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Forget every entry. Used at stream headers, where indices restart.
    pub fn restart(&mut self) {
        self.frozen = None;
        self.local.clear();
        self.generation += 1;
    }

    /// Independent next generation sharing all current entries.
    pub fn copy(&mut self) -> ConstantPool {
        self.freeze();
        ConstantPool {
            frozen: self.frozen.clone(),
            local: HashMap::new(),
            generation: self.generation + 1,
        }
    }

    fn freeze(&mut self) {
        if self.local.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.local);
        let parent = self.frozen.take();
        let depth = parent.as_ref().map_or(1, |p| p.depth + 1);
        let frame = if depth > MAX_CHAIN_DEPTH {
            let mut flat = collect_frames(parent.as_deref());
            flat.extend(entries);
            Frame {
                entries: flat,
                parent: None,
                depth: 1,
            }
        } else {
            Frame {
                entries,
                parent,
                depth,
            }
        };
        self.frozen = Some(Arc::new(frame));
    }

    fn lookup(&self, index: u16) -> Option<&PoolEntry> {
        if let Some(entry) = self.local.get(&index) {
            return Some(entry);
        }
        let mut frame = self.frozen.as_deref();
        while let Some(f) = frame {
            if let Some(entry) = f.entries.get(&index) {
                return Some(entry);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, index: u16) -> bool {
        self.lookup(index).is_some()
    }

    /// Resolve `index` for a record read at `offset`.
    pub fn get(&self, index: u16, offset: u64) -> Result<&PoolValue> {
        let entry = self
            .lookup(index)
            .ok_or(Error::PoolMissing { index, offset })?;
        if entry.offset > offset {
            return Err(Error::PoolConsistency {
                index,
                detail: format!(
                    "defined at {} but referenced at {}",
                    entry.offset, offset
                ),
            });
        }
        Ok(&entry.value)
    }

    /// Define `index`. Identical redefinitions are ignored.
    pub fn add(&mut self, index: u16, value: PoolValue, offset: u64) -> Result<()> {
        if index == NULL_REF {
            return Err(Error::protocol(offset, "pool index 0xFFFF is reserved"));
        }
        if let Some(existing) = self.lookup(index) {
            if existing.value == value {
                return Ok(());
            }
            log::warn!(
                "pool index {} redefined at {} ({} -> {})",
                index,
                offset,
                existing.value,
                value
            );
            return Err(Error::protocol(
                offset,
                format!("pool index {} redefined without restart", index),
            ));
        }
        log::trace!("pool[{}] = {} @{}", index, value, offset);
        self.local.insert(index, PoolEntry { value, offset });
        Ok(())
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.visible().len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.frozen.is_none()
    }

    fn visible(&self) -> HashMap<u16, &PoolEntry> {
        let mut all: HashMap<u16, &PoolEntry> = self.local.iter().map(|(k, v)| (*k, v)).collect();
        let mut frame = self.frozen.as_deref();
        while let Some(f) = frame {
            for (k, v) in &f.entries {
                all.entry(*k).or_insert(v);
            }
            frame = f.parent.as_deref();
        }
        all
    }

    /// Check that this pool answers every index exactly like `expected`.
    pub fn verify_against(&self, expected: &ConstantPool) -> Result<()> {
        let mine = self.visible();
        let theirs = expected.visible();
        for (index, entry) in &theirs {
            match mine.get(index) {
                Some(own) if own.value == entry.value => {}
                Some(own) => {
                    return Err(Error::PoolConsistency {
                        index: *index,
                        detail: format!("expected {}, found {}", entry.value, own.value),
                    })
                }
                None => {
                    return Err(Error::PoolConsistency {
                        index: *index,
                        detail: format!("expected {}, found nothing", entry.value),
                    })
                }
            }
        }
        if let Some(extra) = mine.keys().find(|k| !theirs.contains_key(*k)) {
            return Err(Error::PoolConsistency {
                index: *extra,
                detail: "unexpected entry".to_string(),
            });
        }
        Ok(())
    }

    /// True if both pools resolve `index` to the same stored entry.
    pub fn shares_entry(&self, other: &ConstantPool, index: u16) -> bool {
        match (self.lookup(index), other.lookup(index)) {
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            _ => false,
        }
    }

    // ========================================================================
    // Typed lookups
    // ========================================================================

    fn typed<T>(
        &self,
        index: u16,
        offset: u64,
        want: &str,
        pick: impl FnOnce(&PoolValue) -> Option<T>,
    ) -> Result<Option<T>> {
        if index == NULL_REF {
            return Ok(None);
        }
        let value = self.get(index, offset)?;
        match pick(value) {
            Some(v) => Ok(Some(v)),
            None => Err(Error::protocol(
                offset,
                format!(
                    "pool entry {} is a {}, expected {}",
                    index,
                    value.kind_name(),
                    want
                ),
            )),
        }
    }

    pub fn string(&self, index: u16, offset: u64) -> Result<Option<Arc<str>>> {
        self.typed(index, offset, "string", |v| match v {
            PoolValue::String(s) => Some(Arc::clone(s)),
            _ => None,
        })
    }

    pub fn class(&self, index: u16, offset: u64) -> Result<Option<Arc<str>>> {
        self.typed(index, offset, "class", |v| match v {
            PoolValue::Class(s) => Some(Arc::clone(s)),
            _ => None,
        })
    }

    pub fn method(&self, index: u16, offset: u64) -> Result<Option<Arc<Method>>> {
        self.typed(index, offset, "method", |v| match v {
            PoolValue::Method(m) => Some(Arc::clone(m)),
            _ => None,
        })
    }

    pub fn node_class(&self, index: u16, offset: u64) -> Result<Option<Arc<NodeClass>>> {
        self.typed(index, offset, "node class", |v| match v {
            PoolValue::NodeClass(c) => Some(Arc::clone(c)),
            _ => None,
        })
    }

    pub fn source_position(
        &self,
        index: u16,
        offset: u64,
    ) -> Result<Option<Arc<SourcePosition>>> {
        self.typed(index, offset, "source position", |v| match v {
            PoolValue::SourcePosition(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// Any entry, for pool-typed property values.
    pub fn value(&self, index: u16, offset: u64) -> Result<Option<PoolValue>> {
        self.typed(index, offset, "any", |v| Some(v.clone()))
    }
}

fn collect_frames(frame: Option<&Frame>) -> HashMap<u16, PoolEntry> {
    let mut chain = Vec::new();
    let mut cur = frame;
    while let Some(f) = cur {
        chain.push(f);
        cur = f.parent.as_deref();
    }
    let mut flat = HashMap::new();
    // Oldest first, so nearer frames win.
    for f in chain.into_iter().rev() {
        for (k, v) in &f.entries {
            flat.insert(*k, v.clone());
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> PoolValue {
        PoolValue::String(Arc::from(text))
    }

    #[test]
    fn test_add_and_get() {
        let mut pool = ConstantPool::new();
        pool.add(0, s("alpha"), 10).unwrap();
        assert_eq!(pool.get(0, 20).unwrap(), &s("alpha"));
        assert_eq!(pool.string(0, 20).unwrap().as_deref(), Some("alpha"));
        assert_eq!(pool.string(NULL_REF, 20).unwrap(), None);
    }

    #[test]
    fn test_missing_entry() {
        let pool = ConstantPool::new();
        assert!(matches!(
            pool.get(3, 99),
            Err(Error::PoolMissing { index: 3, offset: 99 })
        ));
    }

    #[test]
    fn test_reference_before_definition_is_inconsistent() {
        let mut pool = ConstantPool::new();
        pool.add(1, s("late"), 50).unwrap();
        assert!(matches!(
            pool.get(1, 40),
            Err(Error::PoolConsistency { index: 1, .. })
        ));
    }

    #[test]
    fn test_copy_shares_and_isolates() {
        let mut parent = ConstantPool::new();
        parent.add(0, s("shared"), 1).unwrap();
        let mut child = parent.copy();
        assert!(child.shares_entry(&parent, 0));
        assert_eq!(child.generation(), parent.generation() + 1);

        child.add(1, s("child only"), 2).unwrap();
        parent.add(2, s("parent only"), 3).unwrap();
        assert!(!parent.contains(1));
        assert!(!child.contains(2));
        assert_eq!(child.get(0, 5).unwrap(), parent.get(0, 5).unwrap());
    }

    #[test]
    fn test_redefinition() {
        let mut pool = ConstantPool::new();
        pool.add(0, s("same"), 1).unwrap();
        pool.add(0, s("same"), 2).unwrap();
        assert!(matches!(
            pool.add(0, s("other"), 3),
            Err(Error::Protocol { offset: 3, .. })
        ));
        pool.restart();
        pool.add(0, s("other"), 4).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_deep_chain_flattens() {
        let mut pool = ConstantPool::new();
        let mut snapshots = Vec::new();
        for i in 0..100u16 {
            pool.add(i, s(&format!("v{}", i)), i as u64).unwrap();
            snapshots.push(pool.copy());
        }
        assert_eq!(pool.len(), 100);
        assert!(pool.frozen.as_ref().unwrap().depth <= MAX_CHAIN_DEPTH);
        for (i, snap) in snapshots.iter().enumerate() {
            assert_eq!(snap.len(), i + 1);
            assert_eq!(snap.string(i as u16, 1000).unwrap().as_deref(), Some(&*format!("v{}", i)));
        }
    }

    #[test]
    fn test_verify_against() {
        let mut a = ConstantPool::new();
        a.add(0, s("x"), 0).unwrap();
        let mut b = a.copy();
        a.add(1, s("y"), 1).unwrap();
        assert!(b.verify_against(&a).is_err());
        b.add(1, s("y"), 1).unwrap();
        assert!(b.verify_against(&a).is_ok());
        b.add(2, s("z"), 2).unwrap();
        assert!(matches!(
            b.verify_against(&a),
            Err(Error::PoolConsistency { index: 2, .. })
        ));
    }

    #[test]
    fn test_typed_lookup_mismatch() {
        let mut pool = ConstantPool::new();
        pool.add(0, s("not a method"), 0).unwrap();
        assert!(matches!(pool.method(0, 1), Err(Error::Protocol { .. })));
    }
}
