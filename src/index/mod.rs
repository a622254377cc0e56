//! Stream Index
//!
//! Maps the start offset of every group and graph region seen by the
//! scanner to its `StreamEntry`. The scanner is the only writer; lazy
//! completions read it to seek into regions and to skip nested ones.
//!
//! ```text
//! StreamIndex
//! └── BTreeMap<start offset, Arc<StreamEntry>>
//!       └── StreamEntry { start, content_start, end?, pools, summary? }
//! ```

mod entry;

pub use entry::{RegionClose, RegionSummary, StreamEntry};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

#[derive(Debug, Default)]
pub struct StreamIndex {
    entries: RwLock<BTreeMap<u64, Arc<StreamEntry>>>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, Arc<StreamEntry>>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, entry: Arc<StreamEntry>) {
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        map.insert(entry.start(), entry);
    }

    pub fn get(&self, start: u64) -> Option<Arc<StreamEntry>> {
        self.read().get(&start).cloned()
    }

    /// Entry at `start` if its region is finished.
    pub fn closed(&self, start: u64) -> Option<Arc<StreamEntry>> {
        self.get(start).filter(|e| e.is_closed())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All entries in offset order.
    pub fn entries(&self) -> Vec<Arc<StreamEntry>> {
        self.read().values().cloned().collect()
    }

    /// Entries whose region contains `offset`, outermost first.
    pub fn covering(&self, offset: u64) -> Vec<Arc<StreamEntry>> {
        self.read()
            .range(..=offset)
            .filter(|(_, e)| e.end().map_or(true, |end| offset < end))
            .map(|(_, e)| Arc::clone(e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Properties;
    use crate::pool::ConstantPool;
    use crate::reader::events::{
        GroupHeader, RegionHeader, RegionKind, RegionMark, StreamInfo, Version,
    };

    fn group(start: u64) -> Arc<StreamEntry> {
        let mark = RegionMark {
            kind: RegionKind::Group,
            stream: StreamInfo {
                id: 0,
                version: Version::V5,
            },
            start,
            depth: 0,
            initial_pool: ConstantPool::new(),
        };
        let header = RegionHeader::Group(GroupHeader {
            name: Arc::from("g"),
            short_name: Arc::from("g"),
            method: None,
            bci: -1,
        });
        Arc::new(StreamEntry::new(mark, header, start + 9, ConstantPool::new()))
    }

    fn close(entry: &StreamEntry, end: u64) {
        entry.close(RegionClose {
            end,
            end_pool: ConstantPool::new(),
            summary: RegionSummary::Group {
                children: 0,
                properties: Properties::new(),
            },
            truncated: false,
        });
    }

    #[test]
    fn test_lookup_and_closed() {
        let index = StreamIndex::new();
        let outer = group(6);
        index.insert(outer.clone());
        assert!(index.get(6).is_some());
        assert!(index.closed(6).is_none());
        close(&outer, 100);
        assert!(index.closed(6).is_some());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_covering() {
        let index = StreamIndex::new();
        let outer = group(6);
        let first = group(20);
        let second = group(50);
        index.insert(outer.clone());
        index.insert(first.clone());
        index.insert(second.clone());
        close(&first, 40);

        let starts: Vec<u64> = index.covering(55).iter().map(|e| e.start()).collect();
        assert_eq!(starts, vec![6, 50]);
        let starts: Vec<u64> = index.covering(30).iter().map(|e| e.start()).collect();
        assert_eq!(starts, vec![6, 20]);
    }
}
