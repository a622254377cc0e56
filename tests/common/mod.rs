//! Dump fixtures shared by the integration tests.

#![allow(dead_code)]

use graphdump::lazy::Executor;
use graphdump::reader::Version;
use graphdump::writer::{DumpWriter, NodePosition, WireValue, WrittenRegion};
use graphdump::{Document, DumpLoader, EdgeKind, FolderElement, Graph, Group, LoadConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Graphs with more encoded bytes than this stay lazy in the tests.
pub const TEST_THRESHOLD: u64 = 256;

pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub regions: Vec<WrittenRegion>,
}

impl Fixture {
    pub fn region(&self, name: &str) -> &WrittenRegion {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no region {}", name))
    }
}

pub fn write_fixture(build: impl FnOnce(&mut DumpWriter<Vec<u8>>)) -> Fixture {
    let mut writer = DumpWriter::with_header(Vec::new(), Version::V6).unwrap();
    build(&mut writer);
    let regions = writer.regions().to_vec();
    let bytes = writer.into_inner().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.bgv");
    std::fs::write(&path, &bytes).unwrap();
    Fixture {
        dir,
        path,
        bytes,
        regions,
    }
}

/// A graph of `nodes` nodes chained by input edges.
pub fn graph(w: &mut DumpWriter<Vec<u8>>, id: i32, title: &str, nodes: i32) {
    let class = w.node_class("Add", "{p#x}", &["x", "y"], &["next"]).unwrap();
    let method = w.method("Foo", "bar", "(I)I", 9).unwrap();
    let position = w
        .source_position(Some(method), 3, None, &[("java", "Foo.java", 12)])
        .unwrap();
    w.begin_graph(id, title).unwrap();
    w.property("graph-id", WireValue::Int(id)).unwrap();
    for n in 0..nodes {
        w.node(
            n,
            Some(class),
            NodePosition::Source(position),
            &[("idx", WireValue::Int(n)), ("name", WireValue::Str(title))],
        )
        .unwrap();
    }
    for n in 1..nodes {
        w.edge(EdgeKind::Input, n - 1, n, 0, Some("x")).unwrap();
    }
    w.end_graph().unwrap();
}

/// Two top-level groups with nested groups, small and large graphs.
///
/// ```text
/// root
/// ├── phase-a: a1, a2 (large), a3
/// ├── phase-b
/// │   ├── inner: b1, b2
/// │   └── b3
/// └── final
/// tail
/// └── t1 (large)
/// ```
pub fn standard() -> Fixture {
    write_fixture(|w| {
        w.property("origin", WireValue::Str("test")).unwrap();
        w.begin_group("root", "root", None, 0).unwrap();
        // First use of this key is inside a region.
        w.property("compile-id", WireValue::Long(42)).unwrap();

        w.begin_group("phase-a", "a", None, 0).unwrap();
        graph(w, 1, "a1", 2);
        graph(w, 2, "a2", 40);
        graph(w, 3, "a3", 3);
        w.end_group().unwrap();

        w.begin_group("phase-b", "b", None, 0).unwrap();
        w.begin_group("inner", "i", None, 0).unwrap();
        graph(w, 4, "b1", 1);
        graph(w, 5, "b2", 2);
        w.end_group().unwrap();
        graph(w, 6, "b3", 2);
        w.end_group().unwrap();

        graph(w, 7, "final", 2);
        w.end_group().unwrap();

        w.begin_group("tail", "tail", None, 0).unwrap();
        w.property("compile-id", WireValue::Long(43)).unwrap();
        graph(w, 8, "t1", 40);
        w.end_group().unwrap();
    })
}

pub fn config() -> LoadConfig {
    LoadConfig::new()
        .with_lazy_graph_threshold(TEST_THRESHOLD)
        .with_verify_pools(true)
}

pub fn loader() -> DumpLoader {
    DumpLoader::new().with_config(config())
}

pub fn loader_on(executor: Arc<dyn Executor>) -> DumpLoader {
    loader().with_executor(executor)
}

pub fn parse(fixture: &Fixture) -> Document {
    let loader = loader();
    loader
        .parse(loader.open_path(&fixture.path).unwrap())
        .unwrap()
}

pub fn group_of(element: &FolderElement) -> Arc<Group> {
    Arc::clone(element.as_group().expect("a group"))
}

pub fn graph_of(element: &FolderElement) -> Arc<Graph> {
    Arc::clone(element.as_graph().expect("a graph"))
}

pub fn top_group(document: &Document, name: &str) -> Arc<Group> {
    group_of(&document.find(name).unwrap_or_else(|| panic!("no group {}", name)))
}

pub fn names<E: AsRef<FolderElement>>(elements: &[E]) -> Vec<String> {
    elements.iter().map(|e| e.as_ref().name().to_string()).collect()
}
