mod common;

use common::*;
use graphdump::lazy::Inline;
use graphdump::reader::RegionKind;
use graphdump::writer::WrittenRegion;
use graphdump::{
    ChangeEvent, Content, Element, Error, FolderElement, Group, LoadStatus, NetworkContent,
    ZipContent,
};
use std::io::{self, Cursor, Read, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zip::write::SimpleFileOptions;

const WAIT: Duration = Duration::from_secs(10);

/// Names of every element below `group`, depth first.
fn walk(group: &Arc<Group>, out: &mut Vec<String>) {
    for element in group.get_elements().unwrap().elements() {
        out.push(element.name().to_string());
        match &*element {
            FolderElement::Group(child) => walk(child, out),
            FolderElement::Graph(graph) => {
                out.push(format!("{} nodes", graph.contents().unwrap().nodes().len()))
            }
        }
    }
}

fn outline(document: &graphdump::Document) -> Vec<String> {
    let mut out = Vec::new();
    for element in document.elements() {
        out.push(element.name().to_string());
        walk(&group_of(&element), &mut out);
    }
    out
}

#[test]
fn test_zip_members_read_as_one_stream() {
    let fixture = standard();
    let third = fixture.bytes.len() / 3;
    let path = fixture.dir.path().join("dump.zip");
    {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer.add_directory("dump/", SimpleFileOptions::default()).unwrap();
        for (i, part) in fixture.bytes.chunks(third).enumerate() {
            writer
                .start_file(format!("dump/part-{}.bgv", i), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(part).unwrap();
        }
        writer.finish().unwrap();
    }

    let config = config().with_zip_cache_members(NonZeroUsize::MIN);
    let zip = Arc::new(ZipContent::open_with(&path, &config).unwrap());
    assert!(zip.members().len() >= 3);
    // Inline loads leave no task holding the content once they return.
    let loader = loader().with_config(config).with_executor(Arc::new(Inline));
    let document = loader.parse(zip.clone()).unwrap();

    let expected = outline(&parse(&fixture));
    assert_eq!(outline(&document), expected);
    assert!(zip.extraction_count() >= zip.members().len() as u64);

    // Nothing references the content any more: the archive is closed.
    drop(document);
    assert!(zip.is_closed());
    assert!(!zip.archive_open());
}

#[test]
fn test_open_path_detects_archives() {
    let fixture = standard();
    let path = fixture.dir.path().join("single.zip");
    {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer
            .start_file("dump.bgv", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&fixture.bytes).unwrap();
        writer.finish().unwrap();
    }
    let loader = loader();
    let content = loader.open_path(&path).unwrap();
    assert!(content.description().starts_with("archive "));
    let document = loader.parse(content).unwrap();
    assert_eq!(names(&document.elements()), vec!["root", "tail"]);
}

/// root / phase / g0..g8
fn nine_graphs() -> Fixture {
    write_fixture(|w| {
        w.begin_group("root", "root", None, 0).unwrap();
        w.begin_group("phase", "phase", None, 0).unwrap();
        for i in 0..9 {
            graph(w, i, &format!("g{}", i), 3);
        }
        w.end_group().unwrap();
        w.end_group().unwrap();
    })
}

#[test]
fn test_network_stream_grows_monotonically() {
    let fixture = nine_graphs();
    let graphs: Vec<WrittenRegion> = fixture
        .regions
        .iter()
        .filter(|r| r.kind == RegionKind::Graph)
        .cloned()
        .collect();
    assert_eq!(graphs.len(), 9);

    let net = Arc::new(
        NetworkContent::with_config("test socket", Cursor::new(fixture.bytes.clone()), &config())
            .unwrap(),
    );
    net.freeze_at(graphs[0].start);
    let document = loader().open(net.clone()).unwrap();
    assert!(net.wait_frozen(WAIT));
    assert!(document.is_scanning());

    let root = top_group(&document, "root");
    let root_partial = root.partial_data();
    assert_eq!(names(&root_partial), vec!["phase"]);
    let phase = group_of(&root_partial[0]);
    assert!(phase.partial_data().is_empty());

    let added = Arc::new(AtomicUsize::new(0));
    {
        let added = Arc::clone(&added);
        phase.subscribe(move |event| {
            if let ChangeEvent::ElementAdded { .. } = event {
                added.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let mut seen: Vec<Element> = Vec::new();
    for (i, region) in graphs.iter().enumerate() {
        net.resume_to(region.end.unwrap());
        assert!(net.wait_frozen(WAIT), "scanner did not reach g{}", i);
        let partial = phase.partial_data();
        assert_eq!(partial.len(), i + 1);
        assert_eq!(added.load(Ordering::SeqCst), i + 1);
        // Earlier snapshots stay a prefix.
        assert!(seen.iter().zip(&partial).all(|(a, b)| a.same_region(b)));
        assert_eq!(partial[i].name().as_ref(), region.name);
        seen = partial;
    }

    net.resume();
    document.wait_scanned().unwrap();
    assert!(net.is_finished());

    let complete = phase.get_elements().unwrap();
    assert_eq!(complete.len(), 9);
    assert!(seen
        .iter()
        .zip(complete.elements().iter())
        .all(|(a, b)| a.same_region(b)));
}

/// Delivers `data`, then fails like a reset connection.
struct Reset {
    data: Cursor<Vec<u8>>,
}

impl Read for Reset {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
            n => Ok(n),
        }
    }
}

#[test]
fn test_network_failure_closes_open_regions() {
    let fixture = nine_graphs();
    let cut = fixture.region("g4").end.unwrap() as usize;
    let source = Reset {
        data: Cursor::new(fixture.bytes[..cut].to_vec()),
    };
    let net = Arc::new(NetworkContent::with_config("flaky", source, &config()).unwrap());
    let document = loader().open(net).unwrap();

    let err = document.wait_scanned().unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{:?}", err);

    let index = document.index().unwrap();
    assert!(index.entries().iter().all(|e| e.is_closed()));
    let root = top_group(&document, "root");
    assert!(root.region().closing().unwrap().truncated);
    assert_eq!(root.child_count_hint(), 1);
}

#[test]
fn test_close_fails_pending_completion() {
    let fixture = nine_graphs();
    let net = Arc::new(
        NetworkContent::with_config("test socket", Cursor::new(fixture.bytes.clone()), &config())
            .unwrap(),
    );
    net.freeze_at(fixture.region("g2").start);
    let document = loader().open(net.clone()).unwrap();
    assert!(net.wait_frozen(WAIT));

    let phase = group_of(&top_group(&document, "root").partial_data()[0]);
    assert_eq!(phase.partial_data().len(), 2);
    let handle = phase.complete_contents();
    assert_eq!(phase.status(), LoadStatus::Loading);

    net.close().unwrap();
    let err = handle.wait().unwrap_err();
    assert!(matches!(err, Error::ContentClosed), "{:?}", err);
    assert_eq!(phase.status(), LoadStatus::Failed);
    assert!(phase.partial_data().is_empty());
    assert!(matches!(document.wait_scanned(), Err(Error::ContentClosed)));

    // The region is still recorded, cut short.
    let entry = phase.region();
    assert!(entry.closing().unwrap().truncated);
}
