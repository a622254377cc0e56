//! graphdump - Lazy document store for binary compiler graph dumps
//!
//! A dump is a stream of nested groups and graphs. Loading scans it once,
//! building the group skeleton and an index of every region; group
//! children and large graph bodies are re-read on demand and forgotten
//! again when nobody holds them.
//!
//! ```text
//! Content (file | zip | network)
//!   └── BinaryReader ──► Builder
//!         ├── ScanningBuilder  → Document + StreamIndex   (first pass)
//!         ├── load_group       → GroupContents            (on demand)
//!         └── load_graph       → GraphContents            (on demand)
//! ```
//!
//! ```no_run
//! let document = graphdump::parse(graphdump::content::open_path("dump.bgv")?)?;
//! for element in document.elements() {
//!     if let Some(group) = element.as_group() {
//!         let children = group.get_elements()?;
//!         println!("{}: {} children", group.name(), children.len());
//!     }
//! }
//! # Ok::<(), graphdump::Error>(())
//! ```

pub mod builder;
pub mod config;
pub mod content;
pub mod error;
pub mod index;
pub mod lazy;
pub mod model;
pub mod pool;
pub mod reader;
pub mod writer;

pub use config::LoadConfig;
pub use content::{Content, FileContent, NetworkContent, ZipContent};
pub use error::{Error, Result};
pub use index::{StreamEntry, StreamIndex};
pub use lazy::{Completion, Executor, LoadStatus, StatsSnapshot};
pub use model::{
    ChangeEvent, Document, Edge, EdgeKind, Element, FolderElement, Graph, GraphContents, Group,
    GroupContents, Node, Parent, Properties, PropertyValue,
};
pub use writer::DumpWriter;

use content::ContentOwner;
use lazy::{GlobalPool, LoadContext};
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Loads contents into documents.
///
/// Holds the configuration and the executor lazy completions run on.
#[derive(Clone)]
pub struct DumpLoader {
    config: LoadConfig,
    executor: Arc<dyn Executor>,
}

impl Default for DumpLoader {
    fn default() -> Self {
        DumpLoader {
            config: LoadConfig::default(),
            executor: Arc::new(GlobalPool),
        }
    }
}

impl DumpLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader configured from `GRAPHDUMP_*` environment variables.
    pub fn from_env() -> Self {
        Self::new().with_config(LoadConfig::from_env())
    }

    pub fn with_config(mut self, config: LoadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    fn context(&self, document: &Document, content: Arc<dyn Content>) -> Arc<LoadContext> {
        let ctx = LoadContext::new(
            ContentOwner::new(content),
            Arc::clone(&self.executor),
            self.config.clone(),
        );
        document.attach_source(Arc::clone(&ctx.index), Arc::clone(&ctx.stats));
        ctx
    }

    /// Open a local file or zip archive with this loader's configuration.
    pub fn open_path(&self, path: impl AsRef<Path>) -> Result<Arc<dyn Content>> {
        content::open_path_with(path, &self.config)
    }

    /// Start scanning `content` on a background thread.
    ///
    /// The document fills up while the scan runs; `Document::wait_scanned`
    /// returns its outcome.
    pub fn open(&self, content: Arc<dyn Content>) -> Result<Document> {
        let document = Document::new();
        let ctx = self.context(&document, content);
        let scanned = document.clone();
        let handle = thread::Builder::new()
            .name("graphdump-scan".to_string())
            .spawn(move || builder::scanning::scan(&scanned, &ctx))?;
        document.set_scan_thread(handle);
        Ok(document)
    }

    /// Scan `content` on the calling thread.
    pub fn parse(&self, content: Arc<dyn Content>) -> Result<Document> {
        let document = Document::new();
        self.parse_into(&document, content)?;
        Ok(document)
    }

    /// Scan `content` on the calling thread, appending to `document`.
    ///
    /// On error, whatever was read before it stays in the document with
    /// its open regions closed.
    pub fn parse_into(&self, document: &Document, content: Arc<dyn Content>) -> Result<()> {
        let ctx = self.context(document, content);
        let outcome = builder::scanning::scan(document, &ctx);
        document.set_scan_outcome(outcome.clone());
        outcome
    }
}

/// Scan `content` in the background with the default loader.
pub fn open(content: Arc<dyn Content>) -> Result<Document> {
    DumpLoader::new().open(content)
}

/// Scan `content` to the end with the default loader.
pub fn parse(content: Arc<dyn Content>) -> Result<Document> {
    DumpLoader::new().parse(content)
}
