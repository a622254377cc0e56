//! Content Backends
//!
//! A `Content` is a random-access byte source. Every consumer opens its own
//! cursor with `sub_channel`, so the scanner and any number of lazy
//! completions can read different regions at the same time.
//!
//! - `FileContent`: a local file, one handle per cursor.
//! - `ZipContent`: archive members concatenated in archive order, extracted
//!   to temp files on demand.
//! - `NetworkContent`: a live socket mirrored to a spill file; readers of the
//!   unread tail block until bytes arrive.

pub mod file;
pub mod network;
pub mod zip;

pub use self::file::FileContent;
pub use self::network::NetworkContent;
pub use self::zip::ZipContent;

use crate::config::LoadConfig;
use crate::error::Result;
use std::fmt;
use std::io::{self, Read};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Independent readable cursor over a range of a content.
///
/// `read` returning 0 means the end of the range (or of the content).
pub trait ReadChannel: Read + Send {
    /// Absolute offset of the next byte `read` will return.
    fn position(&self) -> u64;

    /// Skip forward up to `n` bytes, returning how many were skipped.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut scratch = [0u8; 4096];
        let mut left = n;
        while left > 0 {
            let want = left.min(scratch.len() as u64) as usize;
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            left -= got as u64;
        }
        Ok(n - left)
    }
}

pub type Channel = Box<dyn ReadChannel>;

/// In-memory bytes, positioned at their cursor offset.
impl<T: AsRef<[u8]> + Send> ReadChannel for io::Cursor<T> {
    fn position(&self) -> u64 {
        io::Cursor::position(self)
    }
}

pub trait Content: Send + Sync + fmt::Debug {
    /// Human readable origin, used in log lines.
    fn description(&self) -> String;

    /// Cursor over `[start, end)`; `end = None` reads to the end of the content.
    fn sub_channel(&self, start: u64, end: Option<u64>) -> Result<Channel>;

    /// Cursor over the whole content.
    fn open_stream(&self) -> Result<Channel> {
        self.sub_channel(0, None)
    }

    /// Drop cached data lying entirely before `beyond` that no cursor uses.
    fn reset_cache(&self, _beyond: u64) {}

    /// Release the backend. Open cursors fail from now on.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Document-side handle on a content.
///
/// The document, its lazy nodes and their materialized contents share one
/// owner; dropping the last of them closes the backend.
pub struct ContentOwner {
    content: Arc<dyn Content>,
}

impl ContentOwner {
    pub fn new(content: Arc<dyn Content>) -> Arc<Self> {
        Arc::new(ContentOwner { content })
    }
}

impl Deref for ContentOwner {
    type Target = dyn Content;

    fn deref(&self) -> &Self::Target {
        &*self.content
    }
}

impl fmt::Debug for ContentOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentOwner").field(&self.content).finish()
    }
}

impl Drop for ContentOwner {
    fn drop(&mut self) {
        if self.content.is_closed() {
            return;
        }
        log::debug!("closing {}", self.content.description());
        if let Err(e) = self.content.close() {
            log::warn!("failed to close {}: {}", self.content.description(), e);
        }
    }
}

/// Open a local path, picking the zip backend for archives.
pub fn open_path(path: impl AsRef<Path>) -> Result<Arc<dyn Content>> {
    open_path_with(path, &LoadConfig::default())
}

pub fn open_path_with(path: impl AsRef<Path>, config: &LoadConfig) -> Result<Arc<dyn Content>> {
    let path = path.as_ref();
    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    let is_zip = file.read_exact(&mut magic).is_ok() && magic == *b"PK\x03\x04";
    if is_zip {
        Ok(Arc::new(ZipContent::open_with(path, config)?))
    } else {
        Ok(Arc::new(FileContent::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_path_sniffs_plain_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"BIGV\x06\x00").unwrap();
        let content = open_path(tmp.path()).unwrap();
        assert!(content.description().contains("file"));

        let mut channel = content.open_stream().unwrap();
        let mut buf = Vec::new();
        channel.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"BIGV\x06\x00");
    }

    #[test]
    fn test_owner_closes_on_drop() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let content = Arc::new(FileContent::open(tmp.path()).unwrap());
        let owner = ContentOwner::new(content.clone());
        assert!(!content.is_closed());
        drop(owner);
        assert!(content.is_closed());
    }
}
