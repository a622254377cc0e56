//! Local file backend.

use super::{Channel, Content, ReadChannel};
use crate::error::{closed_io_error, Error, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct FileContent {
    path: PathBuf,
    closed: Arc<AtomicBool>,
}

impl FileContent {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Fail early on unreadable paths rather than on first cursor.
        File::open(&path)?;
        Ok(FileContent {
            path,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Content for FileContent {
    fn description(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn sub_channel(&self, start: u64, end: Option<u64>) -> Result<Channel> {
        if self.is_closed() {
            return Err(Error::ContentClosed);
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Box::new(FileChannel {
            file,
            pos: start,
            end,
            closed: Arc::clone(&self.closed),
        }))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct FileChannel {
    file: File,
    pos: u64,
    end: Option<u64>,
    closed: Arc<AtomicBool>,
}

impl FileChannel {
    fn remaining(&self) -> u64 {
        match self.end {
            Some(end) => end.saturating_sub(self.pos),
            None => u64::MAX,
        }
    }
}

impl Read for FileChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_io_error());
        }
        let want = (buf.len() as u64).min(self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }
        let read = self.file.read(&mut buf[..want])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl ReadChannel for FileChannel {
    fn position(&self) -> u64 {
        self.pos
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_io_error());
        }
        let len = self.file.metadata()?.len();
        let n = n.min(self.remaining()).min(len.saturating_sub(self.pos));
        self.pos += n;
        self.file.seek(SeekFrom::Start(self.pos))?;
        Ok(n)
    }
}
