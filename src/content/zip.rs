//! Zip archive backend
//!
//! File members are concatenated in archive order into one logical stream.
//! A cursor extracts the member covering its position to a temp file the
//! first time it reads from it. Extractions are counted by open cursors and
//! kept in an LRU cache; only members no cursor holds are ever evicted.
//!
//! Extraction runs outside the cache lock, serialized on the archive
//! handle alone. A cursor that needs a member another cursor is extracting
//! waits for that extraction; everyone else carries on.

use super::{Channel, Content, ReadChannel};
use crate::config::LoadConfig;
use crate::error::{closed_io_error, Error, Result};
use ::zip::ZipArchive;
use lru::LruCache;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tempfile::TempPath;

/// A file member and its place in the logical stream.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    /// Index inside the archive's central directory.
    archive_index: usize,
    pub start: u64,
    pub size: u64,
}

impl Member {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

struct Extraction {
    path: TempPath,
    cursors: usize,
}

struct ZipState {
    cache: LruCache<usize, Extraction>,
    /// Members being extracted right now.
    extracting: HashSet<usize>,
    extractions: u64,
}

struct ZipShared {
    path: PathBuf,
    members: Vec<Member>,
    capacity: usize,
    temp_dir: Option<PathBuf>,
    closed: AtomicBool,
    archive: Mutex<Option<ZipArchive<File>>>,
    state: Mutex<ZipState>,
    extracted: Condvar,
}

pub struct ZipContent {
    shared: Arc<ZipShared>,
}

impl ZipContent {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &LoadConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: &LoadConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut archive = ZipArchive::new(File::open(&path)?)?;

        let mut members = Vec::with_capacity(archive.len());
        let mut offset = 0u64;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            members.push(Member {
                name: entry.name().to_string(),
                archive_index: i,
                start: offset,
                size: entry.size(),
            });
            offset += entry.size();
        }
        log::debug!(
            "opened archive {} with {} members, {} bytes",
            path.display(),
            members.len(),
            offset
        );

        Ok(ZipContent {
            shared: Arc::new(ZipShared {
                path,
                members,
                capacity: config.zip_cache_members.get(),
                temp_dir: config.temp_dir.clone(),
                closed: AtomicBool::new(false),
                archive: Mutex::new(Some(archive)),
                state: Mutex::new(ZipState {
                    cache: LruCache::unbounded(),
                    extracting: HashSet::new(),
                    extractions: 0,
                }),
                extracted: Condvar::new(),
            }),
        })
    }

    pub fn members(&self) -> &[Member] {
        &self.shared.members
    }

    /// Total length of the logical stream.
    pub fn len(&self) -> u64 {
        self.shared.members.last().map_or(0, Member::end)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Temp file currently holding member `member`, if extracted.
    pub fn extracted_path(&self, member: usize) -> Option<PathBuf> {
        let state = self.shared.lock();
        state.cache.peek(&member).map(|e| e.path.to_path_buf())
    }

    pub fn is_extracted(&self, member: usize) -> bool {
        self.extracted_path(member).is_some()
    }

    /// Number of extractions performed so far, re-extractions included.
    pub fn extraction_count(&self) -> u64 {
        self.shared.lock().extractions
    }

    pub fn archive_open(&self) -> bool {
        self.shared.archive().is_some()
    }
}

impl ZipShared {
    fn lock(&self) -> MutexGuard<'_, ZipState> {
        // Cache state is a plain map; a panicking cursor leaves it usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn member_at(&self, pos: u64) -> Option<usize> {
        let idx = self.members.partition_point(|m| m.end() <= pos);
        (idx < self.members.len()).then_some(idx)
    }

    fn archive(&self) -> MutexGuard<'_, Option<ZipArchive<File>>> {
        self.archive.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pin member `idx` for a cursor and open its extraction.
    fn acquire(&self, idx: usize) -> Result<File> {
        let mut state = self.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::ContentClosed);
            }
            if let Some(extraction) = state.cache.get_mut(&idx) {
                extraction.cursors += 1;
                let path = extraction.path.to_path_buf();
                drop(state);
                return self.open_pinned(idx, &path);
            }
            if !state.extracting.contains(&idx) {
                break;
            }
            state = self
                .extracted
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
        state.extracting.insert(idx);
        drop(state);

        let extracted = self.extract(idx);

        let mut state = self.lock();
        state.extracting.remove(&idx);
        self.extracted.notify_all();
        let path = extracted?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ContentClosed);
        }
        let file = File::open(&path)?;
        state.extractions += 1;
        state.cache.put(idx, Extraction { path, cursors: 1 });
        self.trim(&mut state);
        Ok(file)
    }

    /// Open an extraction already pinned for the caller.
    fn open_pinned(&self, idx: usize, path: &Path) -> Result<File> {
        File::open(path).map_err(|e| {
            self.release(idx);
            if self.closed.load(Ordering::Acquire) {
                Error::ContentClosed
            } else {
                Error::from(e)
            }
        })
    }

    /// Copy member `idx` to a new temp file. Holds only the archive lock.
    fn extract(&self, idx: usize) -> Result<TempPath> {
        let member = &self.members[idx];
        let mut archive = self.archive();
        let archive = archive.as_mut().ok_or(Error::ContentClosed)?;
        let mut entry = archive.by_index(member.archive_index)?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("graphdump-member-");
        let mut tmp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        io::copy(&mut entry, tmp.as_file_mut())?;
        let path = tmp.into_temp_path();
        log::debug!(
            "extracted member {} ({}) to {}",
            idx,
            member.name,
            path.display()
        );
        Ok(path)
    }

    fn release(&self, idx: usize) {
        let mut state = self.lock();
        if let Some(extraction) = state.cache.peek_mut(&idx) {
            extraction.cursors = extraction.cursors.saturating_sub(1);
        }
        self.trim(&mut state);
    }

    /// Evict least recently used unpinned members down to capacity.
    fn trim(&self, state: &mut ZipState) {
        while state.cache.len() > self.capacity {
            let victim = state
                .cache
                .iter()
                .rev()
                .find(|(_, e)| e.cursors == 0)
                .map(|(k, _)| *k);
            match victim {
                Some(idx) => {
                    state.cache.pop(&idx);
                    log::debug!("evicted member {} from extraction cache", idx);
                }
                None => break,
            }
        }
    }
}

impl fmt::Debug for ZipContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipContent")
            .field("path", &self.shared.path)
            .field("members", &self.shared.members.len())
            .finish()
    }
}

impl Content for ZipContent {
    fn description(&self) -> String {
        format!("archive {}", self.shared.path.display())
    }

    fn sub_channel(&self, start: u64, end: Option<u64>) -> Result<Channel> {
        if self.is_closed() {
            return Err(Error::ContentClosed);
        }
        let total = self.len();
        Ok(Box::new(ZipCursor {
            shared: Arc::clone(&self.shared),
            pos: start.min(total),
            end: end.map_or(total, |e| e.min(total)),
            current: None,
        }))
    }

    fn reset_cache(&self, beyond: u64) {
        let mut state = self.shared.lock();
        let stale: Vec<usize> = state
            .cache
            .iter()
            .filter(|(idx, e)| e.cursors == 0 && self.shared.members[**idx].end() <= beyond)
            .map(|(idx, _)| *idx)
            .collect();
        for idx in stale {
            state.cache.pop(&idx);
            log::debug!("reset_cache({}) dropped member {}", beyond, idx);
        }
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        *self.shared.archive() = None;
        let mut state = self.shared.lock();
        state.cache.clear();
        self.shared.extracted.notify_all();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

struct OpenMember {
    idx: usize,
    file: File,
}

struct ZipCursor {
    shared: Arc<ZipShared>,
    pos: u64,
    end: u64,
    current: Option<OpenMember>,
}

impl ZipCursor {
    fn switch_to(&mut self, idx: usize) -> io::Result<()> {
        self.drop_current();
        let mut file = self.shared.acquire(idx).map_err(into_io)?;
        file.seek(SeekFrom::Start(self.pos - self.shared.members[idx].start))?;
        self.current = Some(OpenMember { idx, file });
        Ok(())
    }

    fn drop_current(&mut self) {
        if let Some(open) = self.current.take() {
            self.shared.release(open.idx);
        }
    }
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::ContentClosed => closed_io_error(),
        Error::Io(e) => io::Error::new(e.kind(), e.to_string()),
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

impl Read for ZipCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(closed_io_error());
        }
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let Some(idx) = self.shared.member_at(self.pos) else {
            return Ok(0);
        };
        if self.current.as_ref().map(|o| o.idx) != Some(idx) {
            self.switch_to(idx)?;
        }
        let member_end = self.shared.members[idx].end();
        let want = (buf.len() as u64)
            .min(member_end - self.pos)
            .min(self.end - self.pos) as usize;
        let Some(open) = self.current.as_mut() else {
            return Ok(0);
        };
        let read = open.file.read(&mut buf[..want])?;
        self.pos += read as u64;
        log::trace!("zip cursor read {} bytes, now at {}", read, self.pos);
        Ok(read)
    }
}

impl ReadChannel for ZipCursor {
    fn position(&self) -> u64 {
        self.pos
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(closed_io_error());
        }
        let target = self.pos.saturating_add(n).min(self.end);
        let skipped = target - self.pos;
        self.pos = target;
        let still_inside = self.current.as_ref().map(|o| {
            let m = &self.shared.members[o.idx];
            m.start <= target && target < m.end()
        });
        match still_inside {
            Some(true) => {
                if let Some(open) = self.current.as_mut() {
                    let local = target - self.shared.members[open.idx].start;
                    open.file.seek(SeekFrom::Start(local))?;
                }
            }
            Some(false) => self.drop_current(),
            None => {}
        }
        Ok(skipped)
    }
}

impl Drop for ZipCursor {
    fn drop(&mut self) {
        self.drop_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::zip::write::SimpleFileOptions;
    use std::io::Write;

    fn archive(members: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = ::zip::ZipWriter::new(tmp.reopen().unwrap());
        writer.add_directory("dir/", SimpleFileOptions::default()).unwrap();
        for (name, bytes) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
        tmp
    }

    fn read_all(channel: &mut Channel) -> Vec<u8> {
        let mut buf = Vec::new();
        channel.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_members_concatenate() {
        let tmp = archive(&[("a.bgv", b"hello "), ("b.bgv", b"world")]);
        let content = ZipContent::open(tmp.path()).unwrap();
        assert_eq!(content.members().len(), 2);
        assert_eq!(content.len(), 11);
        assert_eq!(read_all(&mut content.open_stream().unwrap()), b"hello world");
    }

    #[test]
    fn test_sub_channel_across_member_boundary() {
        let tmp = archive(&[("a.bgv", b"hello "), ("b.bgv", b"world")]);
        let content = ZipContent::open(tmp.path()).unwrap();
        let mut channel = content.sub_channel(4, Some(8)).unwrap();
        assert_eq!(read_all(&mut channel), b"o wo");
    }

    #[test]
    fn test_skip_between_members() {
        let tmp = archive(&[("a.bgv", b"hello "), ("b.bgv", b"world")]);
        let content = ZipContent::open(tmp.path()).unwrap();
        let mut channel = content.open_stream().unwrap();
        let mut one = [0u8; 1];
        channel.read_exact(&mut one).unwrap();
        assert_eq!(channel.skip(7).unwrap(), 7);
        channel.read_exact(&mut one).unwrap();
        assert_eq!(&one, b"r");
    }

    #[test]
    fn test_reset_cache_respects_open_cursors() {
        let tmp = archive(&[("a.bgv", b"first"), ("b.bgv", b"second")]);
        let content = ZipContent::open(tmp.path()).unwrap();
        let first_end = content.members()[0].end();

        let mut a = content.sub_channel(0, Some(first_end)).unwrap();
        let mut b = content.sub_channel(first_end, None).unwrap();
        assert_eq!(read_all(&mut a), b"first");
        assert_eq!(read_all(&mut b), b"second");

        // `a` still pins member 0.
        content.reset_cache(first_end);
        assert!(content.is_extracted(0));

        let first_path = content.extracted_path(0).unwrap();
        drop(a);
        content.reset_cache(first_end);
        assert!(!content.is_extracted(0));
        assert!(!first_path.exists());
        assert!(content.is_extracted(1));

        // Evicted members come back on demand.
        let mut again = content.sub_channel(0, Some(first_end)).unwrap();
        assert_eq!(read_all(&mut again), b"first");
        assert_eq!(content.extraction_count(), 3);
    }

    #[test]
    fn test_lru_capacity_skips_pinned_members() {
        let tmp = archive(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let config = LoadConfig::default().with_zip_cache_members(NonZeroUsize::MIN);
        let content = ZipContent::open_with(tmp.path(), &config).unwrap();

        let mut pinned = content.sub_channel(0, Some(1)).unwrap();
        assert_eq!(read_all(&mut pinned), b"1");
        for start in 1..3 {
            let mut c = content.sub_channel(start, Some(start + 1)).unwrap();
            read_all(&mut c);
        }
        assert!(content.is_extracted(0));
        assert!(!content.is_extracted(1));
        assert!(!content.is_extracted(2));
    }

    #[test]
    fn test_extraction_does_not_block_other_members() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let tmp = archive(&[("a.bgv", b"first"), ("b.bgv", b"second")]);
        let content = Arc::new(ZipContent::open(tmp.path()).unwrap());
        let first_end = content.members()[0].end();
        let mut warm = content.sub_channel(0, Some(first_end)).unwrap();
        assert_eq!(read_all(&mut warm), b"first");
        drop(warm);

        // Hold the archive as a long extraction would.
        let held = content.shared.archive();
        let extracting = {
            let content = Arc::clone(&content);
            thread::spawn(move || {
                let mut c = content.sub_channel(first_end, None).unwrap();
                read_all(&mut c)
            })
        };
        while !content.shared.lock().extracting.contains(&1) {
            thread::yield_now();
        }

        let (tx, rx) = mpsc::channel();
        {
            let content = Arc::clone(&content);
            thread::spawn(move || {
                let mut c = content.sub_channel(0, Some(first_end)).unwrap();
                let bytes = read_all(&mut c);
                drop(c);
                content.reset_cache(0);
                let _ = tx.send((bytes, content.is_extracted(1)));
            });
        }
        let (bytes, second_ready) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(bytes, b"first");
        assert!(!second_ready);

        drop(held);
        assert_eq!(extracting.join().unwrap(), b"second");
        assert_eq!(content.extraction_count(), 2);
    }

    #[test]
    fn test_close_drops_archive_and_extractions() {
        let tmp = archive(&[("a.bgv", b"payload")]);
        let content = ZipContent::open(tmp.path()).unwrap();
        let mut channel = content.open_stream().unwrap();
        let mut two = [0u8; 2];
        channel.read_exact(&mut two).unwrap();
        let path = content.extracted_path(0).unwrap();

        content.close().unwrap();
        assert!(!content.archive_open());
        assert!(!path.exists());
        assert!(channel.read(&mut two).is_err());
    }
}
