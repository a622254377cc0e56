//! Network backend
//!
//! Bytes from a live source are pulled once, in order, and appended to a
//! spill file. Cursors read received ranges back from the spill file. A
//! cursor that reaches the live tail pulls the next chunk itself, or waits
//! on the condition variable while another cursor is pulling.
//!
//! A delivery limit freezes the producer at a given offset until it is
//! lifted; tests use it to observe a document mid-stream.

use super::{Channel, Content, ReadChannel};
use crate::config::LoadConfig;
use crate::error::{closed_io_error, Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempPath;

type Source = Box<dyn Read + Send>;

struct NetState {
    source: Option<Source>,
    writer: Option<File>,
    spill: Option<TempPath>,
    received: u64,
    pulling: bool,
    finished: bool,
    failure: Option<(io::ErrorKind, String)>,
    limit: Option<u64>,
    parked: usize,
}

struct NetShared {
    description: String,
    chunk: usize,
    spill_path: PathBuf,
    closed: AtomicBool,
    state: Mutex<NetState>,
    cond: Condvar,
}

pub struct NetworkContent {
    shared: Arc<NetShared>,
}

impl NetworkContent {
    pub fn new(source: impl Read + Send + 'static) -> Result<Self> {
        Self::with_config("network stream", source, &LoadConfig::default())
    }

    pub fn with_config(
        description: impl Into<String>,
        source: impl Read + Send + 'static,
        config: &LoadConfig,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("graphdump-spill-");
        let spill = match &config.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (writer, spill) = spill.into_parts();
        let spill_path = spill.to_path_buf();

        Ok(NetworkContent {
            shared: Arc::new(NetShared {
                description: description.into(),
                chunk: config.network_buffer_size.max(1),
                spill_path,
                closed: AtomicBool::new(false),
                state: Mutex::new(NetState {
                    source: Some(Box::new(source)),
                    writer: Some(writer),
                    spill: Some(spill),
                    received: 0,
                    pulling: false,
                    finished: false,
                    failure: None,
                    limit: None,
                    parked: 0,
                }),
                cond: Condvar::new(),
            }),
        })
    }

    /// Bytes received from the source so far.
    pub fn received(&self) -> u64 {
        self.shared.lock().received
    }

    /// True once the source reported end of stream.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn spill_path(&self) -> &std::path::Path {
        &self.shared.spill_path
    }

    /// Stop pulling from the source once `offset` bytes have been received.
    pub fn freeze_at(&self, offset: u64) {
        let mut state = self.shared.lock();
        state.limit = Some(offset);
        self.shared.cond.notify_all();
    }

    /// Move the delivery limit forward to `offset`.
    pub fn resume_to(&self, offset: u64) {
        self.freeze_at(offset);
    }

    /// Lift the delivery limit.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        state.limit = None;
        self.shared.cond.notify_all();
    }

    /// Wait until a reader is parked on the delivery limit.
    ///
    /// Returns false if the source ended, failed or the timeout expired first.
    pub fn wait_frozen(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            let at_limit = state.limit.is_some_and(|limit| state.received >= limit);
            if at_limit && state.parked > 0 {
                return true;
            }
            if state.finished || state.failure.is_some() || self.is_closed() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(p) => p.into_inner().0,
            };
        }
    }
}

impl NetShared {
    fn lock(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, NetState>) -> MutexGuard<'a, NetState> {
        self.cond.wait(guard).unwrap_or_else(|p| p.into_inner())
    }

    /// Block until `pos` is readable from the spill file.
    ///
    /// Returns the number of received bytes, or `None` at end of stream.
    fn await_bytes(&self, pos: u64) -> io::Result<Option<u64>> {
        let mut state = self.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(closed_io_error());
            }
            if pos < state.received {
                return Ok(Some(state.received));
            }
            if let Some((kind, message)) = &state.failure {
                return Err(io::Error::new(*kind, message.clone()));
            }
            if state.finished {
                return Ok(None);
            }
            if state.pulling {
                state = self.wait(state);
                continue;
            }
            let allowance = match state.limit {
                Some(limit) if state.received >= limit => {
                    state.parked += 1;
                    self.cond.notify_all();
                    state = self.wait(state);
                    state.parked -= 1;
                    continue;
                }
                Some(limit) => ((limit - state.received) as usize).min(self.chunk),
                None => self.chunk,
            };
            let Some(mut source) = state.source.take() else {
                state.finished = true;
                continue;
            };

            state.pulling = true;
            drop(state);
            let mut chunk = vec![0u8; allowance];
            let result = source.read(&mut chunk);
            state = self.lock();
            state.pulling = false;
            self.cond.notify_all();

            match result {
                Ok(0) => {
                    log::debug!("{}: source finished at {}", self.description, state.received);
                    state.finished = true;
                }
                Ok(n) => {
                    let written = match state.writer.as_mut() {
                        Some(writer) => writer.write_all(&chunk[..n]),
                        None => Err(closed_io_error()),
                    };
                    if let Err(e) = written {
                        state.failure = Some((e.kind(), e.to_string()));
                        return Err(e);
                    }
                    state.received += n as u64;
                    log::trace!("{}: received {} bytes", self.description, state.received);
                    if !self.closed.load(Ordering::Acquire) {
                        state.source = Some(source);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    state.source = Some(source);
                }
                Err(e) => {
                    log::debug!("{}: source failed: {}", self.description, e);
                    state.failure = Some((e.kind(), e.to_string()));
                    return Err(e);
                }
            }
        }
    }
}

impl fmt::Debug for NetworkContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContent")
            .field("description", &self.shared.description)
            .field("spill", &self.shared.spill_path)
            .finish()
    }
}

impl Content for NetworkContent {
    fn description(&self) -> String {
        self.shared.description.clone()
    }

    fn sub_channel(&self, start: u64, end: Option<u64>) -> Result<Channel> {
        if self.is_closed() {
            return Err(Error::ContentClosed);
        }
        Ok(Box::new(NetworkCursor {
            shared: Arc::clone(&self.shared),
            pos: start,
            end,
            spill: None,
        }))
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        let mut state = self.shared.lock();
        state.source = None;
        state.writer = None;
        state.spill = None;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

struct NetworkCursor {
    shared: Arc<NetShared>,
    pos: u64,
    end: Option<u64>,
    /// Spill file handle and the offset it is positioned at.
    spill: Option<(File, u64)>,
}

impl Read for NetworkCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.end.map_or(u64::MAX, |e| e.saturating_sub(self.pos));
        if limit == 0 || buf.is_empty() {
            return Ok(0);
        }
        let Some(received) = self.shared.await_bytes(self.pos)? else {
            return Ok(0);
        };
        let want = (buf.len() as u64).min(limit).min(received - self.pos) as usize;

        if self.spill.is_none() {
            self.spill = Some((File::open(&self.shared.spill_path)?, 0));
        }
        let Some((file, at)) = self.spill.as_mut() else {
            return Ok(0);
        };
        if *at != self.pos {
            file.seek(SeekFrom::Start(self.pos))?;
            *at = self.pos;
        }
        let read = file.read(&mut buf[..want])?;
        *at += read as u64;
        self.pos += read as u64;
        Ok(read)
    }
}

impl ReadChannel for NetworkCursor {
    fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::thread;

    /// Blocking source fed through a channel, like a socket.
    struct Feed {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for Feed {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(bytes) => self.pending = bytes,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn feed() -> (mpsc::Sender<Vec<u8>>, Feed) {
        let (tx, rx) = mpsc::channel();
        (tx, Feed { rx, pending: Vec::new() })
    }

    struct Failing {
        sent: bool,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
            }
            self.sent = true;
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        }
    }

    #[test]
    fn test_tail_reader_blocks_until_bytes_arrive() {
        let (tx, source) = feed();
        let content = NetworkContent::new(source).unwrap();
        let mut channel = content.sub_channel(2, Some(6)).unwrap();
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            channel.read_to_end(&mut buf).unwrap();
            buf
        });
        tx.send(b"01".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(20));
        tx.send(b"2345678".to_vec()).unwrap();
        assert_eq!(reader.join().unwrap(), b"2345");
    }

    #[test]
    fn test_received_range_reads_from_spill() {
        let content = NetworkContent::new(Cursor::new(b"hello world".to_vec())).unwrap();
        let mut all = Vec::new();
        content.open_stream().unwrap().read_to_end(&mut all).unwrap();
        assert_eq!(all, b"hello world");
        assert!(content.is_finished());

        let mut middle = Vec::new();
        content
            .sub_channel(6, Some(9))
            .unwrap()
            .read_to_end(&mut middle)
            .unwrap();
        assert_eq!(middle, b"wor");
    }

    #[test]
    fn test_freeze_and_resume() {
        let config = LoadConfig::default().with_network_buffer_size(8);
        let data: Vec<u8> = (0..100u8).collect();
        let content = Arc::new(
            NetworkContent::with_config("test", Cursor::new(data.clone()), &config).unwrap(),
        );
        content.freeze_at(20);
        let mut channel = content.open_stream().unwrap();
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            channel.read_to_end(&mut buf).unwrap();
            buf
        });
        assert!(content.wait_frozen(Duration::from_secs(5)));
        assert_eq!(content.received(), 20);
        content.resume();
        assert_eq!(reader.join().unwrap(), data);
    }

    #[test]
    fn test_source_error_reaches_every_tail_reader() {
        let content = NetworkContent::new(Failing { sent: false }).unwrap();
        let mut first = content.open_stream().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(first.read(&mut buf).unwrap(), 3);
        let err = first.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        let mut second = content.sub_channel(3, None).unwrap();
        let err = second.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        // Bytes received before the failure stay readable.
        let mut head = content.sub_channel(0, Some(3)).unwrap();
        assert_eq!(head.read(&mut buf).unwrap(), 3);
    }

    #[test]
    fn test_close_wakes_blocked_readers() {
        let (tx, source) = feed();
        let content = Arc::new(NetworkContent::new(source).unwrap());
        content.freeze_at(0);
        let mut channel = content.open_stream().unwrap();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 4];
            channel.read(&mut buf)
        });
        assert!(content.wait_frozen(Duration::from_secs(5)));
        let spill = content.spill_path().to_path_buf();
        content.close().unwrap();
        let err = reader.join().unwrap().unwrap_err();
        assert!(matches!(Error::from(err), Error::ContentClosed));
        assert!(!spill.exists());
        drop(tx);
    }
}
