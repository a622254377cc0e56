//! Buffered byte stream
//!
//! Reads from a content cursor through an internal buffer and decodes the
//! big-endian primitives the binary reader needs. Tracks the absolute
//! offset of every byte so region marks can be recorded.
//!
//! Length-prefixed blocks are checked before they are buffered: a length
//! past the configured maximum, or past the known end of the input, is a
//! protocol error rather than a reason to read the rest of the content.

use crate::config::{DEFAULT_MAX_BLOCK_LEN, DEFAULT_READ_BUFFER_SIZE};
use crate::content::Channel;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use std::io::Read;
use std::sync::Arc;

pub struct ByteStream {
    channel: Channel,
    buffer: Vec<u8>,
    pos: usize,
    end: usize,
    eof: bool,
    /// Absolute offset of `buffer[0]`.
    base: u64,
    max_block: usize,
    /// Absolute end of the input, when known.
    limit: Option<u64>,
}

impl ByteStream {
    pub fn new(channel: Channel) -> Self {
        Self::with_capacity(channel, DEFAULT_READ_BUFFER_SIZE)
    }

    pub fn with_capacity(channel: Channel, capacity: usize) -> Self {
        let base = channel.position();
        ByteStream {
            channel,
            buffer: vec![0u8; capacity.max(16)],
            pos: 0,
            end: 0,
            eof: false,
            base,
            max_block: DEFAULT_MAX_BLOCK_LEN,
            limit: None,
        }
    }

    /// Reject blocks longer than `max_block` or reaching past `limit`.
    pub fn bounded(mut self, max_block: usize, limit: Option<u64>) -> Self {
        self.max_block = max_block;
        self.limit = limit;
        self
    }

    /// Absolute offset of the next unread byte.
    #[inline]
    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    #[inline]
    fn available(&self) -> usize {
        self.end - self.pos
    }

    /// Read more bytes from the channel. Returns false at end of input.
    fn fill_buffer(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        // Compact: move remaining data to start
        if self.pos > 0 {
            let remaining = self.available();
            if remaining > 0 {
                self.buffer.copy_within(self.pos..self.end, 0);
            }
            self.base += self.pos as u64;
            self.end = remaining;
            self.pos = 0;
        }
        if self.end == self.buffer.len() {
            let grown = self.buffer.len() * 2;
            self.buffer.resize(grown, 0);
        }

        let offset = self.position() + self.available() as u64;
        let read = self
            .channel
            .read(&mut self.buffer[self.end..])
            .map_err(|e| Error::from_io(e, offset))?;
        if read == 0 {
            self.eof = true;
            Ok(false)
        } else {
            self.end += read;
            Ok(true)
        }
    }

    /// Make `n` bytes available or fail with `EndOfStream`.
    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.available() < n {
            if !self.fill_buffer()? {
                return Err(Error::EndOfStream {
                    offset: self.position() + self.available() as u64,
                });
            }
        }
        Ok(())
    }

    /// Next byte, or `None` if the input ends cleanly here.
    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.available() == 0 && !self.fill_buffer()? {
            return Ok(None);
        }
        let b = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.buffer[start..start + n])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(BigEndian::read_f64(self.take(8)?))
    }

    /// Length-prefixed (`i32`) byte block.
    pub fn read_block(&mut self) -> Result<Vec<u8>> {
        let at = self.position();
        let len = self.read_i32()?;
        if len < 0 {
            return Err(Error::protocol(at, format!("negative length {}", len)));
        }
        let len = len as usize;
        let past_limit = self
            .limit
            .is_some_and(|limit| self.position() + len as u64 > limit);
        if len > self.max_block || past_limit {
            return Err(Error::protocol(at, format!("bad length {}", len)));
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Length-prefixed (`i32`) UTF-8 string.
    pub fn read_string(&mut self) -> Result<Arc<str>> {
        let at = self.position();
        let bytes = self.read_block()?;
        String::from_utf8(bytes)
            .map(Arc::from)
            .map_err(|_| Error::protocol(at, "string is not valid UTF-8"))
    }

    pub fn read_exact_bytes(&mut self, n: usize) -> Result<&[u8]> {
        self.take(n)
    }

    /// Move forward to absolute offset `target`.
    pub fn skip_to(&mut self, target: u64) -> Result<()> {
        let here = self.position();
        if target < here {
            return Err(Error::protocol(
                here,
                format!("cannot skip backwards to {}", target),
            ));
        }
        let distance = target - here;
        if distance <= self.available() as u64 {
            self.pos += distance as usize;
            return Ok(());
        }
        let beyond_buffer = distance - self.available() as u64;
        let buffered_end = self.base + self.end as u64;
        let skipped = self
            .channel
            .skip(beyond_buffer)
            .map_err(|e| Error::from_io(e, buffered_end))?;
        self.base = buffered_end + skipped;
        self.pos = 0;
        self.end = 0;
        if skipped < beyond_buffer {
            self.eof = true;
            return Err(Error::EndOfStream { offset: self.base });
        }
        log::trace!("skipped to {}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ReadChannel;
    use std::io::{self, Cursor, Read};

    struct Slow {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for Slow {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // One byte at a time, like a trickling socket.
            let n = buf.len().min(1);
            self.inner.read(&mut buf[..n])
        }
    }

    impl ReadChannel for Slow {
        fn position(&self) -> u64 {
            self.inner.position()
        }
    }

    fn stream(bytes: &[u8]) -> ByteStream {
        ByteStream::with_capacity(
            Box::new(Slow {
                inner: Cursor::new(bytes.to_vec()),
            }),
            16,
        )
    }

    #[test]
    fn test_primitives() {
        let mut bytes = vec![0x01, 0x00, 0x02];
        bytes.extend_from_slice(&(-5i32).to_be_bytes());
        bytes.extend_from_slice(&1.5f64.to_be_bytes());
        let mut s = stream(&bytes);
        assert_eq!(s.read_u8().unwrap(), 1);
        assert_eq!(s.read_u16().unwrap(), 2);
        assert_eq!(s.read_i32().unwrap(), -5);
        assert_eq!(s.read_f64().unwrap(), 1.5);
        assert_eq!(s.position(), 15);
        assert_eq!(s.next_byte().unwrap(), None);
    }

    #[test]
    fn test_long_string_grows_buffer() {
        let text = "x".repeat(100);
        let mut bytes = (text.len() as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(text.as_bytes());
        let mut s = stream(&bytes);
        assert_eq!(&*s.read_string().unwrap(), text);
    }

    #[test]
    fn test_oversized_block_is_rejected() {
        let mut bytes = i32::MAX.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"tail");
        let mut s = stream(&bytes).bounded(1024, None);
        let err = s.read_block().unwrap_err();
        assert!(matches!(err, Error::Protocol { offset: 0, .. }), "{:?}", err);

        // Within the maximum but past the end of the region.
        let mut bytes = 100i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[b'x'; 10]);
        let mut s = stream(&bytes).bounded(1024, Some(14));
        assert!(matches!(s.read_block(), Err(Error::Protocol { .. })));

        let mut bytes = 3i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut s = stream(&bytes).bounded(1024, Some(7));
        assert_eq!(s.read_block().unwrap(), b"abc");
    }

    #[test]
    fn test_truncated_value_is_end_of_stream() {
        let mut s = stream(&[0, 0, 0]);
        assert!(matches!(s.read_i32(), Err(Error::EndOfStream { .. })));
    }

    #[test]
    fn test_skip_to() {
        let bytes: Vec<u8> = (0..64u8).collect();
        let mut s = stream(&bytes);
        assert_eq!(s.read_u8().unwrap(), 0);
        s.skip_to(3).unwrap();
        assert_eq!(s.read_u8().unwrap(), 3);
        s.skip_to(40).unwrap();
        assert_eq!(s.position(), 40);
        assert_eq!(s.read_u8().unwrap(), 40);
        assert!(s.skip_to(10).is_err());
        assert!(matches!(s.skip_to(100), Err(Error::EndOfStream { .. })));
    }
}
