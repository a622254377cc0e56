//! Error Types
//!
//! One error enum for the whole crate. Errors are `Clone` so that a single
//! failed completion can be handed to every waiter on the same handle.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Message carried by `io::Error`s raised from closed content cursors.
pub(crate) const CONTENT_CLOSED: &str = "content closed";

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Transport failure from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("content closed")]
    ContentClosed,

    #[error("archive error: {0}")]
    Archive(String),

    /// The stream ended. Never escapes a parse: open regions are closed instead.
    #[error("end of stream at offset {offset}")]
    EndOfStream { offset: u64 },

    #[error("protocol error at offset {offset}: {message}")]
    Protocol { offset: u64, message: String },

    #[error("unsupported dump version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("constant pool entry {index} missing at offset {offset}")]
    PoolMissing { index: u16, offset: u64 },

    #[error("constant pool entry {index} inconsistent: {detail}")]
    PoolConsistency { index: u16, detail: String },

    #[error("load cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn protocol(offset: u64, message: impl Into<String>) -> Self {
        Error::Protocol {
            offset,
            message: message.into(),
        }
    }

    /// Benign end of input, as opposed to a real failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream { .. })
    }

    /// Failure of the byte source rather than of the data it delivered.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ContentClosed | Error::Archive(_))
    }

    /// Convert an I/O error raised at `offset`.
    pub(crate) fn from_io(err: io::Error, offset: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::EndOfStream { offset };
        }
        Error::from(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotConnected
            && err.get_ref().map(|e| e.to_string()).as_deref() == Some(CONTENT_CLOSED)
        {
            return Error::ContentClosed;
        }
        Error::Io(Arc::new(err))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::from(e),
            other => Error::Archive(other.to_string()),
        }
    }
}

/// The `io::Error` returned by reads on a closed content.
pub(crate) fn closed_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, CONTENT_CLOSED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_io_maps_to_content_closed() {
        let err = Error::from(closed_io_error());
        assert!(matches!(err, Error::ContentClosed));
        assert!(err.is_transport());
    }

    #[test]
    fn test_unexpected_eof_is_benign() {
        let err = Error::from_io(io::Error::from(io::ErrorKind::UnexpectedEof), 42);
        assert!(err.is_end_of_stream());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_other_io_is_transport() {
        let err = Error::from_io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"), 7);
        assert!(err.is_transport());
        assert!(err.to_string().contains("reset"));
    }
}
