//! Error taxonomy for archive parsing, serialization, and patch application.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing/invalid signatures, malformed ZIP64 overrides, short reads.
    /// Fatal to the current operation; never retried.
    #[error("invalid archive format: {0}")]
    Format(String),

    /// A value would overflow a wire-format field even after ZIP64 splitting.
    #[error("value too large for format field: {0}")]
    SizeLimit(String),

    /// Non-monotonic patch operations or a backwards read on a forward-only
    /// source. Indicates caller misuse rather than bad input.
    #[error("out-of-order operation: {0}")]
    Ordering(String),

    /// Compression method other than store or deflate.
    #[error("unsupported compression method {method} in entry {name:?}")]
    UnsupportedMethod { name: String, method: u16 },

    /// Decompressed data did not match the declared CRC-32.
    #[error("CRC-32 mismatch in entry {name:?}: expected {expected:#010x}, got {actual:#010x}")]
    Checksum {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn ordering(msg: impl Into<String>) -> Self {
        Error::Ordering(msg.into())
    }

    /// Recover a crate error carried through a `std::io::Error` by a
    /// `Read` implementation.
    pub fn from_stream(err: std::io::Error) -> Error {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) => Error::Io(err),
        }
    }
}
