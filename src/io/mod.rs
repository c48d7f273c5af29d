mod forward;
mod local;

pub use forward::ForwardReader;
pub use local::LocalFileReader;

use crate::error::{Error, Result};

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill the buffer completely from the given offset.
    ///
    /// A source that runs out of bytes before the buffer is full is a
    /// truncated archive, reported as a format error.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(Error::format(format!(
                    "unexpected end of data at offset {offset}"
                )));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

/// In-memory byte source, used for freshly-built archive regions and tests.
impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}
