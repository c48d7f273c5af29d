//! Binary patch model: ordered, non-overlapping byte-range replacements
//! against an original file, with a compact wire format and an apply
//! algorithm that picks between in-place overwrite and a full rewrite
//! through an atomically-committed temporary file.
//!
//! ## Wire format
//!
//! Big-endian throughout: `{version: u32 = 1, count: u32}`, then `count`
//! fixed records `{offset: i64, old_size: u32, new_size: u32}`, then the
//! concatenation of every operation's replacement bytes in order.

use byteorder::{BigEndian, ReadBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// Content type identifier for serialized patches.
pub const MIME_TYPE: &str = "application/x-binary-patch";

const VERSION: u32 = 1;

/// One byte-range replacement: remove `old_size` bytes at `offset`,
/// insert `data` (`new_size == data.len()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOperation {
    pub offset: u64,
    pub old_size: u32,
    pub data: Vec<u8>,
}

impl PatchOperation {
    pub fn new_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// End of the removed range in the original file.
    fn old_end(&self) -> u64 {
        self.offset + self.old_size as u64
    }
}

/// Ordered sequence of non-overlapping patch operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    ops: Vec<PatchOperation>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Record the replacement of `old_size` bytes at `offset` with
    /// `data`.
    ///
    /// Contiguous operations are coalesced when the combined counts stay
    /// within 32-bit bounds. A removal span exceeding 32 bits is split
    /// into pure-removal operations covering the overflow, with the final
    /// operation carrying the payload. Operations must arrive in
    /// non-decreasing, non-overlapping offset order.
    pub fn add(&mut self, offset: u64, old_size: u64, data: Vec<u8>) -> Result<()> {
        if data.len() > u32::MAX as usize {
            return Err(Error::SizeLimit(format!(
                "replacement of {} bytes exceeds the per-operation bound",
                data.len()
            )));
        }

        if let Some(last) = self.ops.last_mut() {
            if offset < last.old_end() {
                return Err(Error::ordering(format!(
                    "operation at offset {offset} overlaps previous operation ending at {}",
                    last.old_end()
                )));
            }
            // Merge with the previous operation when the ranges touch.
            if offset == last.old_end()
                && last.old_size as u64 + old_size <= u32::MAX as u64
                && last.data.len() as u64 + data.len() as u64 <= u32::MAX as u64
            {
                last.old_size += old_size as u32;
                last.data.extend_from_slice(&data);
                return Ok(());
            }
        }

        let mut offset = offset;
        let mut old_size = old_size;
        while old_size > u32::MAX as u64 {
            self.ops.push(PatchOperation {
                offset,
                old_size: u32::MAX,
                data: Vec::new(),
            });
            offset += u32::MAX as u64;
            old_size -= u32::MAX as u64;
        }
        self.ops.push(PatchOperation {
            offset,
            old_size: old_size as u32,
            data,
        });
        Ok(())
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(self.ops.len() as u32).to_be_bytes());
        for op in &self.ops {
            out.extend_from_slice(&(op.offset as i64).to_be_bytes());
            out.extend_from_slice(&op.old_size.to_be_bytes());
            out.extend_from_slice(&(op.new_size()).to_be_bytes());
        }
        for op in &self.ops {
            out.extend_from_slice(&op.data);
        }
        out
    }

    /// Deserialize from the wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let version = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::format("patch header truncated"))?;
        if version != VERSION {
            return Err(Error::format(format!(
                "unsupported patch version {version}"
            )));
        }
        let count = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::format("patch header truncated"))?;

        // Each fixed record is 16 bytes; a count the remaining bytes
        // cannot hold is rejected before any allocation sized by it.
        let remaining = data.len() as u64 - cursor.position();
        if count as u64 * 16 > remaining {
            return Err(Error::format(format!(
                "patch claims {count} operations but only {remaining} bytes follow"
            )));
        }

        let mut ops = Vec::with_capacity(count as usize);
        let mut sizes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = cursor
                .read_i64::<BigEndian>()
                .map_err(|_| Error::format("patch operation record truncated"))?;
            let old_size = cursor
                .read_u32::<BigEndian>()
                .map_err(|_| Error::format("patch operation record truncated"))?;
            let new_size = cursor
                .read_u32::<BigEndian>()
                .map_err(|_| Error::format("patch operation record truncated"))?;
            if offset < 0 {
                return Err(Error::format(format!(
                    "negative patch operation offset {offset}"
                )));
            }
            ops.push(PatchOperation {
                offset: offset as u64,
                old_size,
                data: Vec::new(),
            });
            sizes.push(new_size);
        }
        for (op, new_size) in ops.iter_mut().zip(sizes) {
            let mut blob = vec![0u8; new_size as usize];
            cursor
                .read_exact(&mut blob)
                .map_err(|_| Error::format("patch replacement bytes truncated"))?;
            op.data = blob;
        }
        Ok(Self { ops })
    }

    /// Apply the patch to `input`, producing `output`.
    ///
    /// When `output` aliases `input` (same underlying regular file with a
    /// single hard link) and every operation is a size-neutral overwrite
    /// (the last may resize only when its removed range ends exactly at
    /// the current file end), the patch is applied in place. Everything
    /// else goes through a full rewrite into a temporary file in the
    /// output's directory, atomically renamed into place on success.
    ///
    /// In-place application is not journaled: an I/O failure mid-way can
    /// leave the file partially patched (all ranges are size-compatible
    /// overwrites, so the file stays structurally addressable). The
    /// rewrite path never leaves a partial destination visible.
    pub fn apply(&self, input: &Path, output: &Path) -> Result<()> {
        if self.can_apply_in_place(input, output) {
            debug!(?input, "applying patch in place");
            self.apply_in_place(input)
        } else {
            debug!(?input, ?output, "applying patch via rewrite");
            self.apply_rewrite(input, output)
        }
    }

    /// In-place is only sound when the target is the same underlying
    /// file (regular, single hard link) and no operation shifts bytes
    /// that follow it. Any failure to establish that falls back to the
    /// rewrite path.
    fn can_apply_in_place(&self, input: &Path, output: &Path) -> bool {
        let Ok(len) = same_single_file(input, output) else {
            return false;
        };
        let Some((last, rest)) = self.ops.split_last() else {
            return true;
        };
        if rest
            .iter()
            .any(|op| op.old_size != op.new_size())
        {
            return false;
        }
        // The final operation may change size only as a trailing
        // truncate-or-extend.
        last.old_size == last.new_size() || last.old_end() == len
    }

    fn apply_in_place(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let orig_len = file.metadata()?.len();
        for op in &self.ops {
            write_all_at(&file, &op.data, op.offset)?;
        }
        let new_len = match self.ops.last() {
            Some(last) if last.old_size != last.new_size() => {
                last.offset + last.new_size() as u64
            }
            _ => orig_len,
        };
        if new_len != orig_len {
            file.set_len(new_len)?;
        }
        Ok(())
    }

    fn apply_rewrite(&self, input: &Path, output: &Path) -> Result<()> {
        let mut src = File::open(input)?;
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Temp file in the destination directory; dropped (and removed)
        // on any error path before the commit below.
        let mut tmp = NamedTempFile::new_in(dir)?;

        let mut pos = 0u64;
        for op in &self.ops {
            if op.offset < pos {
                return Err(Error::ordering(format!(
                    "patch operation at offset {} behind write position {pos}",
                    op.offset
                )));
            }
            let gap = op.offset - pos;
            let copied = io::copy(&mut (&mut src).take(gap), tmp.as_file_mut())?;
            if copied != gap {
                return Err(Error::format(format!(
                    "input ended {} bytes short of patch offset {}",
                    gap - copied,
                    op.offset
                )));
            }
            src.seek(SeekFrom::Current(op.old_size as i64))?;
            tmp.as_file_mut().write_all(&op.data)?;
            pos = op.old_end();
        }
        io::copy(&mut src, tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;

        tmp.persist(output).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Check that two paths name the same underlying regular file with a
/// single hard link, returning its length.
#[cfg(unix)]
fn same_single_file(a: &Path, b: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    let ma = fs::metadata(a)?;
    let mb = fs::metadata(b)?;
    let same = ma.file_type().is_file()
        && ma.dev() == mb.dev()
        && ma.ino() == mb.ino()
        && ma.nlink() == 1;
    if same {
        Ok(ma.len())
    } else {
        Err(io::Error::other("not the same single-linked regular file"))
    }
}

#[cfg(not(unix))]
fn same_single_file(_a: &Path, _b: &Path) -> io::Result<u64> {
    // No portable aliasing test; always rewrite.
    Err(io::Error::other("in-place aliasing test unsupported"))
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_all_at(mut file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_contiguous_operations() {
        let mut patch = PatchSet::new();
        patch.add(10, 4, b"AAAA".to_vec()).unwrap();
        patch.add(14, 2, b"BB".to_vec()).unwrap();
        assert_eq!(patch.operations().len(), 1);
        let op = &patch.operations()[0];
        assert_eq!(op.offset, 10);
        assert_eq!(op.old_size, 6);
        assert_eq!(op.data, b"AAAABB");
    }

    #[test]
    fn splits_oversized_removal() {
        let mut patch = PatchSet::new();
        let huge = u32::MAX as u64 + 100;
        patch.add(0, huge, b"tail".to_vec()).unwrap();
        let ops = patch.operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].old_size, u32::MAX);
        assert!(ops[0].data.is_empty());
        assert_eq!(ops[1].offset, u32::MAX as u64);
        assert_eq!(ops[1].old_size, 100);
        assert_eq!(ops[1].data, b"tail");
    }

    #[test]
    fn rejects_overlapping_operations() {
        let mut patch = PatchSet::new();
        patch.add(10, 10, Vec::new()).unwrap();
        let err = patch.add(15, 1, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Ordering(_)));
    }

    #[test]
    fn wire_round_trip() {
        let mut patch = PatchSet::new();
        patch.add(5, 3, b"xyz".to_vec()).unwrap();
        patch.add(100, 0, b"inserted".to_vec()).unwrap();
        patch.add(200, 50, Vec::new()).unwrap();
        let bytes = patch.to_bytes();
        let back = PatchSet::from_bytes(&bytes).unwrap();
        assert_eq!(patch, back);
    }

    #[test]
    fn rejects_count_exceeding_patch_length() {
        // Header only: a huge declared count with no record bytes behind it.
        let bytes = [0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF];
        let err = PatchSet::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "got {err:?}");
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = PatchSet::new().to_bytes();
        bytes[3] = 2;
        let err = PatchSet::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
