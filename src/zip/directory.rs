//! Central directory model.
//!
//! A [`ZipDirectory`] owns the ordered entry list, knows where the
//! directory region begins, and can re-serialize it - reproducing the
//! original bytes exactly when nothing was modified, or regenerating
//! records (with automatic classic/ZIP64 selection) when entries were
//! appended, reassigned, or truncated.
//!
//! ## Parsing strategy
//!
//! ZIP files are read from the end:
//! 1. The classic end-of-central-directory record sits in the fixed tail
//!    region; its signature is mandatory.
//! 2. Sentinel counts/sizes/offsets route through the ZIP64 locator to
//!    the ZIP64 end record, whose 64-bit directory offset is authoritative.
//! 3. The whole region from the directory offset to end-of-file is read
//!    once and iterated record by record.

use digest::Digest;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::io::{ForwardReader, ReadAt};

use super::entry::ZipEntry;
use super::structures::*;

/// Largest archive comment the backward end-record scan accounts for.
const MAX_COMMENT_SIZE: u64 = 65_535;

/// Parsed central directory plus the byte source it came from.
pub struct ZipDirectory {
    entries: Vec<ZipEntry>,
    /// Byte offset where the central directory begins.
    pub dir_offset: u64,
    /// Total archive size in bytes.
    pub size: u64,
    source: Arc<dyn ReadAt>,
    /// Original end records, retained for diffing.
    original_eocd: Option<EndOfCentralDirectory>,
    original_eocd64: Option<Zip64EOCD>,
    /// Raw bytes of the original trailing records (everything between the
    /// last entry record and end of file), re-emitted verbatim while the
    /// directory is unmodified.
    raw_trailer: Option<Vec<u8>>,
    /// Running end-of-content offset used when appending.
    next_offset: u64,
    modified: bool,
    force_zip64: bool,
}

impl std::fmt::Debug for ZipDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipDirectory")
            .field("entries", &self.entries.len())
            .field("dir_offset", &self.dir_offset)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .field("force_zip64", &self.force_zip64)
            .finish_non_exhaustive()
    }
}

impl ZipDirectory {
    /// Build an empty directory, used when constructing output archives.
    pub fn empty(source: Arc<dyn ReadAt>) -> Self {
        Self {
            entries: Vec::new(),
            dir_offset: 0,
            size: 0,
            source,
            original_eocd: None,
            original_eocd64: None,
            raw_trailer: None,
            next_offset: 0,
            modified: true,
            force_zip64: false,
        }
    }

    /// Locate and parse the central directory of an existing archive.
    pub fn read(source: Arc<dyn ReadAt>) -> Result<Self> {
        Self::read_inner(source)
    }

    /// Like [`read`](Self::read), additionally validating that no entry's
    /// on-disk bytes extend into the central directory. Any gap between
    /// the last entry and the directory is non-ZIP trailing data (signing
    /// blocks and the like) which survives a mutation untouched.
    pub fn read_trimmed(source: Arc<dyn ReadAt>) -> Result<Self> {
        let mut dir = Self::read_inner(source)?;
        let end = dir.next_file_offset()?;
        if end > dir.dir_offset {
            return Err(Error::format(format!(
                "entries end at offset {end}, past the central directory at {}",
                dir.dir_offset
            )));
        }
        Ok(dir)
    }

    /// Directory construction over a forward-only stream.
    ///
    /// Reads against the stream must arrive in non-decreasing offset
    /// order; the adapter retains bytes from the first requested offset
    /// onward so the directory region can be revisited.
    pub fn read_stream<R: Read + Send + 'static>(stream: R, size: u64) -> Result<Self> {
        Self::read_inner(Arc::new(ForwardReader::new(stream, size)))
    }

    fn read_inner(source: Arc<dyn ReadAt>) -> Result<Self> {
        let size = source.size();
        let dir_offset = Self::locate(source.as_ref(), size)?;
        debug!(dir_offset, size, "central directory located");

        // One read covers the directory records and the trailing end
        // records (single range request for remote-style sources).
        if dir_offset > size {
            return Err(Error::format(format!(
                "central directory offset {dir_offset} past end of archive ({size} bytes)"
            )));
        }
        let mut region = vec![0u8; (size - dir_offset) as usize];
        source.read_exact_at(dir_offset, &mut region)?;

        let mut entries = Vec::new();
        let mut pos = 0usize;
        while region.len() - pos >= 4 && &region[pos..pos + 4] == CDFH_SIGNATURE {
            let entry = ZipEntry::parse_central(&region, &mut pos, source.clone(), size)?;
            trace!(name = %entry.name_string(), offset = entry.offset, "parsed directory entry");
            entries.push(entry);
        }

        // Trailing records: ZIP64 end + locator when present, then the
        // classic end record.
        let raw_trailer = region[pos..].to_vec();
        let mut original_eocd64 = None;
        if region.len() - pos >= 4 && &region[pos..pos + 4] == Zip64EOCD::SIGNATURE {
            let eocd64 = Zip64EOCD::from_bytes(&region[pos..])?;
            let rec_len = eocd64
                .record_len()
                .filter(|len| *len <= (region.len() - pos) as u64)
                .ok_or_else(|| {
                    Error::format(
                        "ZIP64 end-of-central-directory record extends past end of archive",
                    )
                })?;
            pos += rec_len as usize;
            Zip64EOCDLocator::from_bytes(region.get(pos..).unwrap_or(&[]))?;
            pos += Zip64EOCDLocator::SIZE;
            original_eocd64 = Some(eocd64);
        }
        let original_eocd = EndOfCentralDirectory::from_bytes(region.get(pos..).unwrap_or(&[]))?;

        let declared = if let Some(eocd64) = &original_eocd64 {
            eocd64.total_entries
        } else {
            original_eocd.total_entries as u64
        };
        if declared != entries.len() as u64 {
            debug!(
                declared,
                parsed = entries.len(),
                "entry count in end record disagrees with parsed directory"
            );
        }

        // Appends to a parsed directory land where the old directory
        // region began.
        let next_offset = dir_offset;

        Ok(Self {
            entries,
            dir_offset,
            size,
            source,
            original_eocd: Some(original_eocd),
            original_eocd64,
            raw_trailer: Some(raw_trailer),
            next_offset,
            modified: false,
            force_zip64: false,
        })
    }

    /// Resolve the central directory's start offset: find the classic end
    /// record, then route through the ZIP64 locator when it carries
    /// sentinels.
    fn locate(source: &dyn ReadAt, size: u64) -> Result<u64> {
        let (eocd, eocd_offset) = Self::find_eocd(source, size)?;
        if !eocd.is_zip64() {
            return Ok(eocd.cd_offset as u64);
        }

        // Sentinel values: the ZIP64 locator must sit immediately before
        // the classic record and point at the ZIP64 end record.
        if eocd_offset < Zip64EOCDLocator::SIZE as u64 {
            return Err(Error::format(
                "archive requires ZIP64 but is too small for a locator",
            ));
        }
        let mut loc_buf = [0u8; Zip64EOCDLocator::SIZE];
        source.read_exact_at(eocd_offset - Zip64EOCDLocator::SIZE as u64, &mut loc_buf)?;
        let locator = Zip64EOCDLocator::from_bytes(&loc_buf)?;

        let mut eocd64_buf = [0u8; Zip64EOCD::MIN_SIZE];
        source.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;
        let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;
        Ok(eocd64.cd_offset)
    }

    /// Find the classic end record and its offset. The common case (no
    /// archive comment) is a single read at the fixed tail position; a
    /// comment pushes the record off the tail, so fall back to a bounded
    /// backward scan, accepting a signature only where the declared
    /// comment length reaches end-of-file.
    fn find_eocd(source: &dyn ReadAt, size: u64) -> Result<(EndOfCentralDirectory, u64)> {
        if size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::format(format!(
                "{size} bytes is too small for a ZIP archive"
            )));
        }

        let tail_offset = size - EndOfCentralDirectory::SIZE as u64;
        let mut tail = [0u8; EndOfCentralDirectory::SIZE];
        source.read_exact_at(tail_offset, &mut tail)?;
        if &tail[0..4] == EndOfCentralDirectory::SIGNATURE && tail[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&tail)?, tail_offset));
        }

        let search_len = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
        let search_start = size - search_len;
        let mut buf = vec![0u8; search_len as usize];
        source.read_exact_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(Error::format("missing end-of-central-directory record"))
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ZipEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by its exact (byte-string) name.
    pub fn entry_mut(&mut self, name: &[u8]) -> Option<&mut ZipEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    /// Digest the named entry's decompressed byte stream with the
    /// caller's hash algorithm. The surface consumed by JAR manifest
    /// verification.
    pub fn digest_entry<D: Digest>(&mut self, name: &[u8]) -> Result<Vec<u8>> {
        let entry = self.entry_mut(name).ok_or_else(|| {
            Error::format(format!("no entry named {:?}", String::from_utf8_lossy(name)))
        })?;
        entry.digest::<D>()
    }

    /// Offset immediately after the last entry's on-disk bytes.
    pub fn next_file_offset(&mut self) -> Result<u64> {
        let mut end = 0u64;
        for entry in &mut self.entries {
            let entry_end = entry.offset + entry.total_size()?;
            end = end.max(entry_end);
        }
        Ok(end)
    }

    /// Running append offset for the next entry.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Append an entry at the current end-of-content offset.
    ///
    /// The retained raw directory record is dropped when the offset
    /// actually changes, since the offset is embedded in the record.
    pub fn append(&mut self, mut entry: ZipEntry) -> Result<()> {
        // Resolve the on-disk size against the entry's original offset
        // before reassigning it; the lazy caches fill from the old spot.
        let total = entry.total_size()?;
        if entry.offset != self.next_offset {
            entry.offset = self.next_offset;
            entry.invalidate_raw_header();
        }
        self.next_offset += total;
        self.dir_offset = self.next_offset;
        self.modified = true;
        self.entries.push(entry);
        Ok(())
    }

    /// Advance the append offset past a reserved byte range (non-ZIP data
    /// such as a signing block that stays in place between the entries
    /// and the directory).
    pub fn reserve(&mut self, len: u64) {
        self.next_offset += len;
        self.dir_offset = self.next_offset;
        self.modified = true;
    }

    /// Keep only the first `prefix` entries.
    pub fn truncate(&mut self, prefix: usize) -> Result<()> {
        if prefix > self.entries.len() {
            return Err(Error::format(format!(
                "cannot truncate {} entries to {prefix}",
                self.entries.len()
            )));
        }
        self.entries.truncate(prefix);
        let end = self.next_file_offset()?;
        self.next_offset = end;
        self.dir_offset = end;
        self.modified = true;
        Ok(())
    }

    /// Stream a "first N entries" view of the archive: the entries' raw
    /// on-disk byte ranges to `data_out` and a directory reflecting only
    /// those entries to `dir_out`. Used to produce the state of an
    /// archive before a signature block was appended.
    pub fn dump_prefix(
        &mut self,
        prefix: usize,
        data_out: &mut dyn Write,
        dir_out: &mut dyn Write,
    ) -> Result<()> {
        if prefix > self.entries.len() {
            return Err(Error::format(format!(
                "cannot dump {prefix} of {} entries",
                self.entries.len()
            )));
        }
        let mut view = ZipDirectory::empty(self.source.clone());
        for entry in &mut self.entries[..prefix] {
            entry.dump(data_out)?;
            view.append(entry.clone())?;
        }
        view.serialize(dir_out)?;
        Ok(())
    }

    /// Force ZIP64 end records regardless of thresholds.
    pub fn force_zip64(&mut self) {
        self.force_zip64 = true;
        self.modified = true;
    }

    /// Serialize the directory and its end records to `out`, returning
    /// the byte count written.
    ///
    /// Unmodified directories re-emit their original bytes exactly. A
    /// modified directory regenerates records entry by entry (raw blobs
    /// still serve entries whose offsets never moved) and selects the
    /// classic or ZIP64 end-record shape from the entry count, directory
    /// size, and directory offset.
    pub fn serialize(&mut self, out: &mut dyn Write) -> Result<u64> {
        if !self.modified {
            if let Some(raw) = &self.raw_trailer {
                let mut written = 0u64;
                for entry in &self.entries {
                    let blob = entry.central_header_bytes()?;
                    out.write_all(&blob)?;
                    written += blob.len() as u64;
                }
                out.write_all(raw)?;
                return Ok(written + raw.len() as u64);
            }
        }

        let mut version_needed = VERSION_DEFAULT;
        let mut dir_bytes = Vec::new();
        for entry in &self.entries {
            version_needed = version_needed.max(entry.reader_version());
            dir_bytes.extend_from_slice(&entry.central_header_bytes()?);
        }

        let count = self.entries.len() as u64;
        let dir_size = dir_bytes.len() as u64;
        let need_zip64 = self.force_zip64
            || count >= SENTINEL16 as u64
            || dir_size >= SENTINEL32 as u64
            || self.dir_offset >= SENTINEL32 as u64;

        debug!(
            count,
            dir_size,
            dir_offset = self.dir_offset,
            zip64 = need_zip64,
            "serializing central directory"
        );

        out.write_all(&dir_bytes)?;
        let mut written = dir_size;

        if need_zip64 {
            let version_needed = version_needed.max(VERSION_ZIP64);
            let eocd64 = Zip64EOCD {
                eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
                version_made_by: version_needed,
                version_needed,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count,
                total_entries: count,
                cd_size: dir_size,
                cd_offset: self.dir_offset,
            };
            let locator = Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: self.dir_offset + dir_size,
                total_disks: 1,
            };
            let eocd = EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: SENTINEL16,
                total_entries: SENTINEL16,
                cd_size: SENTINEL32,
                cd_offset: SENTINEL32,
                comment: Vec::new(),
            };
            for bytes in [eocd64.to_bytes(), locator.to_bytes(), eocd.to_bytes()] {
                out.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
        } else {
            let eocd = EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count as u16,
                total_entries: count as u16,
                cd_size: dir_size as u32,
                cd_offset: self.dir_offset as u32,
                comment: Vec::new(),
            };
            let bytes = eocd.to_bytes();
            out.write_all(&bytes)?;
            written += bytes.len() as u64;
        }
        Ok(written)
    }

    /// The end records as originally parsed, for diffing.
    pub fn original_records(&self) -> (Option<&EndOfCentralDirectory>, Option<&Zip64EOCD>) {
        (self.original_eocd.as_ref(), self.original_eocd64.as_ref())
    }

    pub(crate) fn source(&self) -> Arc<dyn ReadAt> {
        self.source.clone()
    }
}
