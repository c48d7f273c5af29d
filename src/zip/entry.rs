//! Archive entry model.
//!
//! A [`ZipEntry`] is built from a central-directory record and carries a
//! non-owning handle to the archive's byte source. The local file header
//! and trailing data descriptor are parsed lazily, at most once, on first
//! need; the explicit [`LocalState`] cache keeps those loads out of the
//! read-only accessors.

use byteorder::{LittleEndian, ReadBytesExt};
use digest::Digest;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::borrow::Cow;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Lazy-load state for the local header and data descriptor.
#[derive(Clone)]
enum LocalState {
    /// Only the central-directory record has been seen.
    MetadataOnly,
    /// The local header has been read and validated.
    HeaderLoaded(LocalFileHeader),
    /// Header plus resolved data descriptor (`None` when flag bit 3 is
    /// clear and the entry has no descriptor).
    FullyLoaded(LocalFileHeader, Option<DataDescriptor>),
}

/// One file inside the archive, as described by its central-directory
/// record.
///
/// Sizes and the header offset are held as 64-bit values regardless of
/// whether the wire format stored them directly or through a ZIP64 extra
/// record. The raw serialized central-directory record is retained so an
/// unmodified entry re-serializes byte-exactly.
#[derive(Clone)]
pub struct ZipEntry {
    /// Entry name as stored - not necessarily UTF-8.
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
    pub extra: Vec<u8>,
    pub method: CompressionMethod,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    /// Byte offset of the local header within the archive.
    pub offset: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,

    raw_header: Option<Vec<u8>>,
    source: Arc<dyn ReadAt>,
    source_len: u64,
    local: LocalState,
}

impl ZipEntry {
    /// Parse one central-directory record from `cd` starting at `*pos`,
    /// advancing `*pos` past it.
    ///
    /// The entire serialized record (fixed header, name, extra, comment)
    /// is retained verbatim for byte-exact re-emission.
    pub(crate) fn parse_central(
        cd: &[u8],
        pos: &mut usize,
        source: Arc<dyn ReadAt>,
        source_len: u64,
    ) -> Result<Self> {
        let start = *pos;
        if cd.len() - start < CDFH_MIN_SIZE {
            return Err(Error::format("central directory record truncated"));
        }

        let mut cursor = Cursor::new(&cd[start + 4..]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let mod_time = cursor.read_u16::<LittleEndian>()?;
        let mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut offset = cursor.read_u32::<LittleEndian>()? as u64;

        let end = start + CDFH_MIN_SIZE + name_len + extra_len + comment_len;
        if cd.len() < end {
            return Err(Error::format("central directory record truncated"));
        }
        let name = cd[start + CDFH_MIN_SIZE..start + CDFH_MIN_SIZE + name_len].to_vec();
        let extra =
            cd[start + CDFH_MIN_SIZE + name_len..start + CDFH_MIN_SIZE + name_len + extra_len]
                .to_vec();
        let comment = cd[start + CDFH_MIN_SIZE + name_len + extra_len..end].to_vec();

        resolve_zip64(&extra, &mut uncompressed_size, &mut compressed_size, &mut offset).map_err(
            |e| {
                Error::format(format!(
                    "entry {:?}: {e}",
                    String::from_utf8_lossy(&name)
                ))
            },
        )?;

        let raw_header = cd[start..end].to_vec();
        *pos = end;

        Ok(Self {
            name,
            comment,
            extra,
            method: CompressionMethod::from_u16(method),
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            internal_attrs,
            external_attrs,
            offset,
            version_made_by,
            version_needed,
            flags,
            raw_header: Some(raw_header),
            source,
            source_len,
            local: LocalState::MetadataOnly,
        })
    }

    /// Write a freshly synthesized entry to `out`: local header with flag
    /// bit 3, the (optionally deflated) content, then a trailing data
    /// descriptor. `offset` is the position `out` corresponds to in the
    /// final archive.
    pub fn new_into<W: Write>(
        out: &mut W,
        offset: u64,
        name: &[u8],
        extra: &[u8],
        content: &[u8],
        deflate: bool,
    ) -> Result<Self> {
        if name.len() > u16::MAX as usize || extra.len() > u16::MAX as usize {
            return Err(Error::SizeLimit(format!(
                "entry name or extra field too long ({} / {} bytes)",
                name.len(),
                extra.len()
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(content);
        let crc32 = hasher.finalize();

        let data = if deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(content)?;
            encoder.finish()?
        } else {
            content.to_vec()
        };

        let uncompressed_size = content.len() as u64;
        let compressed_size = data.len() as u64;
        let zip64 = compressed_size >= SENTINEL32 as u64 || uncompressed_size >= SENTINEL32 as u64;
        let method = if deflate {
            CompressionMethod::Deflate
        } else {
            CompressionMethod::Stored
        };
        let version_needed = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

        // Streaming-write shape: sizes and CRC go in the descriptor, the
        // header carries zeros.
        let header = LocalFileHeader {
            version_needed,
            flags: FLAG_DATA_DESCRIPTOR,
            method: method.as_u16(),
            mod_time: 0,
            mod_date: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name: name.to_vec(),
            extra: extra.to_vec(),
        };
        let descriptor = DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
            zip64,
        };

        out.write_all(&header.to_bytes())?;
        out.write_all(&data)?;
        out.write_all(&descriptor.to_bytes())?;

        Ok(Self {
            name: name.to_vec(),
            comment: Vec::new(),
            extra: extra.to_vec(),
            method,
            mod_time: 0,
            mod_date: 0,
            crc32,
            compressed_size,
            uncompressed_size,
            internal_attrs: 0,
            external_attrs: 0,
            offset,
            version_made_by: VERSION_ZIP64,
            version_needed,
            flags: FLAG_DATA_DESCRIPTOR,
            raw_header: None,
            source: Arc::new(Vec::new()),
            source_len: 0,
            local: LocalState::FullyLoaded(header, Some(descriptor)),
        })
    }

    /// Entry name rendered for messages; lossy for non-UTF-8 names.
    pub fn name_string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with(b"/")
    }

    /// Parse modification date to (year, month, day)
    pub fn date(&self) -> (u16, u8, u8) {
        let day = (self.mod_date & 0x1F) as u8;
        let month = ((self.mod_date >> 5) & 0x0F) as u8;
        let year = ((self.mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time(&self) -> (u8, u8, u8) {
        let second = ((self.mod_time & 0x1F) * 2) as u8;
        let minute = ((self.mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Lazily read and cache the local file header at this entry's offset.
    pub fn local_header(&mut self) -> Result<&LocalFileHeader> {
        if let LocalState::MetadataOnly = self.local {
            let header =
                LocalFileHeader::read_from(self.source.as_ref(), self.offset).map_err(|e| {
                    Error::format(format!("entry {:?}: {e}", self.name_string()))
                })?;
            self.local = LocalState::HeaderLoaded(header);
        }
        match &self.local {
            LocalState::HeaderLoaded(h) | LocalState::FullyLoaded(h, _) => Ok(h),
            LocalState::MetadataOnly => unreachable!("local header just loaded"),
        }
    }

    /// Lazily locate and cache the trailing data descriptor, if the local
    /// header's flag bit 3 declares one.
    ///
    /// The descriptor sits immediately after the compressed data; the
    /// compressed size from the central directory remains authoritative
    /// even though the local header lacks it. The 32-bit form is read
    /// first and upgraded to the 64-bit form when the sizes disagree with
    /// the known 64-bit values.
    pub fn data_descriptor(&mut self) -> Result<Option<&DataDescriptor>> {
        if matches!(self.local, LocalState::MetadataOnly | LocalState::HeaderLoaded(_)) {
            let header = self.local_header()?.clone();
            let descriptor = if header.has_data_descriptor() {
                Some(self.read_descriptor(&header)?)
            } else {
                None
            };
            self.local = LocalState::FullyLoaded(header, descriptor);
        }
        match &self.local {
            LocalState::FullyLoaded(_, d) => Ok(d.as_ref()),
            _ => unreachable!("descriptor just resolved"),
        }
    }

    fn read_descriptor(&self, header: &LocalFileHeader) -> Result<DataDescriptor> {
        let desc_offset = self
            .offset
            .checked_add(header.len())
            .and_then(|v| v.checked_add(self.compressed_size))
            .ok_or_else(|| {
                Error::format(format!(
                    "entry {:?}: data descriptor offset overflows",
                    self.name_string()
                ))
            })?;
        let mut buf = [0u8; DataDescriptor::SIZE64];
        let mut short = [0u8; DataDescriptor::SIZE32];
        self.source.read_exact_at(desc_offset, &mut short)?;
        let narrow = DataDescriptor::from_bytes32(&short)
            .map_err(|e| Error::format(format!("entry {:?}: {e}", self.name_string())))?;

        let descriptor = if self.uncompressed_size >= SENTINEL32 as u64
            || narrow.compressed_size != self.compressed_size
            || narrow.uncompressed_size != self.uncompressed_size
        {
            self.source.read_exact_at(desc_offset, &mut buf)?;
            DataDescriptor::from_bytes64(&buf)
                .map_err(|e| Error::format(format!("entry {:?}: {e}", self.name_string())))?
        } else {
            narrow
        };

        if descriptor.compressed_size != self.compressed_size
            || descriptor.uncompressed_size != self.uncompressed_size
        {
            return Err(Error::format(format!(
                "entry {:?}: data descriptor sizes {}/{} disagree with directory sizes {}/{}",
                self.name_string(),
                descriptor.compressed_size,
                descriptor.uncompressed_size,
                self.compressed_size,
                self.uncompressed_size
            )));
        }
        Ok(descriptor)
    }

    /// Total on-disk size: local header + name + extra + data descriptor
    /// (0, 16 or 24 bytes) + compressed data.
    pub fn total_size(&mut self) -> Result<u64> {
        let descriptor_len = self.data_descriptor()?.map_or(0, DataDescriptor::len);
        let header_len = self.local_header()?.len();
        header_len
            .checked_add(self.compressed_size)
            .and_then(|v| v.checked_add(descriptor_len))
            .ok_or_else(|| {
                Error::format(format!(
                    "entry {:?}: on-disk size overflows",
                    self.name_string()
                ))
            })
    }

    /// Offset of the first byte of compressed data.
    pub fn data_offset(&mut self) -> Result<u64> {
        let header_len = self.local_header()?.len();
        Ok(self.offset + header_len)
    }

    /// Open a verifying, decompressing read stream over the entry's data.
    pub fn reader(&mut self) -> Result<EntryReader<'static>> {
        self.reader_inner(None)
    }

    /// Like [`reader`](Self::reader), additionally tee-ing the raw
    /// still-compressed bytes to `tee` as they are consumed.
    pub fn reader_with_tee<'a>(
        &mut self,
        tee: &'a mut (dyn Write + Send),
    ) -> Result<EntryReader<'a>> {
        self.reader_inner(Some(tee))
    }

    fn reader_inner<'a>(
        &mut self,
        tee: Option<&'a mut (dyn Write + Send)>,
    ) -> Result<EntryReader<'a>> {
        let data_offset = self.data_offset()?;
        let section = SectionReader {
            source: self.source.clone(),
            offset: data_offset,
            remaining: self.compressed_size,
            tee,
        };
        let inner: Box<dyn Read + Send + 'a> = match self.method {
            CompressionMethod::Stored => Box::new(section),
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(section)),
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedMethod {
                    name: self.name_string().into_owned(),
                    method,
                });
            }
        };
        Ok(EntryReader {
            inner,
            name: self.name_string().into_owned(),
            expected: self.uncompressed_size,
            produced: 0,
            declared_crc: self.crc32,
            hasher: crc32fast::Hasher::new(),
            verified: false,
        })
    }

    /// Fold the entry's decompressed bytes through a cryptographic hash.
    ///
    /// This is the surface consumed by manifest verification: the caller
    /// picks the algorithm, this entry supplies the verified byte stream.
    pub fn digest<D: Digest>(&mut self) -> Result<Vec<u8>> {
        let mut reader = self.reader()?;
        let mut hasher = D::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(Error::from_stream)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_vec())
    }

    /// Stream the entry's raw on-disk bytes (header through descriptor)
    /// verbatim to `out`, returning the byte count.
    pub fn dump(&mut self, out: &mut dyn Write) -> Result<u64> {
        let total = self.total_size()?;
        let mut remaining = total;
        let mut offset = self.offset;
        let mut buf = [0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            self.source.read_exact_at(offset, &mut buf[..want])?;
            out.write_all(&buf[..want])?;
            offset += want as u64;
            remaining -= want as u64;
        }
        Ok(total)
    }

    /// Serialized central-directory record for this entry: the retained
    /// raw bytes when the entry is unmodified, regenerated otherwise.
    pub fn central_header_bytes(&self) -> Result<Vec<u8>> {
        if let Some(raw) = &self.raw_header {
            return Ok(raw.clone());
        }
        self.generate_central_header()
    }

    /// Drop the retained raw record; called when the entry's offset is
    /// reassigned, since the offset is embedded in the record.
    pub(crate) fn invalidate_raw_header(&mut self) {
        self.raw_header = None;
    }

    /// Minimum reader version this entry requires.
    pub fn reader_version(&self) -> u16 {
        let threshold = if self.needs_zip64() {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        };
        self.version_needed.max(threshold)
    }

    fn needs_zip64(&self) -> bool {
        self.compressed_size >= SENTINEL32 as u64
            || self.uncompressed_size >= SENTINEL32 as u64
            || self.offset >= SENTINEL32 as u64
    }

    fn generate_central_header(&self) -> Result<Vec<u8>> {
        let zip64 = self.needs_zip64();
        let extra = if zip64 {
            let mut extra = build_zip64_extra(
                self.uncompressed_size,
                self.compressed_size,
                self.offset,
            );
            extra.extend_from_slice(&strip_zip64_extra(&self.extra));
            extra
        } else {
            strip_zip64_extra(&self.extra)
        };
        if extra.len() > u16::MAX as usize {
            return Err(Error::SizeLimit(format!(
                "entry {:?}: extra field too long",
                self.name_string()
            )));
        }

        let (compressed, uncompressed, offset) = if zip64 {
            (SENTINEL32, SENTINEL32, SENTINEL32)
        } else {
            (
                self.compressed_size as u32,
                self.uncompressed_size as u32,
                self.offset as u32,
            )
        };

        let mut out = Vec::with_capacity(
            CDFH_MIN_SIZE + self.name.len() + extra.len() + self.comment.len(),
        );
        out.extend_from_slice(CDFH_SIGNATURE);
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&(self.reader_version()).to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(self.method.as_u16()).to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        out.extend_from_slice(&self.internal_attrs.to_le_bytes());
        out.extend_from_slice(&self.external_attrs.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&extra);
        out.extend_from_slice(&self.comment);
        Ok(out)
    }
}

/// `Read` over a fixed byte range of a [`ReadAt`] source, with optional
/// tee of the raw bytes.
struct SectionReader<'a> {
    source: Arc<dyn ReadAt>,
    offset: u64,
    remaining: u64,
    tee: Option<&'a mut (dyn Write + Send)>,
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self
            .source
            .read_at(self.offset, &mut buf[..want])
            .map_err(std::io::Error::other)?;
        if n == 0 {
            return Err(std::io::Error::other(Error::format(format!(
                "unexpected end of data at offset {}",
                self.offset
            ))));
        }
        if let Some(tee) = &mut self.tee {
            tee.write_all(&buf[..n])?;
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Decompressing read stream over one entry's data.
///
/// On exhaustion the stream verifies that exactly the declared number of
/// bytes were produced and, when a non-zero CRC-32 was declared, that the
/// produced bytes match it. Failures surface as `InvalidData`-style
/// `std::io::Error`s wrapping the crate error.
pub struct EntryReader<'a> {
    inner: Box<dyn Read + Send + 'a>,
    name: String,
    expected: u64,
    produced: u64,
    declared_crc: u32,
    hasher: crc32fast::Hasher,
    verified: bool,
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            // Flag only flips on success, so a failed verification is
            // reported again on every subsequent read.
            if !self.verified && !buf.is_empty() {
                self.verify().map_err(std::io::Error::other)?;
                self.verified = true;
            }
            return Ok(0);
        }
        self.produced += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl EntryReader<'_> {
    fn verify(&self) -> Result<()> {
        if self.produced != self.expected {
            return Err(Error::format(format!(
                "entry {:?}: unexpected end of data ({} of {} bytes)",
                self.name, self.produced, self.expected
            )));
        }
        if self.declared_crc != 0 {
            let actual = self.hasher.clone().finalize();
            if actual != self.declared_crc {
                return Err(Error::Checksum {
                    name: self.name.clone(),
                    expected: self.declared_crc,
                    actual,
                });
            }
        }
        Ok(())
    }
}
