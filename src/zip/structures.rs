use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Error, Result};
use crate::io::ReadAt;

/// 16-bit sentinel meaning "see the ZIP64 record" (entry counts).
pub const SENTINEL16: u16 = 0xFFFF;
/// 32-bit sentinel meaning "see the ZIP64 record" (sizes and offsets).
pub const SENTINEL32: u32 = 0xFFFF_FFFF;

/// Extra-field tag of the ZIP64 extended information record.
pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// General-purpose flag bit 3: sizes and CRC live in a trailing data
/// descriptor rather than the local header (streaming writes).
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Minimum reader version for a plain deflate archive.
pub const VERSION_DEFAULT: u16 = 20;
/// Minimum reader version once any ZIP64 structure is present.
pub const VERSION_ZIP64: u16 = 45;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes plus comment
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("missing end-of-central-directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        if data.len() < Self::SIZE + comment_len {
            return Err(Error::format("end-of-central-directory comment truncated"));
        }
        let comment = data[Self::SIZE..Self::SIZE + comment_len].to_vec();

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.comment.len());
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == SENTINEL16
            || self.total_entries == SENTINEL16
            || self.cd_size == SENTINEL32
            || self.cd_offset == SENTINEL32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("missing ZIP64 end-of-directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.disk_with_eocd64.to_le_bytes());
        out.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
        out
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("missing ZIP64 end-of-central-directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Total on-disk length of the record, including signature and the
    /// size field itself (the stored size excludes those 12 bytes).
    /// `None` when the stored size is implausibly large.
    pub fn record_len(&self) -> Option<u64> {
        self.eocd64_size.checked_add(12)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MIN_SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.eocd64_size.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out
    }
}

/// Central Directory File Header (CDFH) fixed part - 46 bytes
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes plus name and extra field
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    /// Read the fixed header at `offset`, then the variable name/extra
    /// fields sized by its length fields.
    pub fn read_from(source: &dyn ReadAt, offset: u64) -> Result<Self> {
        let mut fixed = [0u8; Self::SIZE];
        source.read_exact_at(offset, &mut fixed)?;
        if &fixed[0..4] != Self::SIGNATURE {
            return Err(Error::format(format!(
                "missing local file header signature at offset {offset}"
            )));
        }

        let mut cursor = Cursor::new(&fixed[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let mod_time = cursor.read_u16::<LittleEndian>()?;
        let mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;

        let mut variable = vec![0u8; name_len + extra_len];
        source.read_exact_at(offset + Self::SIZE as u64, &mut variable)?;
        let extra = variable.split_off(name_len);

        Ok(Self {
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name: variable,
            extra,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.name.len() + self.extra.len());
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.extra);
        out
    }

    /// On-disk length: fixed part plus name and extra field.
    pub fn len(&self) -> u64 {
        (Self::SIZE + self.name.len() + self.extra.len()) as u64
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// Data descriptor trailing an entry's compressed data.
///
/// Comes in a 16-byte form with 32-bit sizes and a 24-byte ZIP64 form
/// with 64-bit sizes, both led by the `PK\x07\x08` signature.
#[derive(Debug, Clone, Copy)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub zip64: bool,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";
    pub const SIZE32: usize = 16;
    pub const SIZE64: usize = 24;

    pub fn from_bytes32(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE32 || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("missing data descriptor signature"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()? as u64,
            uncompressed_size: cursor.read_u32::<LittleEndian>()? as u64,
            zip64: false,
        })
    }

    pub fn from_bytes64(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE64 || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("missing data descriptor signature"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u64::<LittleEndian>()?,
            uncompressed_size: cursor.read_u64::<LittleEndian>()?,
            zip64: true,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        out.extend_from_slice(Self::SIGNATURE);
        out.extend_from_slice(&self.crc32.to_le_bytes());
        if self.zip64 {
            out.extend_from_slice(&self.compressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            out.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            out.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
        out
    }

    pub fn len(&self) -> u64 {
        if self.zip64 {
            Self::SIZE64 as u64
        } else {
            Self::SIZE32 as u64
        }
    }
}

/// Resolve ZIP64 overrides for a central-directory entry.
///
/// Fields equal to the 32-bit sentinel are replaced from the ZIP64 extra
/// record, which carries its 64-bit values in fixed order: uncompressed
/// size, compressed size, then local-header offset. Only the fields that
/// are sentinels in the fixed header are present in the record; a record
/// too short for the overrides still needed is a format error, as is the
/// record's outright absence.
pub fn resolve_zip64(
    extra: &[u8],
    uncompressed: &mut u64,
    compressed: &mut u64,
    offset: &mut u64,
) -> Result<()> {
    let need_uncompressed = *uncompressed == SENTINEL32 as u64;
    let need_compressed = *compressed == SENTINEL32 as u64;
    let need_offset = *offset == SENTINEL32 as u64;
    if !(need_uncompressed || need_compressed || need_offset) {
        return Ok(());
    }

    let mut cursor = Cursor::new(extra);
    while cursor.position() + 4 <= extra.len() as u64 {
        let tag = cursor.read_u16::<LittleEndian>()?;
        let field_len = cursor.read_u16::<LittleEndian>()? as u64;
        if tag != ZIP64_EXTRA_TAG {
            cursor.set_position(cursor.position() + field_len);
            continue;
        }

        let mut record = vec![0u8; field_len as usize];
        cursor.read_exact(&mut record).map_err(|_| {
            Error::format("ZIP64 extra record extends past the extra field")
        })?;
        let mut fields = Cursor::new(&record);
        // Fixed order: uncompressed, compressed, offset - as many fields
        // as the record declares.
        if need_uncompressed {
            *uncompressed = fields
                .read_u64::<LittleEndian>()
                .map_err(|_| Error::format("ZIP64 extra record too short for uncompressed size"))?;
        }
        if need_compressed {
            *compressed = fields
                .read_u64::<LittleEndian>()
                .map_err(|_| Error::format("ZIP64 extra record too short for compressed size"))?;
        }
        if need_offset {
            *offset = fields
                .read_u64::<LittleEndian>()
                .map_err(|_| Error::format("ZIP64 extra record too short for header offset"))?;
        }
        return Ok(());
    }

    Err(Error::format(
        "sizes or offset are 0xFFFFFFFF but no ZIP64 extra record is present",
    ))
}

/// Build a ZIP64 extra record carrying all three 64-bit values in the
/// fixed order expected by [`resolve_zip64`].
pub fn build_zip64_extra(uncompressed: u64, compressed: u64, offset: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 24);
    out.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out
}

/// Copy an extra field, dropping any existing ZIP64 record (used before
/// regenerating one with updated values).
pub fn strip_zip64_extra(extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let tag = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let field_len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let end = (pos + 4 + field_len).min(extra.len());
        if tag != ZIP64_EXTRA_TAG {
            out.extend_from_slice(&extra[pos..end]);
        }
        pos = end;
    }
    out
}
