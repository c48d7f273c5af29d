//! ZIP archive structural model.
//!
//! This module implements the subset of the ZIP/ZIP64 format needed to
//! surgically edit archives without recompressing untouched entries:
//!
//! - [`structures`]: wire records (end-of-directory chain, local header,
//!   data descriptor, ZIP64 extra field)
//! - [`entry`]: per-entry metadata with lazy local-header parsing and
//!   verified decompressing reads
//! - [`directory`]: the central directory - locate, parse, append,
//!   truncate, re-serialize with automatic classic/ZIP64 selection
//! - [`mutation`]: a keep/delete/insert walk producing a binary patch
//!
//! ## Format notes
//!
//! A ZIP file is read from the end: the classic end-of-central-directory
//! record is located first, routed through the ZIP64 locator when its
//! fields carry sentinels, and the directory region is then read in one
//! request - suitable for range-request style sources.
//!
//! Only the store and deflate methods are supported for entry reads;
//! unmodified entries are re-emitted from their raw bytes and are never
//! re-encoded.

pub mod directory;
pub mod entry;
pub mod mutation;
pub mod structures;

pub use directory::ZipDirectory;
pub use entry::{EntryReader, ZipEntry};
pub use mutation::{Disposition, Mutation};
pub use structures::CompressionMethod;
