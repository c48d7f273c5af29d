//! # zipmend
//!
//! Structural editor for ZIP-family archives (including JARs), built for
//! code-signing pipelines: read an archive's central directory, insert,
//! delete or replace entries - typically signature blocks and manifests -
//! without recompressing anything untouched, and emit either a rewritten
//! archive or a compact binary patch to apply later.
//!
//! ## Features
//!
//! - Bit-exact parsing and re-emission of the central directory,
//!   end-of-directory chain, and ZIP64 structures
//! - Lazy, cached local-header and data-descriptor access per entry
//! - Verified (length + CRC-32) decompressing entry reads and digests
//! - Binary patches with in-place and atomic-rewrite application
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zipmend::{Disposition, LocalFileReader, Mutation, ZipDirectory};
//!
//! fn main() -> zipmend::Result<()> {
//!     let reader = Arc::new(LocalFileReader::open(Path::new("app.jar"))?);
//!     let mut dir = ZipDirectory::read(reader)?;
//!
//!     // Drop an old signature block and insert a new one.
//!     let mut mutation = Mutation::walk(&mut dir, |entry| {
//!         Ok(if entry.name == b"META-INF/SIG.RSA" {
//!             Disposition::Delete
//!         } else {
//!             Disposition::Keep
//!         })
//!     })?;
//!     mutation.add_entry(b"META-INF/SIG.RSA", &[], b"...", false)?;
//!     let (patch, _new_dir) = mutation.finish()?;
//!
//!     patch.apply(Path::new("app.jar"), Path::new("app.jar"))?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod patch;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{ForwardReader, LocalFileReader, ReadAt};
pub use patch::{MIME_TYPE, PatchOperation, PatchSet};
pub use zip::{CompressionMethod, Disposition, Mutation, ZipDirectory, ZipEntry};
