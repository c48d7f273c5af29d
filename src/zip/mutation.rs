//! Mutation walker: one pass over an archive's entries with a
//! keep/delete policy, producing the binary patch that realizes the net
//! transformation.
//!
//! The walk threads an explicit builder through the pass instead of
//! mutating shared state: `(original directory, policy)` in, `(patch,
//! new directory)` out. Deleted entries become pure-removal operations
//! over their on-disk ranges; kept entries move unmodified into a fresh
//! directory; new entries and the rewritten directory accumulate in a
//! tail buffer that replaces everything from the original directory
//! offset to end-of-file.

use tracing::debug;

use crate::error::Result;
use crate::patch::PatchSet;

use super::directory::ZipDirectory;
use super::entry::ZipEntry;

/// Policy verdict for one walked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Delete,
}

/// In-progress mutation of an archive.
pub struct Mutation {
    new_dir: ZipDirectory,
    /// Everything appended after the original content region: new
    /// entries' serialized bytes, then the rewritten directory.
    tail: Vec<u8>,
    patch: PatchSet,
    orig_dir_offset: u64,
    orig_size: u64,
}

impl Mutation {
    /// Walk `dir`'s entries in original order, consulting `policy` for
    /// each. Entries the policy deletes are recorded as removals; kept
    /// entries funnel into the fresh directory being built.
    pub fn walk<F>(dir: &mut ZipDirectory, mut policy: F) -> Result<Mutation>
    where
        F: FnMut(&ZipEntry) -> Result<Disposition>,
    {
        let orig_dir_offset = dir.dir_offset;
        let orig_size = dir.size;
        let mut patch = PatchSet::new();
        let mut new_dir = ZipDirectory::empty(dir.source());

        let mut kept = 0usize;
        let mut deleted = 0usize;
        for entry in dir.entries_mut() {
            let total = entry.total_size()?;
            match policy(entry)? {
                Disposition::Keep => {
                    new_dir.append(entry.clone())?;
                    kept += 1;
                }
                Disposition::Delete => {
                    patch.add(entry.offset, total, Vec::new())?;
                    deleted += 1;
                }
            }
        }

        // Non-ZIP bytes between the last entry and the directory (signing
        // blocks) stay in place; the append offset skips over them.
        let content_end = dir.next_file_offset()?;
        if orig_dir_offset > content_end {
            new_dir.reserve(orig_dir_offset - content_end);
        }

        debug!(kept, deleted, "mutation walk complete");
        Ok(Mutation {
            new_dir,
            tail: Vec::new(),
            patch,
            orig_dir_offset,
            orig_size,
        })
    }

    /// Append a new entry (signature block, manifest) after the kept
    /// content. `deflate` selects compression; signature blobs are
    /// typically stored.
    pub fn add_entry(
        &mut self,
        name: &[u8],
        extra: &[u8],
        content: &[u8],
        deflate: bool,
    ) -> Result<()> {
        let offset = self.new_dir.next_offset();
        let entry = ZipEntry::new_into(&mut self.tail, offset, name, extra, content, deflate)?;
        self.new_dir.append(entry)
    }

    /// Serialize the new directory and close out the patch: one final
    /// operation replaces the region from the original directory offset
    /// to end-of-file with the accumulated tail.
    pub fn finish(mut self) -> Result<(PatchSet, ZipDirectory)> {
        self.new_dir.serialize(&mut self.tail)?;
        self.patch
            .add(self.orig_dir_offset, self.orig_size - self.orig_dir_offset, self.tail)?;
        Ok((self.patch, self.new_dir))
    }
}
