use std::sync::Arc;

use zipmend::{ZipDirectory, ZipEntry};

/// Build a complete archive in memory: entries in order, then the
/// central directory and end records.
pub fn build_archive(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut dir = ZipDirectory::empty(Arc::new(Vec::<u8>::new()));
    for (name, content, deflate) in files {
        let entry = ZipEntry::new_into(
            &mut data,
            dir.next_offset(),
            name.as_bytes(),
            &[],
            content,
            *deflate,
        )
        .unwrap();
        dir.append(entry).unwrap();
    }
    dir.serialize(&mut data).unwrap();
    data
}

pub fn parse(data: &[u8]) -> ZipDirectory {
    ZipDirectory::read(Arc::new(data.to_vec())).unwrap()
}
