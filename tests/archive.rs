mod common;

use rstest::rstest;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::Arc;

use common::{build_archive, parse};
use zipmend::zip::structures::{EndOfCentralDirectory, Zip64EOCD, Zip64EOCDLocator};
use zipmend::{Error, ZipDirectory};

#[test]
fn lists_entries_in_order() {
    let data = build_archive(&[
        ("a.txt", b"alpha", true),
        ("dir/b.bin", &[0u8; 1000], true),
        ("c", b"", false),
    ]);
    let dir = parse(&data);
    let names: Vec<_> = dir.entries().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec![b"a.txt".to_vec(), b"dir/b.bin".to_vec(), b"c".to_vec()]);
    assert_eq!(dir.entries()[0].uncompressed_size, 5);
    assert_eq!(dir.entries()[1].uncompressed_size, 1000);
}

#[rstest]
#[case(true)]
#[case(false)]
fn reads_and_verifies_entry_content(#[case] deflate: bool) {
    let content: Vec<u8> = (0u32..40_000).map(|i| (i % 251) as u8).collect();
    let data = build_archive(&[("blob", &content, deflate)]);
    let mut dir = parse(&data);

    let mut out = Vec::new();
    dir.entries_mut()[0].reader().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, content);

    let digest = dir.digest_entry::<Sha256>(b"blob").unwrap();
    assert_eq!(digest, Sha256::digest(&content).to_vec());
}

#[test]
fn corrupted_data_fails_crc_check() {
    let content = vec![7u8; 4096];
    let mut data = build_archive(&[("x", &content, false)]);
    // Flip a byte inside the stored entry data, past the local header.
    let lfh_end = 30 + 1;
    data[lfh_end + 100] ^= 0xFF;

    let mut dir = parse(&data);
    let err = dir.digest_entry::<Sha256>(b"x").unwrap_err();
    assert!(matches!(err, Error::Checksum { .. }), "got {err:?}");
}

#[test]
fn unmodified_directory_reserializes_byte_identically() {
    let data = build_archive(&[
        ("one", b"1111", true),
        ("two", b"22", false),
        ("three/", b"", false),
    ]);
    let mut dir = parse(&data);
    let start = dir.dir_offset as usize;
    let mut out = Vec::new();
    dir.serialize(&mut out).unwrap();
    assert_eq!(out, &data[start..]);
}

#[test]
fn total_size_matches_bytes_dumped() {
    let data = build_archive(&[("a", &[1u8; 300], true), ("b", &[2u8; 7], false)]);
    let mut dir = parse(&data);
    for entry in dir.entries_mut() {
        let offset = entry.offset as usize;
        let total = entry.total_size().unwrap();
        let mut dumped = Vec::new();
        let written = entry.dump(&mut dumped).unwrap();
        assert_eq!(written, total);
        assert_eq!(dumped, &data[offset..offset + total as usize]);
    }
}

#[test]
fn size_sentinel_without_zip64_record_is_a_format_error() {
    let mut data = build_archive(&[("big.bin", b"payload", false)]);
    let cd = parse(&data).dir_offset as usize;
    // Compressed size field of the first directory record.
    data[cd + 20..cd + 24].copy_from_slice(&[0xFF; 4]);

    let err = ZipDirectory::read(Arc::new(data)).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn exactly_0xffff_entries_forces_zip64_end_records() {
    let content = b"" as &[u8];
    let files: Vec<(String, &[u8])> = (0..0xFFFFu32)
        .map(|i| (format!("f{i:05x}"), content))
        .collect();

    let mut data = Vec::new();
    let mut dir = ZipDirectory::empty(Arc::new(Vec::<u8>::new()));
    for (name, content) in &files {
        let entry = zipmend::ZipEntry::new_into(
            &mut data,
            dir.next_offset(),
            name.as_bytes(),
            &[],
            content,
            false,
        )
        .unwrap();
        dir.append(entry).unwrap();
    }
    dir.serialize(&mut data).unwrap();

    // Classic end record carries the sentinel count and a ZIP64 end
    // record precedes the locator.
    let eocd =
        EndOfCentralDirectory::from_bytes(&data[data.len() - EndOfCentralDirectory::SIZE..])
            .unwrap();
    assert_eq!(eocd.total_entries, 0xFFFF);
    assert!(eocd.is_zip64());

    let reparsed = parse(&data);
    assert_eq!(reparsed.len(), 0xFFFF);
    let (_, eocd64) = reparsed.original_records();
    assert_eq!(eocd64.map(|r| r.total_entries), Some(0xFFFF));
}

#[test]
fn appended_entry_regenerates_its_directory_record() {
    let base = build_archive(&[("keep", b"kk", false)]);
    let mut dir = parse(&base);
    let mut data = base.clone();
    data.truncate(dir.dir_offset as usize);

    let entry = zipmend::ZipEntry::new_into(
        &mut data,
        dir.next_offset(),
        b"added",
        &[],
        b"new content",
        true,
    )
    .unwrap();
    dir.append(entry).unwrap();
    dir.serialize(&mut data).unwrap();

    let mut reparsed = parse(&data);
    assert_eq!(reparsed.len(), 2);
    let mut out = Vec::new();
    reparsed
        .entry_mut(b"added")
        .unwrap()
        .reader()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"new content");
}

#[test]
fn huge_zip64_end_record_size_is_a_format_error() {
    // Directory region opening with a ZIP64 end record whose declared
    // size is near the 64-bit limit.
    let eocd64 = Zip64EOCD {
        eocd64_size: u64::MAX - 5,
        version_made_by: 45,
        version_needed: 45,
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: 0,
        total_entries: 0,
        cd_size: 0,
        cd_offset: 0,
    };
    let locator = Zip64EOCDLocator {
        disk_with_eocd64: 0,
        eocd64_offset: 0,
        total_disks: 1,
    };
    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: 0,
        total_entries: 0,
        cd_size: 0,
        cd_offset: 0,
        comment: Vec::new(),
    };
    let mut data = eocd64.to_bytes();
    data.extend_from_slice(&locator.to_bytes());
    data.extend_from_slice(&eocd.to_bytes());

    let err = ZipDirectory::read(Arc::new(data)).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn oversized_compressed_size_fails_instead_of_overflowing() {
    let data = build_archive(&[("x", b"abc", false)]);
    let mut dir = parse(&data);
    let entry = &mut dir.entries_mut()[0];
    entry.compressed_size = u64::MAX - 8;
    let err = entry.total_size().unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn archive_comment_does_not_hide_the_end_record() {
    let mut data = build_archive(&[("c.txt", b"content", true)]);
    let eocd_at = data.len() - EndOfCentralDirectory::SIZE;
    data[eocd_at + 20..eocd_at + 22].copy_from_slice(&11u16.to_le_bytes());
    data.extend_from_slice(b"hello world");

    let mut dir = parse(&data);
    assert_eq!(dir.len(), 1);
    let mut out = Vec::new();
    dir.entries_mut()[0].reader().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"content");

    // Unmodified re-serialization keeps the comment.
    let start = dir.dir_offset as usize;
    let mut emitted = Vec::new();
    dir.serialize(&mut emitted).unwrap();
    assert_eq!(emitted, &data[start..]);
}

#[test]
fn verification_failure_persists_across_reads() {
    let content = vec![7u8; 64];
    let mut data = build_archive(&[("x", &content, false)]);
    data[31 + 10] ^= 0xFF;

    let mut dir = parse(&data);
    let mut reader = dir.entries_mut()[0].reader().unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());

    let mut buf = [0u8; 8];
    let err = reader.read(&mut buf).unwrap_err();
    assert!(
        matches!(Error::from_stream(err), Error::Checksum { .. }),
        "second read after a failed verification must keep failing"
    );
}

#[test]
fn trimmed_read_rejects_entries_overrunning_the_directory() {
    let mut data = build_archive(&[("aaaa", &[5u8; 500], false), ("bbbb", &[6u8; 10], false)]);
    let dir = parse(&data);
    let cd = dir.dir_offset as usize;
    let second_offset = dir.entries()[1].offset as u32;

    // Point the first record at the second entry's header; its 500 data
    // bytes now extend past the directory start.
    data[cd + 42..cd + 46].copy_from_slice(&second_offset.to_le_bytes());

    assert!(ZipDirectory::read(Arc::new(data.clone())).is_ok());
    let err = ZipDirectory::read_trimmed(Arc::new(data)).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "got {err:?}");
}

#[test]
fn tee_captures_raw_compressed_bytes() {
    let content = vec![3u8; 10_000];
    let data = build_archive(&[("t", &content, true)]);
    let mut dir = parse(&data);

    let entry = &mut dir.entries_mut()[0];
    let data_start = entry.data_offset().unwrap() as usize;
    let compressed = entry.compressed_size as usize;

    let mut tee = Vec::new();
    let mut out = Vec::new();
    entry
        .reader_with_tee(&mut tee)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, content);
    assert_eq!(tee, &data[data_start..data_start + compressed]);
}

#[test]
fn forced_zip64_end_records_parse_back() {
    let data = build_archive(&[("small", b"payload", false)]);
    let mut dir = parse(&data);
    dir.force_zip64();

    let mut rebuilt = data[..dir.dir_offset as usize].to_vec();
    dir.serialize(&mut rebuilt).unwrap();

    let reparsed = parse(&rebuilt);
    assert_eq!(reparsed.len(), 1);
    let (eocd, eocd64) = reparsed.original_records();
    assert!(eocd.unwrap().is_zip64());
    assert_eq!(eocd64.map(|r| r.total_entries), Some(1));
}

#[test]
fn reads_directory_from_forward_only_stream() {
    let data = build_archive(&[("s1", b"stream me", true), ("s2", &[9u8; 64], false)]);
    let size = data.len() as u64;
    let mut dir = ZipDirectory::read_stream(std::io::Cursor::new(data), size).unwrap();
    assert_eq!(dir.len(), 2);
    let mut out = Vec::new();
    dir.entries_mut()[0].reader().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"stream me");
}

#[test]
fn forward_reader_rejects_reads_behind_released_window() {
    let data: Vec<u8> = (0..=255u8).collect();
    let reader = zipmend::ForwardReader::new(std::io::Cursor::new(data), 256);
    use zipmend::ReadAt;

    let mut buf = [0u8; 16];
    reader.read_at(100, &mut buf).unwrap();
    reader.release_before(100);
    let err = reader.read_at(50, &mut buf).unwrap_err();
    assert!(matches!(err, Error::Ordering(_)), "got {err:?}");
}
