mod common;

use std::fs;
use std::io::Read;
use std::sync::Arc;

use common::{build_archive, parse};
use zipmend::{Disposition, Mutation, ZipDirectory, ZipEntry};

#[test]
fn delete_and_insert_produces_expected_archive() {
    let data = build_archive(&[
        ("one.txt", b"first entry", true),
        ("two.txt", b"second entry", true),
        ("three.txt", b"third entry", false),
    ]);
    let mut dir = parse(&data);

    let mut mutation = Mutation::walk(&mut dir, |entry| {
        Ok(if entry.name == b"two.txt" {
            Disposition::Delete
        } else {
            Disposition::Keep
        })
    })
    .unwrap();
    mutation
        .add_entry(b"SIG.RSA", &[], &[0xAB; 50], false)
        .unwrap();
    let (patch, new_dir) = mutation.finish().unwrap();
    assert_eq!(new_dir.len(), 3);

    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("orig.zip");
    let output = tmp.path().join("patched.zip");
    fs::write(&input, &data).unwrap();
    patch.apply(&input, &output).unwrap();

    // Original untouched, patched archive has {one, three, SIG.RSA}.
    assert_eq!(fs::read(&input).unwrap(), data);
    let patched = fs::read(&output).unwrap();
    let mut result = parse(&patched);
    let names: Vec<_> = result.entries().iter().map(|e| e.name.clone()).collect();
    assert_eq!(
        names,
        vec![b"one.txt".to_vec(), b"three.txt".to_vec(), b"SIG.RSA".to_vec()]
    );

    for (name, content) in [
        (b"one.txt".as_slice(), b"first entry".as_slice()),
        (b"three.txt".as_slice(), b"third entry".as_slice()),
        (b"SIG.RSA".as_slice(), &[0xAB; 50]),
    ] {
        let mut out = Vec::new();
        result
            .entry_mut(name)
            .unwrap()
            .reader()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, content, "content mismatch for {name:?}");
    }
}

#[test]
fn keep_everything_yields_single_directory_replacement() {
    let data = build_archive(&[("a", b"aa", true), ("b", b"bb", true)]);
    let mut dir = parse(&data);
    let dir_offset = dir.dir_offset;
    let size = dir.size;

    let mutation = Mutation::walk(&mut dir, |_| Ok(Disposition::Keep)).unwrap();
    let (patch, _) = mutation.finish().unwrap();

    let ops = patch.operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].offset, dir_offset);
    assert_eq!(ops[0].old_size as u64, size - dir_offset);
}

#[test]
fn non_zip_gap_before_directory_survives_mutation() {
    // Entries, then a signing-block style gap, then the directory.
    let mut data = Vec::new();
    let mut dir = ZipDirectory::empty(Arc::new(Vec::<u8>::new()));
    for (name, content) in [("a", b"aaaa".as_slice()), ("b", b"bbbb".as_slice())] {
        let entry =
            ZipEntry::new_into(&mut data, dir.next_offset(), name.as_bytes(), &[], content, false)
                .unwrap();
        dir.append(entry).unwrap();
    }
    data.extend_from_slice(b"GAPBYTES");
    dir.reserve(8);
    dir.serialize(&mut data).unwrap();

    let mut parsed = parse(&data);
    let gap_start = parsed.next_file_offset().unwrap() as usize;
    assert_eq!(&data[gap_start..gap_start + 8], b"GAPBYTES");

    let mut mutation = Mutation::walk(&mut parsed, |entry| {
        Ok(if entry.name == b"a" {
            Disposition::Delete
        } else {
            Disposition::Keep
        })
    })
    .unwrap();
    mutation.add_entry(b"c", &[], b"cccc", false).unwrap();
    let (patch, _) = mutation.finish().unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("gapped.zip");
    fs::write(&input, &data).unwrap();
    let output = tmp.path().join("out.zip");
    patch.apply(&input, &output).unwrap();

    let patched = fs::read(&output).unwrap();
    let mut result = parse(&patched);
    let names: Vec<_> = result.entries().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec()]);

    // The gap bytes still sit between the last entry and the new tail.
    let gap_start = result.next_file_offset().unwrap() as usize;
    assert_eq!(&patched[gap_start..gap_start + 8], b"GAPBYTES");

    let mut out = Vec::new();
    result
        .entry_mut(b"c")
        .unwrap()
        .reader()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"cccc");
}

#[test]
fn truncate_to_prefix_emits_consistent_view() {
    let data = build_archive(&[
        ("p1", b"first", false),
        ("p2", b"second", false),
        ("cut", b"gone", false),
    ]);
    let mut dir = parse(&data);

    let mut prefix_data = Vec::new();
    let mut prefix_dir = Vec::new();
    dir.dump_prefix(2, &mut prefix_data, &mut prefix_dir).unwrap();

    let mut view = prefix_data.clone();
    view.extend_from_slice(&prefix_dir);
    let mut reparsed = parse(&view);
    assert_eq!(reparsed.len(), 2);
    let mut out = Vec::new();
    reparsed
        .entry_mut(b"p2")
        .unwrap()
        .reader()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"second");
}
