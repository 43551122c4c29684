//! Directory -> archive -> directory round trips.
//!
//! These tests go through the same adapter functions the command line tool
//! uses and compare the resulting trees byte for byte.

use ftldat::dat_utils::{archive_info, pack_directory, unpack_archive};
use ftldat::{DatFile, DatWriteOptions, Error};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Every regular file below `root`, keyed by relative path
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (name, data) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
}

fn sample_files() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("data/blueprints.xml", &b"<blueprintList/>"[..]),
        ("data/text_events.xml", &b"<events>\n</events>\n"[..]),
        ("img/ship/kestrel base.png", &b"\x89PNG\r\n\x1a\n\0\0\0"[..]),
        ("img/empty.png", &b""[..]),
        ("audio/music/bp_MUS_Space.ogg", &[0xABu8; 300][..]),
        ("readme.txt", &b"name with spaces lives in img/ship"[..]),
    ]
}

#[test]
fn test_pack_unpack_reproduces_directory() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write_tree(&src, &sample_files());

    let archive = tmp.path().join("resource.dat");
    let packed = pack_directory(&archive, Some(&src), DatWriteOptions::default(), false).unwrap();
    assert_eq!(packed, 6);

    let out = tmp.path().join("out");
    assert_eq!(unpack_archive(&archive, Some(&out), false).unwrap(), 6);

    assert_eq!(snapshot(&src), snapshot(&out));
}

#[test]
fn test_unpack_twice_is_identical() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write_tree(&src, &sample_files());
    let archive = tmp.path().join("data.dat");
    pack_directory(&archive, Some(&src), DatWriteOptions::default(), false).unwrap();

    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    unpack_archive(&archive, Some(&first), false).unwrap();
    unpack_archive(&archive, Some(&second), false).unwrap();

    assert_eq!(snapshot(&first), snapshot(&second));
}

#[test]
fn test_default_unpack_dir_round_trips_through_repack() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write_tree(&src, &sample_files());
    let archive = tmp.path().join("data.dat");
    pack_directory(&archive, Some(&src), DatWriteOptions::default(), false).unwrap();
    let original = fs::read(&archive).unwrap();

    // unpack to <archive>-unpacked, then pack that back over the archive
    unpack_archive(&archive, None, false).unwrap();
    pack_directory(&archive, None, DatWriteOptions::default(), true).unwrap();

    assert_eq!(fs::read(&archive).unwrap(), original);
}

#[test]
fn test_creation_order_does_not_change_archive() {
    let tmp = TempDir::new().unwrap();
    let files = sample_files();

    let forward = tmp.path().join("forward");
    write_tree(&forward, &files);
    let backward = tmp.path().join("backward");
    let reversed: Vec<_> = files.iter().rev().cloned().collect();
    write_tree(&backward, &reversed);

    let a = tmp.path().join("a.dat");
    let b = tmp.path().join("b.dat");
    pack_directory(&a, Some(&forward), DatWriteOptions::default(), false).unwrap();
    pack_directory(&b, Some(&backward), DatWriteOptions::default(), false).unwrap();

    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}

#[test]
fn test_info_counts_sizes() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write_tree(
        &src,
        &[("a", &[1u8; 10][..]), ("b", &b""[..]), ("c", &[2u8; 42][..])],
    );
    let archive = tmp.path().join("small.dat");
    pack_directory(&archive, Some(&src), DatWriteOptions::default(), false).unwrap();

    let info = archive_info(&archive).unwrap();
    assert_eq!(info.entries, 3);
    assert_eq!(info.total_size, 52);
    assert_eq!(info.overhead, 4 + 3 * 4 + 3 * (8 + 1));
    assert_eq!(info.file_len, info.total_size + info.overhead);
    assert_eq!(fs::metadata(&archive).unwrap().len(), info.file_len);
}

#[test]
fn test_rejects_corrupt_archives() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    write_tree(&src, &sample_files());
    let archive = tmp.path().join("data.dat");
    pack_directory(&archive, Some(&src), DatWriteOptions::default(), false).unwrap();
    let bytes = fs::read(&archive).unwrap();

    // declared index size larger than the file
    let mut too_many = bytes.clone();
    too_many[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
    let path = tmp.path().join("too_many.dat");
    fs::write(&path, &too_many).unwrap();
    assert!(matches!(DatFile::open(&path), Err(Error::Format(_))));

    // last entry runs past end of file
    let path = tmp.path().join("truncated.dat");
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
    assert!(matches!(DatFile::open(&path), Err(Error::Format(_))));

    let path = tmp.path().join("tiny.dat");
    fs::write(&path, b"\x01").unwrap();
    assert!(matches!(DatFile::open(&path), Err(Error::Format(_))));
}

#[test]
fn test_missing_archive_is_not_found() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        DatFile::open(tmp.path().join("missing.dat")),
        Err(Error::NotFound(_))
    ));
}
