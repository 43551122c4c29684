//! `.dat` utility functions
//!
//! This module contains the operations behind the command line tool:
//! listing, inspecting, unpacking, packing and modifying archives. They
//! report progress on stdout and return `anyhow` errors that wrap
//! [`crate::Error`] with context.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::{
    utils::{
        collect_files, create_glob_matcher, default_unpacked_dir, entry_name_to_path,
        format_size, matches_filter, path_to_entry_name,
    },
    DatFile, DatModifier, DatWriteEntry, DatWriteOptions, DatWriter, Error,
};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(ProgressStyle::with_template(PROGRESS_TEMPLATE)?);
    Ok(pb)
}

fn open_archive(path: &Path) -> Result<DatFile> {
    DatFile::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Summary numbers of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Number of entries
    pub entries: usize,
    /// Number of index slots, used or free
    pub index_size: u32,
    /// Sum of all content sizes
    pub total_size: u64,
    /// Header, index and record prefixes
    pub overhead: u64,
    /// Archive length on disk
    pub file_len: u64,
}

impl ArchiveInfo {
    pub fn from_dat<R>(dat: &DatFile<R>) -> Self {
        Self {
            entries: dat.len(),
            index_size: dat.index_size(),
            total_size: dat.total_size(),
            overhead: dat.overhead(),
            file_len: dat.file_len(),
        }
    }
}

/// Read the summary numbers of an archive
pub fn archive_info(path: &Path) -> Result<ArchiveInfo> {
    Ok(ArchiveInfo::from_dat(&open_archive(path)?))
}

/// SHA-256 of an entry's content as lowercase hex
pub fn entry_hash<R: Read + Seek>(dat: &mut DatFile<R>, index: usize) -> crate::Result<String> {
    let mut hasher = Sha256::new();
    dat.extract_to(index, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// List entry names, optionally filtered by a glob pattern
pub fn list_files(path: &Path, filter: Option<&str>) -> Result<()> {
    let dat = open_archive(path)?;
    let matcher = filter.map(create_glob_matcher).transpose()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in dat.entries() {
        if matches_filter(&entry.name_lossy(), matcher.as_ref()) {
            out.write_all(&entry.name)?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Show archive information
///
/// Prints one line per entry (slot, offset, name, size), optionally with a
/// SHA-256 per entry, followed by the totals.
pub fn show_info(path: &Path, bytes: bool, hashes: bool) -> Result<ArchiveInfo> {
    println!("Loading index...");
    let mut dat = open_archive(path)?;
    let size = |n: u64| if bytes { n.to_string() } else { format_size(n) };

    println!();
    println!("{:<5} {:<9} {:<57} {:>10}", "#", "offset", "filename", "size");
    for i in 0..dat.len() {
        let entry = dat.entries()[i].clone();
        println!(
            "{:<5} {:<9x} {:<57} {:>10}",
            entry.slot,
            entry.offset,
            entry.name_lossy(),
            size(entry.size as u64)
        );
        if hashes {
            println!("      sha256: {}", entry_hash(&mut dat, i)?);
        }
    }

    let info = ArchiveInfo::from_dat(&dat);
    println!();
    println!("Archive Information:");
    println!("  File: {}", path.display());
    println!("  Entries: {}/{} slots used", info.entries, info.index_size);
    println!("  Total size: {}", size(info.total_size));
    println!("  Index overhead: {}", size(info.overhead));
    println!("  File size: {}", size(info.file_len));
    let slack = dat.slack();
    if slack > 0 {
        println!("  Unused space: {} (repack to reclaim)", size(slack));
    }

    Ok(info)
}

/// Print every entry name with its SHA-256, sorted by name
pub fn show_hashes(path: &Path) -> Result<()> {
    let mut dat = open_archive(path)?;

    let mut order: Vec<usize> = (0..dat.len()).collect();
    order.sort_by(|&a, &b| dat.entries()[a].name.cmp(&dat.entries()[b].name));

    for i in order {
        let hash = entry_hash(&mut dat, i)?;
        println!("{} {}", dat.entries()[i].name_lossy(), hash);
    }
    Ok(())
}

/// Unpack every entry to `output` (default `<archive>-unpacked`)
///
/// All names are checked before anything is written. Existing files are
/// only overwritten with `force`.
pub fn unpack_archive(path: &Path, output: Option<&Path>, force: bool) -> Result<usize> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_unpacked_dir(path));

    println!("Loading index...");
    let mut dat = open_archive(path)?;

    let targets = dat
        .entries()
        .iter()
        .map(|e| entry_name_to_path(&e.name).map(|p| output.join(p)))
        .collect::<crate::Result<Vec<PathBuf>>>()
        .with_context(|| format!("Refusing to unpack {}", path.display()))?;

    let mut seen = HashSet::with_capacity(targets.len());
    for (entry, target) in dat.entries().iter().zip(&targets) {
        if !seen.insert(target) {
            return Err(Error::Path(format!(
                "{} unpacks to {}, which another entry already uses",
                entry.name_lossy(),
                target.display()
            ))
            .into());
        }
    }

    if !force {
        if let Some(existing) = targets.iter().find(|t| t.exists()) {
            return Err(Error::Path(format!(
                "{} already exists. Use -f to override.",
                existing.display()
            ))
            .into());
        }
    }

    println!("Extracting {} files to {}...", targets.len(), output.display());
    fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let pb = progress_bar(targets.len())?;
    for (i, target) in targets.iter().enumerate() {
        pb.set_message(dat.entries()[i].name_lossy().into_owned());

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        let mut writer = BufWriter::new(file);
        dat.extract_to(i, &mut writer)
            .with_context(|| format!("Failed to extract {}", target.display()))?;
        writer.flush()?;

        pb.inc(1);
    }
    pb.finish_with_message("Done");

    println!("Extracted: {} files", targets.len());
    Ok(targets.len())
}

/// Create a new archive from a directory (default `<archive>-unpacked`)
///
/// Files are stored sorted by entry name.
pub fn pack_directory(
    path: &Path,
    source_dir: Option<&Path>,
    options: DatWriteOptions,
    force: bool,
) -> Result<usize> {
    if path.exists() && !force {
        return Err(Error::Path(format!(
            "{} already exists. Use -f to override.",
            path.display()
        ))
        .into());
    }
    let source_dir = source_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_unpacked_dir(path));

    println!("Listing files in {}...", source_dir.display());
    let files = collect_files(&source_dir)
        .with_context(|| format!("Failed to list {}", source_dir.display()))?;
    println!("Found {} files", files.len());

    let mut writer = DatWriter::create_with_options(path, options)?;
    for (name, file) in files {
        let entry = DatWriteEntry::from_file(name, &file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        writer.add_entry(entry)?;
    }
    let count = writer.len();

    println!("Packing...");
    writer
        .finish()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created: {} ({} files)", path.display(), count);
    Ok(count)
}

/// Extract a single entry to `target`, or stdout when `target` is `None`
pub fn extract_file(path: &Path, name: &str, target: Option<&Path>, force: bool) -> Result<u64> {
    let mut dat = open_archive(path)?;
    let index = dat
        .index_of(name)
        .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;

    match target {
        Some(target) => {
            if target.exists() && !force {
                return Err(Error::Path(format!(
                    "{} already exists. Use -f to override.",
                    target.display()
                ))
                .into());
            }
            let mut writer = BufWriter::new(
                File::create(target)
                    .with_context(|| format!("Failed to create {}", target.display()))?,
            );
            let written = dat.extract_to(index, &mut writer)?;
            writer.flush()?;
            Ok(written)
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let written = dat.extract_to(index, &mut out)?;
            out.flush()?;
            Ok(written)
        }
    }
}

fn entry_from_disk(file: &Path, name: &str) -> Result<DatWriteEntry> {
    DatWriteEntry::from_file(name, file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Add a single file; `archive_name` defaults to `file` as given, `/`
/// separated
pub fn add_file(path: &Path, file: &Path, archive_name: Option<&str>, force: bool) -> Result<()> {
    let archive_name = match archive_name {
        Some(name) => name.to_string(),
        None => String::from_utf8_lossy(
            &path_to_entry_name(file)
                .with_context(|| format!("Cannot derive an entry name from {}", file.display()))?,
        )
        .into_owned(),
    };

    let mut modifier = DatModifier::open(path)?;
    if modifier.contains(&archive_name) && !force {
        return Err(Error::DuplicateEntry(format!("{}. Use -f to replace.", archive_name)).into());
    }

    println!("Adding {} as {}...", file.display(), archive_name);
    modifier.add(entry_from_disk(file, &archive_name)?);
    modifier.save(path)?;
    Ok(())
}

/// Replace an entry with the content of `file`; with `force` a missing
/// entry is added instead
pub fn replace_file(path: &Path, file: &Path, archive_name: &str, force: bool) -> Result<()> {
    let mut modifier = DatModifier::open(path)?;
    if !modifier.contains(archive_name) && !force {
        return Err(Error::EntryNotFound(format!("{}. Use -f to add anyway.", archive_name)).into());
    }

    println!("Replacing {} in {}...", archive_name, path.display());
    modifier.add(entry_from_disk(file, archive_name)?);
    modifier.save(path)?;
    Ok(())
}

/// Append the content of `file` to an entry; with `force` a missing entry
/// is created
pub fn append_file(path: &Path, archive_name: &str, file: &Path, force: bool) -> Result<()> {
    let mut modifier = DatModifier::open(path)?;

    if modifier.contains(archive_name) {
        let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        modifier.append_to(archive_name, &data)?;
    } else if force {
        modifier.add(entry_from_disk(file, archive_name)?);
    } else {
        return Err(Error::EntryNotFound(format!("{}. Use -f to add anyway.", archive_name)).into());
    }

    println!("Appended {} to {}", file.display(), archive_name);
    modifier.save(path)?;
    Ok(())
}

/// Remove an entry; with `force` a missing entry is not an error
pub fn remove_file(path: &Path, archive_name: &str, force: bool) -> Result<()> {
    let mut modifier = DatModifier::open(path)?;
    if !modifier.remove(archive_name) {
        if force {
            return Ok(());
        }
        return Err(Error::EntryNotFound(archive_name.to_string()).into());
    }

    println!("Removed {}", archive_name);
    modifier.save(path)?;
    Ok(())
}

/// Sizes before and after a repack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepackStats {
    pub old_size: u64,
    pub new_size: u64,
}

/// Rewrite an archive compactly, dropping free slots and unused space
pub fn repack(path: &Path) -> Result<RepackStats> {
    println!("Repacking...");
    let modifier = DatModifier::open(path)?.with_options(DatWriteOptions::default());
    let old_size = fs::metadata(path)?.len();
    modifier.save(path)?;
    let new_size = fs::metadata(path)?.len();

    println!();
    println!("  old size  {} ({})", format_size(old_size), old_size);
    println!("  new size  {} ({})", format_size(new_size), new_size);
    Ok(RepackStats { old_size, new_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three(dir: &Path) -> PathBuf {
        let path = dir.join("resource.dat");
        let mut writer = DatWriter::create(&path).unwrap();
        writer.add_entry(DatWriteEntry::new("a", vec![b'a'; 10])).unwrap();
        writer.add_entry(DatWriteEntry::new("b", Vec::new())).unwrap();
        writer.add_entry(DatWriteEntry::new("c", vec![b'c'; 42])).unwrap();
        writer.finish().unwrap();
        path
    }

    fn error_of(err: &anyhow::Error) -> &Error {
        err.downcast_ref::<Error>().expect("ftldat error")
    }

    #[test]
    fn test_info_totals() {
        let tmp = tempfile::tempdir().unwrap();
        let info = archive_info(&three(tmp.path())).unwrap();
        assert_eq!(info.entries, 3);
        assert_eq!(info.total_size, 52);
        assert_eq!(info.overhead, 43);
        assert_eq!(info.file_len, 95);
    }

    #[test]
    fn test_info_missing_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let err = archive_info(&tmp.path().join("nope.dat")).unwrap_err();
        assert!(matches!(error_of(&err), Error::NotFound(_)));
    }

    #[test]
    fn test_entry_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dat = DatFile::open(three(tmp.path())).unwrap();
        // sha256 of the empty string
        assert_eq!(
            entry_hash(&mut dat, 1).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_unpack_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = three(tmp.path());
        let out = tmp.path().join("out");

        assert_eq!(unpack_archive(&path, Some(&out), false).unwrap(), 3);
        fs::write(out.join("a"), b"changed").unwrap();

        let err = unpack_archive(&path, Some(&out), false).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));
        assert_eq!(fs::read(out.join("a")).unwrap(), b"changed");

        unpack_archive(&path, Some(&out), true).unwrap();
        assert_eq!(fs::read(out.join("a")).unwrap(), vec![b'a'; 10]);
    }

    #[test]
    fn test_unpack_rejects_traversal_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evil.dat");
        let mut writer = DatWriter::create(&path).unwrap();
        writer.add_entry(DatWriteEntry::new("fine.txt", b"ok".to_vec())).unwrap();
        writer.add_entry(DatWriteEntry::new("../escape.txt", b"bad".to_vec())).unwrap();
        writer.finish().unwrap();

        let out = tmp.path().join("nested").join("out");
        let err = unpack_archive(&path, Some(&out), false).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));
        assert!(!out.exists());
        assert!(!tmp.path().join("nested").join("escape.txt").exists());
    }

    #[test]
    fn test_pack_default_source_and_overwrite_guard() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.dat");
        let src = default_unpacked_dir(&path);
        fs::create_dir_all(src.join("img")).unwrap();
        fs::write(src.join("img").join("x.png"), b"png").unwrap();

        assert_eq!(pack_directory(&path, None, DatWriteOptions::default(), false).unwrap(), 1);
        let err = pack_directory(&path, None, DatWriteOptions::default(), false).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));

        let mut dat = DatFile::open(&path).unwrap();
        assert_eq!(dat.extract("img/x.png").unwrap(), b"png");
    }

    #[test]
    fn test_pack_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let err = pack_directory(
            &tmp.path().join("data.dat"),
            Some(&tmp.path().join("nope")),
            DatWriteOptions::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(error_of(&err), Error::NotFound(_)));
        assert!(!tmp.path().join("data.dat").exists());
    }

    #[test]
    fn test_extract_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = three(tmp.path());
        let target = tmp.path().join("c.bin");

        assert_eq!(extract_file(&path, "c", Some(&target), false).unwrap(), 42);
        assert_eq!(fs::read(&target).unwrap(), vec![b'c'; 42]);
        assert!(extract_file(&path, "c", Some(&target), false).is_err());

        let err = extract_file(&path, "zz", Some(&target), true).unwrap_err();
        assert!(matches!(error_of(&err), Error::EntryNotFound(_)));
    }

    #[test]
    fn test_add_replace_append_remove() {
        // relative to the working directory so the default name keeps its directories
        let tmp = tempfile::Builder::new()
            .prefix("ftldat-add")
            .tempdir_in(".")
            .unwrap();
        let path = three(tmp.path());
        let file = tmp.path().join("img").join("new.txt");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"new").unwrap();
        let default_name = format!(
            "{}/img/new.txt",
            tmp.path().file_name().unwrap().to_string_lossy()
        );

        add_file(&path, &file, None, false).unwrap();
        assert!(add_file(&path, &file, None, false).is_err());
        add_file(&path, &file, Some("data/new.txt"), false).unwrap();

        let err = replace_file(&path, &file, "missing", false).unwrap_err();
        assert!(matches!(error_of(&err), Error::EntryNotFound(_)));
        replace_file(&path, &file, "a", false).unwrap();

        append_file(&path, "a", &file, false).unwrap();
        assert!(append_file(&path, "fresh", &file, false).is_err());
        append_file(&path, "fresh", &file, true).unwrap();

        remove_file(&path, "b", false).unwrap();
        assert!(remove_file(&path, "b", false).is_err());
        remove_file(&path, "b", true).unwrap();

        let mut dat = DatFile::open(&path).unwrap();
        let names: Vec<_> = dat.entries().iter().map(|e| e.name_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a", "c", default_name.as_str(), "data/new.txt", "fresh"]);
        assert_eq!(dat.extract("a").unwrap(), b"newnew");
        assert_eq!(dat.extract(&default_name).unwrap(), b"new");
        assert_eq!(dat.extract("fresh").unwrap(), b"new");
    }

    #[test]
    fn test_add_absolute_path_needs_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = three(tmp.path());
        let file = tmp.path().join("abs.txt");
        fs::write(&file, b"abs").unwrap();

        let err = add_file(&path, &file, None, false).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));
        add_file(&path, &file, Some("abs.txt"), false).unwrap();
    }

    #[test]
    fn test_unpack_rejects_names_sharing_a_target() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("twins.dat");
        let mut writer = DatWriter::create(&path).unwrap();
        writer.add_entry(DatWriteEntry::new("a.txt", b"first".to_vec())).unwrap();
        writer.add_entry(DatWriteEntry::new("./a.txt", b"second".to_vec())).unwrap();
        writer.finish().unwrap();

        let out = tmp.path().join("out");
        let err = unpack_archive(&path, Some(&out), false).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));
        assert!(!out.exists());

        let err = unpack_archive(&path, Some(&out), true).unwrap_err();
        assert!(matches!(error_of(&err), Error::Path(_)));
    }

    #[test]
    fn test_repack_shrinks_reserved_index() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("f"), b"12345").unwrap();

        let path = tmp.path().join("data.dat");
        pack_directory(&path, Some(&src), DatWriteOptions { index_size: 100 }, false).unwrap();

        let stats = repack(&path).unwrap();
        assert_eq!(stats.old_size, 4 + 400 + 8 + 1 + 5);
        assert_eq!(stats.new_size, 4 + 4 + 8 + 1 + 5);
        assert_eq!(DatFile::open(&path).unwrap().extract("f").unwrap(), b"12345");
    }
}
