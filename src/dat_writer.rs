//! `.dat` archive writing and modification
//!
//! Archives are never edited in place. [`DatWriter`] always produces a
//! complete archive in a temporary file next to the destination and renames
//! it over the destination once every record has been written.
//! [`DatModifier`] builds on it to add, replace, append to and remove entries
//! of an existing archive.

use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::dat::{index_len, record_len, DatFile};
use crate::error::{Error, Result};

/// Options for creating `.dat` files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatWriteOptions {
    /// Minimum number of index slots. Slots beyond the entry count are
    /// written as free (zero) slots. 0 means exactly one slot per entry.
    pub index_size: u32,
}

/// Where the content of an entry comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// In-memory content
    Bytes(Vec<u8>),
    /// A file on disk, read when the archive is written
    File(PathBuf),
    /// Entry `index` of the archive being modified (see [`DatModifier`])
    Archive(usize),
}

/// Entry to be written to a `.dat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatWriteEntry {
    /// Name within the archive, stored byte for byte
    pub name: Vec<u8>,
    /// Content provider
    pub source: EntrySource,
    size: u64,
}

impl DatWriteEntry {
    /// Create a new entry from raw data
    pub fn new(name: impl Into<Vec<u8>>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: EntrySource::Bytes(data),
        }
    }

    /// Create an entry whose content is streamed from `path` at write time
    ///
    /// The size is taken now; the file must not change size before the
    /// archive is finished.
    pub fn from_file(name: impl Into<Vec<u8>>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
                _ => Error::Io(e),
            })?
            .len();
        Ok(Self {
            name: name.into(),
            size,
            source: EntrySource::File(path.to_path_buf()),
        })
    }

    pub(crate) fn from_archive(name: Vec<u8>, size: u32, index: usize) -> Self {
        Self {
            name,
            size: size as u64,
            source: EntrySource::Archive(index),
        }
    }

    /// Content size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// `.dat` writer for creating new archives
///
/// Entries are collected by [`add_entry`](Self::add_entry) and written in
/// insertion order by [`finish`](Self::finish). Dropping the writer without
/// finishing leaves the destination untouched.
pub struct DatWriter {
    path: PathBuf,
    file: NamedTempFile,
    entries: Vec<DatWriteEntry>,
    names: HashSet<Vec<u8>>,
    options: DatWriteOptions,
}

impl DatWriter {
    /// Create a new `.dat` file for writing
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_options(path, DatWriteOptions::default())
    }

    /// Create a new `.dat` file with custom options
    pub fn create_with_options<P: AsRef<Path>>(path: P, options: DatWriteOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir).map_err(|e| {
            Error::Write(format!("cannot create temporary file in {}: {}", dir.display(), e))
        })?;

        Ok(Self {
            path,
            file,
            entries: Vec::new(),
            names: HashSet::new(),
            options,
        })
    }

    /// Add an entry to the archive
    pub fn add_entry(&mut self, entry: DatWriteEntry) -> Result<()> {
        if entry.name.is_empty() {
            return Err(Error::Path("empty entry name".to_string()));
        }
        if u32::try_from(entry.name.len()).is_err() {
            return Err(Error::TooLarge(format!(
                "name of {} bytes does not fit the 32-bit length field",
                entry.name.len()
            )));
        }
        if u32::try_from(entry.size).is_err() {
            return Err(Error::TooLarge(format!(
                "{} is {} bytes, entries are limited to 4 GiB",
                entry.name_lossy(),
                entry.size
            )));
        }
        if !self.names.insert(entry.name.clone()) {
            return Err(Error::DuplicateEntry(entry.name_lossy()));
        }

        self.entries.push(entry);
        Ok(())
    }

    /// Add a file from disk
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P, archive_name: impl Into<Vec<u8>>) -> Result<()> {
        self.add_entry(DatWriteEntry::from_file(archive_name, path)?)
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots the index will have
    pub fn index_size(&self) -> u32 {
        self.options.index_size.max(self.entries.len() as u32)
    }

    /// Length of the archive [`finish`](Self::finish) will produce
    pub fn total_len(&self) -> u64 {
        index_len(self.index_size())
            + self
                .entries
                .iter()
                .map(|e| record_len(e.name.len(), e.size))
                .sum::<u64>()
    }

    /// Write the archive and move it into place
    pub fn finish(self) -> Result<()> {
        let path = self.path.clone();
        let file = self.write_temp(None::<&mut DatFile>)?;
        persist(file, &path)
    }

    /// Write every record into the temporary file, reading
    /// [`EntrySource::Archive`] content from `source`
    pub(crate) fn write_temp<R: Read + Seek>(
        self,
        source: Option<&mut DatFile<R>>,
    ) -> Result<NamedTempFile> {
        if u32::try_from(self.entries.len()).is_err() {
            return Err(Error::TooLarge(format!(
                "{} entries do not fit the 32-bit index",
                self.entries.len()
            )));
        }
        let slots = self.index_size();
        let offsets = record_offsets(&self.entries, slots)?;

        let mut out = BufWriter::new(self.file);
        write_records(&mut out, &self.entries, &offsets, slots, source).map_err(into_write_error)?;

        let file = out
            .into_inner()
            .map_err(|e| Error::Write(format!("flushing archive: {}", e.error())))?;
        file.as_file().sync_all().map_err(|e| Error::Write(e.to_string()))?;

        info!(
            path = %self.path.display(),
            entries = self.entries.len(),
            slots,
            "wrote archive"
        );
        Ok(file)
    }
}

/// Absolute record offset of every entry, laid out back to back after the index
fn record_offsets(entries: &[DatWriteEntry], slots: u32) -> Result<Vec<u32>> {
    let mut offset = index_len(slots);
    let mut offsets = Vec::with_capacity(entries.len());

    for entry in entries {
        let start = u32::try_from(offset).map_err(|_| {
            Error::TooLarge(format!(
                "{} would start at {:#x}, beyond the 4 GiB offset limit",
                entry.name_lossy(),
                offset
            ))
        })?;
        offsets.push(start);
        offset += record_len(entry.name.len(), entry.size);
    }
    Ok(offsets)
}

fn write_records<W: Write, R: Read + Seek>(
    out: &mut W,
    entries: &[DatWriteEntry],
    offsets: &[u32],
    slots: u32,
    mut source: Option<&mut DatFile<R>>,
) -> Result<()> {
    out.write_u32::<LittleEndian>(slots)?;
    for &offset in offsets {
        out.write_u32::<LittleEndian>(offset)?;
    }
    for _ in offsets.len()..slots as usize {
        out.write_u32::<LittleEndian>(0)?;
    }

    for entry in entries {
        out.write_u32::<LittleEndian>(entry.size as u32)?;
        out.write_u32::<LittleEndian>(entry.name.len() as u32)?;
        out.write_all(&entry.name)?;

        let written = match &entry.source {
            EntrySource::Bytes(data) => {
                out.write_all(data)?;
                data.len() as u64
            }
            EntrySource::File(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::Write(format!("reading {}: {}", path.display(), e))
                })?;
                // one extra byte so a grown file is noticed
                io::copy(&mut file.take(entry.size + 1), &mut *out).map_err(|e| {
                    Error::Write(format!("reading {}: {}", path.display(), e))
                })?
            }
            EntrySource::Archive(index) => match source.as_deref_mut() {
                Some(dat) => dat.extract_to(*index, &mut *out)?,
                None => {
                    return Err(Error::Write(format!(
                        "{} refers to an archive entry but no source archive is open",
                        entry.name_lossy()
                    )))
                }
            },
        };

        if written != entry.size {
            return Err(Error::Write(format!(
                "{} changed size while packing: expected {} bytes, got {}",
                entry.name_lossy(),
                entry.size,
                written
            )));
        }
        debug!(name = %entry.name_lossy(), size = entry.size, "wrote entry");
    }

    out.flush()?;
    Ok(())
}

fn into_write_error(err: Error) -> Error {
    match err {
        Error::Io(e) => Error::Write(e.to_string()),
        other => other,
    }
}

fn persist(file: NamedTempFile, path: &Path) -> Result<()> {
    file.persist(path)
        .map_err(|e| Error::Write(format!("moving archive to {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Rewrites an existing archive with entries added, replaced or removed
///
/// Untouched entries are streamed from the source archive one at a time.
pub struct DatModifier {
    source: DatFile,
    entries: Vec<DatWriteEntry>,
    options: DatWriteOptions,
}

impl DatModifier {
    /// Open an existing `.dat` for modification
    ///
    /// The index size of the source archive is kept unless
    /// [`with_options`](Self::with_options) says otherwise.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = DatFile::open(path)?;
        let entries = source
            .entries()
            .iter()
            .enumerate()
            .map(|(i, e)| DatWriteEntry::from_archive(e.name.clone(), e.size, i))
            .collect();
        let options = DatWriteOptions {
            index_size: source.index_size(),
        };

        Ok(Self {
            source,
            entries,
            options,
        })
    }

    /// Set write options
    pub fn with_options(mut self, options: DatWriteOptions) -> Self {
        self.options = options;
        self
    }

    fn position(&self, name: &[u8]) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.position(name.as_ref()).is_some()
    }

    /// Names in the order they will be written
    pub fn names(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|e| e.name.as_slice())
    }

    /// Add a file, replacing an existing entry of the same name in place
    ///
    /// Returns `true` if an entry was replaced.
    pub fn add(&mut self, entry: DatWriteEntry) -> bool {
        match self.position(&entry.name) {
            Some(i) => {
                self.entries[i] = entry;
                true
            }
            None => {
                self.entries.push(entry);
                false
            }
        }
    }

    /// Append `data` to the content of an existing entry
    pub fn append_to(&mut self, name: impl AsRef<[u8]>, data: &[u8]) -> Result<()> {
        let name = name.as_ref();
        let i = self
            .position(name)
            .ok_or_else(|| Error::EntryNotFound(String::from_utf8_lossy(name).into_owned()))?;

        let mut content = match &self.entries[i].source {
            EntrySource::Bytes(bytes) => bytes.clone(),
            EntrySource::File(path) => fs::read(path)?,
            EntrySource::Archive(index) => self.source.read(*index)?,
        };
        content.extend_from_slice(data);

        self.entries[i] = DatWriteEntry::new(name, content);
        Ok(())
    }

    /// Remove an entry. Returns `false` if there was none.
    pub fn remove(&mut self, name: impl AsRef<[u8]>) -> bool {
        match self.position(name.as_ref()) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Write the modified archive (full rewrite)
    ///
    /// `output` may be the source archive itself.
    pub fn save<P: AsRef<Path>>(mut self, output: P) -> Result<()> {
        let output = output.as_ref();
        let mut writer = DatWriter::create_with_options(output, self.options)?;
        for entry in self.entries {
            writer.add_entry(entry)?;
        }

        let file = writer.write_temp(Some(&mut self.source))?;
        drop(self.source);
        persist(file, output)
    }
}
