//! FTL `.dat` archive reading
//!
//! A `.dat` file is a slot table followed by length-prefixed records. All
//! integers are little-endian `u32`.
//!
//! ## Layout
//!
//! ```text
//! 0           u32  index size N
//! 4 + 4*i     u32  slot[i]: absolute record offset, 0 = free slot
//! slot[i]     u32  content size
//!             u32  name length
//!             ...  name bytes ('/' separated, no terminator)
//!             ...  content bytes
//! ```
//!
//! Offsets are stored explicitly in the index, so the records may appear in
//! any order in the file. Archives written by [`crate::DatWriter`] lay the
//! records out back to back in slot order directly after the index.

use byteorder::{LittleEndian, ReadBytesExt};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Size of the leading index-size field
pub const HEADER_SIZE: u64 = 4;

/// Size of one index slot
pub const SLOT_SIZE: u64 = 4;

/// Size of the `size` + `name length` prefix of every record
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Byte length of a header plus an index of `slots` slots
pub fn index_len(slots: u32) -> u64 {
    HEADER_SIZE + SLOT_SIZE * slots as u64
}

/// Byte length of a full record (prefix, name and content)
pub fn record_len(name_len: usize, size: u64) -> u64 {
    RECORD_HEADER_SIZE + name_len as u64 + size
}

/// Options controlling how strictly an archive is validated on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatOpenOptions {
    /// Reject archives whose records overlap each other
    pub check_overlap: bool,
}

impl Default for DatOpenOptions {
    fn default() -> Self {
        Self { check_overlap: true }
    }
}

/// A single entry of a `.dat` archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatEntry {
    /// Entry name exactly as stored; not necessarily valid UTF-8
    pub name: Vec<u8>,
    /// Content size in bytes
    pub size: u32,
    /// Absolute offset of the first content byte
    pub offset: u64,
    /// Position of this entry in the index table
    pub slot: u32,
    /// Absolute offset of the record prefix
    pub record_offset: u64,
}

impl DatEntry {
    /// Entry name for display, with invalid UTF-8 replaced
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Offset one past the last content byte
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }

    /// Bytes taken up by the record, prefix and name included
    pub fn record_len(&self) -> u64 {
        record_len(self.name.len(), self.size as u64)
    }
}

/// A `.dat` archive reader
///
/// The index is parsed up front; entry contents are only read on request.
pub struct DatFile<R = BufReader<File>> {
    reader: R,
    entries: Vec<DatEntry>,
    names: HashMap<Vec<u8>, usize>,
    index_size: u32,
    file_len: u64,
}

impl DatFile<BufReader<File>> {
    /// Open a `.dat` file for reading
    ///
    /// # Example
    /// ```no_run
    /// use ftldat::DatFile;
    /// let dat = DatFile::open("data.dat")?;
    /// println!("{} entries", dat.len());
    /// # Ok::<(), ftldat::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, DatOpenOptions::default())
    }

    /// Open a `.dat` file with custom validation options
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: DatOpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        let dat = Self::from_reader(BufReader::new(file), options)?;
        info!(
            path = %path.display(),
            entries = dat.len(),
            slots = dat.index_size,
            "opened archive"
        );
        Ok(dat)
    }
}

impl<R: Read + Seek> DatFile<R> {
    /// Parse the index of an archive held by any seekable reader
    pub fn from_reader(mut reader: R, options: DatOpenOptions) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        let (index_size, entries) = read_index(&mut reader, file_len, &options)?;

        let mut names = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if names.insert(entry.name.clone(), i).is_some() {
                return Err(Error::format(format!(
                    "Filename {} occurs more than once",
                    entry.name_lossy()
                )));
            }
        }

        Ok(Self {
            reader,
            entries,
            names,
            index_size,
            file_len,
        })
    }

    /// Return a reader over exactly the content bytes of entry `index`
    ///
    /// Nothing outside the entry's range is read.
    pub fn entry_reader(&mut self, index: usize) -> Result<Take<&mut R>> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| Error::EntryNotFound(format!("#{}", index)))?;
        let (offset, size) = (entry.offset, entry.size as u64);

        self.reader.seek(SeekFrom::Start(offset))?;
        Ok((&mut self.reader).take(size))
    }

    /// Read the content of entry `index` into memory
    pub fn read(&mut self, index: usize) -> Result<Vec<u8>> {
        let size = self.entry_size(index)?;
        let mut data = Vec::with_capacity(size as usize);
        self.entry_reader(index)?.read_to_end(&mut data)?;
        check_complete(data.len() as u64, size)?;
        Ok(data)
    }

    /// Read the content of the entry called `name` into memory
    pub fn extract(&mut self, name: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let name = name.as_ref();
        let index = self
            .index_of(name)
            .ok_or_else(|| Error::EntryNotFound(String::from_utf8_lossy(name).into_owned()))?;
        self.read(index)
    }

    /// Stream the content of entry `index` into `out`
    pub fn extract_to<W: Write + ?Sized>(&mut self, index: usize, out: &mut W) -> Result<u64> {
        let size = self.entry_size(index)?;
        let copied = io::copy(&mut self.entry_reader(index)?, out)?;
        check_complete(copied, size)?;
        Ok(copied)
    }

    fn entry_size(&self, index: usize) -> Result<u64> {
        self.entries
            .get(index)
            .map(|e| e.size as u64)
            .ok_or_else(|| Error::EntryNotFound(format!("#{}", index)))
    }
}

impl<R> DatFile<R> {
    /// All entries in index order
    pub fn entries(&self) -> &[DatEntry] {
        &self.entries
    }

    /// Entry at position `index`
    pub fn entry(&self, index: usize) -> Option<&DatEntry> {
        self.entries.get(index)
    }

    /// Look up an entry by name
    pub fn get_entry(&self, name: impl AsRef<[u8]>) -> Option<&DatEntry> {
        self.index_of(name).map(|i| &self.entries[i])
    }

    /// Position of the entry called `name`
    pub fn index_of(&self, name: impl AsRef<[u8]>) -> Option<usize> {
        self.names.get(name.as_ref()).copied()
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.names.contains_key(name.as_ref())
    }

    /// Number of entries (used slots)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots in the index, used or free
    pub fn index_size(&self) -> u32 {
        self.index_size
    }

    pub fn free_slots(&self) -> u32 {
        self.index_size - self.entries.len() as u32
    }

    /// Length of the archive in bytes
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Sum of all entry content sizes
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size as u64).sum()
    }

    /// Header, index and record prefix bytes (everything except content)
    pub fn overhead(&self) -> u64 {
        index_len(self.index_size)
            + self
                .entries
                .iter()
                .map(|e| RECORD_HEADER_SIZE + e.name.len() as u64)
                .sum::<u64>()
    }

    /// Bytes not accounted for by the index or any record
    ///
    /// Always zero for archives written by [`crate::DatWriter`].
    pub fn slack(&self) -> u64 {
        self.file_len
            .saturating_sub(self.overhead() + self.total_size())
    }
}

fn check_complete(read: u64, expected: u64) -> Result<()> {
    if read != expected {
        return Err(Error::format(format!(
            "Entry content truncated: read {} of {} bytes",
            read, expected
        )));
    }
    Ok(())
}

/// Read the slot table and every record prefix it points to
fn read_index<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
    options: &DatOpenOptions,
) -> Result<(u32, Vec<DatEntry>)> {
    if file_len < HEADER_SIZE {
        return Err(Error::format(format!(
            "File is {} bytes, too short for the {}-byte header",
            file_len, HEADER_SIZE
        )));
    }

    reader.seek(SeekFrom::Start(0))?;
    let index_size = reader.read_u32::<LittleEndian>()?;
    let index_end = index_len(index_size);
    if index_end > file_len {
        return Err(Error::format(format!(
            "Index declares {} slots ({} bytes) but the file is only {} bytes",
            index_size, index_end, file_len
        )));
    }

    let mut slots = Vec::with_capacity(index_size as usize);
    for _ in 0..index_size {
        slots.push(reader.read_u32::<LittleEndian>()?);
    }

    let mut entries = Vec::new();
    for (slot, &record_offset) in slots.iter().enumerate() {
        if record_offset == 0 {
            continue;
        }
        let slot = slot as u32;
        let record_offset = record_offset as u64;

        if record_offset < index_end {
            return Err(Error::format(format!(
                "Slot {} points to {:#x}, inside the index",
                slot, record_offset
            )));
        }
        if record_offset + RECORD_HEADER_SIZE > file_len {
            return Err(Error::format(format!(
                "Slot {} record at {:#x} extends past end of file",
                slot, record_offset
            )));
        }

        reader.seek(SeekFrom::Start(record_offset))?;
        let size = reader.read_u32::<LittleEndian>()?;
        let name_len = reader.read_u32::<LittleEndian>()? as u64;

        let name_start = record_offset + RECORD_HEADER_SIZE;
        if name_len > file_len - name_start {
            return Err(Error::format(format!(
                "Slot {} name length {} exceeds the {} bytes remaining",
                slot,
                name_len,
                file_len - name_start
            )));
        }

        let mut name = vec![0u8; name_len as usize];
        reader.read_exact(&mut name)?;

        let offset = name_start + name_len;
        if offset + size as u64 > file_len {
            return Err(Error::format(format!(
                "Entry {} ({} bytes at {:#x}) extends past end of file ({} bytes)",
                String::from_utf8_lossy(&name),
                size,
                offset,
                file_len
            )));
        }

        debug!(slot, name = %String::from_utf8_lossy(&name), size, offset, "read entry");

        entries.push(DatEntry {
            name,
            size,
            offset,
            slot,
            record_offset,
        });
    }

    if options.check_overlap {
        check_overlap(&entries)?;
    }

    Ok((index_size, entries))
}

fn check_overlap(entries: &[DatEntry]) -> Result<()> {
    let mut spans: Vec<&DatEntry> = entries.iter().collect();
    spans.sort_by_key(|e| e.record_offset);

    for pair in spans.windows(2) {
        if pair[0].end() > pair[1].record_offset {
            return Err(Error::format(format!(
                "Entries {} and {} overlap",
                pair[0].name_lossy(),
                pair[1].name_lossy()
            )));
        }
    }
    Ok(())
}
