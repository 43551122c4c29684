//! # ftldat
//!
//! A Rust library for reading, writing and modifying the `.dat` resource
//! archives of *FTL: Faster Than Light* (`data.dat`, `resource.dat`).
//!
//! ## Overview
//!
//! A `.dat` file is an index of record offsets followed by uncompressed
//! records, each holding a size, a name and the file content. See
//! [`dat`] for the exact layout. This library provides:
//!
//! - Reading archives and streaming single entries without loading the rest
//! - Creating new archives, written atomically
//! - Modifying existing archives (add/replace/append/remove, repack)
//! - Unpacking to and packing from directories with safe path handling
//!
//! ## Streaming one entry
//!
//! Only the index is read on open. Entry content is read on request, so a
//! single sprite can be copied out of `resource.dat` without touching the
//! rest of the archive.
//!
//! ```rust,no_run
//! use ftldat::DatFile;
//! use std::io;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut dat = DatFile::open("resource.dat")?;
//!     println!("{}/{} slots used", dat.len(), dat.index_size());
//!
//!     if let Some(i) = dat.index_of("img/ship/kestrel_base.png") {
//!         let mut out = std::fs::File::create("kestrel_base.png")?;
//!         io::copy(&mut dat.entry_reader(i)?, &mut out)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Packing with spare index slots
//!
//! ```rust,no_run
//! use ftldat::{DatWriteEntry, DatWriteOptions, DatWriter};
//!
//! fn main() -> anyhow::Result<()> {
//!     let options = DatWriteOptions { index_size: 2048 };
//!     let mut writer = DatWriter::create_with_options("data.dat", options)?;
//!
//!     writer.add_file("mod/blueprints.xml", "data/blueprints.xml")?;
//!     writer.add_entry(DatWriteEntry::new(
//!         "data/events_mod.xml",
//!         b"<FTL></FTL>".to_vec(),
//!     ))?;
//!
//!     // nothing exists at data.dat until this succeeds
//!     writer.finish()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Patching an installed archive
//!
//! [`DatModifier`] rewrites the whole archive, copying untouched entries
//! straight from the old file. Saving over the source is fine.
//!
//! ```rust,no_run
//! use ftldat::{DatModifier, DatWriteEntry};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut modifier = DatModifier::open("data.dat")?;
//!     modifier.append_to("data/events.xml", b"<!-- patched -->")?;
//!     modifier.add(DatWriteEntry::from_file("data/sector_data.xml", "sector_data.xml")?);
//!     modifier.remove("data/tutorial.xml");
//!     modifier.save("data.dat")?;
//!     Ok(())
//! }
//! ```

pub mod dat;
pub mod dat_utils;
pub mod dat_writer;
pub mod error;
pub mod utils;

pub use dat::{DatEntry, DatFile, DatOpenOptions};
pub use dat_writer::{DatModifier, DatWriteEntry, DatWriteOptions, DatWriter, EntrySource};
pub use error::{Error, Result};
pub use utils::{collect_files, create_glob_matcher, format_size, matches_filter};
