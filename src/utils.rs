//! General utility functions for ftldat
//!
//! Size formatting, name filters, directory walking and the conversion
//! between archive entry names and filesystem paths.

use anyhow::Context;
use globset::{Glob, GlobMatcher};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Format a file size in human-readable form (B, KB, MB, GB)
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}

/// Create a glob matcher from a pattern string
///
/// Handles common patterns:
/// - `*.ext` becomes `**/*.ext` (match in any directory)
/// - Plain text without wildcards becomes `**/*text*` (substring search)
pub fn create_glob_matcher(pattern: &str) -> anyhow::Result<GlobMatcher> {
    let pattern = if pattern.starts_with("*.") {
        format!("**/{}", pattern)
    } else if !pattern.contains('*') && !pattern.contains('?') {
        format!("**/*{}*", pattern)
    } else {
        pattern.to_string()
    };

    let glob = Glob::new(&pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
    Ok(glob.compile_matcher())
}

/// Check if a name matches the optional filter
pub fn matches_filter(name: &str, matcher: Option<&GlobMatcher>) -> bool {
    match matcher {
        Some(m) => m.is_match(name),
        None => true,
    }
}

/// Default unpack/pack directory for an archive: `<archive>-unpacked`
pub fn default_unpacked_dir(archive: &Path) -> PathBuf {
    let mut dir = archive.as_os_str().to_owned();
    dir.push("-unpacked");
    PathBuf::from(dir)
}

/// Collect every regular file below `dir` with its entry name
///
/// The result is sorted by entry name bytes, so the same tree always packs
/// to the same archive whatever order the filesystem lists it in. Symlinks
/// and other special files are skipped.
pub fn collect_files(dir: &Path) -> Result<Vec<(Vec<u8>, PathBuf)>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            warn!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| Error::Path(format!("{} is outside {}", entry.path().display(), dir.display())))?;
        files.push((path_to_entry_name(relative)?, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Convert a relative filesystem path to a `/` separated entry name
pub fn path_to_entry_name(relative: &Path) -> Result<Vec<u8>> {
    let mut name = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                if !name.is_empty() {
                    name.push(b'/');
                }
                name.extend_from_slice(&os_str_bytes(part, relative)?);
            }
            Component::CurDir => continue,
            _ => {
                return Err(Error::Path(format!(
                    "{} is not a plain relative path",
                    relative.display()
                )))
            }
        }
    }

    if name.is_empty() {
        return Err(Error::Path(format!("{} has no file name", relative.display())));
    }
    Ok(name)
}

/// Convert an entry name to a relative path that stays inside the
/// extraction directory
///
/// Rejects empty names, absolute names, `..` components, empty components,
/// backslashes, NUL bytes and (on Windows) drive or stream separators.
pub fn entry_name_to_path(name: &[u8]) -> Result<PathBuf> {
    let display = String::from_utf8_lossy(name);
    let reject = |why: &str| Error::Path(format!("{}: {}", display, why));

    if name.is_empty() {
        return Err(reject("empty name"));
    }
    if name.contains(&0) {
        return Err(reject("contains a NUL byte"));
    }
    if name.contains(&b'\\') {
        return Err(reject("contains a backslash"));
    }
    if name[0] == b'/' {
        return Err(reject("absolute path not allowed"));
    }
    if cfg!(windows) && name.contains(&b':') {
        return Err(reject("drive or stream separator not allowed"));
    }

    let mut path = PathBuf::new();
    for part in name.split(|&b| b == b'/') {
        match part {
            b"" => return Err(reject("empty path component")),
            b"." => continue,
            b".." => return Err(reject("parent directory traversal not allowed")),
            part => path.push(component_from_bytes(part).ok_or_else(|| reject("not valid UTF-8"))?),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(reject("no file name"));
    }
    Ok(path)
}

#[cfg(unix)]
fn os_str_bytes(part: &std::ffi::OsStr, _whole: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(part.as_bytes().to_vec())
}

#[cfg(not(unix))]
fn os_str_bytes(part: &std::ffi::OsStr, whole: &Path) -> Result<Vec<u8>> {
    part.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| Error::Path(format!("{} is not valid UTF-8", whole.display())))
}

#[cfg(unix)]
fn component_from_bytes(part: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(part)))
}

#[cfg(not(unix))]
fn component_from_bytes(part: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(part).ok().map(PathBuf::from)
}
