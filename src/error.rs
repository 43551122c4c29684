//! Error types for ftldat

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ftldat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid .dat file: {0}")]
    Format(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Archive too large: {0}")]
    TooLarge(String),

    #[error("Path error: {0}")]
    Path(String),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),
}

impl Error {
    /// Process exit status for this kind of error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(_) => 1,
            Error::Format(_) => 2,
            Error::Write(_) | Error::TooLarge(_) => 3,
            Error::Path(_) => 4,
            Error::NotFound(_) => 5,
            Error::EntryNotFound(_) | Error::DuplicateEntry(_) => 6,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

/// Result type alias for ftldat operations
pub type Result<T> = std::result::Result<T, Error>;
