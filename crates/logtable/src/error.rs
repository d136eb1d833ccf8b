use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur in the Log table engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An empty list of columns was passed at table construction.
    #[error("empty list of columns passed to log table")]
    EmptyColumns,

    /// A read or write referenced a column the schema does not have.
    #[error("no column {0} in table")]
    NoSuchColumn(String),

    /// The schema passed at construction repeats a column name.
    #[error("duplicate column {0} in table schema")]
    DuplicateColumn(String),

    /// The marks file size is not a multiple of one mark row
    /// (`file_count * 16` bytes): the file is corrupt.
    #[error("size of marks file {} is inconsistent: {size} bytes", .path.display())]
    MarksInconsistent { path: PathBuf, size: u64 },

    /// An internal invariant was violated: wrong number of marks for a block,
    /// a stream the serializer asked for that was never registered, or a
    /// block that does not match the schema.
    #[error("logical error: {0}")]
    Logical(String),

    /// An I/O error raised while reading one column, annotated with the
    /// column name and the table directory.
    #[error("while reading column {column} at {}: {source}", .path.display())]
    Column {
        column: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A log table engine result.
pub type Result<T> = std::result::Result<T, Error>;

/// Recovers a typed engine error smuggled through an `io::Error` by a stream
/// resolver; any genuine I/O error passes through unchanged.
pub(crate) fn from_io(e: io::Error) -> Error {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
        Some(Error::Logical(msg)) => Error::Logical(msg.clone()),
        _ => Error::Io(e),
    }
}

/// Like [`from_io`], but wraps genuine I/O errors with the column being read
/// and the table directory.
pub(crate) fn annotate_io(e: io::Error, column: &str, dir: &Path) -> Error {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
        Some(Error::Logical(msg)) => Error::Logical(msg.clone()),
        _ => Error::Column {
            column: column.to_string(),
            path: dir.to_path_buf(),
            source: e,
        },
    }
}

/// Wraps a typed engine error into an `io::Error` so it can cross a
/// `std::io` boundary (stream resolvers) and be recovered on the other side.
pub(crate) fn to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
