//! # Logtable — append-only columnar table engine
//!
//! The simplest table engine of the family: rows are appended in blocks and
//! scanned back, optionally in parallel. No indexes, no updates, no deletes,
//! no random access: the value is in the precise on-disk layout that lets
//! concurrent writers and readers agree on file state.
//!
//! ## On-disk layout
//!
//! One directory per table (named by the escaped table name):
//!
//! ```text
//! <root>/<escape(name)>/
//! ├── <stream>.bin      one per byte stream: concatenated compressed frames
//! ├── __marks.mrk       packed matrix of (rows, offset) marks
//! └── sizes.json        size journal: file name -> committed byte size
//! ```
//!
//! A *stream* is one byte sequence a column type serializes into. A scalar
//! column has one, an array column adds a sizes stream that columns of the
//! same nested table share. The marks file is the authoritative index: one
//! row per committed block, one 16-byte `(rows, offset)` cell per stream in
//! `column_index` order. A scan partitions the mark rows into contiguous
//! ranges and seeks every stream straight to `marks[mark_begin].offset`.
//!
//! ## Module responsibilities
//!
//! | Module       | Purpose                                                  |
//! |--------------|----------------------------------------------------------|
//! | `lib.rs`     | [`LogTable`] descriptor: schema, stream registry, lock   |
//! | [`marks`]    | [`Mark`], packed marks file loading and validation       |
//! | [`writer`]   | [`LogWriter`]: exclusive append session                  |
//! | [`reader`]   | [`LogReader`]: shared-lock scan stream                   |
//! | [`journal`]  | [`SizeJournal`]: `sizes.json` integrity journal          |
//!
//! ## Concurrency
//!
//! One reader-writer lock per descriptor. A [`LogWriter`] holds it
//! exclusively from construction through `finish`, so `file size at open +
//! bytes written` is a correct prediction of every mark offset. Each
//! [`LogReader`] holds it shared for its whole lifetime, so a block becomes
//! visible only after its marks row is appended and the in-memory mark
//! vectors are updated. The engine assumes no external process appends to
//! the table directory.

mod error;
mod journal;
mod marks;
mod reader;
mod writer;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use columns::{escape_for_file_name, stream_name};
use parking_lot::RwLock;

pub use columns::{Block, Column, DataType, Field};
pub use error::{Error, Result};
pub use journal::{SizeJournal, SIZES_FILE_NAME};
pub use marks::{Mark, MARKS_FILE_NAME, MARK_SIZE};
pub use reader::LogReader;
pub use writer::LogWriter;

/// Extension of per-stream data files.
pub const DATA_FILE_EXTENSION: &str = "bin";

/// Default bound on the raw bytes of one compressed frame (1 MiB).
pub const DEFAULT_MAX_COMPRESS_BLOCK_SIZE: usize = 1024 * 1024;

/// Default number of rows per block produced by a scan.
pub const DEFAULT_BLOCK_SIZE: usize = 65536;

/// Default cap on a reader's per-file buffer (1 MiB).
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Everything about one registered byte stream except its data file, which
/// is derived from the table directory on demand (so a rename cannot leave a
/// stale path behind).
#[derive(Debug)]
pub(crate) struct StreamFile {
    /// Dense index assigned in first-seen order at construction; fixes this
    /// stream's cell position inside each marks-file row.
    pub column_index: usize,
    /// In-memory copy of this stream's marks, loaded lazily and then only
    /// appended to.
    pub marks: Vec<Mark>,
}

/// Mutable descriptor state guarded by the table lock.
#[derive(Debug)]
pub(crate) struct TableState {
    /// Current table directory; rebound by `rename`.
    pub dir: PathBuf,
    /// Stream name → stream record.
    pub files: HashMap<String, StreamFile>,
    /// Stream names ordered by `column_index`.
    pub stream_order: Vec<String>,
    pub marks_loaded: bool,
    pub journal: SizeJournal,
}

impl TableState {
    pub fn data_path(&self, stream: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stream, DATA_FILE_EXTENSION))
    }

    pub fn marks_path(&self) -> PathBuf {
        self.dir.join(MARKS_FILE_NAME)
    }
}

/// A table descriptor: construct once per process per table, then append
/// through [`write`](Self::write) and scan through [`read`](Self::read).
pub struct LogTable {
    pub(crate) schema: Vec<Field>,
    pub(crate) max_compress_block_size: usize,
    pub(crate) state: RwLock<TableState>,
}

impl LogTable {
    /// Opens (or creates) the table `<root>/<escape(name)>/`.
    ///
    /// Walks the schema in order and registers one stream record per distinct
    /// stream name, assigning dense `column_index` values in first-seen
    /// order. Columns of one nested table legitimately map to the same sizes
    /// stream, which is registered once.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyColumns`] for an empty schema,
    /// [`Error::DuplicateColumn`] for a repeated column name.
    pub fn open(
        root: impl AsRef<Path>,
        name: &str,
        schema: Vec<Field>,
        max_compress_block_size: usize,
    ) -> Result<LogTable> {
        if schema.is_empty() {
            return Err(Error::EmptyColumns);
        }

        let dir = root.as_ref().join(escape_for_file_name(name));
        fs::create_dir_all(&dir)?;

        let mut files: HashMap<String, StreamFile> = HashMap::new();
        let mut stream_order = Vec::new();
        let mut seen_columns = std::collections::HashSet::new();

        for field in &schema {
            if !seen_columns.insert(field.name.clone()) {
                return Err(Error::DuplicateColumn(field.name.clone()));
            }
            for path in field.data_type.substream_paths() {
                let stream = stream_name(&field.name, &path);
                if !files.contains_key(&stream) {
                    files.insert(
                        stream.clone(),
                        StreamFile {
                            column_index: stream_order.len(),
                            marks: Vec::new(),
                        },
                    );
                    stream_order.push(stream);
                }
            }
        }

        let journal = SizeJournal::new(dir.join(SIZES_FILE_NAME));
        Ok(LogTable {
            schema,
            max_compress_block_size,
            state: RwLock::new(TableState {
                dir,
                files,
                stream_order,
                marks_loaded: false,
                journal,
            }),
        })
    }

    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub(crate) fn field(&self, name: &str) -> Option<&Field> {
        self.schema.iter().find(|f| f.name == name)
    }

    /// Number of registered streams, which is the width of one marks-file row.
    pub fn file_count(&self) -> usize {
        self.state.read_recursive().stream_order.len()
    }

    /// Loads the marks file at most once, under the exclusive lock. The
    /// loaded check runs under a shared guard first so a thread that already
    /// holds scan streams on this table cannot deadlock against itself.
    fn load_marks(&self) -> Result<()> {
        if self.state.read_recursive().marks_loaded {
            return Ok(());
        }
        let mut state = self.state.write();
        marks::load_marks(&mut state)
    }

    /// Starts an append session. The session holds the table lock
    /// exclusively until it is finished or dropped.
    pub fn write(&self) -> Result<LogWriter<'_>> {
        self.load_marks()?;
        let state = self.state.write();
        let marks_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(state.marks_path())?;
        Ok(LogWriter::new(
            self,
            state,
            BufWriter::with_capacity(4096, marks_file),
        ))
    }

    /// Partitions a scan over `column_names` into at most `num_streams`
    /// independent readers by contiguous mark ranges.
    ///
    /// The partition is computed over the marks of the row-count-carrying
    /// stream: the first substream of the first schema column (unwrapping a
    /// nullable), whose mark rows equal the table's cumulative row counts.
    /// Each returned reader yields blocks of at most `block_size` rows and
    /// buffers each data file with at most `max_read_buffer` bytes.
    pub fn read(
        &self,
        column_names: &[&str],
        num_streams: usize,
        block_size: usize,
        max_read_buffer: usize,
    ) -> Result<Vec<LogReader<'_>>> {
        let fields = self.projected_fields(column_names)?;
        self.load_marks()?;

        let state = self.state.read_recursive();
        let reference = self.row_count_stream(&state)?;
        let marks = &state
            .files
            .get(&reference)
            .ok_or_else(|| Error::Logical(format!("cannot find stream {}", reference)))?
            .marks;
        let marks_size = marks.len();
        let num_streams = num_streams.min(marks_size);

        let mut readers = Vec::with_capacity(num_streams);
        for stream in 0..num_streams {
            let mark_begin = stream * marks_size / num_streams;
            let mark_end = (stream + 1) * marks_size / num_streams;
            let rows_begin = if mark_begin > 0 {
                marks[mark_begin - 1].rows
            } else {
                0
            };
            let rows_end = if mark_end > 0 { marks[mark_end - 1].rows } else { 0 };

            readers.push(LogReader::new(
                self.state.read_recursive(),
                fields.clone(),
                block_size,
                mark_begin,
                (rows_end - rows_begin) as usize,
                max_read_buffer,
            ));
        }
        Ok(readers)
    }

    /// Verifies the size journal against the files on disk.
    pub fn check_data(&self) -> Result<bool> {
        let state = self.state.read_recursive();
        state.journal.check(&state.dir)
    }

    /// Moves the table directory under `new_root` as `new_name` and rebinds
    /// all paths. Not crash-atomic; callers that need atomicity must
    /// coordinate externally.
    pub fn rename(&self, new_root: impl AsRef<Path>, new_name: &str) -> Result<()> {
        let mut state = self.state.write();
        fs::create_dir_all(new_root.as_ref())?;
        let new_dir = new_root.as_ref().join(escape_for_file_name(new_name));
        fs::rename(&state.dir, &new_dir)?;
        state.dir = new_dir;
        let journal_path = state.dir.join(SIZES_FILE_NAME);
        state.journal.set_path(journal_path);
        Ok(())
    }

    /// Validates a block against the schema: exactly the schema's columns,
    /// matching types, equal row counts.
    pub(crate) fn check_block(&self, block: &Block) -> Result<()> {
        if block.columns().len() != self.schema.len() {
            return Err(Error::Logical(format!(
                "block has {} columns, table expects {}",
                block.columns().len(),
                self.schema.len()
            )));
        }
        let rows = block.rows();
        for (name, column) in block.columns() {
            let field = self
                .field(name)
                .ok_or_else(|| Error::NoSuchColumn(name.clone()))?;
            if column.data_type() != field.data_type {
                return Err(Error::Logical(format!(
                    "type mismatch for column {}: block has {:?}, table expects {:?}",
                    name,
                    column.data_type(),
                    field.data_type
                )));
            }
            if column.len() != rows {
                return Err(Error::Logical(format!(
                    "column {} has {} rows, block has {}",
                    name,
                    column.len(),
                    rows
                )));
            }
        }
        Ok(())
    }

    fn projected_fields(&self, column_names: &[&str]) -> Result<Vec<Field>> {
        column_names
            .iter()
            .map(|name| {
                self.field(name)
                    .cloned()
                    .ok_or_else(|| Error::NoSuchColumn(name.to_string()))
            })
            .collect()
    }

    /// The stream whose marks carry the table's real row counts: the first
    /// substream of the first schema column, unwrapping a nullable. For an
    /// array column this is the sizes stream: one logical row per array.
    fn row_count_stream(&self, state: &TableState) -> Result<String> {
        let field = self
            .schema
            .first()
            .ok_or_else(|| Error::Logical("table has no columns".into()))?;
        let data_type = field.data_type.unwrap_nullable();
        let paths = data_type.substream_paths();
        let first = paths
            .first()
            .ok_or_else(|| Error::Logical(format!("type of column {} emits no streams", field.name)))?;
        let stream = stream_name(&field.name, first);
        if !state.files.contains_key(&stream) {
            return Err(Error::Logical(format!("cannot find stream {}", stream)));
        }
        Ok(stream)
    }
}

impl std::fmt::Debug for LogTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read_recursive();
        f.debug_struct("LogTable")
            .field("dir", &state.dir)
            .field("columns", &self.schema.len())
            .field("file_count", &state.stream_order.len())
            .field("marks_loaded", &state.marks_loaded)
            .finish()
    }
}

#[cfg(test)]
mod tests;
