use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use codec::CompressedWriter;
use columns::{stream_name, Block, Column, Field, StreamSink, Substream};
use parking_lot::RwLockWriteGuard;

use crate::error::{from_io, Error, Result};
use crate::marks::{Mark, MARKS_FILE_NAME};
use crate::{LogTable, TableState, DATA_FILE_EXTENSION};

/// One per-stream append session: a compressing writer layered over the
/// plain append file, plus the file's byte size captured at open.
struct WriteStream {
    /// How many bytes were in the plain file when this session opened it.
    /// Combined with the codec's frame-byte counter this predicts the exact
    /// on-disk offset of the next frame; the session holds the table lock
    /// exclusively, so no one else can move the file position.
    plain_offset: u64,
    compressed: CompressedWriter<BufWriter<File>>,
}

/// An exclusive append session.
///
/// Accepts any number of [`write`](Self::write) calls followed by
/// [`finish`](Self::finish); dropping an unfinished writer finishes it
/// best-effort. Each written block becomes visible to readers atomically:
/// its marks row is appended to the marks file and mirrored into the
/// in-memory mark vectors before the lock is released.
pub struct LogWriter<'a> {
    table: &'a LogTable,
    state: RwLockWriteGuard<'a, TableState>,
    /// Per-stream sessions, opened lazily on first use.
    streams: BTreeMap<String, WriteStream>,
    marks_out: BufWriter<File>,
    done: bool,
}

impl std::fmt::Debug for LogWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("table", &self.table)
            .field("open_streams", &self.streams.len())
            .field("done", &self.done)
            .finish()
    }
}

/// Stream resolver handed to the bulk serializer: returns the compressing
/// writer of each substream, or `None` for a stream already written this
/// block (shared array sizes).
struct WriterSink<'w> {
    column_name: &'w str,
    streams: &'w mut BTreeMap<String, WriteStream>,
    written_streams: &'w HashSet<String>,
}

impl StreamSink for WriterSink<'_> {
    fn sink(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Write>> {
        let name = stream_name(self.column_name, path);
        if self.written_streams.contains(&name) {
            return Ok(None);
        }
        match self.streams.get_mut(&name) {
            Some(stream) => Ok(Some(&mut stream.compressed as &mut dyn Write)),
            None => Err(crate::error::to_io(Error::Logical(format!(
                "stream {} was not created while writing block",
                name
            )))),
        }
    }
}

impl<'a> LogWriter<'a> {
    pub(crate) fn new(
        table: &'a LogTable,
        state: RwLockWriteGuard<'a, TableState>,
        marks_out: BufWriter<File>,
    ) -> Self {
        Self {
            table,
            state,
            streams: BTreeMap::new(),
            marks_out,
            done: false,
        }
    }

    /// Appends one block. The block must match the schema exactly.
    pub fn write(&mut self, block: &Block) -> Result<()> {
        self.table.check_block(block)?;

        let mut written_streams = HashSet::new();
        let mut marks: Vec<(usize, Mark)> = Vec::with_capacity(self.state.files.len());

        for (name, column) in block.columns() {
            let field = self
                .table
                .field(name)
                .ok_or_else(|| Error::NoSuchColumn(name.clone()))?
                .clone();
            self.write_column(&field, column, &mut marks, &mut written_streams)?;
        }

        self.write_marks(marks)
    }

    fn write_column(
        &mut self,
        field: &Field,
        column: &Column,
        marks: &mut Vec<(usize, Mark)>,
        written_streams: &mut HashSet<String>,
    ) -> Result<()> {
        let paths = field.data_type.substream_paths();

        // Open a session for every substream this block touches for the
        // first time, and record its mark before any data is written: the
        // mark's offset is the file position the block's first frame will
        // land at.
        for path in &paths {
            let name = stream_name(&field.name, path);
            if written_streams.contains(&name) {
                continue;
            }
            if !self.streams.contains_key(&name) {
                let data_path = self.state.data_path(&name);
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&data_path)?;
                let plain_offset = file.metadata()?.len();
                self.streams.insert(
                    name.clone(),
                    WriteStream {
                        plain_offset,
                        compressed: CompressedWriter::new(
                            BufWriter::with_capacity(self.table.max_compress_block_size, file),
                            self.table.max_compress_block_size,
                        ),
                    },
                );
            }

            let stream = self.streams.get(&name).ok_or_else(|| {
                Error::Logical(format!(
                    "stream {} was not created while writing block",
                    name
                ))
            })?;
            let info = self.state.files.get(&name).ok_or_else(|| {
                Error::Logical(format!("no information about stream {} in table", name))
            })?;
            marks.push((
                info.column_index,
                Mark {
                    rows: info.marks.last().map_or(0, |m| m.rows) + column.len() as u64,
                    offset: stream.plain_offset + stream.compressed.compressed_bytes(),
                },
            ));
        }

        {
            let mut sink = WriterSink {
                column_name: &field.name,
                streams: &mut self.streams,
                written_streams: &*written_streams,
            };
            field
                .data_type
                .serialize_bulk(column, &mut sink)
                .map_err(from_io)?;
        }

        // Cut each first-time stream's frame so the next block starts on a
        // frame boundary, then mark the stream as written for this block.
        for path in &paths {
            let name = stream_name(&field.name, path);
            if !written_streams.insert(name.clone()) {
                continue;
            }
            let stream = self.streams.get_mut(&name).ok_or_else(|| {
                Error::Logical(format!(
                    "stream {} was not created while writing block",
                    name
                ))
            })?;
            stream.compressed.finish_block()?;
        }

        Ok(())
    }

    /// Appends one marks row: exactly one mark per registered stream, in
    /// `column_index` order, mirrored into the in-memory mark vectors.
    fn write_marks(&mut self, mut marks: Vec<(usize, Mark)>) -> Result<()> {
        if marks.len() != self.state.files.len() {
            return Err(Error::Logical(format!(
                "wrong number of marks generated from block: {} instead of {}",
                marks.len(),
                self.state.files.len()
            )));
        }

        marks.sort_by_key(|&(column_index, _)| column_index);

        let state = &mut *self.state;
        for (column_index, mark) in marks {
            self.marks_out.write_u64::<LittleEndian>(mark.rows)?;
            self.marks_out.write_u64::<LittleEndian>(mark.offset)?;

            let name = state.stream_order.get(column_index).ok_or_else(|| {
                Error::Logical(format!("mark for unknown column index {}", column_index))
            })?;
            let file = state.files.get_mut(name).ok_or_else(|| {
                Error::Logical(format!("no information about stream {} in table", name))
            })?;
            file.marks.push(mark);
        }
        Ok(())
    }

    /// Commits the session: flushes the marks file, finalizes every touched
    /// stream, and re-measures the touched files into the size journal.
    /// Idempotent: a second call (or the drop after a call) is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;

        self.marks_out.flush()?;
        for stream in self.streams.values_mut() {
            stream.compressed.flush()?;
        }

        let mut touched: Vec<String> = self
            .streams
            .keys()
            .map(|name| format!("{}.{}", name, DATA_FILE_EXTENSION))
            .collect();
        touched.push(MARKS_FILE_NAME.to_string());
        self.state.journal.update(&self.state.dir, &touched)?;

        self.streams.clear();
        Ok(())
    }
}

impl Drop for LogWriter<'_> {
    fn drop(&mut self) {
        // Report but never propagate out of a destructor.
        if let Err(e) = self.finish() {
            log::error!("failed to finish log table append session: {}", e);
        }
    }
}
