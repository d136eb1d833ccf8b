use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use codec::CompressedReader;
use columns::{nested_table_name, stream_name, Block, Column, DataType, Field, StreamSource, Substream};
use parking_lot::RwLockReadGuard;

use crate::error::{annotate_io, to_io, Error, Result};
use crate::TableState;

/// A decompressing stream over one data file, seeked to the reader's
/// starting mark. Dropping it closes both the decompressor and the
/// underlying buffered file handle.
type ReadStream = CompressedReader<BufReader<File>>;

/// One scan stream over a contiguous range of committed blocks.
///
/// Holds the table lock shared for its whole lifetime, opens each data file
/// lazily on first use, and yields blocks of at most `block_size` rows until
/// its row budget is exhausted. On exhaustion all file handles are released,
/// so a pool of mostly-idle readers does not pin buffers.
pub struct LogReader<'a> {
    state: RwLockReadGuard<'a, TableState>,
    fields: Vec<Field>,
    block_size: usize,
    /// Index of the first mark (= block) this reader covers.
    mark_number: usize,
    /// Total rows this reader may produce.
    rows_limit: usize,
    rows_read: usize,
    max_read_buffer: usize,
    streams: HashMap<String, ReadStream>,
}

impl std::fmt::Debug for LogReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("fields", &self.fields)
            .field("block_size", &self.block_size)
            .field("mark_number", &self.mark_number)
            .field("rows_limit", &self.rows_limit)
            .field("rows_read", &self.rows_read)
            .field("max_read_buffer", &self.max_read_buffer)
            .field("open_streams", &self.streams.len())
            .finish()
    }
}

/// Stream resolver handed to the bulk deserializer: opens and seeks data
/// files on demand, returns `None` for a sizes stream whose offsets were
/// already read by an earlier column of the same nested table.
struct ReaderSource<'r> {
    column_name: &'r str,
    read_offsets: bool,
    state: &'r TableState,
    streams: &'r mut HashMap<String, ReadStream>,
    mark_number: usize,
    max_read_buffer: usize,
}

impl StreamSource for ReaderSource<'_> {
    fn source(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Read>> {
        if !self.read_offsets && path.last() == Some(&Substream::ArraySizes) {
            return Ok(None);
        }

        let name = stream_name(self.column_name, path);
        let info = self.state.files.get(&name).ok_or_else(|| {
            to_io(Error::Logical(format!(
                "no information about stream {} in table",
                name
            )))
        })?;

        if !self.streams.contains_key(&name) {
            let data_path = self.state.data_path(&name);
            let file_size = fs::metadata(&data_path)?.len();
            let mut file = File::open(&data_path)?;
            if self.mark_number > 0 {
                let offset = info
                    .marks
                    .get(self.mark_number)
                    .map(|mark| mark.offset)
                    .ok_or_else(|| {
                        to_io(Error::Logical(format!(
                            "mark {} out of range for stream {}",
                            self.mark_number, name
                        )))
                    })?;
                file.seek(SeekFrom::Start(offset))?;
            }
            let capacity = (self.max_read_buffer as u64).min(file_size).max(1) as usize;
            self.streams.insert(
                name.clone(),
                CompressedReader::new(BufReader::with_capacity(capacity, file)),
            );
        }

        Ok(self
            .streams
            .get_mut(&name)
            .map(|stream| stream as &mut dyn Read))
    }
}

impl<'a> LogReader<'a> {
    pub(crate) fn new(
        state: RwLockReadGuard<'a, TableState>,
        fields: Vec<Field>,
        block_size: usize,
        mark_number: usize,
        rows_limit: usize,
        max_read_buffer: usize,
    ) -> Self {
        Self {
            state,
            fields,
            block_size,
            mark_number,
            rows_limit,
            rows_read: 0,
            max_read_buffer,
            streams: HashMap::new(),
        }
    }

    /// Produces the next block, or `None` at end of stream.
    ///
    /// Columns are read in request order; array columns of one nested table
    /// share their offsets, so the shared sizes stream is read exactly once
    /// per block.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.rows_read == self.rows_limit {
            return Ok(None);
        }

        // An empty directory means a freshly created table.
        if fs::read_dir(&self.state.dir)?.next().is_none() {
            return Ok(None);
        }

        let max_rows = self.block_size.min(self.rows_limit - self.rows_read);
        let mut block = Block::new();

        // Offsets shared between array columns of one nested table, within
        // this block only.
        let mut offset_columns: HashMap<String, Vec<u64>> = HashMap::new();

        let state = &*self.state;
        let streams = &mut self.streams;

        for field in &self.fields {
            let mut read_offsets = true;
            let mut column = field.data_type.create_column();

            if let DataType::Array(_) = field.data_type {
                let nested = nested_table_name(&field.name);
                if let Some(offsets) = offset_columns.get(nested) {
                    // An earlier column of this block already read the
                    // shared sizes stream.
                    read_offsets = false;
                    if let Column::Array { offsets: own, .. } = &mut column {
                        *own = offsets.clone();
                    }
                }
            }

            let mut source = ReaderSource {
                column_name: &field.name,
                read_offsets,
                state,
                streams: &mut *streams,
                mark_number: self.mark_number,
                max_read_buffer: self.max_read_buffer,
            };
            field
                .data_type
                .deserialize_bulk(&mut column, &mut source, max_rows)
                .map_err(|e| annotate_io(e, &field.name, &state.dir))?;

            if read_offsets {
                if let Column::Array { offsets, .. } = &column {
                    offset_columns.insert(nested_table_name(&field.name).to_string(), offsets.clone());
                }
            }

            if !column.is_empty() {
                block.push(field.name.clone(), column);
            }
        }

        if block.is_empty() {
            // Nothing left in this range; release the file handles before
            // signalling end of stream.
            self.streams.clear();
            return Ok(None);
        }

        self.rows_read += block.rows();
        if self.rows_read == self.rows_limit {
            self.streams.clear();
        }
        Ok(Some(block))
    }

    /// Rows produced so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Total rows this reader will produce.
    pub fn rows_limit(&self) -> usize {
        self.rows_limit
    }
}
