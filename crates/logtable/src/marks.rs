use std::fs::File;
use std::io::BufReader;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::TableState;

/// Name of the packed marks file inside a table directory.
pub const MARKS_FILE_NAME: &str = "__marks.mrk";

/// On-disk size of one mark: two little-endian `u64`s.
pub const MARK_SIZE: usize = 16;

/// Buffer size used when streaming the marks file on load.
const MARKS_READ_BUFFER: usize = 32 * 1024;

/// A mark closes one committed block in one stream's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mark {
    /// Cumulative row count of the stream up to and including this block.
    pub rows: u64,
    /// Byte offset in the plain data file where this block's frames begin.
    pub offset: u64,
}

/// Loads the marks file into the per-stream mark vectors.
///
/// The marks file is a packed matrix: one row per committed block,
/// `file_count` cells per row in `column_index` order, 16 bytes per cell.
/// A file size that is not a multiple of one row is fatal corruption.
///
/// Must be called under the exclusive lock, at most once per table; a missing
/// marks file simply means no blocks were committed yet.
pub(crate) fn load_marks(state: &mut TableState) -> Result<()> {
    if state.marks_loaded {
        return Ok(());
    }

    let marks_path = state.marks_path();
    if marks_path.exists() {
        let file_count = state.stream_order.len();
        let file_size = std::fs::metadata(&marks_path)?.len();
        let row_width = (file_count * MARK_SIZE) as u64;
        if file_size % row_width != 0 {
            return Err(Error::MarksInconsistent {
                path: marks_path,
                size: file_size,
            });
        }

        let marks_count = (file_size / row_width) as usize;
        for name in &state.stream_order {
            if let Some(file) = state.files.get_mut(name) {
                file.marks.reserve(marks_count);
            }
        }

        let mut reader = BufReader::with_capacity(MARKS_READ_BUFFER, File::open(&marks_path)?);
        for _ in 0..marks_count {
            for name in &state.stream_order {
                let rows = reader.read_u64::<LittleEndian>()?;
                let offset = reader.read_u64::<LittleEndian>()?;
                let file = state.files.get_mut(name).ok_or_else(|| {
                    Error::Logical(format!("no information about stream {} in table", name))
                })?;
                file.marks.push(Mark { rows, offset });
            }
        }
    }

    state.marks_loaded = true;
    Ok(())
}
