use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::column::Column;
use crate::datatype::{DataType, Substream};

/// Maximum string value size we'll allocate during reads (16 MiB). Prevents
/// OOM on corrupt files.
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Resolves a substream path to the byte sink it should be written to.
///
/// Returning `Ok(None)` means "skip this substream for this call": the
/// stream was already written this block (shared array sizes).
pub trait StreamSink {
    fn sink(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Write>>;
}

/// Resolves a substream path to the byte source it should be read from.
///
/// Returning `Ok(None)` means "the caller already holds this substream's
/// data", used to skip re-reading array sizes shared with an earlier column.
pub trait StreamSource {
    fn source(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Read>>;
}

/// Reads exactly `buf.len()` bytes, or reports a clean end-of-stream if the
/// source is exhausted before the first byte. EOF in the middle of a value is
/// an error; values never straddle the end of a stream.
fn read_exact_or_eof(input: &mut dyn Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended in the middle of a value",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn read_u64_or_eof(input: &mut dyn Read) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    Ok(read_exact_or_eof(input, &mut buf)?.then(|| u64::from_le_bytes(buf)))
}

fn type_mismatch(data_type: &DataType, column: &Column) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "column of type {:?} does not match data type {:?}",
            column.data_type(),
            data_type
        ),
    )
}

impl DataType {
    /// Writes all of `column` to the sinks provided by `sink`, one substream
    /// at a time in [`enumerate_streams`](Self::enumerate_streams) order.
    pub fn serialize_bulk(&self, column: &Column, sink: &mut dyn StreamSink) -> io::Result<()> {
        let mut path = Vec::new();
        self.serialize_walk(column, &mut path, sink)
    }

    fn serialize_walk(
        &self,
        column: &Column,
        path: &mut Vec<Substream>,
        sink: &mut dyn StreamSink,
    ) -> io::Result<()> {
        match (self, column) {
            (DataType::Array(inner), Column::Array { offsets, values }) => {
                path.push(Substream::ArraySizes);
                if let Some(out) = sink.sink(path)? {
                    // On disk: per-row sizes. In memory: cumulative offsets.
                    let mut prev = 0u64;
                    for &end in offsets {
                        out.write_u64::<LittleEndian>(end - prev)?;
                        prev = end;
                    }
                }
                path.pop();
                path.push(Substream::ArrayElements);
                let result = inner.serialize_walk(values, path, sink);
                path.pop();
                result
            }
            (DataType::Nullable(inner), Column::Nullable { nulls, values }) => {
                path.push(Substream::NullMap);
                if let Some(out) = sink.sink(path)? {
                    out.write_all(nulls)?;
                }
                path.pop();
                path.push(Substream::NullableValues);
                let result = inner.serialize_walk(values, path, sink);
                path.pop();
                result
            }
            (DataType::UInt32, Column::UInt32(values)) => {
                if let Some(out) = sink.sink(path)? {
                    for &v in values {
                        out.write_u32::<LittleEndian>(v)?;
                    }
                }
                Ok(())
            }
            (DataType::UInt64, Column::UInt64(values)) => {
                if let Some(out) = sink.sink(path)? {
                    for &v in values {
                        out.write_u64::<LittleEndian>(v)?;
                    }
                }
                Ok(())
            }
            (DataType::Float64, Column::Float64(values)) => {
                if let Some(out) = sink.sink(path)? {
                    for &v in values {
                        out.write_f64::<LittleEndian>(v)?;
                    }
                }
                Ok(())
            }
            (DataType::String, Column::String(values)) => {
                if let Some(out) = sink.sink(path)? {
                    for v in values {
                        if v.len() > u32::MAX as usize {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidInput,
                                "string value too large (exceeds u32::MAX bytes)",
                            ));
                        }
                        out.write_u32::<LittleEndian>(v.len() as u32)?;
                        out.write_all(v.as_bytes())?;
                    }
                }
                Ok(())
            }
            (data_type, column) => Err(type_mismatch(data_type, column)),
        }
    }

    /// Reads up to `max_rows` rows into `column` from the sources provided by
    /// `source`, stopping early on a clean end of stream.
    ///
    /// For an `Array` column whose sizes substream resolves to `None`, the
    /// caller must have pre-filled `offsets` for this batch; the element
    /// count to read is derived from them.
    pub fn deserialize_bulk(
        &self,
        column: &mut Column,
        source: &mut dyn StreamSource,
        max_rows: usize,
    ) -> io::Result<()> {
        let mut path = Vec::new();
        self.deserialize_walk(column, &mut path, source, max_rows)
    }

    fn deserialize_walk(
        &self,
        column: &mut Column,
        path: &mut Vec<Substream>,
        source: &mut dyn StreamSource,
        limit: usize,
    ) -> io::Result<()> {
        match (self, column) {
            (DataType::Array(inner), Column::Array { offsets, values }) => {
                path.push(Substream::ArraySizes);
                if let Some(input) = source.source(path)? {
                    let mut prev = offsets.last().copied().unwrap_or(0);
                    for _ in 0..limit {
                        match read_u64_or_eof(input)? {
                            Some(size) => {
                                prev += size;
                                offsets.push(prev);
                            }
                            None => break,
                        }
                    }
                }
                path.pop();
                let elements = offsets.last().copied().unwrap_or(0) as usize;
                let to_read = elements.saturating_sub(values.len());
                path.push(Substream::ArrayElements);
                let result = inner.deserialize_walk(values, path, source, to_read);
                path.pop();
                result
            }
            (DataType::Nullable(inner), Column::Nullable { nulls, values }) => {
                path.push(Substream::NullMap);
                if let Some(input) = source.source(path)? {
                    let mut byte = [0u8; 1];
                    for _ in 0..limit {
                        if !read_exact_or_eof(input, &mut byte)? {
                            break;
                        }
                        nulls.push(byte[0]);
                    }
                }
                path.pop();
                let to_read = nulls.len().saturating_sub(values.len());
                path.push(Substream::NullableValues);
                let result = inner.deserialize_walk(values, path, source, to_read);
                path.pop();
                result
            }
            (DataType::UInt32, Column::UInt32(values)) => {
                if let Some(input) = source.source(path)? {
                    let mut buf = [0u8; 4];
                    for _ in 0..limit {
                        if !read_exact_or_eof(input, &mut buf)? {
                            break;
                        }
                        values.push(u32::from_le_bytes(buf));
                    }
                }
                Ok(())
            }
            (DataType::UInt64, Column::UInt64(values)) => {
                if let Some(input) = source.source(path)? {
                    for _ in 0..limit {
                        match read_u64_or_eof(input)? {
                            Some(v) => values.push(v),
                            None => break,
                        }
                    }
                }
                Ok(())
            }
            (DataType::Float64, Column::Float64(values)) => {
                if let Some(input) = source.source(path)? {
                    let mut buf = [0u8; 8];
                    for _ in 0..limit {
                        if !read_exact_or_eof(input, &mut buf)? {
                            break;
                        }
                        values.push(f64::from_le_bytes(buf));
                    }
                }
                Ok(())
            }
            (DataType::String, Column::String(values)) => {
                if let Some(input) = source.source(path)? {
                    let mut len_buf = [0u8; 4];
                    for _ in 0..limit {
                        if !read_exact_or_eof(input, &mut len_buf)? {
                            break;
                        }
                        let len = u32::from_le_bytes(len_buf) as usize;
                        if len > MAX_STRING_BYTES {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!(
                                    "corrupt data: string length {} exceeds maximum {}",
                                    len, MAX_STRING_BYTES
                                ),
                            ));
                        }
                        let mut bytes = vec![0u8; len];
                        input.read_exact(&mut bytes)?;
                        let value = String::from_utf8(bytes).map_err(|e| {
                            io::Error::new(io::ErrorKind::InvalidData, e)
                        })?;
                        values.push(value);
                    }
                }
                Ok(())
            }
            (data_type, column) => Err(type_mismatch(data_type, column)),
        }
    }
}
