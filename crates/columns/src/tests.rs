use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::*;

/// In-memory sink keeping one buffer per stream name, resolving paths the
/// same way the storage layer does.
#[derive(Default)]
struct MemSink {
    column: String,
    buffers: HashMap<String, Vec<u8>>,
    skip: Vec<String>,
}

impl MemSink {
    fn for_column(name: &str) -> Self {
        Self {
            column: name.to_string(),
            ..Self::default()
        }
    }
}

impl StreamSink for MemSink {
    fn sink(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Write>> {
        let name = stream_name(&self.column, path);
        if self.skip.contains(&name) {
            return Ok(None);
        }
        Ok(Some(self.buffers.entry(name).or_default() as &mut dyn Write))
    }
}

/// In-memory source reading back the buffers a `MemSink` produced.
struct MemSource {
    column: String,
    readers: HashMap<String, io::Cursor<Vec<u8>>>,
    skip: Vec<String>,
}

impl MemSource {
    fn new(column: &str, sink: MemSink) -> Self {
        Self {
            column: column.to_string(),
            readers: sink
                .buffers
                .into_iter()
                .map(|(name, buf)| (name, io::Cursor::new(buf)))
                .collect(),
            skip: Vec::new(),
        }
    }
}

impl StreamSource for MemSource {
    fn source(&mut self, path: &[Substream]) -> io::Result<Option<&mut dyn Read>> {
        let name = stream_name(&self.column, path);
        if self.skip.contains(&name) {
            return Ok(None);
        }
        match self.readers.get_mut(&name) {
            Some(reader) => Ok(Some(reader as &mut dyn Read)),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no stream {}", name),
            )),
        }
    }
}

fn roundtrip(data_type: &DataType, column: &Column) -> Column {
    let mut sink = MemSink::for_column("c");
    data_type.serialize_bulk(column, &mut sink).unwrap();
    let mut source = MemSource::new("c", sink);
    let mut out = data_type.create_column();
    data_type
        .deserialize_bulk(&mut out, &mut source, column.len())
        .unwrap();
    out
}

// --------------------- Stream naming ---------------------

#[test]
fn escape_keeps_word_characters() {
    assert_eq!(escape_for_file_name("col_1"), "col_1");
    assert_eq!(escape_for_file_name("n.x"), "n%2Ex");
    assert_eq!(escape_for_file_name("a b"), "a%20b");
}

#[test]
fn nested_table_name_is_prefix_before_dot() {
    assert_eq!(nested_table_name("n.x"), "n");
    assert_eq!(nested_table_name("plain"), "plain");
    assert_eq!(nested_table_name("a.b.c"), "a");
}

#[test]
fn scalar_stream_is_column_name() {
    assert_eq!(stream_name("a", &[]), "a");
}

#[test]
fn array_streams() {
    let t = DataType::Array(Box::new(DataType::UInt32));
    let mut names = Vec::new();
    t.enumerate_streams(&mut |path| names.push(stream_name("arr", path)));
    assert_eq!(names, vec!["arr.size0", "arr"]);
}

#[test]
fn nested_columns_share_sizes_stream() {
    let t = DataType::Array(Box::new(DataType::UInt32));
    let mut x_names = Vec::new();
    let mut y_names = Vec::new();
    t.enumerate_streams(&mut |path| x_names.push(stream_name("n.x", path)));
    t.enumerate_streams(&mut |path| y_names.push(stream_name("n.y", path)));
    assert_eq!(x_names, vec!["n.size0", "n%2Ex"]);
    assert_eq!(y_names, vec!["n.size0", "n%2Ey"]);
    // Same sizes stream, distinct value streams.
    assert_eq!(x_names[0], y_names[0]);
    assert_ne!(x_names[1], y_names[1]);
}

#[test]
fn nested_array_sizes_levels() {
    let t = DataType::Array(Box::new(DataType::Array(Box::new(DataType::UInt32))));
    let mut names = Vec::new();
    t.enumerate_streams(&mut |path| names.push(stream_name("a", path)));
    assert_eq!(names, vec!["a.size0", "a.size1", "a"]);
}

#[test]
fn nullable_streams() {
    let t = DataType::Nullable(Box::new(DataType::UInt32));
    let mut names = Vec::new();
    t.enumerate_streams(&mut |path| names.push(stream_name("a", path)));
    assert_eq!(names, vec!["a.null", "a"]);
}

#[test]
fn first_substream_carries_row_count() {
    // For arrays the sizes stream comes first: one size per logical row.
    let t = DataType::Array(Box::new(DataType::String));
    let paths = t.substream_paths();
    assert_eq!(paths[0], vec![Substream::ArraySizes]);
}

// --------------------- Serialization round-trips ---------------------

#[test]
fn uint32_roundtrip() {
    let column = Column::UInt32(vec![1, 2, 3, u32::MAX]);
    assert_eq!(roundtrip(&DataType::UInt32, &column), column);
}

#[test]
fn float64_roundtrip() {
    let column = Column::Float64(vec![0.0, -1.5, f64::MAX]);
    assert_eq!(roundtrip(&DataType::Float64, &column), column);
}

#[test]
fn string_roundtrip() {
    let column = Column::String(vec!["".into(), "hello".into(), "wörld".into()]);
    assert_eq!(roundtrip(&DataType::String, &column), column);
}

#[test]
fn array_roundtrip() {
    let t = DataType::Array(Box::new(DataType::UInt32));
    let column = Column::array_of_u32(&[&[1], &[], &[2, 3, 4]]);
    assert_eq!(roundtrip(&t, &column), column);
}

#[test]
fn nullable_roundtrip() {
    let t = DataType::Nullable(Box::new(DataType::UInt32));
    let column = Column::Nullable {
        nulls: vec![0, 1, 0],
        values: Box::new(Column::UInt32(vec![7, 0, 9])),
    };
    assert_eq!(roundtrip(&t, &column), column);
}

#[test]
fn deserialize_respects_max_rows() {
    let t = DataType::UInt32;
    let column = Column::UInt32(vec![1, 2, 3, 4, 5]);
    let mut sink = MemSink::for_column("c");
    t.serialize_bulk(&column, &mut sink).unwrap();
    let mut source = MemSource::new("c", sink);

    let mut out = t.create_column();
    t.deserialize_bulk(&mut out, &mut source, 2).unwrap();
    assert_eq!(out, Column::UInt32(vec![1, 2]));

    // The next call continues where the stream left off.
    t.deserialize_bulk(&mut out, &mut source, 100).unwrap();
    assert_eq!(out, Column::UInt32(vec![1, 2, 3, 4, 5]));
}

#[test]
fn skipped_sizes_stream_uses_prefilled_offsets() {
    let t = DataType::Array(Box::new(DataType::UInt32));
    let column = Column::array_of_u32(&[&[10], &[20, 30]]);

    let mut sink = MemSink::for_column("arr");
    t.serialize_bulk(&column, &mut sink).unwrap();

    let mut source = MemSource::new("arr", sink);
    source.skip.push("arr.size0".to_string());

    // Offsets provided by the caller; only the values stream is read.
    let mut out = Column::Array {
        offsets: vec![1, 3],
        values: Box::new(Column::UInt32(Vec::new())),
    };
    t.deserialize_bulk(&mut out, &mut source, 2).unwrap();
    assert_eq!(out, column);
}

#[test]
fn serialize_skips_shared_sizes_sink() {
    let t = DataType::Array(Box::new(DataType::UInt32));
    let column = Column::array_of_u32(&[&[1, 2]]);

    let mut sink = MemSink::for_column("n.x");
    sink.skip.push("n.size0".to_string());
    t.serialize_bulk(&column, &mut sink).unwrap();

    // Only the values stream was materialized.
    assert_eq!(sink.buffers.len(), 1);
    assert!(sink.buffers.contains_key("n%2Ex"));
}

#[test]
fn type_mismatch_is_rejected() {
    let mut sink = MemSink::for_column("c");
    let err = DataType::UInt64
        .serialize_bulk(&Column::UInt32(vec![1]), &mut sink)
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

// --------------------- Blocks ---------------------

#[test]
fn block_rows_come_from_first_column() {
    let mut block = Block::new();
    assert_eq!(block.rows(), 0);
    block.push("a", Column::UInt32(vec![1, 2, 3]));
    block.push("b", Column::String(vec!["x".into(), "y".into(), "z".into()]));
    assert_eq!(block.rows(), 3);
    assert_eq!(block.column("b").map(|c| c.len()), Some(3));
    assert!(block.column("missing").is_none());
}
