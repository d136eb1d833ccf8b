use std::fmt::Write as _;

use crate::column::Column;

/// A column data type. Composite types ([`Array`](DataType::Array),
/// [`Nullable`](DataType::Nullable)) serialize into multiple substreams; the
/// scalar types serialize into a single stream of fixed- or length-prefixed
/// values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    UInt32,
    UInt64,
    Float64,
    String,
    Array(Box<DataType>),
    Nullable(Box<DataType>),
}

/// One element of a substream path, identifying where in a composite type a
/// stream lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substream {
    /// Per-row array sizes of an `Array` column (shared across columns of the
    /// same nested table).
    ArraySizes,
    /// Marker: the path continues inside the array's element type.
    ArrayElements,
    /// Per-row null flags of a `Nullable` column.
    NullMap,
    /// Marker: the path continues inside the nullable's inner type.
    NullableValues,
}

/// A named, typed column in a table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

impl DataType {
    /// Invokes `callback` once per byte stream this type serializes into, in
    /// a stable order. The first emitted substream is the one whose value
    /// count equals the column's logical row count.
    pub fn enumerate_streams(&self, callback: &mut dyn FnMut(&[Substream])) {
        let mut path = Vec::new();
        self.enumerate_rec(&mut path, callback);
    }

    fn enumerate_rec(&self, path: &mut Vec<Substream>, callback: &mut dyn FnMut(&[Substream])) {
        match self {
            DataType::Array(inner) => {
                path.push(Substream::ArraySizes);
                callback(path);
                path.pop();
                path.push(Substream::ArrayElements);
                inner.enumerate_rec(path, callback);
                path.pop();
            }
            DataType::Nullable(inner) => {
                path.push(Substream::NullMap);
                callback(path);
                path.pop();
                path.push(Substream::NullableValues);
                inner.enumerate_rec(path, callback);
                path.pop();
            }
            _ => callback(path),
        }
    }

    /// Collects [`enumerate_streams`](Self::enumerate_streams) output into a
    /// vector, for callers that need fallible per-stream processing.
    pub fn substream_paths(&self) -> Vec<Vec<Substream>> {
        let mut paths = Vec::new();
        self.enumerate_streams(&mut |path| paths.push(path.to_vec()));
        paths
    }

    /// Strips a `Nullable` wrapper, if any.
    pub fn unwrap_nullable(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Creates an empty column of this type.
    pub fn create_column(&self) -> Column {
        match self {
            DataType::UInt32 => Column::UInt32(Vec::new()),
            DataType::UInt64 => Column::UInt64(Vec::new()),
            DataType::Float64 => Column::Float64(Vec::new()),
            DataType::String => Column::String(Vec::new()),
            DataType::Array(inner) => Column::Array {
                offsets: Vec::new(),
                values: Box::new(inner.create_column()),
            },
            DataType::Nullable(inner) => Column::Nullable {
                nulls: Vec::new(),
                values: Box::new(inner.create_column()),
            },
        }
    }
}

/// Escapes a column or table name for use as a file name: ASCII alphanumerics
/// and `_` pass through, every other byte becomes `%XX` (uppercase hex).
pub fn escape_for_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            out.push(b as char);
        } else {
            // Cannot fail when writing into a String.
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

/// The nested-table prefix of a column name: everything before the first `.`,
/// or the whole name for a top-level column. Columns `n.x` and `n.y` belong
/// to the same nested table `n` and share its sizes streams.
pub fn nested_table_name(column_name: &str) -> &str {
    match column_name.find('.') {
        Some(idx) => &column_name[..idx],
        None => column_name,
    }
}

/// The on-disk stream identifier for `(column_name, substream_path)`.
///
/// Pure and collision-free across distinct logical streams, while columns of
/// one nested table map to the same sizes stream: the sizes stream at array
/// nesting level `k` is named `<nested_table>.size<k>` regardless of which
/// member column reached it.
pub fn stream_name(column_name: &str, path: &[Substream]) -> String {
    let mut name = escape_for_file_name(column_name);
    let mut array_level = 0usize;
    for elem in path {
        match elem {
            Substream::ArraySizes => {
                name = format!(
                    "{}.size{}",
                    escape_for_file_name(nested_table_name(column_name)),
                    array_level
                );
            }
            Substream::ArrayElements => array_level += 1,
            Substream::NullMap => name.push_str(".null"),
            Substream::NullableValues => {}
        }
    }
    name
}
